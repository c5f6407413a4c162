//! Entities shared by the integration tests.
#![allow(dead_code)]

use sessionorm::prelude::*;
use std::sync::Arc;

#[derive(Embeddable, Debug, Clone, PartialEq)]
pub struct StudentName {
    #[entity(column = "first_name")]
    pub first: String,
    #[entity(column = "last_name")]
    pub last: String,
    pub nickname: Option<String>,
}

#[derive(Entity, Debug, Clone, PartialEq)]
#[entity(table = "student_table")]
pub struct Student {
    #[entity(id, column = "s_id")]
    pub id: i32,
    #[entity(embedded)]
    pub name: StudentName,
    pub age: i32,
    #[entity(transient)]
    pub visits: u32,
}

impl Student {
    pub fn new(id: i32, first: &str, last: &str, age: i32) -> Self {
        Self {
            id,
            name: StudentName {
                first: first.to_string(),
                last: last.to_string(),
                nickname: None,
            },
            age,
            visits: 0,
        }
    }
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct Laptop {
    #[entity(id)]
    pub serial: String,
    pub model: String,
    #[entity(column = "owner_id")]
    pub owner: Option<i32>,
}

impl Laptop {
    pub fn new(serial: &str, model: &str, owner: Option<i32>) -> Self {
        Self {
            serial: serial.to_string(),
            model: model.to_string(),
            owner,
        }
    }
}

pub fn config(url: &str) -> Configuration {
    Configuration::new()
        .url(url)
        .register::<Student>()
        .register::<Laptop>()
}

pub fn memory_factory(name: &str) -> Arc<SessionFactory> {
    SessionFactory::build(&config(&format!("memory://{name}"))).unwrap()
}

/// Run `work` inside a committed transaction.
pub fn in_transaction<T>(session: &Session, work: impl FnOnce(&Session) -> T) -> T {
    let mut tx = session.begin_transaction().unwrap();
    let out = work(session);
    tx.commit().unwrap();
    out
}
