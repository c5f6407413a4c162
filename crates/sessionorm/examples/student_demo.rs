//! Walk through a session's life: persist, lazy load, update, remove.
//!
//! Run with `RUST_LOG=sessionorm_session=debug` to watch the unit of work.

use sessionorm::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Embeddable, Debug, Clone, PartialEq)]
struct StudentName {
    #[entity(column = "first_name")]
    first: String,
    #[entity(column = "last_name")]
    last: String,
}

#[derive(Entity, Debug, Clone, PartialEq)]
#[entity(table = "student_table")]
struct Student {
    #[entity(id, column = "s_id")]
    id: i32,
    #[entity(embedded)]
    name: StudentName,
    age: i32,
}

#[derive(Entity, Debug, Clone, PartialEq)]
struct Laptop {
    #[entity(id)]
    serial: String,
    model: String,
    #[entity(column = "owner_id")]
    owner: Option<i32>,
}

static FACTORY: FactoryCell = FactoryCell::new();

fn student(id: i32, first: &str, last: &str, age: i32) -> Student {
    Student {
        id,
        name: StudentName {
            first: first.to_string(),
            last: last.to_string(),
        },
        age,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let factory = FACTORY.get_instance(|| {
        Ok(Configuration::new()
            .url("memory://demo")
            .log_statements(true)
            .register::<Student>()
            .register::<Laptop>())
    })?;

    // Enroll two students and hand out a laptop.
    let session = factory.open_session()?;
    let mut tx = session.begin_transaction()?;
    session.persist(student(1, "Ada", "Byron", 20))?;
    session.persist(student(2, "Alan", "Turing", 22))?;
    session.persist(Laptop {
        serial: "SN-1".to_string(),
        model: "T480".to_string(),
        owner: Some(1),
    })?;
    tx.commit()?;
    session.close()?;

    // A fresh session loads lazily and writes changes back at commit.
    let session = factory.open_session()?;
    let ada = session.get_reference::<Student>(1)?;
    println!("reference loaded before access: {}", ada.is_loaded());

    let mut tx = session.begin_transaction()?;
    ada.get()?.write().age += 1;
    session.remove_by_key::<Student>(2)?;
    session.merge(student(3, "Grace", "Hopper", 37))?;
    tx.commit()?;

    let ada = ada.cloned()?;
    println!("{} {} is now {}", ada.name.first, ada.name.last, ada.age);
    println!("student 2 present: {}", session.find::<Student>(2)?.is_some());
    println!("student 3 present: {}", session.find::<Student>(3)?.is_some());

    if let Some(laptop) = session.find::<Laptop>("SN-1")? {
        let laptop = laptop.get();
        println!("{} belongs to student {:?}", laptop.model, laptop.owner);
    }

    session.close()?;
    println!("{:#?}", factory.stats());
    factory.close()
}
