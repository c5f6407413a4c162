//! Shared test entity and factory.

use crate::SessionFactory;
use sessionorm_core::{
    Configuration, Entity, EntityDescriptor, EntityRegistry, FieldDescriptor, Record, Result,
    SqlType, Value,
};
use std::sync::Arc;

static STUDENT_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::id("id", "s_id", SqlType::Integer),
    FieldDescriptor::column("name", "s_name", SqlType::Text, false),
    FieldDescriptor::column("age", "age", SqlType::Integer, false),
];
static STUDENT: EntityDescriptor = EntityDescriptor::new("Student", "student_table", STUDENT_FIELDS);

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Student {
    pub(crate) id: i32,
    pub(crate) name: String,
    pub(crate) age: i32,
}

impl Student {
    pub(crate) fn new(id: i32, name: &str, age: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            age,
        }
    }
}

impl Entity for Student {
    fn descriptor() -> &'static EntityDescriptor {
        &STUDENT
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("age", self.age)
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_column("id")?,
            name: record.take_column("name")?,
            age: record.take_column("age")?,
        })
    }

    fn primary_key(&self) -> Value {
        Value::Int(self.id)
    }
}

pub(crate) fn registry() -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    registry.register::<Student>().unwrap();
    registry
}

pub(crate) fn factory() -> Arc<SessionFactory> {
    SessionFactory::build(
        &Configuration::new()
            .url("memory://session-unit")
            .register::<Student>(),
    )
    .unwrap()
}
