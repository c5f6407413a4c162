mod common;

use common::{Laptop, Student, StudentName, in_transaction, memory_factory};
use sessionorm::prelude::*;
use sessionorm::{FieldKind, Row, SqlType, Value};

#[derive(Embeddable, Debug, Clone, PartialEq)]
struct Address {
    street: String,
    city: String,
}

#[derive(Entity, Debug, Clone, PartialEq)]
#[entity(name = "Campus")]
struct CampusSite {
    #[entity(id)]
    code: String,
    #[entity(embedded, prefix = "main_")]
    main: Address,
    #[entity(embedded, prefix = "mail_")]
    mailing: Address,
}

fn address(street: &str, city: &str) -> Address {
    Address {
        street: street.to_string(),
        city: city.to_string(),
    }
}

#[test]
fn derived_descriptors_follow_the_attributes() {
    let descriptor = Student::descriptor();
    assert_eq!(descriptor.name, "Student");
    assert_eq!(descriptor.table, "student_table");
    let names: Vec<_> = descriptor.fields.iter().map(|f| f.name).collect();
    assert_eq!(names, ["id", "name", "age"]);
    assert_eq!(descriptor.id_field().unwrap().column_name(), Some("s_id"));
    assert!(matches!(
        descriptor.fields[1].kind,
        FieldKind::Embedded { prefix: "", .. }
    ));

    let embedded = StudentName::descriptor();
    assert_eq!(embedded.name, "StudentName");
    assert!(matches!(
        embedded.fields[2].kind,
        FieldKind::Column {
            column: "nickname",
            sql_type: SqlType::Text,
            nullable: true
        }
    ));

    assert_eq!(Laptop::descriptor().table, "laptop");
    assert_eq!(CampusSite::descriptor().name, "Campus");
    assert_eq!(CampusSite::descriptor().table, "campus_site");
}

#[test]
fn embedded_values_flatten_into_the_owner_row() {
    let factory = SessionFactory::build(
        &Configuration::new()
            .url("memory://embedded-flatten")
            .register::<Student>()
            .register::<CampusSite>(),
    )
    .unwrap();

    let mapping = factory.registry().mapping::<Student>().unwrap();
    let columns: Vec<_> = mapping.columns().iter().map(|c| c.column.as_str()).collect();
    assert_eq!(columns, ["s_id", "first_name", "last_name", "nickname", "age"]);

    let campus = factory.registry().mapping::<CampusSite>().unwrap();
    let columns: Vec<_> = campus.columns().iter().map(|c| c.column.as_str()).collect();
    assert_eq!(
        columns,
        ["code", "main_street", "main_city", "mail_street", "mail_city"]
    );

    let row = mapping.to_row(&Student::new(1, "Ada", "Byron", 20)).unwrap();
    assert_eq!(row.get_by_name("first_name"), Some(&Value::Text("Ada".into())));
    assert_eq!(row.get_by_name("nickname"), Some(&Value::Null));
}

#[test]
fn embedded_values_round_trip_through_storage() {
    let factory = SessionFactory::build(
        &Configuration::new()
            .url("memory://embedded-round-trip")
            .register::<CampusSite>(),
    )
    .unwrap();

    let session = factory.open_session().unwrap();
    let site = CampusSite {
        code: "N".into(),
        main: address("1 Quad", "Oxford"),
        mailing: address("PO Box 7", "Abingdon"),
    };
    in_transaction(&session, |s| {
        s.persist(site.clone()).unwrap();
    });

    let other = factory.open_session().unwrap();
    let loaded = other.find::<CampusSite>("N").unwrap().unwrap();
    assert_eq!(loaded.get(), site);

    in_transaction(&other, |_| {
        loaded.write().mailing.city = "Didcot".into();
    });
    let stored = factory
        .storage()
        .fetch("campus_site", &PrimaryKey::from("N"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_by_name("mail_city"), Some(&Value::Text("Didcot".into())));
    assert_eq!(stored.get_by_name("main_city"), Some(&Value::Text("Oxford".into())));
}

#[test]
fn transient_fields_are_reset_on_load() {
    let factory = memory_factory("embedded-transient");
    let session = factory.open_session().unwrap();
    let mut student = Student::new(1, "Ada", "Byron", 20);
    student.visits = 12;
    in_transaction(&session, |s| {
        s.persist(student).unwrap();
    });

    let other = factory.open_session().unwrap();
    let loaded = other.find::<Student>(1).unwrap().unwrap();
    assert_eq!(loaded.read().visits, 0);

    loaded.write().visits = 5;
    assert!(!other.is_dirty().unwrap());
}

#[test]
fn record_conversion_is_symmetric() {
    let mut student = Student::new(7, "Grace", "Hopper", 37);
    student.name.nickname = Some("Amazing Grace".into());

    let record = student.to_record();
    assert_eq!(record.len(), 3);
    let back = Student::from_record(record).unwrap();
    assert_eq!(back, student);
    assert_eq!(student.primary_key(), Value::Int(7));
}

#[test]
fn mismatched_stored_types_are_reported() {
    let factory = memory_factory("embedded-mismatch");
    let mapping = factory.registry().mapping::<Laptop>().unwrap();
    let row = Row::new(
        vec!["serial".into(), "model".into(), "owner_id".into()],
        vec![Value::Text("SN-9".into()), Value::Int(5), Value::Null],
    );
    let err = mapping.to_entity::<Laptop>(&row).unwrap_err();
    assert!(err.to_string().contains("model"), "{err}");
}
