mod common;

use common::{Laptop, Student, in_transaction, memory_factory};
use sessionorm::Value;
use sessionorm::prelude::*;

#[test]
fn persisted_entities_are_visible_to_later_sessions() {
    let factory = memory_factory("lifecycle-persist");

    let session = factory.open_session().unwrap();
    in_transaction(&session, |s| {
        s.persist(Student::new(1, "Ada", "Byron", 20)).unwrap();
        s.persist(Laptop::new("SN-1", "T480", Some(1))).unwrap();
    });
    session.close().unwrap();

    let session = factory.open_session().unwrap();
    let student = session.find::<Student>(1).unwrap().unwrap();
    assert_eq!(student.get(), Student::new(1, "Ada", "Byron", 20));
    let laptop = session.find::<Laptop>("SN-1").unwrap().unwrap();
    assert_eq!(laptop.read().owner, Some(1));
    assert!(session.find::<Student>(2).unwrap().is_none());

    let stats = factory.stats();
    assert_eq!(stats.entities_inserted, 2);
    assert_eq!(stats.transactions_committed, 1);
}

#[test]
fn identity_map_hands_out_one_instance_per_row() {
    let factory = memory_factory("lifecycle-identity");
    let session = factory.open_session().unwrap();
    let persisted = in_transaction(&session, |s| {
        s.persist(Student::new(1, "Ada", "Byron", 20)).unwrap()
    });

    let a = session.find::<Student>(1).unwrap().unwrap();
    let b = session.find::<Student>(1_i64).unwrap().unwrap();
    assert!(a.ptr_eq(&b));
    assert!(a.ptr_eq(&persisted));

    a.write().age = 30;
    assert_eq!(b.read().age, 30);
    assert_eq!(factory.stats().entities_loaded, 0);
}

#[test]
fn changes_reach_storage_only_at_commit() {
    let factory = memory_factory("lifecycle-dirty");
    let session = factory.open_session().unwrap();
    let student = in_transaction(&session, |s| {
        s.persist(Student::new(1, "Ada", "Byron", 20)).unwrap()
    });

    let mut tx = session.begin_transaction().unwrap();
    student.write().name.nickname = Some("Countess".to_string());
    assert!(session.is_dirty().unwrap());

    let stored = factory
        .storage()
        .fetch("student_table", &PrimaryKey::from(1))
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_by_name("nickname"), Some(&Value::Null));

    tx.commit().unwrap();
    assert!(!session.is_dirty().unwrap());

    let other = factory.open_session().unwrap();
    let fresh = other.find::<Student>(1).unwrap().unwrap();
    assert_eq!(fresh.read().name.nickname.as_deref(), Some("Countess"));
    assert_eq!(factory.stats().entities_updated, 1);
}

#[test]
fn rollback_restores_loaded_state() {
    let factory = memory_factory("lifecycle-rollback");
    let session = factory.open_session().unwrap();
    let student = in_transaction(&session, |s| {
        s.persist(Student::new(1, "Ada", "Byron", 20)).unwrap()
    });

    let mut tx = session.begin_transaction().unwrap();
    student.write().age = 99;
    session.persist(Student::new(2, "Alan", "Turing", 41)).unwrap();
    tx.rollback().unwrap();

    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(student.read().age, 20);
    assert!(session.find::<Student>(2).unwrap().is_none());
    assert_eq!(factory.storage().row_count("student_table").unwrap(), 1);
}

#[test]
fn remove_deletes_at_commit() {
    let factory = memory_factory("lifecycle-remove");
    let session = factory.open_session().unwrap();
    in_transaction(&session, |s| {
        s.persist(Laptop::new("SN-1", "T480", None)).unwrap();
        s.persist(Laptop::new("SN-2", "X1", None)).unwrap();
    });

    let other = factory.open_session().unwrap();
    in_transaction(&other, |s| {
        let laptop = s.find::<Laptop>("SN-1").unwrap().unwrap().get();
        s.remove(&laptop).unwrap();
        assert_eq!(s.debug_state().pending_delete, 1);
        assert!(s.find::<Laptop>("SN-1").unwrap().is_none());
        s.remove_by_key::<Laptop>("SN-2").unwrap();
    });

    assert_eq!(factory.storage().row_count("laptop").unwrap(), 0);
    let err = other.remove_by_key::<Laptop>("SN-3").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn persist_rejects_known_keys() {
    let factory = memory_factory("lifecycle-duplicate");
    let session = factory.open_session().unwrap();
    session.persist(Student::new(1, "Ada", "Byron", 20)).unwrap();
    let err = session.persist(Student::new(1, "Ada", "Lovelace", 20)).unwrap_err();
    assert!(err.is_duplicate_key(), "{err}");

    in_transaction(&session, |_| {});
    let other = factory.open_session().unwrap();
    let err = other.persist(Student::new(1, "Someone", "Else", 30)).unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(ref k) if k.key == PrimaryKey::from(1)));
}

#[test]
fn merge_copies_detached_state_onto_managed_instance() {
    let factory = memory_factory("lifecycle-merge");
    let session = factory.open_session().unwrap();
    let managed = in_transaction(&session, |s| {
        s.merge(Student::new(1, "Ada", "Byron", 20)).unwrap()
    });
    assert_eq!(factory.stats().entities_inserted, 1);

    let mut detached = managed.get();
    detached.age = 21;
    let merged = in_transaction(&session, |s| s.merge(detached).unwrap());
    assert!(merged.ptr_eq(&managed));
    assert_eq!(managed.read().age, 21);

    let other = factory.open_session().unwrap();
    let copy = in_transaction(&other, |s| {
        let mut changed = Student::new(1, "Ada", "Lovelace", 21);
        changed.visits = 3;
        s.merge(changed).unwrap()
    });
    assert_eq!(copy.read().name.last, "Lovelace");
    assert_eq!(factory.stats().entities_updated, 2);
}

#[test]
fn merge_upserts_a_single_row() {
    let factory = memory_factory("lifecycle-upsert");
    let session = factory.open_session().unwrap();
    in_transaction(&session, |s| {
        s.merge(Student::new(3, "Grace", "Hopper", 37)).unwrap();
    });
    session.close().unwrap();

    let session = factory.open_session().unwrap();
    in_transaction(&session, |s| {
        s.merge(Student::new(3, "Grace", "Hopper", 38)).unwrap();
    });

    assert_eq!(factory.storage().row_count("student_table").unwrap(), 1);
    let stored = factory
        .storage()
        .fetch("student_table", &PrimaryKey::from(3))
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_by_name("age").and_then(Value::as_i64), Some(38));
}

#[test]
fn finished_transactions_cannot_be_reused() {
    let factory = memory_factory("lifecycle-reuse");
    let session = factory.open_session().unwrap();

    let mut tx = session.begin_transaction().unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, Error::Transaction(_)), "{err}");
    assert!(tx.begin().is_err());

    let mut tx = session.begin_transaction().unwrap();
    assert!(session.begin_transaction().is_err());
    tx.rollback().unwrap();
    assert!(tx.rollback().is_err());
    assert!(tx.commit().is_err());
}

#[test]
fn failed_commit_leaves_storage_and_session_consistent() {
    let factory = memory_factory("lifecycle-failed-commit");
    let first = factory.open_session().unwrap();
    let second = factory.open_session().unwrap();

    let mut tx = first.begin_transaction().unwrap();
    first.persist(Student::new(1, "Ada", "Byron", 20)).unwrap();
    first.persist(Laptop::new("SN-1", "T480", Some(1))).unwrap();

    in_transaction(&second, |s| {
        s.persist(Laptop::new("SN-1", "X1", None)).unwrap();
    });

    let err = tx.commit().unwrap_err();
    assert!(matches!(err, Error::Commit(_)), "{err}");
    assert!(matches!(
        err.root_cause(),
        Error::DuplicateKey(k) if k.entity == "Laptop" && k.key == PrimaryKey::from("SN-1")
    ));
    assert!(err.to_string().contains("Laptop#SN-1"), "{err}");
    assert_eq!(tx.state(), TransactionState::RolledBack);

    assert_eq!(factory.storage().row_count("student_table").unwrap(), 0);
    assert_eq!(first.managed_count(), 0);
    assert!(!first.has_active_transaction());
}

#[test]
fn debug_state_tracks_pending_work() {
    let factory = memory_factory("lifecycle-states");
    let session = factory.open_session().unwrap();
    let mut tx = session.begin_transaction().unwrap();
    let student = session.persist(Student::new(1, "Ada", "Byron", 20)).unwrap();

    let info = session.debug_state();
    assert_eq!(info.pending_new, 1);
    assert!(info.in_transaction);
    tx.commit().unwrap();

    let info = session.debug_state();
    assert_eq!((info.tracked, info.pending_new), (1, 0));
    assert!(session.contains(&student).unwrap());
    assert!(session.detach(&student).unwrap());
    assert!(!session.contains(&student).unwrap());
    assert_eq!(session.debug_state().tracked, 0);
}

#[test]
fn closed_session_rejects_every_operation() {
    let factory = memory_factory("lifecycle-closed-session");
    let session = factory.open_session().unwrap();
    session.close().unwrap();

    assert!(!session.is_open());
    assert!(matches!(session.find::<Student>(1), Err(Error::ClosedSession)));
    assert!(matches!(
        session.persist(Student::new(1, "Ada", "Byron", 20)),
        Err(Error::ClosedSession)
    ));
    assert!(matches!(session.begin_transaction(), Err(Error::ClosedSession)));
    assert!(matches!(session.close(), Err(Error::ClosedSession)));
}

#[test]
fn closed_factory_rejects_sessions_but_lets_them_close() {
    let factory = memory_factory("lifecycle-closed-factory");
    let session = factory.open_session().unwrap();
    factory.close().unwrap();
    factory.close().unwrap();

    assert!(matches!(factory.open_session(), Err(Error::ClosedFactory)));
    let err = session.find::<Student>(1).unwrap_err();
    assert!(matches!(err, Error::ClosedFactory));
    assert!(err.is_closed());
    session.close().unwrap();
}
