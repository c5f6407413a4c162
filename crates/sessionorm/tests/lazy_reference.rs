mod common;

use common::{Laptop, Student, config, in_transaction};
use sessionorm::prelude::*;
use sessionorm::{MemoryStorage, Row, SchemaAction, Storage, TableSchema, WriteBatch};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory storage that counts row fetches.
struct CountingStorage {
    inner: MemoryStorage,
    fetches: AtomicUsize,
}

impl CountingStorage {
    fn new(name: &str) -> Self {
        Self {
            inner: MemoryStorage::new(name),
            fetches: AtomicUsize::new(0),
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Storage for CountingStorage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prepare(&self, schema: &TableSchema, action: SchemaAction) -> Result<()> {
        self.inner.prepare(schema, action)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.inner.drop_table(table)
    }

    fn fetch(&self, table: &str, key: &PrimaryKey) -> Result<Option<Row>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(table, key)
    }

    fn contains(&self, table: &str, key: &PrimaryKey) -> Result<bool> {
        self.inner.contains(table, key)
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        self.inner.row_count(table)
    }

    fn apply(&self, batch: &WriteBatch) -> Result<()> {
        self.inner.apply(batch)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

fn counting_factory(name: &str) -> (Arc<SessionFactory>, Arc<CountingStorage>) {
    let storage = Arc::new(CountingStorage::new(name));
    let shared: Arc<dyn Storage> = storage.clone();
    let factory = SessionFactory::with_storage(&config("memory://unused"), shared).unwrap();
    let session = factory.open_session().unwrap();
    in_transaction(&session, |s| {
        s.persist(Student::new(1, "Ada", "Byron", 20)).unwrap();
        s.persist(Laptop::new("SN-1", "T480", Some(1))).unwrap();
    });
    (factory, storage)
}

#[test]
fn reference_defers_the_fetch_until_first_access() {
    let (factory, storage) = counting_factory("lazy-defer");
    let session = factory.open_session().unwrap();

    let reference = session.get_reference::<Student>(1).unwrap();
    assert!(!reference.is_loaded());
    assert_eq!(storage.fetches(), 0);

    let age = reference.with(|s| s.age).unwrap();
    assert_eq!(age, 20);
    assert!(reference.is_loaded());
    assert_eq!(storage.fetches(), 1);

    let first_name = reference.with(|s| s.name.first.clone()).unwrap();
    assert_eq!(first_name, "Ada");
    assert_eq!(storage.fetches(), 1);
}

#[test]
fn reference_and_find_share_the_managed_instance() {
    let (factory, storage) = counting_factory("lazy-shared");
    let session = factory.open_session().unwrap();

    let reference = session.get_reference::<Laptop>("SN-1").unwrap();
    let managed = reference.get().unwrap();
    let found = session.find::<Laptop>("SN-1").unwrap().unwrap();
    assert!(managed.ptr_eq(&found));
    assert_eq!(storage.fetches(), 1);

    let again = session.get_reference::<Laptop>("SN-1").unwrap();
    assert!(again.is_loaded());
    assert!(reference.get().unwrap().ptr_eq(&found));
}

#[test]
fn writes_through_a_reference_are_committed() {
    let (factory, _storage) = counting_factory("lazy-write");
    let session = factory.open_session().unwrap();
    let reference = session.get_reference::<Student>(1).unwrap();

    in_transaction(&session, |_| {
        reference.get().unwrap().write().age = 33;
    });

    let other = factory.open_session().unwrap();
    let fresh = other.find::<Student>(1).unwrap().unwrap();
    assert_eq!(fresh.read().age, 33);
}

#[test]
fn missing_rows_surface_on_access() {
    let (factory, storage) = counting_factory("lazy-missing");
    let session = factory.open_session().unwrap();

    let reference = session.get_reference::<Student>(404).unwrap();
    assert_eq!(storage.fetches(), 0);

    let err = reference.get().unwrap_err();
    assert!(matches!(err, Error::EntityNotFound(ref k) if k.key == PrimaryKey::from(404)));
    assert!(matches!(reference.get(), Err(Error::EntityNotFound(_))));
    assert_eq!(storage.fetches(), 2);
}

#[test]
fn unloaded_reference_cannot_load_after_close() {
    let (factory, storage) = counting_factory("lazy-closed");
    let session = factory.open_session().unwrap();

    let loaded = session.get_reference::<Student>(1).unwrap();
    loaded.get().unwrap();
    let unloaded = session.get_reference::<Laptop>("SN-1").unwrap();
    session.close().unwrap();

    assert!(matches!(unloaded.get(), Err(Error::ClosedSession)));
    assert_eq!(loaded.with(|s| s.name.last.clone()).unwrap(), "Byron");
    assert_eq!(storage.fetches(), 1);
}

#[test]
fn debug_output_shows_load_state() {
    let (factory, _storage) = counting_factory("lazy-state");
    let session = factory.open_session().unwrap();

    let persisted = session.persist(Student::new(2, "Alan", "Turing", 41)).unwrap();
    let tracked = session.get_reference::<Student>(2).unwrap();
    assert!(tracked.is_loaded());
    assert!(tracked.get().unwrap().ptr_eq(&persisted));

    let reference = session.get_reference::<Student>(1).unwrap();
    let rendered = format!("{reference:?}");
    assert!(rendered.contains("Unloaded"), "{rendered}");
    reference.get().unwrap();
    let rendered = format!("{reference:?}");
    assert!(rendered.contains("Loaded("), "{rendered}");
}
