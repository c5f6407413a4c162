//! Session factory and construct-once factory cell.
//!
//! A `SessionFactory` owns the storage connection, the validated entity
//! registry and the behavioural settings. It is built once per
//! configuration and shared as `Arc<SessionFactory>`; sessions keep their
//! own reference to the shared state, so a factory outlives every session
//! it opened.

use crate::Session;
use sessionorm_core::{
    ConfigError, Configuration, EntityRegistry, Error, Result, SchemaAction, Settings, Storage,
    StorageErrorKind,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Running counters, shared by the factory and its sessions.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) sessions_opened: AtomicU64,
    pub(crate) sessions_closed: AtomicU64,
    pub(crate) transactions_committed: AtomicU64,
    pub(crate) transactions_rolled_back: AtomicU64,
    pub(crate) entities_loaded: AtomicU64,
    pub(crate) entities_inserted: AtomicU64,
    pub(crate) entities_updated: AtomicU64,
    pub(crate) entities_deleted: AtomicU64,
}

impl StatCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: usize) {
        counter.fetch_add(by as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FactoryStats {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FactoryStats {
            sessions_opened: read(&self.sessions_opened),
            sessions_closed: read(&self.sessions_closed),
            transactions_committed: read(&self.transactions_committed),
            transactions_rolled_back: read(&self.transactions_rolled_back),
            entities_loaded: read(&self.entities_loaded),
            entities_inserted: read(&self.entities_inserted),
            entities_updated: read(&self.entities_updated),
            entities_deleted: read(&self.entities_deleted),
        }
    }
}

/// Point-in-time copy of a factory's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactoryStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub entities_loaded: u64,
    pub entities_inserted: u64,
    pub entities_updated: u64,
    pub entities_deleted: u64,
}

pub(crate) struct FactoryShared {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) registry: EntityRegistry,
    pub(crate) settings: Settings,
    pub(crate) stats: StatCounters,
    closed: AtomicBool,
    next_session: AtomicU64,
}

impl FactoryShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Thread-safe source of sessions for one storage and one set of mappings.
pub struct SessionFactory {
    shared: Arc<FactoryShared>,
}

impl SessionFactory {
    /// Connect to the configured storage and prepare every mapped table.
    #[allow(clippy::result_large_err)]
    pub fn build(config: &Configuration) -> Result<Arc<Self>> {
        let storage = sessionorm_store::open_storage(config.connection_config())?;
        Self::with_storage(config, storage)
    }

    /// Like `build`, over an already opened storage. The connection part
    /// of `config` is ignored.
    #[allow(clippy::result_large_err)]
    pub fn with_storage(config: &Configuration, storage: Arc<dyn Storage>) -> Result<Arc<Self>> {
        let registry = config.build_registry()?;
        let settings = config.current_settings();

        for mapping in registry.iter() {
            if let Err(e) = storage.prepare(&mapping.schema(), settings.schema_action) {
                let schema_problem = matches!(
                    &e,
                    Error::Storage(se) if matches!(
                        se.kind,
                        StorageErrorKind::SchemaMismatch | StorageErrorKind::UnknownTable
                    )
                );
                if !schema_problem {
                    return Err(e);
                }
                return Err(Error::Configuration(ConfigError {
                    message: format!(
                        "table '{}' of {} does not match storage '{}'",
                        mapping.table(),
                        mapping.entity_name(),
                        storage.name()
                    ),
                    source: Some(Box::new(e)),
                }));
            }
        }

        tracing::info!(
            storage = storage.name(),
            entities = registry.len(),
            schema_action = ?settings.schema_action,
            "Session factory built"
        );

        Ok(Arc::new(Self {
            shared: Arc::new(FactoryShared {
                storage,
                registry,
                settings,
                stats: StatCounters::default(),
                closed: AtomicBool::new(false),
                next_session: AtomicU64::new(1),
            }),
        }))
    }

    /// Open a new session. Fails with `ClosedFactory` after `close`.
    #[allow(clippy::result_large_err)]
    pub fn open_session(&self) -> Result<Session> {
        if self.is_closed() {
            return Err(Error::ClosedFactory);
        }
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        StatCounters::bump(&self.shared.stats.sessions_opened, 1);
        tracing::debug!(session = id, "Opened session");
        Ok(Session::new(id, Arc::clone(&self.shared)))
    }

    /// Release the storage. Idempotent.
    ///
    /// With `SchemaAction::CreateDrop` the mapped tables are dropped first.
    /// Sessions still open afterwards fail with `ClosedFactory`.
    #[allow(clippy::result_large_err)]
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        if self.shared.settings.schema_action == SchemaAction::CreateDrop {
            for mapping in self.shared.registry.iter() {
                if let Err(e) = self.shared.storage.drop_table(mapping.table()) {
                    tracing::warn!(table = mapping.table(), error = %e, "Failed to drop table");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Err(e) = self.shared.storage.close() {
            first_error.get_or_insert(e);
        }

        tracing::info!(storage = self.shared.storage.name(), "Session factory closed");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn stats(&self) -> FactoryStats {
        self.shared.stats.snapshot()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.shared.registry
    }

    pub fn settings(&self) -> Settings {
        self.shared.settings
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.shared.storage
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("storage", &self.shared.storage.name())
            .field("entities", &self.shared.registry.len())
            .field("settings", &self.shared.settings)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Holds at most one factory, built on first request.
///
/// The fast path is a lock-free read of the initialized cell; racing first
/// callers serialize on a mutex and re-check before building, so the
/// configuration closure runs at most once per cell.
///
/// ```ignore
/// static FACTORY: FactoryCell = FactoryCell::new();
///
/// let factory = FACTORY.get_instance(|| {
///     Ok(Configuration::configure()?.register::<Student>())
/// })?;
/// ```
#[derive(Debug, Default)]
pub struct FactoryCell {
    instance: OnceLock<Arc<SessionFactory>>,
    init: Mutex<()>,
}

impl FactoryCell {
    pub const fn new() -> Self {
        Self {
            instance: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// The factory, if one has been built.
    pub fn get(&self) -> Option<Arc<SessionFactory>> {
        self.instance.get().map(Arc::clone)
    }

    /// Return the cell's factory, building it from `configure` on first use.
    ///
    /// A failed build leaves the cell empty; the next call tries again.
    /// A factory that was closed stays in the cell.
    #[allow(clippy::result_large_err)]
    pub fn get_instance(
        &self,
        configure: impl FnOnce() -> Result<Configuration>,
    ) -> Result<Arc<SessionFactory>> {
        if let Some(factory) = self.instance.get() {
            return Ok(Arc::clone(factory));
        }

        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(factory) = self.instance.get() {
            return Ok(Arc::clone(factory));
        }

        let factory = SessionFactory::build(&configure()?)?;
        Ok(Arc::clone(self.instance.get_or_init(|| factory)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Student;

    fn config() -> Configuration {
        Configuration::new()
            .url("memory://factory-unit")
            .register::<Student>()
    }

    #[test]
    fn build_prepares_tables() {
        let factory = SessionFactory::build(&config()).unwrap();
        assert_eq!(factory.registry().len(), 1);
        assert_eq!(factory.storage().row_count("student_table").unwrap(), 0);
        assert!(!factory.is_closed());
    }

    #[test]
    fn closed_factory_refuses_sessions() {
        let factory = SessionFactory::build(&config()).unwrap();
        factory.close().unwrap();
        factory.close().unwrap();
        assert!(matches!(factory.open_session(), Err(Error::ClosedFactory)));
    }

    #[test]
    fn validate_reports_missing_tables_as_configuration_errors() {
        let err = SessionFactory::build(&config().schema_action(SchemaAction::Validate)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn missing_url_is_a_configuration_error() {
        let err = SessionFactory::build(&Configuration::new().register::<Student>()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn stats_count_sessions_and_writes() {
        let factory = SessionFactory::build(&config()).unwrap();
        let session = factory.open_session().unwrap();
        let mut tx = session.begin_transaction().unwrap();
        session.persist(Student::new(1, "A", 20)).unwrap();
        tx.commit().unwrap();
        session.close().unwrap();

        let session = factory.open_session().unwrap();
        assert!(session.find::<Student>(1).unwrap().is_some());
        drop(session);

        let stats = factory.stats();
        assert_eq!(stats.sessions_opened, 2);
        assert_eq!(stats.sessions_closed, 2);
        assert_eq!(stats.transactions_committed, 1);
        assert_eq!(stats.entities_inserted, 1);
        assert_eq!(stats.entities_loaded, 1);
    }

    #[test]
    fn cell_builds_once() {
        let cell = FactoryCell::new();
        assert!(cell.get().is_none());

        let first = cell.get_instance(|| Ok(config())).unwrap();
        let second = cell
            .get_instance(|| panic!("configuration must not be read twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &cell.get().unwrap()));
    }

    #[test]
    fn failed_build_leaves_cell_empty() {
        let cell = FactoryCell::new();
        assert!(cell.get_instance(|| Err(Error::config("no resource"))).is_err());
        assert!(cell.get().is_none());
        assert!(cell.get_instance(|| Ok(config())).is_ok());
    }
}
