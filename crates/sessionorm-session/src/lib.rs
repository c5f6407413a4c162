//! Session factory, unit of work and transactions for SessionORM.
//!
//! `sessionorm-session` is the **unit-of-work layer**. A `SessionFactory`
//! is built once from a `Configuration` and hands out `Session`s; each
//! session keeps an identity map of the entities it has seen and writes
//! the changes to storage when a `Transaction` commits.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: at most one in-memory instance per stored row.
//! - **Change tracking**: dirty entities are found by comparing each
//!   instance with the row last read from storage.
//! - **Transactional safety**: a commit writes one atomic batch; a failed
//!   commit leaves storage untouched and reverts the session.
//! - **Lazy loading**: `get_reference` defers the fetch to first access.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::build(
//!     &Configuration::new().url("memory://school").register::<Student>(),
//! )?;
//! let session = factory.open_session()?;
//!
//! let mut tx = session.begin_transaction()?;
//! session.persist(Student::new(1, "A", 20))?;
//! tx.commit()?;
//!
//! let student = session.find::<Student>(1)?.expect("persisted above");
//! assert_eq!(student.read().age, 20);
//!
//! session.close()?;
//! factory.close()?;
//! ```

pub mod change_tracker;
pub mod factory;
mod flush;
pub mod identity_map;
pub mod reference;
pub mod transaction;

#[cfg(test)]
mod fixtures;

pub use change_tracker::EntitySnapshot;
pub use factory::{FactoryCell, FactoryStats, SessionFactory};
pub use identity_map::{EntityState, Managed};
pub use reference::{Reference, ReferenceState};
pub use transaction::{Transaction, TransactionState};

use crate::factory::{FactoryShared, StatCounters};
use crate::flush::{FlushPlan, FlushResult};
use crate::identity_map::{EntityKey, IdentityMap};
use sessionorm_core::{Entity, Error, PrimaryKey, Result, TableMapping};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Session Events
// ============================================================================

/// Callbacks receive no arguments; returning `Err` from a before-commit
/// callback aborts the commit.
type SessionEventFn = Box<dyn FnMut() -> Result<()> + Send>;

/// Registered session-level event callbacks.
#[derive(Default)]
pub(crate) struct SessionEventCallbacks {
    before_commit: Vec<SessionEventFn>,
    after_commit: Vec<SessionEventFn>,
    after_rollback: Vec<SessionEventFn>,
}

impl fmt::Debug for SessionEventCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventCallbacks")
            .field("before_commit", &self.before_commit.len())
            .field("after_commit", &self.after_commit.len())
            .field("after_rollback", &self.after_rollback.len())
            .finish()
    }
}

impl SessionEventCallbacks {
    #[allow(clippy::result_large_err)]
    fn fire(&mut self, event: SessionEvent) -> Result<()> {
        let callbacks = match event {
            SessionEvent::BeforeCommit => &mut self.before_commit,
            SessionEvent::AfterCommit => &mut self.after_commit,
            SessionEvent::AfterRollback => &mut self.after_rollback,
        };
        for cb in callbacks.iter_mut() {
            cb()?;
        }
        Ok(())
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    /// Fired before the pending writes are planned.
    BeforeCommit,
    /// Fired after storage accepted the writes.
    AfterCommit,
    /// Fired after a rollback, including one caused by a failed commit.
    AfterRollback,
}

// ============================================================================
// Session State
// ============================================================================

pub(crate) struct SessionState {
    pub(crate) id: u64,
    open: bool,
    factory: Arc<FactoryShared>,
    identity_map: IdentityMap,
    pub(crate) active_tx: Option<u64>,
    next_tx: u64,
    callbacks: SessionEventCallbacks,
}

pub(crate) fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionState {
    #[allow(clippy::result_large_err)]
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if !self.open {
            return Err(Error::ClosedSession);
        }
        if self.factory.is_closed() {
            return Err(Error::ClosedFactory);
        }
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn mapping<E: Entity>(&self) -> Result<Arc<TableMapping>> {
        self.factory.registry.mapping::<E>().map(Arc::clone)
    }

    /// Identity map lookup, then storage.
    #[allow(clippy::result_large_err)]
    pub(crate) fn load<E: Entity>(&mut self, key: &PrimaryKey) -> Result<Option<Managed<E>>> {
        let entity_key = EntityKey::of::<E>(key.clone());
        if let Some(tracked) = self.identity_map.get(&entity_key) {
            return match tracked.state {
                EntityState::Removed => Ok(None),
                EntityState::New | EntityState::Managed => tracked.handle::<E>().map(Some),
            };
        }

        let mapping = self.mapping::<E>()?;
        let Some(row) = self.factory.storage.fetch(mapping.table(), key)? else {
            return Ok(None);
        };
        let entity: E = mapping.to_entity(&row)?;
        let snapshot = EntitySnapshot::new(mapping.to_row(&entity)?);
        let managed = Managed::new(entity, key.clone());
        self.identity_map.insert(
            managed.clone(),
            mapping,
            EntityState::Managed,
            Some(snapshot),
        );
        StatCounters::bump(&self.factory.stats.entities_loaded, 1);
        tracing::trace!(
            session = self.id,
            entity = E::descriptor().name,
            key = %key,
            "Loaded entity"
        );
        Ok(Some(managed))
    }

    /// Write the pending changes in one batch. Any failure rolls back.
    #[allow(clippy::result_large_err)]
    pub(crate) fn commit_flush(&mut self) -> Result<FlushResult> {
        if let Err(e) = self.callbacks.fire(SessionEvent::BeforeCommit) {
            self.rollback_changes();
            return Err(Error::commit("before-commit callback failed", e));
        }

        let plan = match FlushPlan::build(&self.identity_map) {
            Ok(plan) => plan,
            Err(e) => {
                self.rollback_changes();
                return Err(Error::commit("cannot plan flush", e));
            }
        };

        if self.factory.settings.log_statements {
            for op in &plan.batch {
                tracing::info!(session = self.id, statement = %op, "Write");
            }
        }

        if !plan.batch.is_empty() {
            if let Err(e) = self.factory.storage.apply(&plan.batch) {
                tracing::warn!(session = self.id, error = %e, "Flush failed, rolling back");
                self.rollback_changes();
                return Err(Error::commit("flush failed", e));
            }
        }

        let result = plan.result();
        for key in &plan.deleted {
            self.identity_map.remove(key);
        }
        for (key, row) in plan.written {
            if let Some(tracked) = self.identity_map.get_mut(&key) {
                tracked.state = EntityState::Managed;
                tracked.snapshot = Some(EntitySnapshot::new(row));
            }
        }

        let stats = &self.factory.stats;
        StatCounters::bump(&stats.transactions_committed, 1);
        StatCounters::bump(&stats.entities_inserted, result.inserted);
        StatCounters::bump(&stats.entities_updated, result.updated);
        StatCounters::bump(&stats.entities_deleted, result.deleted);
        self.active_tx = None;

        if let Err(e) = self.callbacks.fire(SessionEvent::AfterCommit) {
            tracing::warn!(session = self.id, error = %e, "After-commit callback failed");
        }
        Ok(result)
    }

    /// Revert the identity map to what storage holds and end the transaction.
    pub(crate) fn rollback_changes(&mut self) {
        let session = self.id;
        self.identity_map.retain(|_, tracked| match tracked.state {
            EntityState::New => false,
            EntityState::Managed | EntityState::Removed => {
                tracked.state = EntityState::Managed;
                let Some(snapshot) = &tracked.snapshot else {
                    return true;
                };
                let unchanged = tracked
                    .mapping
                    .record_to_row(&tracked.slot.to_record())
                    .is_ok_and(|row| !snapshot.is_dirty(&row));
                if unchanged {
                    return true;
                }
                let restored = tracked
                    .mapping
                    .row_to_record(snapshot.row())
                    .and_then(|record| tracked.slot.restore(record));
                match restored {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            session,
                            entity = tracked.mapping.entity_name(),
                            error = %e,
                            "Cannot restore entity, detaching it"
                        );
                        false
                    }
                }
            }
        });

        self.active_tx = None;
        StatCounters::bump(&self.factory.stats.transactions_rolled_back, 1);
        if let Err(e) = self.callbacks.fire(SessionEvent::AfterRollback) {
            tracing::warn!(session = self.id, error = %e, "After-rollback callback failed");
        }
    }

    fn close(&mut self) {
        if self.active_tx.is_some() {
            tracing::debug!(session = self.id, "Rolling back active transaction on close");
            self.rollback_changes();
        }
        self.identity_map.clear();
        self.open = false;
        StatCounters::bump(&self.factory.stats.sessions_closed, 1);
        tracing::debug!(session = self.id, "Closed session");
    }
}

// ============================================================================
// Session
// ============================================================================

/// A single unit of work against the factory's storage.
///
/// Changes made through `persist`, `merge`, `remove` and managed handles
/// are queued in the session and written when a transaction commits.
/// Once closed, every operation fails with `ClosedSession`.
pub struct Session {
    id: u64,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub(crate) fn new(id: u64, factory: Arc<FactoryShared>) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(SessionState {
                id,
                open: true,
                factory,
                identity_map: IdentityMap::new(),
                active_tx: None,
                next_tx: 1,
                callbacks: SessionEventCallbacks::default(),
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }

    #[allow(clippy::result_large_err)]
    fn open_state(&self) -> Result<MutexGuard<'_, SessionState>> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(state)
    }

    // ========================================================================
    // Entity Operations
    // ========================================================================

    /// Make a new entity managed; it is inserted at commit.
    ///
    /// Fails with `DuplicateKey` if this session already holds an unsaved
    /// entity with the key, or storage holds a row this session never loaded.
    /// Persisting over a loaded entity copies the new state into it, and
    /// persisting over one removed in this session cancels the removal.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::descriptor().name))]
    pub fn persist<E: Entity>(&self, entity: E) -> Result<Managed<E>> {
        let mut state = self.open_state()?;
        let mapping = state.mapping::<E>()?;
        let key = entity.key()?;
        mapping.to_row(&entity)?;

        let entity_key = EntityKey::of::<E>(key.clone());
        if let Some(tracked) = state.identity_map.get_mut(&entity_key) {
            let managed = tracked.handle::<E>()?;
            match tracked.state {
                EntityState::New => {
                    return Err(Error::duplicate_key(mapping.entity_name(), key));
                }
                EntityState::Managed => {
                    managed.set(entity);
                    tracing::debug!(key = %key, "Persist of a managed entity copied its state");
                }
                EntityState::Removed => {
                    managed.set(entity);
                    tracked.state = EntityState::Managed;
                    tracing::debug!(key = %key, "Removal cancelled by persist");
                }
            }
            return Ok(managed);
        }

        if state.factory.storage.contains(mapping.table(), &key)? {
            return Err(Error::duplicate_key(mapping.entity_name(), key));
        }

        let managed = Managed::new(entity, key);
        state
            .identity_map
            .insert(managed.clone(), mapping, EntityState::New, None);
        tracing::debug!(key = %managed.key(), "Scheduled insert");
        Ok(managed)
    }

    /// Load an entity by primary key, or `None` if no row matches.
    ///
    /// Repeated finds of the same key return handles to the same instance.
    #[allow(clippy::result_large_err)]
    pub fn find<E: Entity>(&self, key: impl Into<PrimaryKey>) -> Result<Option<Managed<E>>> {
        let key = key.into();
        let mut state = self.open_state()?;
        state.mapping::<E>()?;
        state.load::<E>(&key)
    }

    /// A lazy reference to the entity with `key`. No storage access happens
    /// until the reference is first read.
    #[allow(clippy::result_large_err)]
    pub fn get_reference<E: Entity>(&self, key: impl Into<PrimaryKey>) -> Result<Reference<E>> {
        let key = key.into();
        let state = self.open_state()?;
        state.mapping::<E>()?;

        let weak = Arc::downgrade(&self.state);
        match state.identity_map.get(&EntityKey::of::<E>(key.clone())) {
            Some(tracked) if tracked.state != EntityState::Removed => {
                Ok(Reference::loaded(tracked.handle::<E>()?, weak))
            }
            _ => Ok(Reference::unloaded(key, weak)),
        }
    }

    /// Copy `entity`'s state onto the managed instance with the same key.
    ///
    /// The instance is loaded if needed; if no row exists the entity is
    /// scheduled for insert instead. Returns the managed handle.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = E::descriptor().name))]
    pub fn merge<E: Entity>(&self, entity: E) -> Result<Managed<E>> {
        let mut state = self.open_state()?;
        let mapping = state.mapping::<E>()?;
        let key = entity.key()?;
        mapping.to_row(&entity)?;

        let entity_key = EntityKey::of::<E>(key.clone());
        if let Some(tracked) = state.identity_map.get_mut(&entity_key) {
            let managed = tracked.handle::<E>()?;
            managed.set(entity);
            if tracked.state == EntityState::Removed {
                tracked.state = EntityState::Managed;
            }
            return Ok(managed);
        }

        if let Some(managed) = state.load::<E>(&key)? {
            managed.set(entity);
            tracing::debug!(key = %key, "Merged into stored entity");
            return Ok(managed);
        }

        let managed = Managed::new(entity, key);
        state
            .identity_map
            .insert(managed.clone(), mapping, EntityState::New, None);
        tracing::debug!(key = %managed.key(), "Merge scheduled insert");
        Ok(managed)
    }

    /// Schedule the row with `entity`'s key for deletion at commit.
    #[allow(clippy::result_large_err)]
    pub fn remove<E: Entity>(&self, entity: &E) -> Result<()> {
        self.remove_by_key::<E>(entity.key()?)
    }

    /// Schedule the row with `key` for deletion at commit.
    ///
    /// Removing an entity persisted in this session just forgets it. Fails
    /// with `EntityNotFound` if no row has the key.
    #[allow(clippy::result_large_err)]
    pub fn remove_by_key<E: Entity>(&self, key: impl Into<PrimaryKey>) -> Result<()> {
        let key = key.into();
        let mut state = self.open_state()?;
        let mapping = state.mapping::<E>()?;
        let entity_key = EntityKey::of::<E>(key.clone());

        let tracked_state = state.identity_map.get(&entity_key).map(|t| t.state);
        match tracked_state {
            Some(EntityState::New) => {
                state.identity_map.remove(&entity_key);
            }
            Some(EntityState::Removed) => {}
            Some(EntityState::Managed) | None => {
                if state.load::<E>(&key)?.is_none() {
                    return Err(Error::not_found(mapping.entity_name(), key));
                }
                if let Some(tracked) = state.identity_map.get_mut(&entity_key) {
                    tracked.state = EntityState::Removed;
                }
            }
        }
        tracing::debug!(
            session = self.id,
            entity = mapping.entity_name(),
            key = %key,
            "Scheduled delete"
        );
        Ok(())
    }

    /// Reload a managed instance from storage, discarding its changes.
    ///
    /// A pending removal is cancelled. Fails with `EntityNotFound` (and
    /// detaches the instance) if the row is gone.
    #[allow(clippy::result_large_err)]
    pub fn refresh<E: Entity>(&self, handle: &Managed<E>) -> Result<()> {
        let mut state = self.open_state()?;
        let mapping = state.mapping::<E>()?;
        let entity_key = EntityKey::of::<E>(handle.key().clone());

        match state.identity_map.get(&entity_key) {
            Some(tracked) if tracked.holds(handle) => {
                if tracked.state == EntityState::New {
                    return Err(Error::Custom(format!(
                        "{}#{} has not been written yet",
                        mapping.entity_name(),
                        handle.key()
                    )));
                }
            }
            _ => {
                return Err(Error::Custom(format!(
                    "{}#{} is not managed by this session",
                    mapping.entity_name(),
                    handle.key()
                )));
            }
        }

        let Some(row) = state.factory.storage.fetch(mapping.table(), handle.key())? else {
            state.identity_map.remove(&entity_key);
            return Err(Error::not_found(mapping.entity_name(), handle.key().clone()));
        };
        let entity: E = mapping.to_entity(&row)?;
        let snapshot = EntitySnapshot::new(mapping.to_row(&entity)?);
        handle.set(entity);
        if let Some(tracked) = state.identity_map.get_mut(&entity_key) {
            tracked.state = EntityState::Managed;
            tracked.snapshot = Some(snapshot);
        }
        StatCounters::bump(&state.factory.stats.entities_loaded, 1);
        Ok(())
    }

    /// Stop tracking an instance; its pending changes are dropped.
    ///
    /// Returns whether the instance was managed by this session.
    #[allow(clippy::result_large_err)]
    pub fn detach<E: Entity>(&self, handle: &Managed<E>) -> Result<bool> {
        let mut state = self.open_state()?;
        let entity_key = EntityKey::of::<E>(handle.key().clone());
        let held = state
            .identity_map
            .get(&entity_key)
            .is_some_and(|tracked| tracked.holds(handle));
        if held {
            state.identity_map.remove(&entity_key);
        }
        Ok(held)
    }

    /// Is `handle` an instance this session manages (and has not removed)?
    #[allow(clippy::result_large_err)]
    pub fn contains<E: Entity>(&self, handle: &Managed<E>) -> Result<bool> {
        let state = self.open_state()?;
        Ok(state
            .identity_map
            .get(&EntityKey::of::<E>(handle.key().clone()))
            .is_some_and(|tracked| tracked.state != EntityState::Removed && tracked.holds(handle)))
    }

    /// Detach every instance. Pending changes are dropped.
    #[allow(clippy::result_large_err)]
    pub fn clear(&self) -> Result<()> {
        let mut state = self.open_state()?;
        let count = state.identity_map.len();
        state.identity_map.clear();
        tracing::debug!(session = self.id, detached = count, "Cleared session");
        Ok(())
    }

    /// Would a commit right now write anything?
    #[allow(clippy::result_large_err)]
    pub fn is_dirty(&self) -> Result<bool> {
        let state = self.open_state()?;
        Ok(!FlushPlan::build(&state.identity_map)?.batch.is_empty())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// A new, not yet started transaction on this session.
    #[allow(clippy::result_large_err)]
    pub fn transaction(&self) -> Result<Transaction> {
        let mut state = self.open_state()?;
        let id = state.next_tx;
        state.next_tx += 1;
        Ok(Transaction::new(id, Arc::downgrade(&self.state)))
    }

    /// Create and begin a transaction.
    #[allow(clippy::result_large_err)]
    pub fn begin_transaction(&self) -> Result<Transaction> {
        let mut tx = self.transaction()?;
        tx.begin()?;
        Ok(tx)
    }

    pub fn has_active_transaction(&self) -> bool {
        self.lock().active_tx.is_some()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Run `f` before each commit; an error aborts (and rolls back) the commit.
    pub fn on_before_commit(&self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.lock().callbacks.before_commit.push(Box::new(f));
    }

    pub fn on_after_commit(&self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.lock().callbacks.after_commit.push(Box::new(f));
    }

    pub fn on_after_rollback(&self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.lock().callbacks.after_rollback.push(Box::new(f));
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the session: roll back any active transaction and detach
    /// every instance. Unloaded references can no longer be read.
    ///
    /// Closing twice fails with `ClosedSession`.
    #[allow(clippy::result_large_err)]
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.open {
            return Err(Error::ClosedSession);
        }
        state.close();
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Number of instances tracked, in any state.
    pub fn managed_count(&self) -> usize {
        self.lock().identity_map.len()
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        let state = self.lock();
        let pending_dirty = FlushPlan::build(&state.identity_map)
            .map(|plan| plan.result().updated)
            .unwrap_or(0);
        SessionDebugInfo {
            id: self.id,
            open: state.open,
            tracked: state.identity_map.len(),
            pending_new: state.identity_map.count(EntityState::New),
            pending_delete: state.identity_map.count(EntityState::Removed),
            pending_dirty,
            in_transaction: state.active_tx.is_some(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut state = self.lock();
        if state.open {
            state.close();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.debug_state())
            .finish()
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDebugInfo {
    pub id: u64,
    pub open: bool,
    /// Total tracked instances.
    pub tracked: usize,
    /// Instances pending INSERT.
    pub pending_new: usize,
    /// Instances pending DELETE.
    pub pending_delete: usize,
    /// Managed instances whose state differs from storage.
    pub pending_dirty: usize,
    pub in_transaction: bool,
}

// ============================================================================
// Unit Tests
// ============================================================================
