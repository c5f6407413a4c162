//! Identity map: at most one in-memory instance per stored row.
//!
//! Entities handed out by a session are `Managed<E>` handles, shared
//! references (`Arc<RwLock<E>>`) to the single instance the session tracks.
//! Finding the same key twice returns handles to the same instance, and
//! writes through any handle are picked up by dirty checking at commit.
//!
//! ```ignore
//! let a = session.find::<Student>(1)?.unwrap();
//! let b = session.find::<Student>(1)?.unwrap();
//! assert!(a.ptr_eq(&b));
//!
//! a.write().age = 21;
//! assert_eq!(b.read().age, 21);
//! ```

use crate::change_tracker::EntitySnapshot;
use sessionorm_core::{Entity, Error, PrimaryKey, Record, Result, TableMapping};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A handle to an entity instance tracked by a session.
///
/// Handles stay usable after the session closes; the instance is then
/// detached and no longer written back.
pub struct Managed<E> {
    inner: Arc<RwLock<E>>,
    key: PrimaryKey,
}

impl<E: Entity> Managed<E> {
    pub(crate) fn new(entity: E, key: PrimaryKey) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
            key,
        }
    }

    /// Primary key the instance is tracked under.
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    pub fn read(&self) -> RwLockReadGuard<'_, E> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, E> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the current state.
    pub fn get(&self) -> E {
        self.read().clone()
    }

    /// Replace the whole instance.
    pub fn set(&self, entity: E) {
        *self.write() = entity;
    }

    /// Do both handles point at the same instance?
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E> Clone for Managed<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            key: self.key.clone(),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Managed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_read() {
            Ok(entity) => f
                .debug_struct("Managed")
                .field("key", &self.key)
                .field("entity", &*entity)
                .finish(),
            Err(_) => f
                .debug_struct("Managed")
                .field("key", &self.key)
                .finish_non_exhaustive(),
        }
    }
}

/// Type-erased view of a `Managed<E>` used by the session internals.
pub(crate) trait ManagedSlot: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn to_record(&self) -> Record;

    /// Current primary key of the instance (it may have been edited).
    fn current_key(&self) -> Result<PrimaryKey>;

    /// Overwrite the instance from a stored record.
    fn restore(&self, record: Record) -> Result<()>;
}

impl<E: Entity> ManagedSlot for Managed<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_record(&self) -> Record {
        self.read().to_record()
    }

    fn current_key(&self) -> Result<PrimaryKey> {
        self.read().key()
    }

    fn restore(&self, record: Record) -> Result<()> {
        let entity = E::from_record(record)?;
        self.set(entity);
        Ok(())
    }
}

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Persisted in this session, inserted at commit
    New,
    /// Loaded from (or already written to) storage
    Managed,
    /// Scheduled for deletion at commit
    Removed,
}

/// Identity map key: entity type plus normalized primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntityKey {
    type_id: TypeId,
    key: PrimaryKey,
}

impl EntityKey {
    pub(crate) fn of<E: Entity>(key: PrimaryKey) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            key,
        }
    }

    pub(crate) fn key(&self) -> &PrimaryKey {
        &self.key
    }
}

pub(crate) struct TrackedEntity {
    pub(crate) slot: Box<dyn ManagedSlot>,
    pub(crate) mapping: Arc<TableMapping>,
    pub(crate) state: EntityState,
    /// Row as last known to be in storage; `None` for new entities
    pub(crate) snapshot: Option<EntitySnapshot>,
    /// Tracking order, used to keep flushes deterministic
    pub(crate) seq: u64,
}

impl TrackedEntity {
    pub(crate) fn downcast<E: Entity>(&self) -> Option<Managed<E>> {
        self.slot.as_any().downcast_ref::<Managed<E>>().cloned()
    }

    /// Like `downcast`, for entries looked up by an `EntityKey` of `E`.
    #[allow(clippy::result_large_err)]
    pub(crate) fn handle<E: Entity>(&self) -> Result<Managed<E>> {
        self.downcast::<E>().ok_or_else(|| {
            Error::Custom(format!(
                "identity map entry for {} holds another type",
                self.mapping.entity_name()
            ))
        })
    }

    /// Is `handle` the instance tracked here?
    pub(crate) fn holds<E: Entity>(&self, handle: &Managed<E>) -> bool {
        self.slot
            .as_any()
            .downcast_ref::<Managed<E>>()
            .is_some_and(|tracked| tracked.ptr_eq(handle))
    }
}

/// All entities tracked by one session.
#[derive(Default)]
pub(crate) struct IdentityMap {
    entries: HashMap<EntityKey, TrackedEntity>,
    next_seq: u64,
}

impl IdentityMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &EntityKey) -> Option<&TrackedEntity> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &EntityKey) -> Option<&mut TrackedEntity> {
        self.entries.get_mut(key)
    }

    pub(crate) fn insert<E: Entity>(
        &mut self,
        managed: Managed<E>,
        mapping: Arc<TableMapping>,
        state: EntityState,
        snapshot: Option<EntitySnapshot>,
    ) {
        let key = EntityKey::of::<E>(managed.key().clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            TrackedEntity {
                slot: Box::new(managed),
                mapping,
                state,
                snapshot,
                seq,
            },
        );
    }

    pub(crate) fn remove(&mut self, key: &EntityKey) -> Option<TrackedEntity> {
        self.entries.remove(key)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn count(&self, state: EntityState) -> usize {
        self.entries.values().filter(|t| t.state == state).count()
    }

    /// Entries in tracking order.
    pub(crate) fn ordered(&self) -> Vec<(&EntityKey, &TrackedEntity)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(_, tracked)| tracked.seq);
        entries
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&EntityKey, &mut TrackedEntity) -> bool) {
        self.entries.retain(keep);
    }
}
