//! Lazy entity references.
//!
//! `Session::get_reference` returns a `Reference<E>` without touching
//! storage. The first access fetches the row through the owning session
//! and replaces the `Unloaded` state with the managed instance; later
//! accesses reuse it.

use crate::identity_map::Managed;
use crate::{SessionState, lock_state};
use sessionorm_core::{Entity, Error, PrimaryKey, Result};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

/// Load state of a lazy reference.
#[derive(Debug)]
pub enum ReferenceState<E> {
    /// Only the key is known
    Unloaded { key: PrimaryKey },
    /// The instance is in the owning session's identity map
    Loaded(Managed<E>),
}

/// An entity handle whose state is fetched on first access.
///
/// Loading needs the owning session to be open. A reference that was
/// loaded before the session closed keeps its (now detached) instance.
pub struct Reference<E> {
    key: PrimaryKey,
    session: Weak<Mutex<SessionState>>,
    state: Mutex<ReferenceState<E>>,
}

impl<E: Entity> Reference<E> {
    pub(crate) fn unloaded(key: PrimaryKey, session: Weak<Mutex<SessionState>>) -> Self {
        Self {
            state: Mutex::new(ReferenceState::Unloaded { key: key.clone() }),
            key,
            session,
        }
    }

    pub(crate) fn loaded(managed: Managed<E>, session: Weak<Mutex<SessionState>>) -> Self {
        Self {
            key: managed.key().clone(),
            state: Mutex::new(ReferenceState::Loaded(managed)),
            session,
        }
    }

    /// The referenced key. Never triggers a load.
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.lock(), ReferenceState::Loaded(_))
    }

    /// The managed instance, loading it on first call.
    ///
    /// Fails with `EntityNotFound` if no row has the key (the reference
    /// stays unloaded) and with `ClosedSession` if it must load after the
    /// session closed.
    #[allow(clippy::result_large_err)]
    pub fn get(&self) -> Result<Managed<E>> {
        let mut state = self.lock();
        if let ReferenceState::Loaded(managed) = &*state {
            return Ok(managed.clone());
        }

        let owner = self.session.upgrade().ok_or(Error::ClosedSession)?;
        let mut session = lock_state(&owner);
        session.ensure_open()?;
        let managed = session
            .load::<E>(&self.key)?
            .ok_or_else(|| Error::not_found(E::descriptor().name, self.key.clone()))?;
        tracing::trace!(
            session = session.id,
            entity = E::descriptor().name,
            key = %self.key,
            "Initialized lazy reference"
        );
        *state = ReferenceState::Loaded(managed.clone());
        Ok(managed)
    }

    /// Run `f` against the loaded instance.
    #[allow(clippy::result_large_err)]
    pub fn with<R>(&self, f: impl FnOnce(&E) -> R) -> Result<R> {
        let managed = self.get()?;
        let entity = managed.read();
        Ok(f(&entity))
    }

    /// Clone of the loaded instance.
    #[allow(clippy::result_large_err)]
    pub fn cloned(&self) -> Result<E> {
        Ok(self.get()?.get())
    }

    fn lock(&self) -> MutexGuard<'_, ReferenceState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Entity + fmt::Debug> fmt::Debug for Reference<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Ok(state) => f
                .debug_struct("Reference")
                .field("key", &self.key)
                .field("state", &*state)
                .finish(),
            Err(_) => f
                .debug_struct("Reference")
                .field("key", &self.key)
                .finish_non_exhaustive(),
        }
    }
}
