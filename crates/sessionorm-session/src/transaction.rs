//! Transaction handles.
//!
//! A `Transaction` belongs to exactly one session and moves through
//! `NotStarted -> Active -> Committed | RolledBack`. A session holds at
//! most one active transaction; every handle is single use.

use crate::{SessionState, lock_state};
use sessionorm_core::{Error, Result, TransactionErrorKind};
use std::sync::{Mutex, Weak};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
}

/// A unit of work boundary on a session.
///
/// Dropping an active transaction rolls it back.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    state: TransactionState,
    session: Weak<Mutex<SessionState>>,
}

impl Transaction {
    pub(crate) fn new(id: u64, session: Weak<Mutex<SessionState>>) -> Self {
        Self {
            id,
            state: TransactionState::NotStarted,
            session,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Start the transaction.
    #[allow(clippy::result_large_err)]
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            TransactionState::NotStarted => {}
            TransactionState::Active => {
                return Err(Error::transaction(
                    TransactionErrorKind::AlreadyActive,
                    "transaction is already active",
                ));
            }
            other => return Err(finished(other)),
        }

        let session = self.session.upgrade().ok_or(Error::ClosedSession)?;
        let mut state = lock_state(&session);
        state.ensure_open()?;
        if let Some(active) = state.active_tx {
            return Err(Error::transaction(
                TransactionErrorKind::Nested,
                format!("session already has active transaction {}", active),
            ));
        }
        state.active_tx = Some(self.id);
        self.state = TransactionState::Active;
        tracing::debug!(session = state.id, transaction = self.id, "Transaction begun");
        Ok(())
    }

    /// Write every pending change to storage in one atomic batch.
    ///
    /// On failure the transaction is rolled back: storage is unchanged and
    /// the session's managed state reverts to what storage holds.
    #[allow(clippy::result_large_err)]
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let Some(session) = self.session.upgrade() else {
            self.state = TransactionState::RolledBack;
            return Err(Error::ClosedSession);
        };
        let mut state = lock_state(&session);
        if state.active_tx != Some(self.id) {
            // The session closed (and rolled us back) in the meantime.
            self.state = TransactionState::RolledBack;
            return Err(Error::ClosedSession);
        }
        if let Err(e) = state.ensure_open() {
            state.rollback_changes();
            self.state = TransactionState::RolledBack;
            return Err(e);
        }

        match state.commit_flush() {
            Ok(result) => {
                self.state = TransactionState::Committed;
                tracing::debug!(
                    session = state.id,
                    transaction = self.id,
                    writes = result.total(),
                    "Transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                Err(e)
            }
        }
    }

    /// Discard every pending change.
    #[allow(clippy::result_large_err)]
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::RolledBack;
        let session = self.session.upgrade().ok_or(Error::ClosedSession)?;
        let mut state = lock_state(&session);
        if state.active_tx != Some(self.id) {
            return Err(Error::ClosedSession);
        }
        state.rollback_changes();
        tracing::debug!(session = state.id, transaction = self.id, "Transaction rolled back");
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::NotStarted => Err(Error::transaction(
                TransactionErrorKind::NotActive,
                "transaction has not begun",
            )),
            other => Err(finished(other)),
        }
    }
}

fn finished(state: TransactionState) -> Error {
    if state == TransactionState::Committed {
        Error::transaction(
            TransactionErrorKind::AlreadyCommitted,
            "transaction is already committed",
        )
    } else {
        Error::transaction(
            TransactionErrorKind::AlreadyRolledBack,
            "transaction is already rolled back",
        )
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            tracing::warn!(transaction = self.id, "Active transaction dropped, rolling back");
            let _ = self.rollback();
        }
    }
}
