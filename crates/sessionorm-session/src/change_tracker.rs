//! Change tracking and dirty detection.
//!
//! Every managed entity carries a snapshot of the row last known to be in
//! storage, in the mapping's canonical column layout. At commit the
//! entity's current row is compared against it; only changed entities are
//! written.

use sessionorm_core::{Row, Value};
use std::time::Instant;

/// Row image of an entity as last read from or written to storage.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    row: Row,
    taken_at: Instant,
}

impl EntitySnapshot {
    pub fn new(row: Row) -> Self {
        Self {
            row,
            taken_at: Instant::now(),
        }
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Does `current` differ from the snapshot?
    pub fn is_dirty(&self, current: &Row) -> bool {
        self.row.len() != current.len()
            || self
                .row
                .values()
                .iter()
                .zip(current.values())
                .any(|(old, new)| !same_value(old, new))
    }

    /// Names of the columns whose value differs in `current`.
    pub fn changed_columns(&self, current: &Row) -> Vec<String> {
        self.row
            .iter()
            .zip(current.values())
            .filter(|((_, old), new)| !same_value(old, new))
            .map(|((name, _), _)| name.to_string())
            .collect()
    }
}

/// Value equality where NaN equals NaN, so an untouched NaN column is not dirty.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits() || x == y,
        _ => a == b,
    }
}
