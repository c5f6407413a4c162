//! Flush planning: turning the identity map into one write batch.
//!
//! Writes are ordered deletes first, then inserts, then updates, each group
//! in the order the entities were first tracked. The whole plan is applied
//! through a single `Storage::apply`, so it lands completely or not at all.

use crate::identity_map::{EntityKey, EntityState, IdentityMap};
use sessionorm_core::{Error, MappingErrorKind, Result, Row, WriteBatch, WriteOp};

/// Counts of the writes performed by a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FlushResult {
    pub(crate) inserted: usize,
    pub(crate) updated: usize,
    pub(crate) deleted: usize,
}

impl FlushResult {
    pub(crate) fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

pub(crate) struct FlushPlan {
    pub(crate) batch: WriteBatch,
    /// Inserted or updated entities and the row now stored for them
    pub(crate) written: Vec<(EntityKey, Row)>,
    pub(crate) deleted: Vec<EntityKey>,
}

impl FlushPlan {
    #[allow(clippy::result_large_err)]
    pub(crate) fn build(map: &IdentityMap) -> Result<Self> {
        let mut deletes = Vec::new();
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut written = Vec::new();
        let mut deleted = Vec::new();

        for (key, tracked) in map.ordered() {
            let table = tracked.mapping.table().to_string();
            let entity = tracked.mapping.entity_name().to_string();
            if tracked.state == EntityState::Removed {
                deletes.push(WriteOp::Delete {
                    entity,
                    table,
                    key: key.key().clone(),
                });
                deleted.push(key.clone());
                continue;
            }

            let current_key = tracked.slot.current_key()?;
            if &current_key != key.key() {
                return Err(Error::mapping(
                    MappingErrorKind::IdentifierChanged,
                    tracked.mapping.entity_name(),
                    format!(
                        "identifier of a tracked instance changed from {} to {}",
                        key.key(),
                        current_key
                    ),
                ));
            }

            let row = tracked.mapping.record_to_row(&tracked.slot.to_record())?;
            match (tracked.state, &tracked.snapshot) {
                (EntityState::New, _) => {
                    inserts.push(WriteOp::Insert {
                        entity,
                        table,
                        key: current_key,
                        row: row.clone(),
                    });
                    written.push((key.clone(), row));
                }
                (_, Some(snapshot)) if !snapshot.is_dirty(&row) => {}
                (_, snapshot) => {
                    if let Some(snapshot) = snapshot {
                        tracing::debug!(
                            entity = tracked.mapping.entity_name(),
                            key = %current_key,
                            changed = ?snapshot.changed_columns(&row),
                            "Dirty entity"
                        );
                    }
                    updates.push(WriteOp::Update {
                        entity,
                        table,
                        key: current_key,
                        row: row.clone(),
                    });
                    written.push((key.clone(), row));
                }
            }
        }

        let mut batch = WriteBatch::new();
        for op in deletes.into_iter().chain(inserts).chain(updates) {
            batch.push(op);
        }
        Ok(Self {
            batch,
            written,
            deleted,
        })
    }

    pub(crate) fn result(&self) -> FlushResult {
        let (inserted, updated, deleted) = self.batch.counts();
        FlushResult {
            inserted,
            updated,
            deleted,
        }
    }
}
