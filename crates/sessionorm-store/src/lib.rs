//! Storage drivers for SessionORM.
//!
//! - `MemoryStorage`: tables kept in process memory (`memory://name`)
//! - `JsonFileStorage`: tables persisted to a JSON snapshot (`file://path`)
//!
//! Both drivers share one table engine. Write batches are staged on copies
//! of the touched tables and only swapped in once every write succeeded.

mod engine;
mod file;
mod memory;

pub use file::JsonFileStorage;
pub use memory::MemoryStorage;

use sessionorm_core::{ConnectionConfig, Dialect, Result, Storage};
use std::sync::Arc;

/// Open the driver selected by a connection configuration.
#[allow(clippy::result_large_err)]
pub fn open_storage(config: &ConnectionConfig) -> Result<Arc<dyn Storage>> {
    let (dialect, target) = config.resolve()?;
    tracing::info!(
        dialect = dialect.name(),
        target = %target,
        username = config.username.as_deref().unwrap_or(""),
        "Opening storage"
    );
    match dialect {
        Dialect::Memory => Ok(Arc::new(MemoryStorage::new(target))),
        Dialect::JsonFile => Ok(Arc::new(JsonFileStorage::open(target)?)),
    }
}
