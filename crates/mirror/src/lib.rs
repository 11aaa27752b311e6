//! Durable mirror for the VitalChain ledger
//!
//! The mirror is a redundant, queryable copy of ledger contents that
//! survives restarts. The chain is rebuilt from it on startup and new blocks
//! are written to it after every commit and on shutdown.
//!
//! Storage is abstracted behind [`MirrorStore`]; [`SqliteMirror`] is the
//! durable backend and [`MemoryMirror`] backs tests.

pub mod memory;
pub mod records;
pub mod sqlite;
pub mod store;

pub use memory::MemoryMirror;
pub use records::{
    BlockRecord, CorruptRecord, PatientRecord, ReadingRecord, ReadingScan, RecordFilter,
    RecordSort,
};
pub use sqlite::SqliteMirror;
pub use store::{MirrorError, MirrorResult, MirrorStore};

use std::sync::Arc;
use std::time::Duration;
use vitalchain_core::{MirrorBackend, StorageConfig};

/// Open the backend selected by configuration
pub fn open_mirror(config: &StorageConfig) -> MirrorResult<Arc<dyn MirrorStore>> {
    match config.mirror_backend {
        MirrorBackend::Sqlite => Ok(Arc::new(SqliteMirror::open(
            &config.mirror_path,
            Duration::from_millis(config.busy_timeout_ms),
        )?)),
        MirrorBackend::Memory => Ok(Arc::new(MemoryMirror::new())),
    }
}
