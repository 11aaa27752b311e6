//! VitalChain ledger service
//!
//! Ties the pieces together: readings are evaluated against clinical
//! thresholds, sealed with the ledger cipher, appended to the hash chain and
//! mirrored to durable storage. The chain is rebuilt from the mirror on
//! startup (`restore`) and the mirror is caught up on shutdown (`persist`).
//!
//! # Example
//!
//! ```no_run
//! use vitalchain_core::LedgerConfig;
//! use vitalchain_ledger::LedgerService;
//!
//! # fn main() -> vitalchain_ledger::Result<()> {
//! let ledger = LedgerService::from_config(&LedgerConfig::default())?;
//! ledger.restore()?;
//! let receipt = ledger.commit(None)?;
//! println!("sealed block {}", receipt.block.index);
//! ledger.persist()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod reconcile;
pub mod retry;
pub mod service;
pub mod state;

pub use error::{LedgerError, Result};
pub use reconcile::{PersistReport, RestoreReport, SkipReason, SkippedBlock};
pub use retry::RetryPolicy;
pub use service::{ChainEntry, CommitReceipt, LedgerMetrics, LedgerService, MirrorStatus};
pub use state::{LedgerState, PatientIndex};
