//! Error types for the ledger service

use thiserror::Error;
use vitalchain_crypto::{ChainError, CipherError};
use vitalchain_domain::DomainError;
use vitalchain_mirror::MirrorError;

/// Errors that can occur in ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    /// A thread panicked while holding the ledger state lock
    #[error("Ledger state lock poisoned")]
    StatePoisoned,

    #[error("Reading source error: {0}")]
    Source(DomainError),

    #[error("Invalid reading: {0}")]
    InvalidReading(DomainError),
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;
