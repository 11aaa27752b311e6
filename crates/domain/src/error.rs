//! Domain errors
//!
//! Pure domain errors with no infrastructure dependencies

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    #[error("Reading source exhausted")]
    SourceExhausted,
}

pub type Result<T> = std::result::Result<T, DomainError>;
