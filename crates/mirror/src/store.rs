//! The mirror storage seam

use thiserror::Error;
use tracing::warn;

use crate::records::{
    BlockRecord, PatientRecord, ReadingRecord, ReadingScan, RecordFilter, RecordSort,
};

/// Errors that can occur in mirror operations
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Transient: the store could not be reached or is busy
    #[error("Mirror unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write (e.g. duplicate block hash)
    #[error("Mirror rejected write: {0}")]
    Rejected(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MirrorError {
    /// Only unavailability is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, MirrorError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for MirrorError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy)
            | Some(ErrorCode::DatabaseLocked)
            | Some(ErrorCode::CannotOpen) => MirrorError::Unavailable(err.to_string()),
            Some(ErrorCode::ConstraintViolation) => MirrorError::Rejected(err.to_string()),
            _ => MirrorError::Database(err),
        }
    }
}

pub type MirrorResult<T> = std::result::Result<T, MirrorError>;

/// Durable record store holding a queryable copy of the ledger.
///
/// Implementations must be safe to share across threads; callers serialize
/// writes themselves.
pub trait MirrorStore: Send + Sync {
    fn find_patient(&self, patient_id: &str) -> MirrorResult<Option<PatientRecord>>;

    /// Insert or replace the record keyed by `patient_id`
    fn upsert_patient(&self, record: &PatientRecord) -> MirrorResult<()>;

    /// Returns whether a record was removed
    fn delete_patient(&self, patient_id: &str) -> MirrorResult<bool>;

    /// Patient ids in ascending order
    fn list_patients(&self) -> MirrorResult<Vec<String>>;

    /// Store a reading record and return its id
    fn insert_reading_record(&self, record: &ReadingRecord) -> MirrorResult<String>;

    /// Matching reading rows. A row that fails to parse is listed in
    /// `corrupt` and does not fail the query.
    fn scan_readings(&self, filter: &RecordFilter, sort: RecordSort) -> MirrorResult<ReadingScan>;

    /// Parsed reading rows only; unparseable rows are logged and left out.
    fn find_readings(
        &self,
        filter: &RecordFilter,
        sort: RecordSort,
    ) -> MirrorResult<Vec<ReadingRecord>> {
        let scan = self.scan_readings(filter, sort)?;
        for bad in &scan.corrupt {
            warn!(
                record_id = %bad.record_id,
                block_index = bad.block_index,
                error = %bad.error,
                "Skipping unparseable reading record"
            );
        }
        Ok(scan.records)
    }

    /// Store a block record. A record with the same hash is `Rejected`.
    fn insert_block_record(&self, record: &BlockRecord) -> MirrorResult<()>;

    fn find_blocks(&self, filter: &RecordFilter, sort: RecordSort)
        -> MirrorResult<Vec<BlockRecord>>;

    fn find_block_by_hash(&self, hash: &str) -> MirrorResult<Option<BlockRecord>> {
        Ok(self
            .find_blocks(&RecordFilter::BlockHash(hash.to_string()), RecordSort::IndexAscending)?
            .into_iter()
            .next())
    }

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}
