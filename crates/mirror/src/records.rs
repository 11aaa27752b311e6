//! Mirror record shapes
//!
//! Three collections: patients, health records (one per sealed reading) and
//! block records. Hashes are hex encoded.

use serde::{Deserialize, Serialize};
use vitalchain_core::time::current_timestamp_ms;
use vitalchain_domain::Reading;

/// Per-patient summary, keyed by patient id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: String,
    /// Hashes of the patient's blocks, in commit order
    pub block_hashes: Vec<String>,
    /// Last modification (Unix milliseconds)
    pub updated_at: u64,
}

impl PatientRecord {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            block_hashes: Vec::new(),
            updated_at: current_timestamp_ms(),
        }
    }

    /// Record a block for this patient. Returns false if already listed.
    pub fn add_block_hash(&mut self, hash: &str) -> bool {
        if self.block_hashes.iter().any(|h| h == hash) {
            return false;
        }
        self.block_hashes.push(hash.to_string());
        self.updated_at = current_timestamp_ms();
        true
    }
}

/// Plaintext copy of a sealed reading.
///
/// `record_id`, `block_hash`, `block_index` and `created_at` exist only in
/// the mirror; `reading` is exactly what was sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub record_id: String,
    pub reading: Reading,
    pub block_hash: String,
    pub block_index: u64,
    pub created_at: u64,
}

impl ReadingRecord {
    /// New record with a freshly assigned id
    pub fn new(reading: Reading, block_hash: impl Into<String>, block_index: u64) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            reading,
            block_hash: block_hash.into(),
            block_index,
            created_at: current_timestamp_ms(),
        }
    }

    /// Drop the mirror-only fields
    pub fn into_reading(self) -> Reading {
        self.reading
    }
}

/// A stored reading row whose payload no longer parses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptRecord {
    pub record_id: String,
    pub block_hash: String,
    pub block_index: u64,
    pub error: String,
}

/// Reading rows matched by a query, split into parsed and unparseable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingScan {
    pub records: Vec<ReadingRecord>,
    pub corrupt: Vec<CorruptRecord>,
}

/// Archived block metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub index: u64,
    pub timestamp: u64,
    pub hash: String,
    pub previous_hash: String,
    pub patient_id: String,
    /// Sealed payload as it was on the chain
    pub ciphertext: Option<Vec<u8>>,
    pub created_at: u64,
}

/// Which records a query returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    All,
    Patient(String),
    BlockHash(String),
}

/// Result ordering. Ties break on block index, ascending or descending with
/// the primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordSort {
    #[default]
    IndexAscending,
    TimestampAscending,
    TimestampDescending,
}

impl RecordFilter {
    pub(crate) fn matches_reading(&self, record: &ReadingRecord) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Patient(id) => &record.reading.patient_id == id,
            RecordFilter::BlockHash(hash) => &record.block_hash == hash,
        }
    }

    pub(crate) fn matches_block(&self, record: &BlockRecord) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Patient(id) => &record.patient_id == id,
            RecordFilter::BlockHash(hash) => &record.hash == hash,
        }
    }
}

impl RecordSort {
    pub(crate) fn sort_readings(self, records: &mut [ReadingRecord]) {
        match self {
            RecordSort::IndexAscending => records.sort_by_key(|r| r.block_index),
            RecordSort::TimestampAscending => {
                records.sort_by_key(|r| (r.reading.timestamp, r.block_index))
            }
            RecordSort::TimestampDescending => records.sort_by(|a, b| {
                (b.reading.timestamp, b.block_index).cmp(&(a.reading.timestamp, a.block_index))
            }),
        }
    }

    pub(crate) fn sort_blocks(self, records: &mut [BlockRecord]) {
        match self {
            RecordSort::IndexAscending => records.sort_by_key(|r| r.index),
            RecordSort::TimestampAscending => records.sort_by_key(|r| (r.timestamp, r.index)),
            RecordSort::TimestampDescending => {
                records.sort_by(|a, b| (b.timestamp, b.index).cmp(&(a.timestamp, a.index)))
            }
        }
    }

    /// SQL ORDER BY clause for the given timestamp and index columns
    pub(crate) fn order_by(self, timestamp_col: &str, index_col: &str) -> String {
        match self {
            RecordSort::IndexAscending => format!("{} ASC", index_col),
            RecordSort::TimestampAscending => format!("{} ASC, {} ASC", timestamp_col, index_col),
            RecordSort::TimestampDescending => {
                format!("{} DESC, {} DESC", timestamp_col, index_col)
            }
        }
    }
}
