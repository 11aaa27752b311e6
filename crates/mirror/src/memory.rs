//! In-memory mirror backend
//!
//! Mutex-guarded maps with the same semantics as the SQLite backend. Two
//! hooks exist for exercising failure paths: `set_available(false)` makes
//! every call return `Unavailable`, and `delete_reading_by_block_hash`
//! removes a reading record out of band.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::records::{
    BlockRecord, PatientRecord, ReadingRecord, ReadingScan, RecordFilter, RecordSort,
};
use crate::store::{MirrorError, MirrorResult, MirrorStore};

#[derive(Default)]
struct Tables {
    patients: BTreeMap<String, PatientRecord>,
    readings: Vec<ReadingRecord>,
    blocks: BTreeMap<String, BlockRecord>,
}

/// Volatile mirror
pub struct MemoryMirror {
    tables: Mutex<Tables>,
    available: AtomicBool,
    calls: AtomicU64,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    /// Simulate the store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Remove reading records for a block behind the ledger's back.
    /// Returns how many were removed.
    pub fn delete_reading_by_block_hash(&self, hash: &str) -> usize {
        let mut tables = match self.tables.lock() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = tables.readings.len();
        tables.readings.retain(|r| r.block_hash != hash);
        before - tables.readings.len()
    }

    /// Total store calls attempted, including refused ones
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn tables(&self) -> MirrorResult<MutexGuard<'_, Tables>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return Err(MirrorError::Unavailable("memory mirror is offline".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| MirrorError::Unavailable("memory mirror lock poisoned".to_string()))
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorStore for MemoryMirror {
    fn find_patient(&self, patient_id: &str) -> MirrorResult<Option<PatientRecord>> {
        Ok(self.tables()?.patients.get(patient_id).cloned())
    }

    fn upsert_patient(&self, record: &PatientRecord) -> MirrorResult<()> {
        self.tables()?
            .patients
            .insert(record.patient_id.clone(), record.clone());
        Ok(())
    }

    fn delete_patient(&self, patient_id: &str) -> MirrorResult<bool> {
        Ok(self.tables()?.patients.remove(patient_id).is_some())
    }

    fn list_patients(&self) -> MirrorResult<Vec<String>> {
        Ok(self.tables()?.patients.keys().cloned().collect())
    }

    fn insert_reading_record(&self, record: &ReadingRecord) -> MirrorResult<String> {
        let mut tables = self.tables()?;
        if tables.readings.iter().any(|r| r.record_id == record.record_id) {
            return Err(MirrorError::Rejected(format!(
                "duplicate record id {}",
                record.record_id
            )));
        }
        tables.readings.push(record.clone());
        Ok(record.record_id.clone())
    }

    fn scan_readings(&self, filter: &RecordFilter, sort: RecordSort) -> MirrorResult<ReadingScan> {
        let mut records: Vec<ReadingRecord> = self
            .tables()?
            .readings
            .iter()
            .filter(|r| filter.matches_reading(r))
            .cloned()
            .collect();
        sort.sort_readings(&mut records);
        // Records are held typed, so nothing here can be corrupt
        Ok(ReadingScan {
            records,
            corrupt: Vec::new(),
        })
    }

    fn insert_block_record(&self, record: &BlockRecord) -> MirrorResult<()> {
        let mut tables = self.tables()?;
        if tables.blocks.contains_key(&record.hash) {
            return Err(MirrorError::Rejected(format!(
                "duplicate block hash {}",
                record.hash
            )));
        }
        tables.blocks.insert(record.hash.clone(), record.clone());
        Ok(())
    }

    fn find_blocks(&self, filter: &RecordFilter, sort: RecordSort) -> MirrorResult<Vec<BlockRecord>> {
        let mut found: Vec<BlockRecord> = self
            .tables()?
            .blocks
            .values()
            .filter(|b| filter.matches_block(b))
            .cloned()
            .collect();
        sort.sort_blocks(&mut found);
        Ok(found)
    }

    fn find_block_by_hash(&self, hash: &str) -> MirrorResult<Option<BlockRecord>> {
        Ok(self.tables()?.blocks.get(hash).cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
