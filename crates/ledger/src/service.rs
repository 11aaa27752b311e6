//! Ledger Service - commit path and read views
//!
//! The service owns the chain, the patient index, the cipher and a handle to
//! the durable mirror. Every reading goes through:
//!
//! `Received -> Evaluated -> Sealed -> Mirrored | MirrorFailed`
//!
//! A mirror failure never undoes a commit; the in-memory chain stays
//! authoritative and `persist()` catches the mirror up later.
//!
//! # Locking
//!
//! - `writer` (Mutex): one mutating operation at a time. `commit` holds it
//!   from append through the mirror write, `persist` and `restore` for their
//!   whole run, so a restore can never swap out a block committed meanwhile
//! - `state` (RwLock): chain and patient index, always changed together
//! - `mirror_gate` (Mutex): serializes all mirror traffic
//! - `source` (Mutex): the reading source
//!
//! Locks are taken in the order `writer`, `mirror_gate`, `state`, and mirror
//! calls are never made while `state` is held. Read views clone the
//! blocks they need under the read lock and decrypt after releasing it.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use vitalchain_core::LedgerConfig;
use vitalchain_crypto::{Block, LedgerCipher, ValidityResult};
use vitalchain_domain::{Alert, Reading, ReadingSource, SimulatedSource, ThresholdEngine};
use vitalchain_mirror::{
    open_mirror, BlockRecord, MirrorResult, MirrorStore, PatientRecord, ReadingRecord,
    RecordFilter, RecordSort,
};

use crate::error::{LedgerError, Result};
use crate::retry::RetryPolicy;
use crate::state::LedgerState;

/// Outcome of the best-effort mirror write after a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum MirrorStatus {
    Mirrored,
    Failed(String),
}

impl MirrorStatus {
    pub fn is_mirrored(&self) -> bool {
        matches!(self, MirrorStatus::Mirrored)
    }
}

/// Result of a successful commit
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub block: Block,
    pub alerts: Vec<Alert>,
    /// The reading as sealed, alerts attached
    pub reading: Reading,
    pub mirror_status: MirrorStatus,
}

/// Block metadata joined with its decrypted reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    pub index: u64,
    pub timestamp: u64,
    pub hash: String,
    pub previous_hash: String,
    pub reading: Reading,
}

impl ChainEntry {
    fn from_block(block: &Block, reading: Reading) -> Self {
        Self {
            index: block.index,
            timestamp: block.timestamp,
            hash: block.hash_hex(),
            previous_hash: block.previous_hash_hex(),
            reading,
        }
    }

    fn from_record(block: BlockRecord, reading: Reading) -> Self {
        Self {
            index: block.index,
            timestamp: block.timestamp,
            hash: block.hash,
            previous_hash: block.previous_hash,
            reading,
        }
    }
}

/// Observability metrics for the ledger service
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerMetrics {
    pub commits_total: u64,
    pub mirror_failures_total: u64,
    /// Reads served from the chain because the mirror failed or was empty
    pub mirror_fallbacks_total: u64,
    pub decrypt_failures_total: u64,
    pub integrity_violations_total: u64,
    pub blocks_persisted_total: u64,
    pub blocks_restored_total: u64,
    pub blocks_skipped_total: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub commits: AtomicU64,
    pub mirror_failures: AtomicU64,
    pub mirror_fallbacks: AtomicU64,
    pub decrypt_failures: AtomicU64,
    pub integrity_violations: AtomicU64,
    pub blocks_persisted: AtomicU64,
    pub blocks_restored: AtomicU64,
    pub blocks_skipped: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LedgerMetrics {
        LedgerMetrics {
            commits_total: self.commits.load(Ordering::Relaxed),
            mirror_failures_total: self.mirror_failures.load(Ordering::Relaxed),
            mirror_fallbacks_total: self.mirror_fallbacks.load(Ordering::Relaxed),
            decrypt_failures_total: self.decrypt_failures.load(Ordering::Relaxed),
            integrity_violations_total: self.integrity_violations.load(Ordering::Relaxed),
            blocks_persisted_total: self.blocks_persisted.load(Ordering::Relaxed),
            blocks_restored_total: self.blocks_restored.load(Ordering::Relaxed),
            blocks_skipped_total: self.blocks_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Encrypted, hash-chained vital-sign ledger with a durable mirror
pub struct LedgerService {
    pub(crate) cipher: LedgerCipher,
    engine: ThresholdEngine,
    pub(crate) mirror: Arc<dyn MirrorStore>,
    pub(crate) state: RwLock<LedgerState>,
    source: Mutex<Box<dyn ReadingSource>>,
    writer: Mutex<()>,
    mirror_gate: Mutex<()>,
    pub(crate) retry: RetryPolicy,
    pub(crate) counters: Counters,
}

impl LedgerService {
    /// Service over a fresh genesis chain
    pub fn new(
        cipher: LedgerCipher,
        mirror: Arc<dyn MirrorStore>,
        source: Box<dyn ReadingSource>,
    ) -> Self {
        Self {
            cipher,
            engine: ThresholdEngine::new(),
            mirror,
            state: RwLock::new(LedgerState::default()),
            source: Mutex::new(source),
            writer: Mutex::new(()),
            mirror_gate: Mutex::new(()),
            retry: RetryPolicy::default(),
            counters: Counters::default(),
        }
    }

    /// Build the service described by configuration: key file, mirror
    /// backend, retry policy and simulator seed.
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        let cipher = LedgerCipher::load_or_generate(&config.storage.key_path)?;
        let mirror = open_mirror(&config.storage)?;
        let source: Box<dyn ReadingSource> = match config.ingest.simulator_seed {
            Some(seed) => Box::new(SimulatedSource::with_seed(seed)),
            None => Box::new(SimulatedSource::new()),
        };

        info!(
            backend = mirror.backend_name(),
            key_origin = ?cipher.origin(),
            "Ledger service configured"
        );

        Ok(Self::new(cipher, mirror, source).with_retry(RetryPolicy::from(&config.retry)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_engine(mut self, engine: ThresholdEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn cipher(&self) -> &LedgerCipher {
        &self.cipher
    }

    pub(crate) fn read_state(&self) -> Result<RwLockReadGuard<'_, LedgerState>> {
        self.state.read().map_err(|_| LedgerError::StatePoisoned)
    }

    pub(crate) fn write_state(&self) -> Result<RwLockWriteGuard<'_, LedgerState>> {
        self.state.write().map_err(|_| LedgerError::StatePoisoned)
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer.lock().map_err(|_| LedgerError::StatePoisoned)
    }

    pub(crate) fn mirror_gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.mirror_gate.lock().map_err(|_| LedgerError::StatePoisoned)
    }

    /// Run one mirror call under the retry policy. Caller holds the gate.
    pub(crate) fn call_mirror<T>(
        &self,
        operation: &str,
        mut op: impl FnMut(&dyn MirrorStore) -> MirrorResult<T>,
    ) -> MirrorResult<T> {
        self.retry.run(operation, || op(self.mirror.as_ref()))
    }

    /// Commit a reading, or one pulled from the source when `None`.
    ///
    /// Cipher and chain failures abort the commit. A mirror failure does not;
    /// it is reported in the receipt.
    pub fn commit(&self, reading: Option<Reading>) -> Result<CommitReceipt> {
        let mut reading = match reading {
            Some(reading) => reading,
            None => self.next_reading()?,
        };
        reading.validate().map_err(LedgerError::InvalidReading)?;

        let alerts = self.engine.evaluate(&reading);
        reading.alerts = alerts.clone();

        let payload = self.cipher.encrypt(&reading)?;

        let _writer = self.writer()?;
        let block = {
            let mut state = self.write_state()?;
            let block = state.chain.append(payload)?;
            state.index.record(reading.clone());
            block
        };
        Counters::bump(&self.counters.commits, 1);

        info!(
            index = block.index,
            patient_id = %reading.patient_id,
            alerts = alerts.len(),
            "Reading sealed"
        );
        for alert in &alerts {
            warn!(
                patient_id = %reading.patient_id,
                field = %alert.field,
                severity = ?alert.severity,
                message = %alert.message,
                "Vital sign alert"
            );
        }

        let mirror_status = match self.mirror_commit(&block, &reading) {
            Ok(()) => MirrorStatus::Mirrored,
            Err(e) => {
                Counters::bump(&self.counters.mirror_failures, 1);
                warn!(index = block.index, error = %e, "Mirror write failed, block kept in memory");
                MirrorStatus::Failed(e.to_string())
            }
        };

        Ok(CommitReceipt {
            block,
            alerts,
            reading,
            mirror_status,
        })
    }

    fn next_reading(&self) -> Result<Reading> {
        let mut source = self.source.lock().map_err(|_| LedgerError::StatePoisoned)?;
        source.next_reading().map_err(LedgerError::Source)
    }

    fn mirror_commit(&self, block: &Block, reading: &Reading) -> Result<()> {
        let _gate = self.mirror_gate()?;
        self.write_block(block, reading)?;
        Ok(())
    }

    /// Write whatever part of a block is missing from the mirror: reading
    /// record, block record, patient entry. Returns whether anything was
    /// written. Caller holds the gate.
    pub(crate) fn write_block(&self, block: &Block, reading: &Reading) -> MirrorResult<bool> {
        let hash = block.hash_hex();
        let by_hash = RecordFilter::BlockHash(hash.clone());
        let mut wrote = false;

        let readings = self.call_mirror("find_readings", |m| {
            m.find_readings(&by_hash, RecordSort::IndexAscending)
        })?;
        if readings.is_empty() {
            let record = ReadingRecord::new(reading.clone(), hash.clone(), block.index);
            let record_id =
                self.call_mirror("insert_reading_record", |m| m.insert_reading_record(&record))?;
            debug!(index = block.index, record_id = %record_id, "Reading record mirrored");
            wrote = true;
        }

        if self
            .call_mirror("find_block_by_hash", |m| m.find_block_by_hash(&hash))?
            .is_none()
        {
            let record = BlockRecord {
                index: block.index,
                timestamp: block.timestamp,
                hash: hash.clone(),
                previous_hash: block.previous_hash_hex(),
                patient_id: reading.patient_id.clone(),
                ciphertext: Some(block.payload.clone()),
                created_at: vitalchain_core::current_timestamp_ms(),
            };
            self.call_mirror("insert_block_record", |m| m.insert_block_record(&record))?;
            wrote = true;
        }

        let mut patient = self
            .call_mirror("find_patient", |m| m.find_patient(&reading.patient_id))?
            .unwrap_or_else(|| PatientRecord::new(reading.patient_id.clone()));
        if patient.add_block_hash(&hash) {
            self.call_mirror("upsert_patient", |m| m.upsert_patient(&patient))?;
            wrote = true;
        }

        Ok(wrote)
    }

    /// A patient's readings, most recent first.
    ///
    /// Served from the mirror; falls back to decrypting the chain when the
    /// mirror fails or has nothing for the patient.
    pub fn history(&self, patient_id: &str) -> Result<Vec<Reading>> {
        let mirrored = {
            let _gate = self.mirror_gate()?;
            self.call_mirror("find_readings", |m| {
                m.find_readings(
                    &RecordFilter::Patient(patient_id.to_string()),
                    RecordSort::TimestampDescending,
                )
            })
        };

        match mirrored {
            Ok(records) if !records.is_empty() => {
                return Ok(records.into_iter().map(ReadingRecord::into_reading).collect());
            }
            Ok(_) => debug!(patient_id, "No mirrored history, reading chain"),
            Err(e) => warn!(patient_id, error = %e, "Mirror history failed, reading chain"),
        }
        Counters::bump(&self.counters.mirror_fallbacks, 1);

        let mut history: Vec<(u64, Reading)> = self
            .decrypt_chain()?
            .into_iter()
            .filter(|(_, reading)| reading.patient_id == patient_id)
            .map(|(block, reading)| (block.index, reading))
            .collect();
        history.sort_by(|(ia, a), (ib, b)| (b.timestamp, ib).cmp(&(a.timestamp, ia)));

        Ok(history.into_iter().map(|(_, reading)| reading).collect())
    }

    /// Every block with its reading, in index order
    pub fn chain_view(&self) -> Result<Vec<ChainEntry>> {
        self.view(None)
    }

    /// One patient's blocks with their readings, in index order
    pub fn patient_chain_view(&self, patient_id: &str) -> Result<Vec<ChainEntry>> {
        self.view(Some(patient_id))
    }

    fn view(&self, patient_id: Option<&str>) -> Result<Vec<ChainEntry>> {
        match self.mirrored_view(patient_id) {
            Ok(entries) if !entries.is_empty() => return Ok(entries),
            Ok(_) => debug!(patient_id, "Mirror holds no blocks, reading chain"),
            Err(e) => warn!(patient_id, error = %e, "Mirror view failed, reading chain"),
        }
        Counters::bump(&self.counters.mirror_fallbacks, 1);

        Ok(self
            .decrypt_chain()?
            .into_iter()
            .filter(|(_, reading)| patient_id.map_or(true, |id| reading.patient_id == id))
            .map(|(block, reading)| ChainEntry::from_block(&block, reading))
            .collect())
    }

    /// Block records joined to reading records by hash. Blocks without a
    /// reading record are left out.
    fn mirrored_view(&self, patient_id: Option<&str>) -> Result<Vec<ChainEntry>> {
        let filter = match patient_id {
            Some(id) => RecordFilter::Patient(id.to_string()),
            None => RecordFilter::All,
        };

        let _gate = self.mirror_gate()?;
        let blocks = self.call_mirror("find_blocks", |m| {
            m.find_blocks(&filter, RecordSort::IndexAscending)
        })?;
        if blocks.is_empty() {
            return Ok(Vec::new());
        }
        let readings = self.call_mirror("find_readings", |m| {
            m.find_readings(&filter, RecordSort::IndexAscending)
        })?;

        let mut by_hash: HashMap<String, Reading> = HashMap::with_capacity(readings.len());
        for record in readings {
            by_hash
                .entry(record.block_hash.clone())
                .or_insert_with(|| record.into_reading());
        }

        Ok(blocks
            .into_iter()
            .filter_map(|block| {
                let reading = by_hash.remove(&block.hash)?;
                Some(ChainEntry::from_record(block, reading))
            })
            .collect())
    }

    /// Decrypt every non-genesis block, skipping those that fail.
    pub(crate) fn decrypt_chain(&self) -> Result<Vec<(Block, Reading)>> {
        let blocks = self.read_state()?.chain.sealed_blocks().to_vec();

        let mut opened = Vec::with_capacity(blocks.len());
        for block in blocks {
            match self.cipher.decrypt::<Reading>(&block.payload) {
                Ok(reading) => opened.push((block, reading)),
                Err(e) => {
                    Counters::bump(&self.counters.decrypt_failures, 1);
                    warn!(index = block.index, error = %e, "Skipping undecryptable block");
                }
            }
        }
        Ok(opened)
    }

    /// Drop a patient from the in-memory index. Blocks are never touched.
    pub fn remove_patient(&self, patient_id: &str) -> Result<bool> {
        let _writer = self.writer()?;
        let removed = self.write_state()?.index.remove(patient_id);
        if removed {
            info!(patient_id, "Patient removed from index");
        }
        Ok(removed)
    }

    /// Known patient ids: the mirror's list, or the in-memory index if the
    /// mirror cannot be read.
    pub fn patients(&self) -> Result<Vec<String>> {
        let mirrored = {
            let _gate = self.mirror_gate()?;
            self.call_mirror("list_patients", |m| m.list_patients())
        };

        match mirrored {
            Ok(patients) => Ok(patients),
            Err(e) => {
                warn!(error = %e, "Mirror patient list failed, using index");
                Counters::bump(&self.counters.mirror_fallbacks, 1);
                Ok(self.read_state()?.index.patients())
            }
        }
    }

    /// Readings held in the in-memory index for a patient
    pub fn indexed_readings(&self, patient_id: &str) -> Result<Option<Vec<Reading>>> {
        Ok(self
            .read_state()?
            .index
            .get(patient_id)
            .map(|readings| readings.to_vec()))
    }

    /// Full integrity check of the in-memory chain
    pub fn validate(&self) -> Result<ValidityResult> {
        let result = self.read_state()?.chain.validate();
        if let ValidityResult::Invalid { index, reason, .. } = &result {
            Counters::bump(&self.counters.integrity_violations, 1);
            error!(index, reason = %reason, "Chain integrity violation detected");
        }
        Ok(result)
    }

    pub fn is_valid(&self) -> Result<bool> {
        Ok(self.validate()?.is_valid())
    }

    pub fn latest(&self) -> Result<Block> {
        Ok(self.read_state()?.chain.latest().clone())
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_state()?.chain.len())
    }

    pub fn metrics(&self) -> LedgerMetrics {
        self.counters.snapshot()
    }

    /// Mutable access to the chain for tamper simulation in tests
    #[doc(hidden)]
    pub fn __with_chain_mut<R>(&self, f: impl FnOnce(&mut vitalchain_crypto::Chain) -> R) -> Result<R> {
        Ok(f(&mut self.write_state()?.chain))
    }
}
