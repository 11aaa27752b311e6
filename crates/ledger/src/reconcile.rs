//! Reconciliation between the in-memory chain and the durable mirror
//!
//! - `persist()` writes every block the mirror does not have yet. Run on
//!   shutdown and whenever an earlier mirror write failed.
//! - `restore()` rebuilds the chain from the mirror on startup.
//!
//! Both tolerate partial failure: a block that cannot be processed is
//! skipped, logged and listed in the report rather than aborting the run.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use vitalchain_crypto::{parse_block_hash, Block, Chain};
use vitalchain_domain::Reading;
use vitalchain_mirror::{BlockRecord, RecordFilter, RecordSort};

use crate::error::Result;
use crate::service::{Counters, LedgerService};
use crate::state::{LedgerState, PatientIndex};

/// Summary of a `persist()` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    /// Non-genesis blocks examined
    pub blocks_examined: usize,
    /// Blocks for which at least one record was written
    pub blocks_written: usize,
    /// Blocks the mirror already held
    pub already_mirrored: usize,
    /// Blocks whose payload could not be decrypted
    pub undecryptable: Vec<u64>,
    /// Blocks the mirror refused, with the reason
    pub failed: Vec<(u64, String)>,
}

/// Why a mirrored block was left out of the rebuilt chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// No reading record carries the block's hash
    MissingReading,
    /// The block's reading record is stored but does not parse
    CorruptRecord(String),
    /// Stored hash or previous hash is not 32 hex-encoded bytes
    InvalidHash,
    /// The reading could not be sealed again
    ResealFailed(String),
    /// Index does not move forward from the previous restored block
    OutOfOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBlock {
    pub index: u64,
    pub hash: String,
    pub reason: SkipReason,
}

/// Summary of a `restore()` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Block records found in the mirror
    pub blocks_found: usize,
    pub blocks_restored: usize,
    /// Restored blocks whose archived ciphertext was reused as-is
    pub ciphertexts_reused: usize,
    /// Restored blocks sealed again under the current key
    pub resealed: usize,
    pub skipped: Vec<SkippedBlock>,
}

impl RestoreReport {
    /// False only when the mirror held nothing to restore
    pub fn is_restored(&self) -> bool {
        self.blocks_found > 0
    }
}

impl LedgerService {
    /// Write every block the mirror lacks.
    ///
    /// Idempotent: blocks already present (block record and reading record)
    /// are left alone. Fails as a whole only when the mirror is unreachable.
    pub fn persist(&self) -> Result<PersistReport> {
        let _writer = self.writer()?;
        let blocks: Vec<Block> = self.read_state()?.chain.sealed_blocks().to_vec();
        let mut report = PersistReport {
            blocks_examined: blocks.len(),
            ..PersistReport::default()
        };

        let _gate = self.mirror_gate()?;
        for block in &blocks {
            let hash = block.hash_hex();

            let block_present = self
                .call_mirror("find_block_by_hash", |m| m.find_block_by_hash(&hash))?
                .is_some();
            let reading_present = !self
                .call_mirror("find_readings", |m| {
                    m.find_readings(&RecordFilter::BlockHash(hash.clone()), RecordSort::IndexAscending)
                })?
                .is_empty();
            if block_present && reading_present {
                report.already_mirrored += 1;
                continue;
            }

            let reading: Reading = match self.cipher.decrypt(&block.payload) {
                Ok(reading) => reading,
                Err(e) => {
                    Counters::bump(&self.counters.decrypt_failures, 1);
                    warn!(index = block.index, error = %e, "Skipping undecryptable block during persist");
                    report.undecryptable.push(block.index);
                    continue;
                }
            };

            match self.write_block(block, &reading) {
                Ok(true) => report.blocks_written += 1,
                Ok(false) => report.already_mirrored += 1,
                Err(e) if e.is_retryable() => return Err(e.into()),
                Err(e) => {
                    warn!(index = block.index, error = %e, "Mirror refused block during persist");
                    report.failed.push((block.index, e.to_string()));
                }
            }
        }

        Counters::bump(&self.counters.blocks_persisted, report.blocks_written as u64);
        info!(
            examined = report.blocks_examined,
            written = report.blocks_written,
            already_mirrored = report.already_mirrored,
            undecryptable = report.undecryptable.len(),
            failed = report.failed.len(),
            "Ledger persisted to mirror"
        );

        Ok(report)
    }

    /// Rebuild chain and patient index from the mirror.
    ///
    /// If the mirror is unreachable or holds no blocks, in-memory state is
    /// left untouched. Otherwise the chain is rebuilt from genesis off-lock
    /// and swapped in. Each block keeps its recorded hash; blocks without a
    /// reading record or that cannot be sealed are skipped and reported.
    ///
    /// No commit can land between the first mirror read and the swap.
    pub fn restore(&self) -> Result<RestoreReport> {
        let _writer = self.writer()?;
        let (records, scan, patient_ids) = {
            let _gate = self.mirror_gate()?;
            let records = self.call_mirror("find_blocks", |m| {
                m.find_blocks(&RecordFilter::All, RecordSort::IndexAscending)
            })?;
            if records.is_empty() {
                info!("Mirror holds no blocks, nothing to restore");
                return Ok(RestoreReport::default());
            }
            let scan = self.call_mirror("scan_readings", |m| {
                m.scan_readings(&RecordFilter::All, RecordSort::IndexAscending)
            })?;
            let patient_ids = self
                .call_mirror("list_patients", |m| m.list_patients())
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Could not list mirrored patients");
                    Vec::new()
                });
            (records, scan, patient_ids)
        };

        let mut by_hash: HashMap<String, Reading> = HashMap::with_capacity(scan.records.len());
        for record in scan.records {
            by_hash
                .entry(record.block_hash.clone())
                .or_insert_with(|| record.into_reading());
        }
        let mut corrupt: HashMap<String, String> = HashMap::new();
        for bad in scan.corrupt {
            warn!(record_id = %bad.record_id, block_index = bad.block_index, error = %bad.error, "Unparseable reading record in mirror");
            corrupt.entry(bad.block_hash).or_insert(bad.error);
        }

        let mut report = RestoreReport {
            blocks_found: records.len(),
            ..RestoreReport::default()
        };
        let mut chain = Chain::genesis();
        let mut index = PatientIndex::default();
        for patient_id in &patient_ids {
            index.ensure_patient(patient_id);
        }

        for record in records {
            let skip = |reason| SkippedBlock {
                index: record.index,
                hash: record.hash.clone(),
                reason,
            };

            let (Some(hash), Some(previous_hash)) = (
                parse_block_hash(&record.hash),
                parse_block_hash(&record.previous_hash),
            ) else {
                report.skipped.push(skip(SkipReason::InvalidHash));
                continue;
            };

            let Some(reading) = by_hash.remove(&record.hash) else {
                let reason = match corrupt.remove(&record.hash) {
                    Some(error) => SkipReason::CorruptRecord(error),
                    None => SkipReason::MissingReading,
                };
                report.skipped.push(skip(reason));
                continue;
            };

            let (payload, reused) = match self.reseal(&record, &reading) {
                Ok(sealed) => sealed,
                Err(e) => {
                    report.skipped.push(skip(SkipReason::ResealFailed(e.to_string())));
                    continue;
                }
            };

            if chain
                .append_historical(record.index, record.timestamp, payload, previous_hash, hash)
                .is_err()
            {
                report.skipped.push(skip(SkipReason::OutOfOrder));
                continue;
            }

            if reused {
                report.ciphertexts_reused += 1;
            } else {
                report.resealed += 1;
            }
            report.blocks_restored += 1;
            index.record(reading);
        }

        for skipped in &report.skipped {
            warn!(index = skipped.index, hash = %skipped.hash, reason = ?skipped.reason, "Block skipped during restore");
        }

        *self.write_state()? = LedgerState { chain, index };

        Counters::bump(&self.counters.blocks_restored, report.blocks_restored as u64);
        Counters::bump(&self.counters.blocks_skipped, report.skipped.len() as u64);
        info!(
            found = report.blocks_found,
            restored = report.blocks_restored,
            reused = report.ciphertexts_reused,
            resealed = report.resealed,
            skipped = report.skipped.len(),
            "Ledger restored from mirror"
        );

        Ok(report)
    }

    /// Payload for a restored block and whether it is the archived one.
    ///
    /// The archived ciphertext is kept only if it opens under the current key
    /// to exactly the mirrored reading; otherwise the reading is encrypted
    /// again, which keeps the reading but not the original hash input.
    fn reseal(
        &self,
        record: &BlockRecord,
        reading: &Reading,
    ) -> vitalchain_crypto::CipherResult<(Vec<u8>, bool)> {
        if let Some(archived) = &record.ciphertext {
            match self.cipher.decrypt::<Reading>(archived) {
                Ok(opened) if &opened == reading => return Ok((archived.clone(), true)),
                Ok(_) => warn!(index = record.index, "Archived payload differs from mirrored reading"),
                Err(e) => warn!(index = record.index, error = %e, "Archived payload does not open"),
            }
        }
        Ok((self.cipher.encrypt(reading)?, false))
    }
}
