//! Test utilities for ledger integration tests

use std::path::{Path, PathBuf};
use std::time::Duration;
use vitalchain_core::{LedgerConfig, MirrorBackend};
use vitalchain_domain::Reading;
use vitalchain_ledger::{LedgerService, RetryPolicy};
use vitalchain_mirror::SqliteMirror;

/// A node's on-disk footprint: one key file and one SQLite mirror.
///
/// Each `start()` builds a fresh `LedgerService` from the same config, which
/// is what a process restart looks like to the ledger. The directory is
/// removed on drop.
pub struct TestNode {
    dir: PathBuf,
    pub config: LedgerConfig,
}

impl TestNode {
    pub fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("test_vitalchain_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = LedgerConfig::default();
        config.storage.key_path = dir.join("ledger.key");
        config.storage.mirror_backend = MirrorBackend::Sqlite;
        config.storage.mirror_path = dir.join("mirror.db");
        config.ingest.simulator_seed = Some(7);
        config.retry.max_attempts = 1;

        Self { dir, config }
    }

    /// Same mirror, different key file
    pub fn with_foreign_key(&self) -> LedgerConfig {
        let mut config = self.config.clone();
        config.storage.key_path = self.dir.join("foreign.key");
        config
    }

    pub fn start(&self) -> LedgerService {
        start_with(&self.config)
    }

    /// Start and rebuild from the mirror, like the node does on boot
    pub fn restart(&self) -> LedgerService {
        let ledger = self.start();
        ledger.restore().unwrap();
        ledger
    }

    /// Direct handle on the mirror file for inspection or tampering
    pub fn open_mirror(&self) -> SqliteMirror {
        SqliteMirror::open(&self.config.storage.mirror_path, Duration::from_millis(500)).unwrap()
    }

    pub fn key_path(&self) -> &Path {
        &self.config.storage.key_path
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub fn start_with(config: &LedgerConfig) -> LedgerService {
    LedgerService::from_config(config)
        .unwrap()
        .with_retry(RetryPolicy::none())
}

/// Reading with normal vitals
pub fn normal_reading(patient_id: &str, timestamp: u64) -> Reading {
    Reading::new(patient_id, timestamp)
        .with_heart_rate(72)
        .with_blood_pressure(118, 76)
        .with_body_temp(36.8)
        .with_spo2(98)
        .with_glucose(95)
}

/// Hex hashes of every sealed block, in chain order
pub fn block_hashes(ledger: &LedgerService) -> Vec<String> {
    ledger
        .__with_chain_mut(|chain| chain.sealed_blocks().iter().map(|b| b.hash_hex()).collect())
        .unwrap()
}
