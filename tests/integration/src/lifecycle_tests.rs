//! Restart lifecycle against SQLite mirror files
//!
//! Each test drives one or more "processes" (fresh `LedgerService`s built
//! from the same config) through commit, persist and restore.

use crate::test_utils::{block_hashes, normal_reading, start_with, TestNode};
use vitalchain_crypto::{CipherError, KeyOrigin, LedgerCipher};
use vitalchain_domain::Reading;
use vitalchain_ledger::SkipReason;
use vitalchain_mirror::{MirrorStore, RecordFilter, RecordSort};

#[test]
fn test_restart_rebuilds_identical_chain() {
    let _ = tracing_subscriber::fmt::try_init();
    let node = TestNode::new();

    let first = node.start();
    for ts in 1..=5 {
        first.commit(Some(normal_reading("PAT1000", ts))).unwrap();
    }
    first.commit(Some(normal_reading("PAT2000", 6).with_heart_rate(140))).unwrap();
    let before = block_hashes(&first);
    let view_before = first.chain_view().unwrap();
    first.persist().unwrap();
    drop(first);

    let second = node.start();
    let report = second.restore().unwrap();

    assert!(report.is_restored());
    assert_eq!(report.blocks_found, 6);
    assert_eq!(report.blocks_restored, 6);
    assert_eq!(report.ciphertexts_reused, 6);
    assert!(report.skipped.is_empty());

    assert_eq!(block_hashes(&second), before);
    assert_eq!(second.chain_view().unwrap(), view_before);
    assert!(second.is_valid().unwrap());
    assert_eq!(second.patients().unwrap(), vec!["PAT1000", "PAT2000"]);
    assert_eq!(second.indexed_readings("PAT1000").unwrap().unwrap().len(), 5);

    // Alerts were sealed with the reading and survive the restart
    let history = second.history("PAT2000").unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].has_alerts());
}

#[test]
fn test_new_blocks_extend_restored_chain() {
    let node = TestNode::new();

    let first = node.start();
    first.commit(Some(normal_reading("PAT1000", 1))).unwrap();
    first.commit(Some(normal_reading("PAT1000", 2))).unwrap();
    let head = first.latest().unwrap();
    drop(first);

    let second = node.restart();
    let receipt = second.commit(Some(normal_reading("PAT1000", 3))).unwrap();

    assert_eq!(receipt.block.index, head.index + 1);
    assert_eq!(receipt.block.previous_hash, head.hash);
    assert!(receipt.block.timestamp >= head.timestamp);
    assert!(second.is_valid().unwrap());

    let third = node.restart();
    assert_eq!(third.len().unwrap(), 4);
    assert!(third.is_valid().unwrap());
}

#[test]
fn test_key_file_is_reused_across_restarts() {
    let node = TestNode::new();

    let first = node.start();
    assert_eq!(first.cipher().origin(), KeyOrigin::Generated);
    let fingerprint = first.cipher().fingerprint().to_string();
    drop(first);

    let second = node.start();
    assert_eq!(second.cipher().origin(), KeyOrigin::Loaded);
    assert_eq!(second.cipher().fingerprint(), fingerprint);

    let from_file = LedgerCipher::load_or_generate(node.key_path()).unwrap();
    assert_eq!(from_file.fingerprint(), fingerprint);
}

#[test]
fn test_archive_is_unreadable_under_foreign_key() {
    let node = TestNode::new();

    let original = node.start();
    original.commit(Some(normal_reading("PAT1000", 1))).unwrap();
    original.commit(Some(normal_reading("PAT1000", 2))).unwrap();
    drop(original);

    let foreign_config = node.with_foreign_key();
    let foreign = start_with(&foreign_config);
    assert_ne!(
        foreign.cipher().fingerprint(),
        LedgerCipher::load_or_generate(node.key_path()).unwrap().fingerprint()
    );

    let blocks = node
        .open_mirror()
        .find_blocks(&RecordFilter::All, RecordSort::IndexAscending)
        .unwrap();
    let archived = blocks[0].ciphertext.as_ref().unwrap();
    let result: Result<Reading, _> = foreign.cipher().decrypt(archived);
    assert!(matches!(result, Err(CipherError::Decryption(_))));

    // Readings are resealed under the new key, which breaks the stored hashes
    let report = foreign.restore().unwrap();
    assert_eq!(report.blocks_restored, 2);
    assert_eq!(report.resealed, 2);
    assert_eq!(report.ciphertexts_reused, 0);
    assert!(!foreign.is_valid().unwrap());
    assert_eq!(foreign.validate().unwrap().first_invalid_index(), Some(1));
}

#[test]
fn test_deleted_reading_record_is_left_out_on_restart() {
    let node = TestNode::new();

    let first = node.start();
    let mut receipts = Vec::new();
    for ts in 1..=3 {
        receipts.push(first.commit(Some(normal_reading("PAT1000", ts))).unwrap());
    }
    drop(first);

    let removed_hash = receipts[1].block.hash_hex();
    let deleted = node
        .open_mirror()
        .__test_execute_raw_sql(
            &format!("DELETE FROM health_records WHERE block_hash = '{}'", removed_hash),
            &[],
        )
        .unwrap();
    assert_eq!(deleted, 1);

    let second = node.start();
    let report = second.restore().unwrap();

    assert_eq!(report.blocks_found, 3);
    assert_eq!(report.blocks_restored, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].index, 2);
    assert_eq!(report.skipped[0].reason, SkipReason::MissingReading);

    // The gap is reported rather than hidden
    assert_eq!(second.validate().unwrap().first_invalid_index(), Some(3));
    assert_eq!(second.history("PAT1000").unwrap().len(), 2);
}

#[test]
fn test_persist_is_idempotent_on_sqlite() {
    let node = TestNode::new();
    let ledger = node.start();
    for ts in 1..=4 {
        ledger.commit(Some(normal_reading("PAT3000", ts))).unwrap();
    }

    let first = ledger.persist().unwrap();
    let second = ledger.persist().unwrap();
    assert_eq!(first.blocks_examined, 4);
    assert_eq!(first.already_mirrored, 4);
    assert_eq!(second, first);

    let mirror = node.open_mirror();
    let readings = mirror
        .find_readings(&RecordFilter::All, RecordSort::IndexAscending)
        .unwrap();
    let blocks = mirror
        .find_blocks(&RecordFilter::All, RecordSort::IndexAscending)
        .unwrap();
    assert_eq!(readings.len(), 4);
    assert_eq!(blocks.len(), 4);

    let patient = mirror.find_patient("PAT3000").unwrap().unwrap();
    assert_eq!(patient.block_hashes.len(), 4);
}

#[test]
fn test_history_is_newest_first_across_restart() {
    let node = TestNode::new();
    let first = node.start();
    for ts in [1_000, 3_000, 2_000] {
        first.commit(Some(normal_reading("PAT1000", ts))).unwrap();
    }
    first.commit(Some(normal_reading("PAT2000", 4_000))).unwrap();
    drop(first);

    let second = node.restart();
    let timestamps: Vec<u64> = second
        .history("PAT1000")
        .unwrap()
        .iter()
        .map(|r| r.timestamp)
        .collect();
    assert_eq!(timestamps, vec![3_000, 2_000, 1_000]);

    let patient_view = second.patient_chain_view("PAT2000").unwrap();
    assert_eq!(patient_view.len(), 1);
    assert_eq!(patient_view[0].index, 4);
}

#[test]
fn test_empty_mirror_keeps_genesis_only_chain() {
    let node = TestNode::new();
    let ledger = node.start();

    let report = ledger.restore().unwrap();
    assert!(!report.is_restored());
    assert_eq!(ledger.len().unwrap(), 1);
    assert!(ledger.patients().unwrap().is_empty());

    // Simulated readings are committed from the configured seed
    let receipt = ledger.commit(None).unwrap();
    assert_eq!(receipt.block.index, 1);
    assert!(receipt.mirror_status.is_mirrored());
}
