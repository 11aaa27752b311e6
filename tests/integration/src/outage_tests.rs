//! Mirror outages and concurrent ingest

use crate::test_utils::{block_hashes, normal_reading, TestNode};
use std::sync::Arc;
use vitalchain_crypto::LedgerCipher;
use vitalchain_domain::ScriptedSource;
use vitalchain_ledger::{LedgerService, MirrorStatus, RetryPolicy};
use vitalchain_mirror::{MemoryMirror, MirrorStore, RecordFilter, RecordSort};

fn ledger_on(mirror: &Arc<MemoryMirror>, node: &TestNode) -> LedgerService {
    LedgerService::new(
        LedgerCipher::load_or_generate(node.key_path()).unwrap(),
        mirror.clone(),
        Box::new(ScriptedSource::default()),
    )
    .with_retry(RetryPolicy::none())
}

#[test]
fn test_commit_survives_outage_and_persist_catches_up() {
    let node = TestNode::new();
    let mirror = Arc::new(MemoryMirror::new());
    let ledger = ledger_on(&mirror, &node);

    ledger.commit(Some(normal_reading("PAT1000", 1))).unwrap();

    mirror.set_available(false);
    let during = ledger.commit(Some(normal_reading("PAT1000", 2))).unwrap();
    assert!(matches!(during.mirror_status, MirrorStatus::Failed(_)));
    assert_eq!(ledger.len().unwrap(), 3);
    assert!(ledger.is_valid().unwrap());

    // Reads fall back to the chain while the mirror is down
    assert_eq!(ledger.history("PAT1000").unwrap().len(), 2);
    assert!(ledger.persist().is_err());

    mirror.set_available(true);
    let report = ledger.persist().unwrap();
    assert_eq!(report.blocks_written, 1);
    assert_eq!(report.already_mirrored, 1);

    let hash = during.block.hash_hex();
    assert!(mirror.find_block_by_hash(&hash).unwrap().is_some());
    assert_eq!(ledger.metrics().mirror_failures_total, 1);

    // A restart from the caught-up mirror sees every block
    let restarted = ledger_on(&mirror, &node);
    restarted.restore().unwrap();
    assert_eq!(block_hashes(&restarted), block_hashes(&ledger));
    assert!(restarted.is_valid().unwrap());
}

#[test]
fn test_retry_is_bounded_during_outage() {
    let node = TestNode::new();
    let mirror = Arc::new(MemoryMirror::new());
    let ledger = ledger_on(&mirror, &node);
    ledger.commit(Some(normal_reading("PAT1000", 1))).unwrap();

    // Bounded retry gives up and the commit still lands in the chain
    let retrying = ledger.with_retry(RetryPolicy {
        max_attempts: 3,
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(2),
    });
    mirror.set_available(false);
    let calls_before = mirror.call_count();
    let receipt = retrying.commit(Some(normal_reading("PAT1000", 2))).unwrap();
    assert!(!receipt.mirror_status.is_mirrored());
    assert_eq!(mirror.call_count() - calls_before, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_then_restart() {
    let node = TestNode::new();
    let ledger = Arc::new(node.start());

    let mut handles = Vec::new();
    for task in 0..8u64 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::task::spawn_blocking(move || {
            for n in 0..10u64 {
                let patient = format!("PAT{}", 1000 + task);
                ledger
                    .commit(Some(normal_reading(&patient, task * 100 + n)))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(ledger.len().unwrap(), 81);
    assert!(ledger.is_valid().unwrap());
    assert_eq!(ledger.patients().unwrap().len(), 8);

    let report = ledger.persist().unwrap();
    assert_eq!(report.blocks_written, 0);
    assert_eq!(report.already_mirrored, 80);

    let before = block_hashes(&ledger);
    drop(ledger);

    let restarted = tokio::task::spawn_blocking({
        let config = node.config.clone();
        move || {
            let ledger = crate::test_utils::start_with(&config);
            ledger.restore().unwrap();
            ledger
        }
    })
    .await
    .unwrap();

    assert_eq!(block_hashes(&restarted), before);
    assert!(restarted.is_valid().unwrap());

    let mirrored = node
        .open_mirror()
        .find_readings(&RecordFilter::Patient("PAT1003".into()), RecordSort::IndexAscending)
        .unwrap();
    assert_eq!(mirrored.len(), 10);
}
