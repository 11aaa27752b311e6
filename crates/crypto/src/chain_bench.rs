//! Performance checks for chain operations.
//!
//! These tests verify that the chain can handle large numbers of blocks:
//! - Build chains of 10,000+ blocks
//! - Validate chains in one linear pass
//! - No pathological slowdowns

use crate::chain::{compute_block_hash, Chain};
use crate::cipher::LedgerCipher;
use std::time::Instant;
use vitalchain_domain::Reading;

fn sealed_payload(cipher: &LedgerCipher, sequence: u64) -> Vec<u8> {
    let reading = Reading::new(
        format!("PAT{:04}", 1000 + sequence % 100),
        1_700_000_000_000 + sequence * 100,
    )
    .with_heart_rate(60 + (sequence % 60) as u32)
    .with_spo2(95);
    cipher.encrypt(&reading).unwrap()
}

fn build_chain(block_count: usize) -> Chain {
    let cipher = LedgerCipher::ephemeral();
    let mut chain = Chain::genesis();
    for i in 0..block_count {
        chain.append(sealed_payload(&cipher, i as u64)).unwrap();
    }
    chain
}

#[test]
fn bench_chain_build_10k_blocks() {
    let cipher = LedgerCipher::ephemeral();
    let payloads: Vec<Vec<u8>> = (0..10_000).map(|i| sealed_payload(&cipher, i)).collect();

    println!("\n=== Building Chain with {} Blocks ===", payloads.len());

    let mut chain = Chain::genesis();
    let start = Instant::now();
    for payload in payloads {
        chain.append(payload).unwrap();
    }
    let build_duration = start.elapsed();

    println!("Build time: {:.2}ms", build_duration.as_secs_f64() * 1000.0);

    // Allow higher thresholds in debug builds on CI
    let max_build_ms = if cfg!(debug_assertions) { 600 } else { 150 };
    assert!(
        build_duration.as_millis() < max_build_ms,
        "Chain build too slow: {}ms (target: <{}ms)",
        build_duration.as_millis(),
        max_build_ms
    );

    assert_eq!(chain.len(), 10_001);
    assert_eq!(chain.metrics().blocks_appended_total, 10_000);
}

#[test]
fn bench_chain_validate_10k_blocks() {
    let chain = build_chain(10_000);

    println!("\n=== Validating Chain with {} Blocks ===", chain.len());

    let start = Instant::now();
    let result = chain.validate();
    let validate_duration = start.elapsed();

    println!(
        "Validate time: {:.2}ms",
        validate_duration.as_secs_f64() * 1000.0
    );

    let max_validate_ms = if cfg!(debug_assertions) { 600 } else { 150 };
    assert!(
        validate_duration.as_millis() < max_validate_ms,
        "Chain validation too slow: {}ms (target: <{}ms)",
        validate_duration.as_millis(),
        max_validate_ms
    );

    assert!(result.is_valid());
}

#[test]
fn bench_late_tamper_found_in_single_pass() {
    let mut chain = build_chain(10_000);
    chain.__tamper_block_mut(9_999).unwrap().payload[20] ^= 0x80;

    let start = Instant::now();
    let result = chain.validate();
    let duration = start.elapsed();

    println!("Tamper detection time: {:.2}ms", duration.as_secs_f64() * 1000.0);

    assert_eq!(result.first_invalid_index(), Some(9_999));
}

#[test]
fn bench_hash_computation_throughput() {
    let payload = vec![0xAB; 256];
    let iterations: usize = 10_000;

    println!("\n=== Hash Computation Throughput ===");

    let start = Instant::now();
    let mut previous = [0u8; 32];
    for i in 0..iterations {
        previous = compute_block_hash(i as u64, 1_700_000_000_000, &payload, &previous);
    }
    let duration = start.elapsed();

    println!(
        "Avg per hash: {:.2}μs",
        duration.as_micros() as f64 / iterations as f64
    );

    assert_ne!(previous, [0u8; 32]);
}
