//! Cryptographic primitives for the VitalChain ledger.
//!
//! This crate provides the integrity and confidentiality layers the ledger
//! is built on:
//!
//! - **Hash Chain**: BLAKE3-linked blocks with single-pass validation
//! - **Payload Cipher**: ChaCha20-Poly1305 sealing of readings
//! - **Key Management**: Persistent key file, generated on first use
//!
//! # Security Principles
//!
//! - Never roll custom cryptographic primitives
//! - Secrets must never be logged or hardcoded
//! - Key material is zeroized after use

pub mod chain;
pub mod cipher;

#[cfg(test)]
mod chain_bench;

pub use chain::{
    compute_block_hash, parse_block_hash, Block, BlockHash, BreakReason, Chain, ChainError,
    ChainMetrics, ValidityResult, GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP,
};

pub use cipher::{CipherError, CipherResult, KeyOrigin, LedgerCipher, KEY_SIZE, NONCE_SIZE};
