//! Block Chain Module - BLAKE3-based Integrity Chain
//!
//! This module provides the ledger's hash-linked sequence of blocks. Each
//! block commits to its predecessor via `previous_hash`, which enables:
//!
//! - Tamper detection: Any modification to a block breaks its hash
//! - Missing block detection: Gaps in the index sequence are visible
//! - Reordering detection: Blocks out of sequence break chain continuity
//!
//! # Block Hash
//!
//! `hash = BLAKE3(index_le || timestamp_le || payload || previous_hash)`
//!
//! Index and timestamp are fixed width and the previous hash is a fixed
//! 32-byte trailer, so the encoding is unambiguous.
//!
//! # Genesis
//!
//! Block 0 has an empty payload, timestamp 0 and an all-zero previous hash.
//! Its hash is therefore identical in every process, which keeps a chain
//! rebuilt from the mirror linked to the same root.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use vitalchain_core::time::current_timestamp_ms;

/// A BLAKE3 hash represented as a 32-byte array.
pub type BlockHash = [u8; 32];

/// Sentinel previous hash carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: BlockHash = [0u8; 32];

/// Fixed genesis timestamp.
pub const GENESIS_TIMESTAMP: u64 = 0;

/// One immutable, hash-linked unit of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Position in the chain, strictly increasing from 0
    pub index: u64,
    /// Append time (Unix epoch milliseconds)
    pub timestamp: u64,
    /// Sealed (encrypted) reading; empty for genesis
    pub payload: Vec<u8>,
    /// Hash of the preceding block
    pub previous_hash: BlockHash,
    /// Hash over the four fields above
    pub hash: BlockHash,
}

impl Block {
    fn sealed(index: u64, timestamp: u64, payload: Vec<u8>, previous_hash: BlockHash) -> Self {
        let hash = compute_block_hash(index, timestamp, &payload, &previous_hash);
        Self {
            index,
            timestamp,
            payload,
            previous_hash,
            hash,
        }
    }

    /// The sentinel first block
    pub fn genesis() -> Self {
        Self::sealed(0, GENESIS_TIMESTAMP, Vec::new(), GENESIS_PREVIOUS_HASH)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Recompute the hash from the block's current contents.
    pub fn compute_hash(&self) -> BlockHash {
        compute_block_hash(self.index, self.timestamp, &self.payload, &self.previous_hash)
    }

    /// Verifies that this block's stored hash matches its contents.
    pub fn verify_hash(&self) -> Result<(), BreakReason> {
        let actual = self.compute_hash();
        if actual != self.hash {
            return Err(BreakReason::HashMismatch {
                expected: self.hash,
                actual,
            });
        }
        Ok(())
    }

    /// Verifies that this block correctly links to the previous block.
    pub fn verify_link(&self, previous: &Block) -> Result<(), BreakReason> {
        if self.previous_hash != previous.hash {
            return Err(BreakReason::BrokenLink {
                expected: previous.hash,
                actual: self.previous_hash,
            });
        }
        if previous.index.checked_add(1) != Some(self.index) {
            return Err(BreakReason::SequenceGap {
                expected: previous.index.saturating_add(1),
                actual: self.index,
            });
        }
        Ok(())
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn previous_hash_hex(&self) -> String {
        hex::encode(self.previous_hash)
    }
}

/// Computes the BLAKE3 hash of a block's fields.
pub fn compute_block_hash(
    index: u64,
    timestamp: u64,
    payload: &[u8],
    previous_hash: &BlockHash,
) -> BlockHash {
    let mut hasher = Hasher::new();
    hasher.update(&index.to_le_bytes());
    hasher.update(&timestamp.to_le_bytes());
    hasher.update(payload);
    hasher.update(previous_hash);
    *hasher.finalize().as_bytes()
}

/// Parse a hex-encoded block hash
pub fn parse_block_hash(hex_str: &str) -> Option<BlockHash> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

/// Why a block failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakReason {
    #[error("genesis block does not match the sentinel")]
    InvalidGenesis,

    #[error("hash mismatch: stored {}, recomputed {}", hex::encode(expected), hex::encode(actual))]
    HashMismatch {
        expected: BlockHash,
        actual: BlockHash,
    },

    #[error("broken link: expected previous hash {}, found {}", hex::encode(expected), hex::encode(actual))]
    BrokenLink {
        expected: BlockHash,
        actual: BlockHash,
    },

    #[error("index gap: expected {expected}, found {actual}")]
    SequenceGap { expected: u64, actual: u64 },
}

/// Errors that can occur in chain operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Block index {attempted} does not follow latest index {latest}")]
    IndexRegression { latest: u64, attempted: u64 },

    #[error("Block index space exhausted")]
    IndexOverflow,
}

/// Result of chain validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidityResult {
    /// Every hash and link checks out
    Valid,
    /// First offending block
    Invalid {
        /// The block's own index
        index: u64,
        /// Position of the block in the chain
        position: usize,
        reason: BreakReason,
    },
}

impl ValidityResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidityResult::Valid)
    }

    /// Index of the first invalid block, if any
    pub fn first_invalid_index(&self) -> Option<u64> {
        match self {
            ValidityResult::Valid => None,
            ValidityResult::Invalid { index, .. } => Some(*index),
        }
    }
}

impl fmt::Display for ValidityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidityResult::Valid => write!(f, "valid"),
            ValidityResult::Invalid { index, reason, .. } => {
                write!(f, "invalid at block {}: {}", index, reason)
            }
        }
    }
}

/// Metrics for chain operations.
#[derive(Debug, Default, Clone)]
pub struct ChainMetrics {
    /// Blocks appended through `append`
    pub blocks_appended_total: u64,
    /// Blocks appended through `append_historical`
    pub blocks_restored_total: u64,
}

/// Ordered, append-only sequence of blocks.
///
/// Always holds at least the genesis block. Blocks are never handed out
/// mutably.
#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Block>,
    metrics: ChainMetrics,
}

impl Chain {
    /// Creates a chain containing only the genesis block.
    pub fn genesis() -> Self {
        Self {
            blocks: vec![Block::genesis()],
            metrics: ChainMetrics::default(),
        }
    }

    /// The most recently appended block.
    pub fn latest(&self) -> &Block {
        // The genesis block is never removed
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn head_hash(&self) -> BlockHash {
        self.latest().hash
    }

    /// Seals a payload into a new block linked to the latest one.
    ///
    /// The timestamp never runs backwards relative to the latest block, so
    /// a clock step does not reorder the chain.
    pub fn append(&mut self, payload: Vec<u8>) -> Result<Block, ChainError> {
        let latest = self.latest();
        let index = latest.index.checked_add(1).ok_or(ChainError::IndexOverflow)?;
        let timestamp = current_timestamp_ms().max(latest.timestamp);

        let block = Block::sealed(index, timestamp, payload, latest.hash);
        self.blocks.push(block.clone());
        self.metrics.blocks_appended_total += 1;

        Ok(block)
    }

    /// Appends a block with a caller-supplied hash.
    ///
    /// Used only while rebuilding from the mirror: the historical hash is
    /// kept as recorded rather than recomputed. Content is not checked here,
    /// run `validate()` for that. The index must still move forward.
    pub fn append_historical(
        &mut self,
        index: u64,
        timestamp: u64,
        payload: Vec<u8>,
        previous_hash: BlockHash,
        hash: BlockHash,
    ) -> Result<(), ChainError> {
        let latest = self.latest().index;
        if index <= latest {
            return Err(ChainError::IndexRegression {
                latest,
                attempted: index,
            });
        }

        self.blocks.push(Block {
            index,
            timestamp,
            payload,
            previous_hash,
            hash,
        });
        self.metrics.blocks_restored_total += 1;

        Ok(())
    }

    /// Verifies the entire chain from genesis in a single linear pass.
    ///
    /// Returns the first block whose hash does not match its contents, whose
    /// previous hash does not match its predecessor, or whose index does not
    /// follow its predecessor's.
    pub fn validate(&self) -> ValidityResult {
        for (position, block) in self.blocks.iter().enumerate() {
            let invalid = |reason| ValidityResult::Invalid {
                index: block.index,
                position,
                reason,
            };

            if position == 0 {
                if block.index != 0
                    || block.previous_hash != GENESIS_PREVIOUS_HASH
                    || !block.payload.is_empty()
                {
                    return invalid(BreakReason::InvalidGenesis);
                }
                if let Err(reason) = block.verify_hash() {
                    return invalid(reason);
                }
                continue;
            }

            if let Err(reason) = block.verify_hash() {
                return invalid(reason);
            }
            if let Err(reason) = block.verify_link(&self.blocks[position - 1]) {
                return invalid(reason);
            }
        }

        ValidityResult::Valid
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Gets a block by its index.
    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks
            .binary_search_by_key(&index, |b| b.index)
            .ok()
            .map(|position| &self.blocks[position])
    }

    /// Finds a block by hash.
    pub fn find_by_hash(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.hash == hash)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// All blocks after genesis.
    pub fn sealed_blocks(&self) -> &[Block] {
        &self.blocks[1..]
    }

    pub fn metrics(&self) -> &ChainMetrics {
        &self.metrics
    }

    /// Mutable access to a stored block for tamper simulation.
    ///
    /// **WARNING**: This bypasses the append-only guarantee and must ONLY be
    /// used in tests that exercise `validate()`.
    #[doc(hidden)]
    pub fn __tamper_block_mut(&mut self, position: usize) -> Option<&mut Block> {
        self.blocks.get_mut(position)
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::genesis()
    }
}
