//! Integration tests for the VitalChain ledger
//!
//! This test suite validates, against real SQLite mirror files and key files:
//! - Restart lifecycle (persist, fresh process, restore)
//! - Key file reuse and foreign-key behavior
//! - Mirror outages and catch-up
//! - Concurrent ingest from async tasks

pub mod test_utils;

#[cfg(test)]
mod lifecycle_tests;

#[cfg(test)]
mod outage_tests;
