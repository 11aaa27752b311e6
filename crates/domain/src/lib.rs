//! Domain module for VitalChain
//!
//! This crate contains pure domain logic with no I/O dependencies:
//! - Vital-sign readings and alerts
//! - The deterministic threshold engine
//! - Pluggable reading sources (device simulator)

pub mod error;
pub mod reading;
pub mod source;
pub mod thresholds;

pub use error::{DomainError, Result};
pub use reading::{Alert, AlertSeverity, BloodPressure, Reading, VitalField};
pub use source::{ReadingSource, ScriptedSource, SimulatedSource};
pub use thresholds::{Bound, FieldRule, ThresholdCheck, ThresholdEngine};
