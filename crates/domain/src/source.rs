//! Reading sources
//!
//! The ledger pulls a reading from its source whenever a commit is requested
//! without one. `SimulatedSource` stands in for bedside IoMT devices;
//! `ScriptedSource` replays a fixed list.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::VecDeque;

use vitalchain_core::time::{current_timestamp_ms, format_timestamp_ms};

use crate::{DomainError, Reading, Result};

/// Anything that can produce vital-sign readings on demand
pub trait ReadingSource: Send {
    fn next_reading(&mut self) -> Result<Reading>;
}

/// Randomized device simulator.
///
/// Ranges deliberately straddle the clinical thresholds so a steady stream
/// of readings produces a realistic mix of normal values and alerts.
pub struct SimulatedSource {
    rng: StdRng,
}

impl SimulatedSource {
    /// Simulator seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic simulator for tests and reproducible demos
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self) -> Reading {
        let timestamp = current_timestamp_ms();
        let body_temp: f64 = self.rng.gen_range(35.5..=39.5);

        Reading::new(
            format!("PAT{}", self.rng.gen_range(1000..=9999)),
            timestamp,
        )
        .with_heart_rate(self.rng.gen_range(50..=120))
        .with_blood_pressure(self.rng.gen_range(80..=160), self.rng.gen_range(50..=100))
        .with_body_temp((body_temp * 10.0).round() / 10.0)
        .with_spo2(self.rng.gen_range(88..=100))
        .with_glucose(self.rng.gen_range(70..=180))
        .with_readable_time(format_timestamp_ms(timestamp))
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingSource for SimulatedSource {
    fn next_reading(&mut self) -> Result<Reading> {
        Ok(self.generate())
    }
}

/// Replays a fixed sequence of readings, then reports exhaustion.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    queue: VecDeque<Reading>,
}

impl ScriptedSource {
    pub fn new(readings: impl IntoIterator<Item = Reading>) -> Self {
        Self {
            queue: readings.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl ReadingSource for ScriptedSource {
    fn next_reading(&mut self) -> Result<Reading> {
        self.queue.pop_front().ok_or(DomainError::SourceExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_ranges() {
        let mut source = SimulatedSource::with_seed(7);
        for _ in 0..200 {
            let r = source.next_reading().unwrap();
            assert!(r.patient_id.starts_with("PAT"));
            assert_eq!(r.patient_id.len(), 7);
            assert!((50..=120).contains(&r.heart_rate.unwrap()));
            let bp = r.blood_pressure.unwrap();
            assert!((80..=160).contains(&bp.systolic));
            assert!((50..=100).contains(&bp.diastolic));
            let temp = r.body_temp.unwrap();
            assert!((35.5..=39.5).contains(&temp));
            assert_eq!((temp * 10.0).round() / 10.0, temp);
            assert!((88..=100).contains(&r.spo2.unwrap()));
            assert!((70..=180).contains(&r.glucose.unwrap()));
            assert!(r.alerts.is_empty());
            assert!(r.readable_time.is_some());
        }
    }

    #[test]
    fn test_seeded_simulator_is_deterministic() {
        let a = SimulatedSource::with_seed(99).generate();
        let b = SimulatedSource::with_seed(99).generate();
        assert_eq!(a.patient_id, b.patient_id);
        assert_eq!(a.heart_rate, b.heart_rate);
        assert_eq!(a.glucose, b.glucose);
    }

    #[test]
    fn test_scripted_source_exhausts() {
        let mut source = ScriptedSource::new(vec![
            Reading::new("PAT1", 1),
            Reading::new("PAT2", 2),
        ]);
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.next_reading().unwrap().patient_id, "PAT1");
        assert_eq!(source.next_reading().unwrap().patient_id, "PAT2");
        assert_eq!(source.next_reading(), Err(DomainError::SourceExhausted));
    }
}
