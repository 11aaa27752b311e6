//! In-memory ledger state guarded by the service lock

use std::collections::BTreeMap;
use vitalchain_crypto::Chain;
use vitalchain_domain::Reading;

/// Patient id to that patient's readings, in commit order.
///
/// Derived from the chain; never authoritative.
#[derive(Debug, Clone, Default)]
pub struct PatientIndex {
    readings: BTreeMap<String, Vec<Reading>>,
}

impl PatientIndex {
    pub fn record(&mut self, reading: Reading) {
        self.readings
            .entry(reading.patient_id.clone())
            .or_default()
            .push(reading);
    }

    /// Make sure a patient is listed even without readings
    pub fn ensure_patient(&mut self, patient_id: &str) {
        self.readings.entry(patient_id.to_string()).or_default();
    }

    /// Drop a patient's entry. Returns whether it existed.
    pub fn remove(&mut self, patient_id: &str) -> bool {
        self.readings.remove(patient_id).is_some()
    }

    pub fn get(&self, patient_id: &str) -> Option<&[Reading]> {
        self.readings.get(patient_id).map(Vec::as_slice)
    }

    pub fn contains(&self, patient_id: &str) -> bool {
        self.readings.contains_key(patient_id)
    }

    /// Patient ids in ascending order
    pub fn patients(&self) -> Vec<String> {
        self.readings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Chain and patient index, always replaced or mutated together.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub chain: Chain,
    pub index: PatientIndex,
}
