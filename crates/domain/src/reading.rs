//! Vital-sign readings and the alerts attached to them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DomainError, Result};

/// The vital fields the threshold engine knows about, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalField {
    HeartRate,
    BloodPressure,
    BodyTemp,
    Spo2,
    Glucose,
}

impl VitalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            VitalField::HeartRate => "heart_rate",
            VitalField::BloodPressure => "blood_pressure",
            VitalField::BodyTemp => "body_temp",
            VitalField::Spo2 => "spo2",
            VitalField::Glucose => "glucose",
        }
    }
}

impl fmt::Display for VitalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Value fell below the field's low bound
    Low,
    /// Value rose above the field's high bound
    High,
}

/// A threshold violation found on one field of a reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub field: VitalField,
    pub severity: AlertSeverity,
    /// Human-readable message
    pub message: String,
}

/// Blood pressure in mmHg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: u32,
    pub diastolic: u32,
}

impl BloodPressure {
    pub fn new(systolic: u32, diastolic: u32) -> Self {
        Self {
            systolic,
            diastolic,
        }
    }
}

/// One timestamped set of vital-sign measurements for a patient.
///
/// Vital fields are optional; the threshold engine skips absent ones.
/// `alerts` is computed at commit time and never supplied by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<BloodPressure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glucose: Option<u32>,
    /// Capture time (Unix epoch milliseconds)
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readable_time: Option<String>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

impl Reading {
    /// Create a reading with no vitals set
    pub fn new(patient_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            patient_id: patient_id.into(),
            heart_rate: None,
            blood_pressure: None,
            body_temp: None,
            spo2: None,
            glucose: None,
            timestamp,
            readable_time: None,
            alerts: Vec::new(),
        }
    }

    pub fn with_heart_rate(mut self, bpm: u32) -> Self {
        self.heart_rate = Some(bpm);
        self
    }

    pub fn with_blood_pressure(mut self, systolic: u32, diastolic: u32) -> Self {
        self.blood_pressure = Some(BloodPressure::new(systolic, diastolic));
        self
    }

    pub fn with_body_temp(mut self, celsius: f64) -> Self {
        self.body_temp = Some(celsius);
        self
    }

    pub fn with_spo2(mut self, percent: u32) -> Self {
        self.spo2 = Some(percent);
        self
    }

    pub fn with_glucose(mut self, mg_dl: u32) -> Self {
        self.glucose = Some(mg_dl);
        self
    }

    pub fn with_readable_time(mut self, readable_time: impl Into<String>) -> Self {
        self.readable_time = Some(readable_time.into());
        self
    }

    /// Structural checks performed before a reading may be sealed.
    pub fn validate(&self) -> Result<()> {
        if self.patient_id.trim().is_empty() {
            return Err(DomainError::InvalidReading(
                "patient_id cannot be empty".to_string(),
            ));
        }
        if let Some(temp) = self.body_temp {
            if !temp.is_finite() {
                return Err(DomainError::InvalidReading(format!(
                    "body_temp must be finite, got {}",
                    temp
                )));
            }
        }
        Ok(())
    }

    pub fn has_alerts(&self) -> bool {
        !self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_vitals_are_omitted_from_json() {
        let reading = Reading::new("PAT1001", 1_700_000_000_000).with_heart_rate(72);
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["heart_rate"], 72);
        assert!(json.get("glucose").is_none());
        assert!(json.get("blood_pressure").is_none());
        assert_eq!(json["alerts"], serde_json::json!([]));
    }

    #[test]
    fn test_reading_parses_without_alerts_key() {
        let reading: Reading = serde_json::from_str(
            r#"{"patient_id":"PAT2002","spo2":97,"timestamp":1700000000000,
                "blood_pressure":{"systolic":120,"diastolic":80}}"#,
        )
        .unwrap();

        assert_eq!(reading.spo2, Some(97));
        assert_eq!(reading.blood_pressure, Some(BloodPressure::new(120, 80)));
        assert!(reading.alerts.is_empty());
    }

    #[test]
    fn test_alert_field_names() {
        let alert = Alert {
            field: VitalField::BodyTemp,
            severity: AlertSeverity::High,
            message: "High body temperature: 38.5 °C".to_string(),
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["field"], "body_temp");
        assert_eq!(json["severity"], "high");
        assert_eq!(VitalField::Spo2.to_string(), "spo2");
    }

    #[test]
    fn test_validate() {
        assert!(Reading::new("PAT1", 0).validate().is_ok());
        assert!(Reading::new("  ", 0).validate().is_err());
        assert!(Reading::new("PAT1", 0)
            .with_body_temp(f64::NAN)
            .validate()
            .is_err());
    }
}
