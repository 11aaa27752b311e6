//! Threshold engine
//!
//! Maps a reading to zero or more alerts. Each field carries an ordered list
//! of checks; the first satisfied check produces the field's only alert.
//! High checks are listed before low checks, so a value can never raise
//! both.
//!
//! | field          | low  | high | checked value  |
//! |----------------|------|------|----------------|
//! | heart_rate     | 60   | 100  | value          |
//! | blood_pressure | 90   | 140  | systolic only  |
//! | body_temp      | 36.0 | 38.0 | value          |
//! | spo2           | 94   | -    | value          |
//! | glucose        | 70   | 140  | value          |
//!
//! Bounds are exclusive: a value equal to a bound is normal.

use serde::{Deserialize, Serialize};

use crate::reading::{Alert, AlertSeverity, Reading, VitalField};

/// A single bound a value may violate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Bound {
    /// Violated when the value is strictly greater
    Above(f64),
    /// Violated when the value is strictly lower
    Below(f64),
}

impl Bound {
    pub fn is_violated_by(&self, value: f64) -> bool {
        match *self {
            Bound::Above(limit) => value > limit,
            Bound::Below(limit) => value < limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub bound: Bound,
    pub severity: AlertSeverity,
}

impl ThresholdCheck {
    pub fn high(limit: f64) -> Self {
        Self {
            bound: Bound::Above(limit),
            severity: AlertSeverity::High,
        }
    }

    pub fn low(limit: f64) -> Self {
        Self {
            bound: Bound::Below(limit),
            severity: AlertSeverity::Low,
        }
    }
}

/// Ordered checks for one vital field; first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: VitalField,
    pub checks: Vec<ThresholdCheck>,
}

impl FieldRule {
    pub fn new(field: VitalField, checks: Vec<ThresholdCheck>) -> Self {
        Self { field, checks }
    }

    fn first_violation(&self, value: f64) -> Option<&ThresholdCheck> {
        self.checks.iter().find(|check| check.bound.is_violated_by(value))
    }
}

/// Stateless rule evaluator.
#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    rules: Vec<FieldRule>,
}

impl ThresholdEngine {
    /// Engine with the clinical default bounds
    pub fn new() -> Self {
        Self::with_rules(vec![
            FieldRule::new(
                VitalField::HeartRate,
                vec![ThresholdCheck::high(100.0), ThresholdCheck::low(60.0)],
            ),
            FieldRule::new(
                VitalField::BloodPressure,
                vec![ThresholdCheck::high(140.0), ThresholdCheck::low(90.0)],
            ),
            FieldRule::new(
                VitalField::BodyTemp,
                vec![ThresholdCheck::high(38.0), ThresholdCheck::low(36.0)],
            ),
            // SpO2 has no upper bound
            FieldRule::new(VitalField::Spo2, vec![ThresholdCheck::low(94.0)]),
            FieldRule::new(
                VitalField::Glucose,
                vec![ThresholdCheck::high(140.0), ThresholdCheck::low(70.0)],
            ),
        ])
    }

    /// Engine with caller-supplied rules, evaluated in the given order.
    pub fn with_rules(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Evaluate a reading. Absent fields are skipped silently.
    ///
    /// Diastolic pressure is carried on the reading but not evaluated.
    pub fn evaluate(&self, reading: &Reading) -> Vec<Alert> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let value = checked_value(reading, rule.field)?;
                let check = rule.first_violation(value)?;
                Some(Alert {
                    field: rule.field,
                    severity: check.severity,
                    message: alert_message(rule.field, check.severity, value),
                })
            })
            .collect()
    }
}

impl Default for ThresholdEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_value(reading: &Reading, field: VitalField) -> Option<f64> {
    match field {
        VitalField::HeartRate => reading.heart_rate.map(f64::from),
        VitalField::BloodPressure => reading.blood_pressure.map(|bp| f64::from(bp.systolic)),
        VitalField::BodyTemp => reading.body_temp,
        VitalField::Spo2 => reading.spo2.map(f64::from),
        VitalField::Glucose => reading.glucose.map(f64::from),
    }
}

fn alert_message(field: VitalField, severity: AlertSeverity, value: f64) -> String {
    let level = match severity {
        AlertSeverity::High => "High",
        AlertSeverity::Low => "Low",
    };
    match field {
        VitalField::HeartRate => format!("{} heart rate: {} bpm", level, value),
        VitalField::BloodPressure => format!("{} systolic BP: {} mmHg", level, value),
        VitalField::BodyTemp => format!("{} body temperature: {:.1} °C", level, value),
        VitalField::Spo2 => format!("{} oxygen saturation: {}%", level, value),
        VitalField::Glucose => format!("{} blood glucose: {} mg/dL", level, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reading() -> Reading {
        Reading::new("PAT1234", 1_700_000_000_000)
    }

    #[test]
    fn test_heart_rate_bounds() {
        let engine = ThresholdEngine::new();

        let alerts = engine.evaluate(&reading().with_heart_rate(101));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].field, VitalField::HeartRate);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert_eq!(alerts[0].message, "High heart rate: 101 bpm");

        let alerts = engine.evaluate(&reading().with_heart_rate(59));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Low);

        assert!(engine.evaluate(&reading().with_heart_rate(75)).is_empty());
    }

    #[test]
    fn test_bounds_are_exclusive() {
        let engine = ThresholdEngine::new();
        assert!(engine.evaluate(&reading().with_heart_rate(100)).is_empty());
        assert!(engine.evaluate(&reading().with_heart_rate(60)).is_empty());
        assert!(engine.evaluate(&reading().with_body_temp(38.0)).is_empty());
        assert!(engine.evaluate(&reading().with_glucose(70)).is_empty());
    }

    #[test]
    fn test_spo2_is_low_only() {
        let engine = ThresholdEngine::new();

        let alerts = engine.evaluate(&reading().with_spo2(90));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Low);
        assert_eq!(alerts[0].message, "Low oxygen saturation: 90%");

        assert!(engine.evaluate(&reading().with_spo2(97)).is_empty());
        assert!(engine.evaluate(&reading().with_spo2(100)).is_empty());
        assert!(engine.evaluate(&reading().with_spo2(250)).is_empty());
    }

    #[test]
    fn test_blood_pressure_checks_systolic_only() {
        let engine = ThresholdEngine::new();

        let alerts = engine.evaluate(&reading().with_blood_pressure(150, 70));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].field, VitalField::BloodPressure);
        assert_eq!(alerts[0].message, "High systolic BP: 150 mmHg");

        // Diastolic far out of any normal range is ignored
        assert!(engine
            .evaluate(&reading().with_blood_pressure(120, 130))
            .is_empty());
        assert!(engine
            .evaluate(&reading().with_blood_pressure(120, 20))
            .is_empty());
    }

    #[test]
    fn test_body_temp_message_precision() {
        let engine = ThresholdEngine::new();
        let alerts = engine.evaluate(&reading().with_body_temp(35.0));
        assert_eq!(alerts[0].message, "Low body temperature: 35.0 °C");
    }

    #[test]
    fn test_absent_fields_are_skipped() {
        let engine = ThresholdEngine::new();
        assert!(engine.evaluate(&reading()).is_empty());
    }

    #[test]
    fn test_output_follows_field_order() {
        let engine = ThresholdEngine::new();
        let all_bad = reading()
            .with_glucose(200)
            .with_spo2(80)
            .with_body_temp(39.5)
            .with_blood_pressure(80, 50)
            .with_heart_rate(130);

        let fields: Vec<VitalField> = engine.evaluate(&all_bad).iter().map(|a| a.field).collect();
        assert_eq!(
            fields,
            vec![
                VitalField::HeartRate,
                VitalField::BloodPressure,
                VitalField::BodyTemp,
                VitalField::Spo2,
                VitalField::Glucose,
            ]
        );
    }

    #[test]
    fn test_first_matching_check_wins() {
        // Overlapping bounds: both checks match 50, only the first may fire
        let engine = ThresholdEngine::with_rules(vec![FieldRule::new(
            VitalField::HeartRate,
            vec![ThresholdCheck::high(40.0), ThresholdCheck::low(60.0)],
        )]);

        let alerts = engine.evaluate(&reading().with_heart_rate(50));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
    }

    proptest! {
        #[test]
        fn prop_at_most_one_alert_per_field(
            hr in proptest::option::of(0u32..250),
            sys in proptest::option::of(0u32..250),
            temp in proptest::option::of(30.0f64..45.0),
            spo2 in proptest::option::of(50u32..101),
            glucose in proptest::option::of(0u32..400),
        ) {
            let mut r = reading();
            r.heart_rate = hr;
            r.blood_pressure = sys.map(|s| crate::BloodPressure::new(s, 80));
            r.body_temp = temp;
            r.spo2 = spo2;
            r.glucose = glucose;

            let alerts = ThresholdEngine::new().evaluate(&r);
            let mut fields: Vec<VitalField> = alerts.iter().map(|a| a.field).collect();
            let before = fields.len();
            fields.dedup();
            prop_assert_eq!(before, fields.len());
            prop_assert!(alerts.iter().all(|a| !(a.field == VitalField::Spo2 && a.severity == AlertSeverity::High)));
        }
    }
}
