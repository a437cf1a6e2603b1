//! Threshold classification of detector energies.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_THRESHOLD, MAX_PEERS, THRESHOLD_MAX, THRESHOLD_MAX_F64, THRESHOLD_MIN, THRESHOLD_MIN_F64,
};

/// One detector reading for one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionSample {
    pub channel_id: usize,
    pub energy: f32,
}

/// Result of classifying one cycle's samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Bit `i` set when channel `i` is above threshold.
    pub active_mask: u8,
    pub linked: bool,
}

impl Classification {
    pub fn is_active(&self, channel_id: usize) -> bool {
        channel_id < MAX_PEERS && self.active_mask & (1 << channel_id) != 0
    }
}

/// Check a threshold proposed by config sync. `None` means reject.
/// Range-checked in `f64`, narrowed only once accepted.
pub fn accept_threshold(value: f64) -> Option<f32> {
    if !(THRESHOLD_MIN_F64..=THRESHOLD_MAX_F64).contains(&value) {
        return None;
    }
    Some(value as f32)
}

/// ORs per-channel threshold crossings into the aggregate linked signal.
///
/// No smoothing or hysteresis happens here: noise immunity comes from the
/// threshold and from sizing each detector's window.
#[derive(Clone, Debug)]
pub struct ContactClassifier {
    threshold: f32,
}

impl ContactClassifier {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Replace the threshold. Out-of-range values are refused and the
    /// current value stays.
    pub fn set_threshold(&mut self, threshold: f32) -> bool {
        match accept_threshold(f64::from(threshold)) {
            Some(t) => {
                self.threshold = t;
                true
            }
            None => false,
        }
    }

    pub fn classify(&self, samples: &[DetectionSample]) -> Classification {
        let mut active_mask = 0u8;
        for sample in samples {
            if sample.channel_id >= MAX_PEERS {
                continue;
            }
            let energy = if sample.energy.is_nan() {
                0.0
            } else {
                sample.energy.clamp(0.0, 1.0)
            };
            if energy > self.threshold {
                active_mask |= 1 << sample.channel_id;
            }
        }
        Classification {
            active_mask,
            linked: active_mask != 0,
        }
    }
}

impl Default for ContactClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(channel_id: usize, energy: f32) -> DetectionSample {
        DetectionSample { channel_id, energy }
    }

    #[test]
    fn test_any_active_channel_links() {
        let classifier = ContactClassifier::new(0.01);
        let result = classifier.classify(&[sample(0, 0.0), sample(2, 0.02), sample(3, 0.005)]);
        assert!(result.linked);
        assert_eq!(result.active_mask, 0b0100);
        assert!(result.is_active(2));
        assert!(!result.is_active(0));
    }

    #[test]
    fn test_threshold_is_strict() {
        let classifier = ContactClassifier::new(0.5);
        assert!(!classifier.classify(&[sample(0, 0.5)]).linked);
        assert!(classifier.classify(&[sample(0, 0.5001)]).linked);
    }

    #[test]
    fn test_no_channels_never_links() {
        let classifier = ContactClassifier::new(THRESHOLD_MIN);
        assert_eq!(classifier.classify(&[]), Classification::default());
    }

    #[test]
    fn test_energy_clamped_and_nan_ignored() {
        let classifier = ContactClassifier::new(THRESHOLD_MAX);
        // 7.0 clamps to 1.0, which is not above a 1.0 threshold.
        assert!(!classifier.classify(&[sample(0, 7.0)]).linked);
        assert!(!classifier.classify(&[sample(1, f32::NAN)]).linked);
    }

    #[test]
    fn test_out_of_range_channel_ignored() {
        let classifier = ContactClassifier::new(0.01);
        assert!(!classifier.classify(&[sample(MAX_PEERS, 0.9)]).linked);
    }

    #[test]
    fn test_contact_then_release_without_hysteresis() {
        let classifier = ContactClassifier::new(0.01);
        let energies = [0.02, 0.02, 0.02, 0.0];
        let linked: Vec<bool> = energies
            .iter()
            .map(|&e| classifier.classify(&[sample(0, e)]).linked)
            .collect();
        assert_eq!(linked, vec![true, true, true, false]);
    }

    #[test]
    fn test_set_threshold_rejects_out_of_range() {
        let mut classifier = ContactClassifier::new(0.01);
        assert!(!classifier.set_threshold(0.0));
        assert!(!classifier.set_threshold(1.5));
        assert!(!classifier.set_threshold(f32::NAN));
        assert_eq!(classifier.threshold(), 0.01);
        assert!(classifier.set_threshold(0.2));
        assert_eq!(classifier.threshold(), 0.2);
    }

    #[test]
    fn test_accept_threshold_bounds_inclusive() {
        assert_eq!(accept_threshold(0.001), Some(0.001));
        assert_eq!(accept_threshold(1.0), Some(1.0));
        assert_eq!(accept_threshold(0.0009), None);
        assert_eq!(accept_threshold(f64::INFINITY), None);
        assert_eq!(accept_threshold(f64::NAN), None);
    }

    #[test]
    fn test_accept_threshold_rejects_values_that_round_onto_bounds() {
        // Both round to a bound in f32.
        assert_eq!(accept_threshold(1.000_000_01), None);
        assert_eq!(accept_threshold(0.000_999_999_99), None);
    }

    #[test]
    fn test_set_threshold_accepts_f32_bounds() {
        let mut classifier = ContactClassifier::new(0.5);
        assert!(classifier.set_threshold(THRESHOLD_MIN));
        assert_eq!(classifier.threshold(), THRESHOLD_MIN);
        assert!(classifier.set_threshold(THRESHOLD_MAX));
        assert_eq!(classifier.threshold(), THRESHOLD_MAX);
    }

    proptest! {
        #[test]
        fn prop_rejected_threshold_keeps_previous(value in prop_oneof![
            -1.0e6f32..0.000_99f32,
            1.000_01f32..1.0e6f32,
        ]) {
            let mut classifier = ContactClassifier::new(0.05);
            prop_assert!(!classifier.set_threshold(value));
            prop_assert_eq!(classifier.threshold(), 0.05);
        }

        #[test]
        fn prop_accepted_threshold_stays_in_range(value in THRESHOLD_MIN_F64..=THRESHOLD_MAX_F64) {
            let accepted = accept_threshold(value);
            prop_assert!(accepted.is_some());
            let t = accepted.unwrap_or_default();
            prop_assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&t));
        }
    }
}
