//! Tone channels: per-peer detector tuning and the fixed detector pool.
//!
//! Every node emits one sine tone and listens for the tones of its peers.
//! A tone only reaches a peer's detector when a person closes the circuit
//! between two statues, so detector energy above threshold means contact.
//!
//! Hardware is reached through the [`ToneDetector`] and [`ToneGenerator`]
//! capabilities. The [`ToneBank`] owns exactly [`MAX_PEERS`] detectors and
//! one generator; retuning happens only through a validated [`ToneTable`],
//! so a detector is never left half-configured.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::DetectionSample;
use crate::Result;
use crate::constants::MAX_PEERS;

/// Narrow-band detector tuning for one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneChannelConfig {
    pub frequency: u32,
    pub detection_window_cycles: u32,
}

impl ToneChannelConfig {
    /// Tune for `frequency` with a detection window of half the sampling period.
    pub fn for_period(frequency: u32, sample_period_ms: u64) -> Self {
        let cycles = (u64::from(frequency).saturating_mul(sample_period_ms) / 2_000)
            .clamp(1, u64::from(u32::MAX));
        Self {
            frequency,
            detection_window_cycles: cycles as u32,
        }
    }

    /// Time the detector needs to produce one reading.
    pub fn window_ms(&self) -> f64 {
        if self.frequency == 0 {
            return 0.0;
        }
        f64::from(self.detection_window_cycles) * 1_000.0 / f64::from(self.frequency)
    }

    /// Samples in one detection window at `sample_rate_hz`.
    pub fn window_samples(&self, sample_rate_hz: u32) -> usize {
        if self.frequency == 0 {
            return 0;
        }
        let exact = f64::from(self.detection_window_cycles) * f64::from(sample_rate_hz)
            / f64::from(self.frequency);
        exact.round() as usize
    }

    pub fn validate(&self, peer: &str, sample_rate_hz: u32) -> Result<()> {
        if self.frequency == 0 {
            return Err(TuningError::ZeroFrequency {
                peer: peer.to_string(),
            });
        }
        let nyquist = sample_rate_hz / 2;
        if self.frequency >= nyquist {
            return Err(TuningError::AboveNyquist {
                peer: peer.to_string(),
                frequency: self.frequency,
                nyquist,
            });
        }
        if self.detection_window_cycles == 0 {
            return Err(TuningError::ZeroWindow {
                peer: peer.to_string(),
            });
        }
        Ok(())
    }
}

/// Rejected tuning. The previous table stays in effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TuningError {
    ZeroFrequency { peer: String },
    AboveNyquist { peer: String, frequency: u32, nyquist: u32 },
    ZeroWindow { peer: String },
    TooManyPeers { count: usize },
}

impl fmt::Display for TuningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TuningError::ZeroFrequency { peer } => write!(f, "{peer}: frequency is zero"),
            TuningError::AboveNyquist {
                peer,
                frequency,
                nyquist,
            } => write!(f, "{peer}: {frequency} Hz is at or above Nyquist ({nyquist} Hz)"),
            TuningError::ZeroWindow { peer } => write!(f, "{peer}: detection window is zero"),
            TuningError::TooManyPeers { count } => {
                write!(f, "{count} peers configured, at most {MAX_PEERS} supported")
            }
        }
    }
}

impl std::error::Error for TuningError {}

/// A detector the node can retune and read once per cycle.
pub trait ToneDetector {
    fn configure(&mut self, config: ToneChannelConfig);

    /// Latest tone energy, nominally in [0, 1].
    fn read(&mut self) -> f32;
}

/// The node's own tone output.
pub trait ToneGenerator {
    fn configure(&mut self, frequency: u32);
    fn set_amplitude(&mut self, amplitude: f32);
}

/// One peer's slot in a tone table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerTuning {
    pub peer: String,
    pub config: ToneChannelConfig,
}

/// A complete, validated detector assignment. Slot order is peer order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToneTable {
    entries: Vec<PeerTuning>,
}

impl ToneTable {
    pub fn new(entries: Vec<PeerTuning>, sample_rate_hz: u32) -> Result<Self> {
        if entries.len() > MAX_PEERS {
            return Err(TuningError::TooManyPeers {
                count: entries.len(),
            });
        }
        for entry in &entries {
            entry.config.validate(&entry.peer, sample_rate_hz)?;
        }
        Ok(Self { entries })
    }

    /// Build from `(peer, frequency)` pairs with windows sized for the period.
    pub fn from_frequencies<'a>(
        peers: impl IntoIterator<Item = (&'a str, u32)>,
        sample_period_ms: u64,
        sample_rate_hz: u32,
    ) -> Result<Self> {
        let entries = peers
            .into_iter()
            .map(|(peer, frequency)| PeerTuning {
                peer: peer.to_string(),
                config: ToneChannelConfig::for_period(frequency, sample_period_ms),
            })
            .collect();
        Self::new(entries, sample_rate_hz)
    }

    pub fn entries(&self) -> &[PeerTuning] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tuning plus last reading for one configured slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ToneChannel {
    pub peer: String,
    pub config: ToneChannelConfig,
    pub last_energy: f32,
}

/// Fixed pool of detectors plus the node's generator.
pub struct ToneBank<D, G> {
    detectors: [D; MAX_PEERS],
    channels: [Option<ToneChannel>; MAX_PEERS],
    generator: G,
    emit_frequency: Option<u32>,
    amplitude: f32,
    sample_rate_hz: u32,
}

impl<D: ToneDetector, G: ToneGenerator> ToneBank<D, G> {
    pub fn new(detectors: [D; MAX_PEERS], generator: G, sample_rate_hz: u32) -> Self {
        Self {
            detectors,
            channels: Default::default(),
            generator,
            emit_frequency: None,
            amplitude: 0.0,
            sample_rate_hz,
        }
    }

    /// Retune every slot from `table`. Unused slots are cleared.
    /// Returns false when the table matches the current tuning.
    pub fn apply_table(&mut self, table: &ToneTable) -> bool {
        if self.table() == *table {
            return false;
        }
        for (slot, channel) in self.channels.iter_mut().enumerate() {
            *channel = table.entries.get(slot).map(|entry| {
                self.detectors[slot].configure(entry.config);
                ToneChannel {
                    peer: entry.peer.clone(),
                    config: entry.config,
                    last_energy: 0.0,
                }
            });
        }
        true
    }

    /// The table currently in effect.
    pub fn table(&self) -> ToneTable {
        ToneTable {
            entries: self
                .channels
                .iter()
                .flatten()
                .map(|c| PeerTuning {
                    peer: c.peer.clone(),
                    config: c.config,
                })
                .collect(),
        }
    }

    pub fn set_emit_frequency(&mut self, frequency: u32) -> Result<()> {
        ToneChannelConfig {
            frequency,
            detection_window_cycles: 1,
        }
        .validate("emitter", self.sample_rate_hz)?;
        if self.emit_frequency != Some(frequency) {
            self.generator.configure(frequency);
            self.emit_frequency = Some(frequency);
        }
        Ok(())
    }

    pub fn emit_frequency(&self) -> Option<u32> {
        self.emit_frequency
    }

    pub fn set_amplitude(&mut self, amplitude: f32) {
        let amplitude = amplitude.clamp(0.0, 1.0);
        self.generator.set_amplitude(amplitude);
        self.amplitude = amplitude;
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    /// Read every configured slot once. Empty slots produce nothing.
    pub fn read(&mut self) -> Vec<DetectionSample> {
        let mut samples = Vec::with_capacity(MAX_PEERS);
        for (slot, channel) in self.channels.iter_mut().enumerate() {
            if let Some(channel) = channel {
                let energy = self.detectors[slot].read();
                channel.last_energy = energy;
                samples.push(DetectionSample {
                    channel_id: slot,
                    energy,
                });
            }
        }
        samples
    }

    pub fn channels(&self) -> impl Iterator<Item = &ToneChannel> {
        self.channels.iter().flatten()
    }

    pub fn peer(&self, channel_id: usize) -> Option<&str> {
        self.channels
            .get(channel_id)
            .and_then(|c| c.as_ref())
            .map(|c| c.peer.as_str())
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn detectors(&self) -> &[D; MAX_PEERS] {
        &self.detectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DETECTOR_SAMPLE_RATE_HZ;

    #[derive(Default)]
    struct FakeDetector {
        config: Option<ToneChannelConfig>,
        configure_calls: usize,
        energy: f32,
    }

    impl ToneDetector for FakeDetector {
        fn configure(&mut self, config: ToneChannelConfig) {
            self.config = Some(config);
            self.configure_calls += 1;
        }

        fn read(&mut self) -> f32 {
            self.energy
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        frequency: Option<u32>,
        amplitude: f32,
    }

    impl ToneGenerator for FakeGenerator {
        fn configure(&mut self, frequency: u32) {
            self.frequency = Some(frequency);
        }

        fn set_amplitude(&mut self, amplitude: f32) {
            self.amplitude = amplitude;
        }
    }

    fn bank() -> ToneBank<FakeDetector, FakeGenerator> {
        ToneBank::new(
            Default::default(),
            FakeGenerator::default(),
            DETECTOR_SAMPLE_RATE_HZ,
        )
    }

    #[test]
    fn test_window_is_half_the_period() {
        let config = ToneChannelConfig::for_period(12_274, 50);
        assert_eq!(config.detection_window_cycles, 306);
        let window = config.window_ms();
        assert!((window - 25.0).abs() < 0.1, "window {window} ms");
    }

    #[test]
    fn test_window_never_zero() {
        let config = ToneChannelConfig::for_period(10, 1);
        assert_eq!(config.detection_window_cycles, 1);
    }

    #[test]
    fn test_huge_period_saturates_window() {
        let config = ToneChannelConfig::for_period(19_467, u64::MAX);
        assert_eq!(config.detection_window_cycles, u32::MAX);
    }

    #[test]
    fn test_validate_rejects_bad_frequencies() {
        let zero = ToneChannelConfig::for_period(0, 50);
        assert!(matches!(
            zero.validate("eros", DETECTOR_SAMPLE_RATE_HZ),
            Err(TuningError::ZeroFrequency { .. })
        ));

        let high = ToneChannelConfig::for_period(22_050, 50);
        assert!(matches!(
            high.validate("eros", DETECTOR_SAMPLE_RATE_HZ),
            Err(TuningError::AboveNyquist { nyquist: 22_050, .. })
        ));

        let ok = ToneChannelConfig::for_period(19_467, 50);
        assert!(ok.validate("ultimo", DETECTOR_SAMPLE_RATE_HZ).is_ok());
    }

    #[test]
    fn test_table_rejects_too_many_peers() {
        let peers = [("a", 1000), ("b", 2000), ("c", 3000), ("d", 4000), ("e", 5000)];
        let result = ToneTable::from_frequencies(peers, 50, DETECTOR_SAMPLE_RATE_HZ);
        assert_eq!(result, Err(TuningError::TooManyPeers { count: 5 }));
    }

    #[test]
    fn test_apply_table_configures_and_clears_slots() {
        let mut bank = bank();
        let four = ToneTable::from_frequencies(
            [("elektra", 12_274), ("ariel", 14_643), ("sophia", 17_227), ("ultimo", 19_467)],
            50,
            DETECTOR_SAMPLE_RATE_HZ,
        )
        .unwrap();
        assert!(bank.apply_table(&four));
        assert_eq!(bank.channels().count(), 4);
        assert_eq!(bank.peer(2), Some("sophia"));

        let one = ToneTable::from_frequencies([("eros", 10_077)], 50, DETECTOR_SAMPLE_RATE_HZ)
            .unwrap();
        assert!(bank.apply_table(&one));
        assert_eq!(bank.channels().count(), 1);
        assert_eq!(bank.peer(1), None);
        assert_eq!(bank.read().len(), 1, "cleared slots must not be read");
    }

    #[test]
    fn test_apply_same_table_is_noop() {
        let mut bank = bank();
        let table = ToneTable::from_frequencies([("eros", 10_077)], 50, DETECTOR_SAMPLE_RATE_HZ)
            .unwrap();
        assert!(bank.apply_table(&table));
        assert!(!bank.apply_table(&table));
        assert_eq!(bank.detectors()[0].configure_calls, 1);
    }

    #[test]
    fn test_read_records_last_energy() {
        let mut bank = bank();
        let table = ToneTable::from_frequencies(
            [("elektra", 12_274), ("ariel", 14_643)],
            50,
            DETECTOR_SAMPLE_RATE_HZ,
        )
        .unwrap();
        bank.apply_table(&table);
        bank.detectors[1].energy = 0.3;

        let samples = bank.read();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].channel_id, 1);
        assert!((samples[1].energy - 0.3).abs() < f32::EPSILON);
        let ariel = bank.channels().find(|c| c.peer == "ariel").unwrap();
        assert!((ariel.last_energy - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_emit_frequency_validation_keeps_previous() {
        let mut bank = bank();
        bank.set_emit_frequency(10_077).unwrap();
        assert!(bank.set_emit_frequency(0).is_err());
        assert_eq!(bank.emit_frequency(), Some(10_077));
        assert_eq!(bank.generator().frequency, Some(10_077));
    }

    #[test]
    fn test_amplitude_is_clamped() {
        let mut bank = bank();
        bank.set_amplitude(3.0);
        assert!((bank.generator().amplitude - 1.0).abs() < f32::EPSILON);
        bank.set_amplitude(0.0);
        assert_eq!(bank.amplitude(), 0.0);
    }
}
