//! Node settings loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! working node.

use std::path::Path;

use serde::{Deserialize, Serialize};
use touchlink_core::constants::{
    CONFIG_REFRESH_SECS, CONFIG_WINDOW_SECS, DEFAULT_PAUSE_TIMEOUT_MS, DEFAULT_PAUSED_VOLUME,
    DEFAULT_PLAYING_VOLUME, DEFAULT_SAMPLE_PERIOD_MS, DEFAULT_TONE_AMPLITUDE,
    DETECTOR_SAMPLE_RATE_HZ,
};
use touchlink_core::{PlaybackSettings, Playlist};

use crate::error::{NodeError, Result};

/// Environment variable naming a settings file.
pub const SETTINGS_ENV: &str = "TOUCHLINK_SETTINGS";

/// Longest sampling period accepted (ms).
pub const MAX_SAMPLE_PERIOD_MS: u64 = 60_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSettings {
    pub sample_period_ms: u64,
    pub pause_timeout_ms: u64,
    pub playing_volume: f32,
    pub paused_volume: f32,
    pub tone_amplitude: f32,
    pub topic_namespace: String,
    pub config_refresh_secs: u64,
    pub config_window_secs: u64,
    pub heartbeat_secs: Option<u64>,
    /// Overrides the address reported by the network stack.
    pub local_address: Option<String>,
    pub contact_tracks: Vec<String>,
    pub idle_track: String,
    pub detector_sample_rate: u32,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            pause_timeout_ms: DEFAULT_PAUSE_TIMEOUT_MS,
            playing_volume: DEFAULT_PLAYING_VOLUME,
            paused_volume: DEFAULT_PAUSED_VOLUME,
            tone_amplitude: DEFAULT_TONE_AMPLITUDE,
            topic_namespace: String::new(),
            config_refresh_secs: CONFIG_REFRESH_SECS,
            config_window_secs: CONFIG_WINDOW_SECS,
            heartbeat_secs: None,
            local_address: None,
            contact_tracks: (1..=4).map(|i| format!("contact_{i}.wav")).collect(),
            idle_track: "idle.wav".to_string(),
            detector_sample_rate: DETECTOR_SAMPLE_RATE_HZ,
        }
    }
}

impl NodeSettings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from `path`, else from `$TOUCHLINK_SETTINGS`, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match std::env::var_os(SETTINGS_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SAMPLE_PERIOD_MS).contains(&self.sample_period_ms) {
            return Err(NodeError::InvalidSettings(format!(
                "sample_period_ms must be within [1, {MAX_SAMPLE_PERIOD_MS}], got {}",
                self.sample_period_ms
            )));
        }
        if self.config_refresh_secs == 0 {
            return Err(NodeError::InvalidSettings(
                "config_refresh_secs must be > 0".into(),
            ));
        }
        if self.heartbeat_secs == Some(0) {
            return Err(NodeError::InvalidSettings("heartbeat_secs must be > 0".into()));
        }
        for (field, value) in [
            ("playing_volume", self.playing_volume),
            ("paused_volume", self.paused_volume),
            ("tone_amplitude", self.tone_amplitude),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(NodeError::InvalidSettings(format!(
                    "{field} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.paused_volume > self.playing_volume {
            return Err(NodeError::InvalidSettings(format!(
                "paused_volume {} must not exceed playing_volume {}",
                self.paused_volume, self.playing_volume
            )));
        }
        if self.detector_sample_rate == 0 {
            return Err(NodeError::InvalidSettings(
                "detector_sample_rate must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn playback(&self) -> PlaybackSettings {
        PlaybackSettings {
            playing_volume: self.playing_volume,
            paused_volume: self.paused_volume,
            pause_timeout_ms: self.pause_timeout_ms,
        }
    }

    pub fn playlist(&self) -> Playlist {
        Playlist::new(self.contact_tracks.clone(), self.idle_track.clone())
    }

    pub fn refresh_ms(&self) -> u64 {
        self.config_refresh_secs.saturating_mul(1_000)
    }

    pub fn window_ms(&self) -> u64 {
        self.config_window_secs.saturating_mul(1_000)
    }

    pub fn heartbeat_ms(&self) -> Option<u64> {
        self.heartbeat_secs.map(|s| s.saturating_mul(1_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = NodeSettings::from_toml_str("").unwrap();
        assert_eq!(settings, NodeSettings::default());
        assert_eq!(settings.sample_period_ms, 50);
        assert_eq!(settings.refresh_ms(), 60_000);
        assert_eq!(settings.window_ms(), 5_000);
        assert_eq!(settings.heartbeat_ms(), None);
    }

    #[test]
    fn test_partial_override() {
        let settings = NodeSettings::from_toml_str(
            r#"
            pause_timeout_ms = 3000
            topic_namespace = "missing_link"
            heartbeat_secs = 10
            contact_tracks = ["one.wav"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.pause_timeout_ms, 3_000);
        assert_eq!(settings.playback().pause_timeout_ms, 3_000);
        assert_eq!(settings.topic_namespace, "missing_link");
        assert_eq!(settings.heartbeat_ms(), Some(10_000));
        assert_eq!(settings.playlist().len(), 1);
        assert_eq!(settings.idle_track, "idle.wav");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = NodeSettings::from_toml_str("sample_perod_ms = 10").unwrap_err();
        assert!(matches!(err, NodeError::Settings(_)));
    }

    #[test]
    fn test_out_of_range_volume_rejected() {
        let err = NodeSettings::from_toml_str("playing_volume = 1.5").unwrap_err();
        assert!(err.to_string().contains("playing_volume"));
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(NodeSettings::from_toml_str("sample_period_ms = 0").is_err());
    }

    #[test]
    fn test_overlong_period_rejected() {
        let err = NodeSettings::from_toml_str("sample_period_ms = 60001").unwrap_err();
        assert!(err.to_string().contains("sample_period_ms"));
        assert!(NodeSettings::from_toml_str("sample_period_ms = 60000").is_ok());
    }

    #[test]
    fn test_huge_intervals_saturate() {
        let settings = NodeSettings::from_toml_str(
            r#"
            config_refresh_secs = 9223372036854775807
            config_window_secs = 9223372036854775807
            heartbeat_secs = 9223372036854775807
            "#,
        )
        .unwrap();
        assert_eq!(settings.refresh_ms(), u64::MAX);
        assert_eq!(settings.window_ms(), u64::MAX);
        assert_eq!(settings.heartbeat_ms(), Some(u64::MAX));
    }

    #[test]
    fn test_paused_louder_than_playing_rejected() {
        let err = NodeSettings::from_toml_str("playing_volume = 0.2\npaused_volume = 0.3\n")
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidSettings(_)));
        assert!(err.to_string().contains("paused_volume"));
        assert!(NodeSettings::from_toml_str("playing_volume = 0.3\npaused_volume = 0.3\n").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "paused_volume = 0.1\n").unwrap();
        let settings = NodeSettings::resolve(Some(&path)).unwrap();
        assert_eq!(settings.paused_volume, 0.1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeSettings::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NodeError::Io(_)));
    }
}
