//! Node identity and tunables, resolved from a config response by address.
//!
//! A response maps statue names to records. The node picks the record whose
//! address equals its own, then builds a complete [`NodeConfig`] from it,
//! taking each field from the record only if the value passes validation
//! and otherwise keeping the previous value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::accept_threshold;
use crate::constants::MAX_PEERS;
use crate::tone::ToneTable;

/// One statue's entry in a config response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    #[serde(default)]
    pub threshold: Option<Value>,
    #[serde(default, alias = "emitFrequency")]
    pub emit: Option<Value>,
    #[serde(default)]
    pub detect: Vec<String>,
    #[serde(default, alias = "address")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
}

impl ConfigRecord {
    /// Emit frequency if it is a positive integer that fits in `u32`.
    pub fn emit_frequency(&self) -> Option<u32> {
        self.emit
            .as_ref()
            .and_then(Value::as_u64)
            .filter(|&f| f > 0)
            .and_then(|f| u32::try_from(f).ok())
    }
}

/// Parsed `config/response` payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigResponse {
    pub records: BTreeMap<String, ConfigRecord>,
    /// Entries that were not objects of the expected shape: (name, reason).
    pub skipped: Vec<(String, String)>,
}

impl ConfigResponse {
    /// Parse a response. Fails only if the payload is not a JSON object;
    /// individual malformed records are skipped.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let map: serde_json::Map<String, Value> = serde_json::from_slice(payload)?;
        Ok(Self::from_map(map))
    }

    pub fn parse_str(payload: &str) -> Result<Self, serde_json::Error> {
        Self::parse(payload.as_bytes())
    }

    fn from_map(map: serde_json::Map<String, Value>) -> Self {
        let mut records = BTreeMap::new();
        let mut skipped = Vec::new();
        for (name, value) in map {
            match serde_json::from_value::<ConfigRecord>(value) {
                Ok(record) => {
                    records.insert(name, record);
                }
                Err(e) => skipped.push((name, e.to_string())),
            }
        }
        Self { records, skipped }
    }

    /// The record addressed to `address` (exact, case-sensitive).
    pub fn find_by_address(&self, address: &str) -> Option<(&str, &ConfigRecord)> {
        self.records
            .iter()
            .find(|(_, r)| r.ip_address.as_deref() == Some(address))
            .map(|(name, r)| (name.as_str(), r))
    }

    /// Look up a peer record by name, falling back to ASCII case-insensitive.
    pub fn find_by_name(&self, name: &str) -> Option<(&str, &ConfigRecord)> {
        if let Some((key, record)) = self.records.get_key_value(name) {
            return Some((key.as_str(), record));
        }
        self.records
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(key, r)| (key.as_str(), r))
    }

    /// Build the config for `address`, falling back field by field to
    /// `previous`. `None` if no record carries this address.
    pub fn resolve(&self, address: &str, previous: &NodeConfig) -> Option<Resolution> {
        let (name, record) = self.find_by_address(address)?;
        Some(self.resolve_record(name, record, previous))
    }

    /// Build a config from a specific record.
    pub fn resolve_record(&self, name: &str, record: &ConfigRecord, previous: &NodeConfig) -> Resolution {
        let mut rejected = Vec::new();

        let threshold = match record.threshold.as_ref() {
            None => previous.threshold,
            Some(value) => match value.as_f64().and_then(accept_threshold) {
                Some(t) => t,
                None => {
                    rejected.push(Rejection::Threshold(value.clone()));
                    previous.threshold
                }
            },
        };

        let emit_frequency = match record.emit.as_ref() {
            None => previous.emit_frequency,
            Some(value) => match record.emit_frequency() {
                Some(f) => f,
                None => {
                    rejected.push(Rejection::EmitFrequency(value.clone()));
                    previous.emit_frequency
                }
            },
        };

        let (peer_names, peer_frequencies) = match self.resolve_peers(&record.detect) {
            Ok(peers) => peers.into_iter().unzip(),
            Err(rejection) => {
                rejected.push(rejection);
                (
                    previous.peer_names.clone(),
                    previous.peer_frequencies.clone(),
                )
            }
        };

        let config = NodeConfig {
            name: name.to_string(),
            threshold,
            emit_frequency,
            peer_names,
            peer_frequencies,
            source_address: record.ip_address.clone().unwrap_or_default(),
            mac_address: record.mac_address.clone(),
        };
        Resolution { config, rejected }
    }

    fn resolve_peers(&self, detect: &[String]) -> Result<Vec<(String, u32)>, Rejection> {
        if detect.len() > MAX_PEERS {
            return Err(Rejection::TooManyPeers(detect.len()));
        }
        detect
            .iter()
            .map(|peer| {
                let (key, record) = self
                    .find_by_name(peer)
                    .ok_or_else(|| Rejection::UnknownPeer(peer.clone()))?;
                let frequency = record
                    .emit_frequency()
                    .ok_or_else(|| Rejection::PeerFrequency(key.to_string()))?;
                Ok((key.to_string(), frequency))
            })
            .collect()
    }
}

/// A single value refused while resolving a record.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    Threshold(Value),
    EmitFrequency(Value),
    UnknownPeer(String),
    PeerFrequency(String),
    TooManyPeers(usize),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Threshold(v) => write!(f, "threshold {v} is not a number in [0.001, 1.0]"),
            Rejection::EmitFrequency(v) => write!(f, "emit frequency {v} is not a positive integer"),
            Rejection::UnknownPeer(p) => write!(f, "detect peer '{p}' has no record"),
            Rejection::PeerFrequency(p) => write!(f, "detect peer '{p}' has no valid emit frequency"),
            Rejection::TooManyPeers(n) => write!(f, "{n} detect peers, at most {MAX_PEERS} supported"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub config: NodeConfig,
    pub rejected: Vec<Rejection>,
}

/// Everything this node needs to know about itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub threshold: f32,
    /// Informational: the frequency this node emits.
    pub emit_frequency: u32,
    pub peer_names: Vec<String>,
    /// Emit frequency of each peer, parallel to `peer_names`.
    pub peer_frequencies: Vec<u32>,
    pub source_address: String,
    pub mac_address: Option<String>,
}

impl NodeConfig {
    /// Detector tuning for this config's peers.
    pub fn tone_table(&self, sample_period_ms: u64, sample_rate_hz: u32) -> crate::Result<ToneTable> {
        ToneTable::from_frequencies(
            self.peer_names
                .iter()
                .map(String::as_str)
                .zip(self.peer_frequencies.iter().copied()),
            sample_period_ms,
            sample_rate_hz,
        )
    }

    pub fn peers(&self) -> impl Iterator<Item = (&str, u32)> {
        self.peer_names
            .iter()
            .map(String::as_str)
            .zip(self.peer_frequencies.iter().copied())
    }

    /// Multi-line status text.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "name:       {}\naddress:    {}\nemit:       {} Hz\nthreshold:  {:.4}\n",
            self.name,
            if self.source_address.is_empty() { "-" } else { &self.source_address },
            self.emit_frequency,
            self.threshold,
        );
        for (peer, frequency) in self.peers() {
            out.push_str(&format!("detect:     {peer} @ {frequency} Hz\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DETECTOR_SAMPLE_RATE_HZ, THRESHOLD_MAX_F64, THRESHOLD_MIN_F64};
    use proptest::prelude::*;

    const RESPONSE: &str = r#"{
        "eros":    {"emit": 10077, "detect": ["elektra", "sophia"], "threshold": 0.02, "ip_address": "192.168.4.26", "mac_address": "04:e9:e5:19:06:4c"},
        "elektra": {"emit": 12274, "detect": ["eros"], "threshold": 0.01, "ip_address": "192.168.4.23"},
        "sophia":  {"emitFrequency": 17227, "detect": ["eros"], "threshold": 0.01, "address": "192.168.4.25"}
    }"#;

    fn previous() -> NodeConfig {
        NodeConfig {
            name: "eros".into(),
            threshold: 0.01,
            emit_frequency: 10_077,
            peer_names: vec!["ultimo".into()],
            peer_frequencies: vec![19_467],
            source_address: "192.168.4.26".into(),
            mac_address: None,
        }
    }

    fn with_record(record: &str) -> ConfigResponse {
        let payload = format!(
            r#"{{"eros": {record}, "elektra": {{"emit": 12274, "ip_address": "192.168.4.23"}}}}"#
        );
        ConfigResponse::parse_str(&payload).unwrap()
    }

    #[test]
    fn test_resolves_matching_record() {
        let response = ConfigResponse::parse_str(RESPONSE).unwrap();
        let resolution = response.resolve("192.168.4.26", &previous()).unwrap();
        assert!(resolution.rejected.is_empty());
        let config = resolution.config;
        assert_eq!(config.name, "eros");
        assert_eq!(config.threshold, 0.02);
        assert_eq!(config.peer_names, vec!["elektra", "sophia"]);
        assert_eq!(config.peer_frequencies, vec![12_274, 17_227]);
        assert_eq!(config.mac_address.as_deref(), Some("04:e9:e5:19:06:4c"));
    }

    #[test]
    fn test_field_aliases() {
        let response = ConfigResponse::parse_str(RESPONSE).unwrap();
        let (name, record) = response.find_by_address("192.168.4.25").unwrap();
        assert_eq!(name, "sophia");
        assert_eq!(record.emit_frequency(), Some(17_227));
    }

    #[test]
    fn test_address_match_is_exact() {
        let response = ConfigResponse::parse_str(RESPONSE).unwrap();
        assert!(response.resolve("192.168.4.2", &previous()).is_none());
        assert!(response.resolve("192.168.4.26 ", &previous()).is_none());
        assert!(response.resolve("192.168.4.101", &previous()).is_none());
    }

    #[test]
    fn test_out_of_range_threshold_keeps_previous() {
        for bad in ["0.0", "1.5", "-0.2", "\"0.02\"", "null"] {
            let response = with_record(&format!(
                r#"{{"emit": 10077, "threshold": {bad}, "ip_address": "192.168.4.26"}}"#
            ));
            let resolution = response.resolve("192.168.4.26", &previous()).unwrap();
            assert_eq!(resolution.config.threshold, 0.01, "threshold {bad}");
            assert!(matches!(resolution.rejected[0], Rejection::Threshold(_)));
        }
    }

    #[test]
    fn test_threshold_just_outside_range_keeps_previous() {
        for (bad, before) in [("1.00000001", 0.01), ("0.00099999999", 0.5)] {
            let previous = NodeConfig {
                threshold: before,
                ..previous()
            };
            let response = with_record(&format!(
                r#"{{"emit": 10077, "threshold": {bad}, "ip_address": "192.168.4.26"}}"#
            ));
            let resolution = response.resolve("192.168.4.26", &previous).unwrap();
            assert_eq!(resolution.config.threshold, before, "threshold {bad}");
            assert_eq!(resolution.rejected.len(), 1);
        }
    }

    proptest! {
        #[test]
        fn prop_resolve_rejects_any_threshold_outside_range(value in prop_oneof![
            -1.0e6f64..THRESHOLD_MIN_F64,
            (THRESHOLD_MAX_F64..1.0e6f64).prop_filter("above range", |v| *v > THRESHOLD_MAX_F64),
        ]) {
            let record = ConfigRecord {
                threshold: Some(Value::from(value)),
                emit: Some(Value::from(10_077)),
                ip_address: Some("192.168.4.26".into()),
                ..ConfigRecord::default()
            };
            let resolution = ConfigResponse::default().resolve_record("eros", &record, &previous());
            prop_assert_eq!(resolution.config.threshold, 0.01);
            prop_assert!(matches!(resolution.rejected[..], [Rejection::Threshold(_)]));
        }
    }

    #[test]
    fn test_bad_threshold_does_not_discard_rest_of_record() {
        let response = with_record(
            r#"{"emit": 11000, "threshold": 7, "detect": ["elektra"], "ip_address": "192.168.4.26"}"#,
        );
        let config = response.resolve("192.168.4.26", &previous()).unwrap().config;
        assert_eq!(config.threshold, 0.01);
        assert_eq!(config.emit_frequency, 11_000);
        assert_eq!(config.peer_names, vec!["elektra"]);
    }

    #[test]
    fn test_unknown_peer_keeps_previous_peers() {
        let response = with_record(
            r#"{"emit": 10077, "detect": ["elektra", "nobody"], "ip_address": "192.168.4.26"}"#,
        );
        let resolution = response.resolve("192.168.4.26", &previous()).unwrap();
        assert_eq!(resolution.config.peer_names, vec!["ultimo"]);
        assert_eq!(
            resolution.rejected,
            vec![Rejection::UnknownPeer("nobody".into())]
        );
    }

    #[test]
    fn test_peer_lookup_ignores_case() {
        let response = with_record(
            r#"{"emit": 10077, "detect": ["ELEKTRA"], "ip_address": "192.168.4.26"}"#,
        );
        let config = response.resolve("192.168.4.26", &previous()).unwrap().config;
        assert_eq!(config.peer_names, vec!["elektra"]);
        assert_eq!(config.peer_frequencies, vec![12_274]);
    }

    #[test]
    fn test_too_many_peers_rejected() {
        let response = with_record(
            r#"{"emit": 10077, "detect": ["a", "b", "c", "d", "e"], "ip_address": "192.168.4.26"}"#,
        );
        let resolution = response.resolve("192.168.4.26", &previous()).unwrap();
        assert_eq!(resolution.rejected, vec![Rejection::TooManyPeers(5)]);
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let response = ConfigResponse::parse_str(
            r#"{"eros": {"detect": "elektra"}, "elektra": {"emit": 12274}}"#,
        )
        .unwrap();
        assert_eq!(response.records.len(), 1);
        assert_eq!(response.skipped.len(), 1);
        assert_eq!(response.skipped[0].0, "eros");
    }

    #[test]
    fn test_non_object_payload_is_error() {
        assert!(ConfigResponse::parse(b"true").is_err());
        assert!(ConfigResponse::parse(b"{not json").is_err());
    }

    #[test]
    fn test_same_response_resolves_identically() {
        let response = ConfigResponse::parse_str(RESPONSE).unwrap();
        let first = response.resolve("192.168.4.26", &previous()).unwrap().config;
        let second = response.resolve("192.168.4.26", &first).unwrap().config;
        assert_eq!(first, second);
    }

    #[test]
    fn test_tone_table_from_config() {
        let response = ConfigResponse::parse_str(RESPONSE).unwrap();
        let config = response.resolve("192.168.4.26", &previous()).unwrap().config;
        let table = config.tone_table(50, DETECTOR_SAMPLE_RATE_HZ).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[1].peer, "sophia");
        assert_eq!(table.entries()[1].config.frequency, 17_227);
    }

    #[test]
    fn test_summary_lists_peers() {
        let summary = previous().summary();
        assert!(summary.contains("name:       eros"));
        assert!(summary.contains("detect:     ultimo @ 19467 Hz"));
    }
}
