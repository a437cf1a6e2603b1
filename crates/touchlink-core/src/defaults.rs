//! The statue table compiled into every node.
//!
//! Loaded at boot so a node can sense contact before the controller answers
//! its first config request. The node matches its own address against the
//! table; an unknown address runs as the baseline statue.

use crate::constants::DEFAULT_THRESHOLD;
use crate::node_config::{ConfigResponse, NodeConfig};

pub const DEFAULT_CONFIG_JSON: &str = include_str!("../data/statues.json");

/// Statue used when the node's address is not in the compiled table.
pub const BASELINE_NODE: &str = "eros";

/// The compiled table, parsed.
pub fn default_response() -> ConfigResponse {
    // The table is a compile-time constant covered by tests; an unparsable
    // table degrades to an empty one rather than failing boot.
    ConfigResponse::parse_str(DEFAULT_CONFIG_JSON).unwrap_or_default()
}

/// Config for a node nobody has told anything yet.
pub fn empty_config() -> NodeConfig {
    NodeConfig {
        name: BASELINE_NODE.to_string(),
        threshold: DEFAULT_THRESHOLD,
        emit_frequency: 0,
        peer_names: Vec::new(),
        peer_frequencies: Vec::new(),
        source_address: String::new(),
        mac_address: None,
    }
}

/// Boot config for `address`. The flag is false when the address had no
/// entry and the baseline statue was used instead.
pub fn compiled_default(address: &str) -> (NodeConfig, bool) {
    let table = default_response();
    let empty = empty_config();
    if let Some(resolution) = table.resolve(address, &empty) {
        return (resolution.config, true);
    }
    let config = table
        .find_by_name(BASELINE_NODE)
        .map(|(name, record)| table.resolve_record(name, record, &empty).config)
        .unwrap_or(empty);
    (config, false)
}
