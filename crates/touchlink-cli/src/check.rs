//! Validation of config response files.

use std::collections::HashMap;

use touchlink_core::defaults::empty_config;
use touchlink_core::constants::DEFAULT_SAMPLE_PERIOD_MS;
use touchlink_core::{ConfigResponse, DETECTOR_SAMPLE_RATE_HZ};

/// Problems found in one record.
pub struct RecordReport {
    pub name: String,
    pub problems: Vec<String>,
}

/// Check every record. Records the parser skipped are reported too.
pub fn check_response(response: &ConfigResponse) -> Vec<RecordReport> {
    let mut by_address: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, record) in &response.records {
        if let Some(address) = record.ip_address.as_deref() {
            by_address.entry(address).or_default().push(name);
        }
    }

    let empty = empty_config();
    let mut reports: Vec<RecordReport> = response
        .records
        .iter()
        .map(|(name, record)| {
            let resolution = response.resolve_record(name, record, &empty);
            let mut problems: Vec<String> =
                resolution.rejected.iter().map(ToString::to_string).collect();

            if record.threshold.is_none() {
                problems.push("no threshold".into());
            }
            match record.emit_frequency() {
                None if record.emit.is_none() => problems.push("no emit frequency".into()),
                Some(f) if f >= DETECTOR_SAMPLE_RATE_HZ / 2 => problems.push(format!(
                    "emit frequency {f} Hz is at or above Nyquist ({} Hz)",
                    DETECTOR_SAMPLE_RATE_HZ / 2
                )),
                _ => {}
            }
            match record.ip_address.as_deref() {
                None => problems.push("no ip_address".into()),
                Some(address) => {
                    let owners = &by_address[address];
                    if owners.len() > 1 {
                        problems.push(format!("address {address} shared with {}", owners.join(", ")));
                    }
                }
            }
            if resolution.rejected.is_empty()
                && let Err(e) = resolution
                    .config
                    .tone_table(DEFAULT_SAMPLE_PERIOD_MS, DETECTOR_SAMPLE_RATE_HZ)
            {
                problems.push(e.to_string());
            }
            RecordReport {
                name: name.clone(),
                problems,
            }
        })
        .collect();

    reports.extend(response.skipped.iter().map(|(name, reason)| RecordReport {
        name: name.clone(),
        problems: vec![format!("unreadable record: {reason}")],
    }));
    reports
}
