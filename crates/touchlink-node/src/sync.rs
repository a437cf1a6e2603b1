//! Config request/response cycle.
//!
//! A request goes out at start and then every refresh interval. Each request
//! opens a response window. Responses are matched by network address; a
//! response with no entry for this node leaves the config alone and warns
//! at most once per request cycle.

use touchlink_core::{ConfigResponse, NodeConfig, REQUEST_MARKER, Resolution, Topics};

use crate::transport::Transport;

/// Result of handling one `config/response` payload.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// A different config resolved for this node.
    Applied(Resolution),
    /// The resolved config equals the current one.
    Unchanged,
    NoMatch,
    Malformed(String),
}

/// What the timers did this cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncTick {
    pub requested: bool,
    /// The response window of the current cycle just closed without a
    /// matching response.
    pub window_expired: bool,
}

#[derive(Debug)]
pub struct ConfigSync {
    topics: Topics,
    refresh_ms: u64,
    window_ms: u64,
    next_request_ms: Option<u64>,
    window_deadline_ms: Option<u64>,
    request_cycle: u64,
    matched_this_cycle: bool,
    warned_cycle: Option<u64>,
    requests_sent: u64,
    requests_dropped: u64,
    mismatch_warnings: u64,
}

impl ConfigSync {
    pub fn new(topics: Topics, refresh_ms: u64, window_ms: u64) -> Self {
        Self {
            topics,
            refresh_ms,
            window_ms,
            next_request_ms: None,
            window_deadline_ms: None,
            request_cycle: 0,
            matched_this_cycle: false,
            warned_cycle: None,
            requests_sent: 0,
            requests_dropped: 0,
            mismatch_warnings: 0,
        }
    }

    /// Send a request if one is due and close an expired window.
    pub fn tick<T: Transport>(&mut self, transport: &mut T, now_ms: u64) -> SyncTick {
        let mut tick = SyncTick::default();

        if let Some(deadline) = self.window_deadline_ms
            && now_ms >= deadline
        {
            self.window_deadline_ms = None;
            if !self.matched_this_cycle {
                tracing::debug!(
                    cycle = self.request_cycle,
                    "no matching config response within {} ms",
                    self.window_ms
                );
                tick.window_expired = true;
            }
        }

        if self.next_request_ms.is_none_or(|due| now_ms >= due) {
            self.request(transport, now_ms);
            tick.requested = true;
        }
        tick
    }

    /// Start a new request cycle now.
    pub fn request<T: Transport>(&mut self, transport: &mut T, now_ms: u64) {
        self.request_cycle += 1;
        self.matched_this_cycle = false;
        self.next_request_ms = Some(now_ms.saturating_add(self.refresh_ms));
        self.window_deadline_ms = Some(now_ms.saturating_add(self.window_ms));
        match transport.publish(&self.topics.config_request(), REQUEST_MARKER) {
            Ok(()) => {
                self.requests_sent += 1;
                tracing::debug!(cycle = self.request_cycle, "config requested");
            }
            Err(e) => {
                self.requests_dropped += 1;
                tracing::debug!(cycle = self.request_cycle, "config request dropped: {e}");
            }
        }
    }

    /// Whether the current request's response window is still open.
    pub fn is_listening(&self, now_ms: u64) -> bool {
        self.window_deadline_ms.is_some_and(|deadline| now_ms < deadline)
    }

    /// Resolve `payload` for `address` against the current config.
    pub fn handle_response(&mut self, payload: &[u8], address: &str, current: &NodeConfig) -> SyncOutcome {
        let response = match ConfigResponse::parse(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("ignoring malformed config response: {e}");
                return SyncOutcome::Malformed(e.to_string());
            }
        };
        for (name, reason) in &response.skipped {
            tracing::warn!("config record '{name}' skipped: {reason}");
        }

        let Some(resolution) = response.resolve(address, current) else {
            if self.warned_cycle == Some(self.request_cycle) {
                tracing::debug!("config response has no record for {address}");
            } else {
                self.warned_cycle = Some(self.request_cycle);
                self.mismatch_warnings += 1;
                tracing::warn!(
                    "config response has no record for {address}; keeping '{}'",
                    current.name
                );
            }
            return SyncOutcome::NoMatch;
        };

        self.matched_this_cycle = true;
        for rejection in &resolution.rejected {
            tracing::warn!("config for '{}': {rejection}; keeping previous value", resolution.config.name);
        }
        if resolution.config == *current {
            tracing::debug!("config for '{}' unchanged", current.name);
            SyncOutcome::Unchanged
        } else {
            SyncOutcome::Applied(resolution)
        }
    }

    pub fn request_cycle(&self) -> u64 {
        self.request_cycle
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn requests_dropped(&self) -> u64 {
        self.requests_dropped
    }

    /// Number of "no record for this address" warnings emitted so far.
    pub fn mismatch_warnings(&self) -> u64 {
        self.mismatch_warnings
    }
}
