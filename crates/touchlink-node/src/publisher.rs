//! Outbound link announcements.

use touchlink_core::{ContactMessage, ContactState, DetectorReport, Topics};

use crate::transport::Transport;

/// What one `publish` call sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub contact: bool,
    pub detector: bool,
    pub dropped: u32,
}

/// Publishes the node's link state on edges, on first initialized cycle and
/// on an optional heartbeat, plus the detector feed on per-peer changes.
#[derive(Debug)]
pub struct LinkPublisher {
    topics: Topics,
    heartbeat_ms: Option<u64>,
    last_contact_ms: Option<u64>,
    announced: bool,
    published: u64,
    dropped: u64,
}

impl LinkPublisher {
    pub fn new(topics: Topics, heartbeat_ms: Option<u64>) -> Self {
        Self {
            topics,
            heartbeat_ms,
            last_contact_ms: None,
            announced: false,
            published: 0,
            dropped: 0,
        }
    }

    /// Forget what was announced, e.g. after the node's name changed.
    pub fn reset(&mut self) {
        self.announced = false;
        self.last_contact_ms = None;
    }

    fn heartbeat_due(&self, now_ms: u64) -> bool {
        match (self.heartbeat_ms, self.last_contact_ms) {
            (Some(interval), Some(last)) => now_ms.saturating_sub(last) >= interval,
            _ => false,
        }
    }

    /// `id` and `name` identify this node; `linked_peers` names the peers
    /// whose bits are set in `state.linked_mask`.
    pub fn publish<T: Transport>(
        &mut self,
        transport: &mut T,
        id: &str,
        name: &str,
        state: &ContactState,
        linked_peers: &[String],
        now_ms: u64,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        if !state.is_initialized {
            return report;
        }

        if state.edge().is_some() || !self.announced || self.heartbeat_due(now_ms) {
            let message = ContactMessage::new(id, name, state.is_linked);
            self.announced = true;
            self.last_contact_ms = Some(now_ms);
            let topic = self.topics.contact(name);
            if self.send(transport, &topic, &message.to_json()) {
                report.contact = true;
            } else {
                report.dropped += 1;
            }
        }

        if state.peers_changed() {
            let feed = DetectorReport {
                detector: name.to_string(),
                emitters: linked_peers.to_vec(),
            };
            let topic = self.topics.detector_feed();
            if self.send(transport, &topic, &feed.to_json()) {
                report.detector = true;
            } else {
                report.dropped += 1;
            }
        }
        report
    }

    fn send<T: Transport>(&mut self, transport: &mut T, topic: &str, payload: &[u8]) -> bool {
        match transport.publish(topic, payload) {
            Ok(()) => {
                self.published += 1;
                true
            }
            Err(e) => {
                self.dropped += 1;
                tracing::debug!("dropped publication on {topic}: {e}");
                false
            }
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
