//! Link state machine: mirrors the classifier's aggregate signal per cycle.
//!
//! Deliberately non-debouncing. Each evaluation shifts the current reading
//! into `was_linked` and records the new one, so consumers see the edge of
//! the last cycle and the level at the same time.

use serde::{Deserialize, Serialize};

use crate::classifier::Classification;
use crate::constants::MAX_PEERS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Uninitialized,
    Unlinked,
    Linked,
}

/// Transition observed in the last evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEdge {
    /// `!was_linked && is_linked`
    Connected,
    /// `was_linked && !is_linked`
    Disconnected,
}

/// Snapshot of contact sensing after one evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContactState {
    pub is_initialized: bool,
    pub was_linked: bool,
    pub is_linked: bool,
    /// Per-peer bits from the previous evaluation.
    pub was_linked_mask: u8,
    /// Per-peer bits from this evaluation.
    pub linked_mask: u8,
}

impl ContactState {
    pub fn edge(&self) -> Option<LinkEdge> {
        match (self.was_linked, self.is_linked) {
            (false, true) => Some(LinkEdge::Connected),
            (true, false) => Some(LinkEdge::Disconnected),
            _ => None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        if !self.is_initialized {
            LinkState::Uninitialized
        } else if self.is_linked {
            LinkState::Linked
        } else {
            LinkState::Unlinked
        }
    }

    pub fn is_linked_to(&self, channel_id: usize) -> bool {
        channel_id < MAX_PEERS && self.linked_mask & (1 << channel_id) != 0
    }

    /// True when some peer joined or left, even if the aggregate held.
    pub fn peers_changed(&self) -> bool {
        self.linked_mask != self.was_linked_mask
    }

    /// Channel ids currently linked, ascending.
    pub fn linked_channels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_PEERS).filter(|&i| self.is_linked_to(i))
    }

    /// One-line status text, e.g. `init=1 was=0 is=1 peers=0100`.
    pub fn status_line(&self) -> String {
        let peers: String = (0..MAX_PEERS)
            .rev()
            .map(|i| if self.is_linked_to(i) { '1' } else { '0' })
            .collect();
        format!(
            "init={} was={} is={} peers={peers}",
            u8::from(self.is_initialized),
            u8::from(self.was_linked),
            u8::from(self.is_linked),
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct LinkStateMachine {
    state: ContactState,
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one cycle. The whole snapshot is replaced at once.
    pub fn evaluate(&mut self, is_initialized: bool, classification: Classification) -> ContactState {
        self.state = ContactState {
            is_initialized,
            was_linked: self.state.is_linked,
            is_linked: classification.linked,
            was_linked_mask: self.state.linked_mask,
            linked_mask: classification.active_mask,
        };
        self.state
    }

    pub fn state(&self) -> ContactState {
        self.state
    }

    pub fn link_state(&self) -> LinkState {
        self.state.link_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn linked(mask: u8) -> Classification {
        Classification {
            active_mask: mask,
            linked: mask != 0,
        }
    }

    #[test]
    fn test_starts_uninitialized() {
        let machine = LinkStateMachine::new();
        assert_eq!(machine.link_state(), LinkState::Uninitialized);
    }

    #[test]
    fn test_uninitialized_until_ready() {
        let mut machine = LinkStateMachine::new();
        machine.evaluate(false, linked(1));
        assert_eq!(machine.link_state(), LinkState::Uninitialized);
        machine.evaluate(true, linked(1));
        assert_eq!(machine.link_state(), LinkState::Linked);
    }

    #[test]
    fn test_edges() {
        let mut machine = LinkStateMachine::new();
        assert_eq!(machine.evaluate(true, linked(0)).edge(), None);
        assert_eq!(
            machine.evaluate(true, linked(0b10)).edge(),
            Some(LinkEdge::Connected)
        );
        assert_eq!(machine.evaluate(true, linked(0b10)).edge(), None);
        assert_eq!(
            machine.evaluate(true, linked(0)).edge(),
            Some(LinkEdge::Disconnected)
        );
    }

    #[test]
    fn test_peer_change_without_aggregate_edge() {
        let mut machine = LinkStateMachine::new();
        machine.evaluate(true, linked(0b0001));
        let state = machine.evaluate(true, linked(0b0011));
        assert_eq!(state.edge(), None);
        assert!(state.peers_changed());
        assert!(state.is_linked_to(1));
        assert_eq!(state.linked_channels().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_status_line() {
        let mut machine = LinkStateMachine::new();
        machine.evaluate(true, linked(0));
        let state = machine.evaluate(true, linked(0b0100));
        assert_eq!(state.status_line(), "init=1 was=0 is=1 peers=0100");
    }

    proptest! {
        #[test]
        fn prop_was_linked_trails_is_linked(
            inputs in proptest::collection::vec((any::<bool>(), 0u8..16), 1..64)
        ) {
            let mut machine = LinkStateMachine::new();
            let mut previous = machine.state();
            for (ready, mask) in inputs {
                let state = machine.evaluate(ready, linked(mask));
                prop_assert_eq!(state.was_linked, previous.is_linked);
                prop_assert_eq!(state.was_linked_mask, previous.linked_mask);
                prop_assert_eq!(state.is_linked, mask != 0);
                previous = state;
            }
        }
    }
}
