//! Wire payloads and topic names exchanged with the controller.

use serde::{Deserialize, Serialize};

/// Payload of a config request.
pub const REQUEST_MARKER: &[u8] = b"true";

/// Topic names under an optional namespace prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into().trim_matches('/').to_string();
        Self { namespace }
    }

    fn topic(&self, suffix: &str) -> String {
        if self.namespace.is_empty() {
            suffix.to_string()
        } else {
            format!("{}/{suffix}", self.namespace)
        }
    }

    pub fn config_request(&self) -> String {
        self.topic("config/request")
    }

    pub fn config_response(&self) -> String {
        self.topic("config/response")
    }

    /// Per-node link announcements.
    pub fn contact(&self, node: &str) -> String {
        self.topic(&format!("{node}/contact"))
    }

    /// Per-node tone on/off commands.
    pub fn tone(&self, node: &str) -> String {
        self.topic(&format!("{node}/tone"))
    }

    /// Aggregate detector feed shared by all nodes.
    pub fn detector_feed(&self) -> String {
        self.topic("contact")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkWord {
    Linked,
    Unlinked,
}

impl From<bool> for LinkWord {
    fn from(linked: bool) -> Self {
        if linked {
            LinkWord::Linked
        } else {
            LinkWord::Unlinked
        }
    }
}

/// Published on `<node>/contact` on every link edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
    pub id: String,
    pub name: String,
    pub state: LinkWord,
}

impl ContactMessage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, linked: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: linked.into(),
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Which peers one detector currently hears.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorReport {
    pub detector: String,
    pub emitters: Vec<String>,
}

impl DetectorReport {
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToneCommand {
    On,
    Off,
}

impl ToneCommand {
    /// Exactly `ON` or `OFF`; anything else is not a command.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"ON" => Some(ToneCommand::On),
            b"OFF" => Some(ToneCommand::Off),
            _ => None,
        }
    }
}
