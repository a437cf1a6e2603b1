//! Contact sensing for networked statues.
//!
//! Each statue emits its own inaudible tone and listens for its peers'.
//! When a visitor bridges two statues the peer tone reaches a detector,
//! the classifier reports the link, and the playback controller reacts.
//!
//! Zero I/O: hardware, transport and clocks are supplied by the caller
//! through capability traits and explicit `now_ms` arguments.

pub mod classifier;
pub mod constants;
pub mod defaults;
pub mod goertzel;
pub mod link;
pub mod message;
pub mod node_config;
pub mod playback;
pub mod tone;

pub use classifier::{Classification, ContactClassifier, DetectionSample, accept_threshold};
pub use constants::{
    DEFAULT_THRESHOLD, DETECTOR_SAMPLE_RATE_HZ, MAX_PEERS, THRESHOLD_MAX, THRESHOLD_MIN,
};
pub use defaults::{BASELINE_NODE, DEFAULT_CONFIG_JSON, compiled_default, default_response};
pub use goertzel::{synthesize_sine, tone_energy};
pub use link::{ContactState, LinkEdge, LinkState, LinkStateMachine};
pub use message::{ContactMessage, DetectorReport, LinkWord, REQUEST_MARKER, ToneCommand, Topics};
pub use node_config::{ConfigRecord, ConfigResponse, NodeConfig, Rejection, Resolution};
pub use playback::{
    PlaybackController, PlaybackSettings, PlaybackState, Player, Playlist, StepReport, TrackKind,
};
pub use tone::{
    PeerTuning, ToneBank, ToneChannel, ToneChannelConfig, ToneDetector, ToneGenerator, ToneTable,
    TuningError,
};

pub type Result<T> = std::result::Result<T, TuningError>;
