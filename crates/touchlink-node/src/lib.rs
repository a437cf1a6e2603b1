//! Runtime for a touchlink statue node.
//!
//! Wraps the pure logic of `touchlink-core` with a publish/subscribe
//! transport, the config request cycle, link announcements and a
//! periodic control loop. Simulated hardware lives in [`sim`].

pub mod error;
pub mod node;
pub mod publisher;
pub mod settings;
pub mod sim;
pub mod sync;
pub mod transport;

pub use error::{NodeError, Result};
pub use node::{BootStatus, ConfigEvent, CycleReport, Node};
pub use publisher::{LinkPublisher, PublishReport};
pub use settings::{MAX_SAMPLE_PERIOD_MS, NodeSettings, SETTINGS_ENV};
pub use sync::{ConfigSync, SyncOutcome, SyncTick};
pub use transport::{
    BusClient, LinkSwitch, MemoryBus, Message, NetworkIdentity, StaticIdentity, Transport,
};
