//! Publish/subscribe transport capability plus an in-memory bus.
//!
//! The node never blocks on the transport: `poll` returns whatever has
//! arrived since the last cycle, and a failed publish is reported to the
//! caller, which drops the message.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::error::{NodeError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

pub trait Transport {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;
    fn subscribe(&mut self, topic: &str) -> Result<()>;
    fn unsubscribe(&mut self, topic: &str) -> Result<()>;

    /// Next message on a subscribed topic, if one is waiting.
    fn poll(&mut self) -> Option<Message>;

    fn is_connected(&self) -> bool;
}

/// Where the node learns its own network address.
pub trait NetworkIdentity {
    fn local_address(&self) -> String;
}

/// An address fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticIdentity(pub String);

impl NetworkIdentity for StaticIdentity {
    fn local_address(&self) -> String {
        self.0.clone()
    }
}

/// In-process broker. Every client sees every message published after it
/// was created, filtered by its own subscriptions.
#[derive(Clone, Debug)]
pub struct MemoryBus {
    tx: broadcast::Sender<Message>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn client(&self) -> BusClient {
        BusClient {
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
            subscriptions: HashSet::new(),
            link: LinkSwitch::default(),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}

/// Shared handle that takes a client's connection up or down.
#[derive(Clone, Debug)]
pub struct LinkSwitch(Arc<AtomicBool>);

impl LinkSwitch {
    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }

    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for LinkSwitch {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

#[derive(Debug)]
pub struct BusClient {
    tx: broadcast::Sender<Message>,
    rx: broadcast::Receiver<Message>,
    subscriptions: HashSet<String>,
    link: LinkSwitch,
}

impl BusClient {
    pub fn link(&self) -> LinkSwitch {
        self.link.clone()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.link.is_online() {
            Ok(())
        } else {
            Err(NodeError::Transport("not connected".into()))
        }
    }
}

impl Transport for BusClient {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.ensure_online()?;
        // No receivers is not an error for a broker.
        let _ = self.tx.send(Message::new(topic, payload));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.ensure_online()?;
        self.subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.ensure_online()?;
        self.subscriptions.remove(topic);
        Ok(())
    }

    fn poll(&mut self) -> Option<Message> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => {
                    // Traffic while disconnected is lost.
                    if self.link.is_online() && self.subscriptions.contains(&message.topic) {
                        return Some(message);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("bus client lagged, {skipped} messages lost");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_online()
    }
}
