//! The node: one context object owning every component, stepped once per
//! sampling period.
//!
//! Each cycle runs, in order: drain transport messages, config timers, tone
//! reads, classification, link evaluation, playback, publishing. Config
//! changes land in the message phase, so the rest of the cycle always sees
//! one consistent config.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use touchlink_core::defaults::empty_config;
use touchlink_core::{
    ContactClassifier, ContactState, LinkEdge, LinkStateMachine, MAX_PEERS, NodeConfig,
    PlaybackController, PlaybackState, Player, StepReport, ToneBank, ToneCommand, ToneDetector,
    ToneGenerator, Topics, compiled_default,
};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::publisher::{LinkPublisher, PublishReport};
use crate::settings::NodeSettings;
use crate::sync::{ConfigSync, SyncOutcome};
use crate::transport::{Message, NetworkIdentity, Transport};

/// Config handling observed during one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigEvent {
    Applied { retuned: bool },
    Unchanged,
    NoMatch,
    Malformed,
}

/// Progress of the initial wait for a config response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootStatus {
    Waiting,
    Configured,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BootPhase {
    NotStarted,
    Awaiting { deadline_ms: u64 },
    Running,
}

/// Everything one cycle did.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub now_ms: u64,
    pub state: ContactState,
    pub playback: StepReport,
    pub config: Option<ConfigEvent>,
    pub tone: Option<ToneCommand>,
    pub requested: bool,
    pub published: PublishReport,
}

pub struct Node<D, G, P, T> {
    settings: NodeSettings,
    address: String,
    config: NodeConfig,
    topics: Topics,
    bank: ToneBank<D, G>,
    classifier: ContactClassifier,
    machine: LinkStateMachine,
    controller: PlaybackController,
    player: P,
    transport: T,
    sync: ConfigSync,
    publisher: LinkPublisher,
    subscribed: HashSet<String>,
    boot: BootPhase,
    last_playback: PlaybackState,
    cycles: u64,
}

impl<D, G, P, T> Node<D, G, P, T>
where
    D: ToneDetector,
    G: ToneGenerator,
    P: Player,
    T: Transport,
{
    /// Build a node running the compiled default config for its address.
    pub fn new(
        settings: NodeSettings,
        identity: &impl NetworkIdentity,
        detectors: [D; MAX_PEERS],
        generator: G,
        player: P,
        transport: T,
    ) -> Result<Self> {
        settings.validate()?;
        let address = settings
            .local_address
            .clone()
            .unwrap_or_else(|| identity.local_address());
        let topics = Topics::new(settings.topic_namespace.clone());
        let mut bank = ToneBank::new(detectors, generator, settings.detector_sample_rate);
        bank.set_amplitude(settings.tone_amplitude);

        let mut node = Self {
            address,
            config: empty_config(),
            topics: topics.clone(),
            bank,
            classifier: ContactClassifier::default(),
            machine: LinkStateMachine::new(),
            controller: PlaybackController::new(settings.playback(), settings.playlist()),
            player,
            transport,
            sync: ConfigSync::new(topics.clone(), settings.refresh_ms(), settings.window_ms()),
            publisher: LinkPublisher::new(topics, settings.heartbeat_ms()),
            subscribed: HashSet::new(),
            boot: BootPhase::NotStarted,
            last_playback: PlaybackState::NotStarted,
            cycles: 0,
            settings,
        };

        let (config, matched) = compiled_default(&node.address);
        if !matched {
            warn!(
                "address {} not in compiled table; running as '{}'",
                node.address, config.name
            );
        }
        node.apply_config(config);
        Ok(node)
    }

    // -- config -------------------------------------------------------------

    /// Replace the config wholesale. Tuning the hardware rejects is kept at
    /// its previous value, and the stored config reflects what is in effect.
    pub fn apply_config(&mut self, mut next: NodeConfig) -> bool {
        let mut retuned = false;
        match next.tone_table(self.settings.sample_period_ms, self.settings.detector_sample_rate) {
            Ok(table) => retuned = self.bank.apply_table(&table),
            Err(e) => {
                warn!("rejecting detector table for '{}': {e}; keeping previous tuning", next.name);
                next.peer_names = self.config.peer_names.clone();
                next.peer_frequencies = self.config.peer_frequencies.clone();
            }
        }
        if let Err(e) = self.bank.set_emit_frequency(next.emit_frequency) {
            warn!("rejecting emit frequency for '{}': {e}", next.name);
            next.emit_frequency = self.config.emit_frequency;
        }
        if !self.classifier.set_threshold(next.threshold) {
            warn!("rejecting threshold {} for '{}'", next.threshold, next.name);
            next.threshold = self.classifier.threshold();
        }

        if next.name != self.config.name {
            let old_tone = self.topics.tone(&self.config.name);
            if self.subscribed.remove(&old_tone)
                && let Err(e) = self.transport.unsubscribe(&old_tone)
            {
                debug!("unsubscribe {old_tone} failed: {e}");
            }
            self.publisher.reset();
            info!("identity: '{}' -> '{}' at {}", self.config.name, next.name, self.address);
        }

        info!(
            name = %next.name,
            threshold = next.threshold,
            emit = next.emit_frequency,
            peers = ?next.peer_names,
            "config applied"
        );
        self.config = next;
        retuned
    }

    fn wanted_topics(&self) -> [String; 2] {
        [
            self.topics.config_response(),
            self.topics.tone(&self.config.name),
        ]
    }

    fn ensure_subscriptions(&mut self) {
        if !self.transport.is_connected() {
            // Subscriptions do not survive a reconnect.
            self.subscribed.clear();
            return;
        }
        for topic in self.wanted_topics() {
            if self.subscribed.contains(&topic) {
                continue;
            }
            match self.transport.subscribe(&topic) {
                Ok(()) => {
                    debug!("subscribed to {topic}");
                    self.subscribed.insert(topic);
                }
                Err(e) => debug!("subscribe {topic} failed: {e}"),
            }
        }
    }

    fn handle_config(&mut self, payload: &[u8]) -> ConfigEvent {
        match self.sync.handle_response(payload, &self.address, &self.config) {
            SyncOutcome::Applied(resolution) => {
                let retuned = self.apply_config(resolution.config);
                ConfigEvent::Applied { retuned }
            }
            SyncOutcome::Unchanged => ConfigEvent::Unchanged,
            SyncOutcome::NoMatch => ConfigEvent::NoMatch,
            SyncOutcome::Malformed(_) => ConfigEvent::Malformed,
        }
    }

    fn handle_tone(&mut self, payload: &[u8]) -> Option<ToneCommand> {
        let Some(command) = ToneCommand::parse(payload) else {
            warn!(
                "ignoring tone command {:?}",
                String::from_utf8_lossy(payload)
            );
            return None;
        };
        let amplitude = match command {
            ToneCommand::On => self.settings.tone_amplitude,
            ToneCommand::Off => 0.0,
        };
        self.bank.set_amplitude(amplitude);
        info!("tone {command:?}, amplitude {amplitude}");
        Some(command)
    }

    /// Drain everything waiting on the transport. Returns the last config
    /// event and tone command seen.
    fn drain_messages(&mut self) -> (Option<ConfigEvent>, Option<ToneCommand>) {
        self.ensure_subscriptions();
        let (mut config, mut tone) = (None, None);
        let response_topic = self.topics.config_response();
        while let Some(Message { topic, payload }) = self.transport.poll() {
            if topic == response_topic {
                config = Some(self.handle_config(&payload));
            } else if topic == self.topics.tone(&self.config.name) {
                tone = self.handle_tone(&payload).or(tone);
            } else {
                debug!("ignoring message on {topic}");
            }
        }
        (config, tone)
    }

    // -- boot ---------------------------------------------------------------

    /// Send the first config request and open the initial wait.
    pub fn start(&mut self, now_ms: u64) {
        self.ensure_subscriptions();
        self.sync.request(&mut self.transport, now_ms);
        self.boot = BootPhase::Awaiting {
            deadline_ms: now_ms.saturating_add(self.settings.window_ms()),
        };
        info!("'{}' at {} waiting for config", self.config.name, self.address);
    }

    /// Poll for the first matching response. Once this returns anything
    /// but `Waiting`, the node is ready for [`Node::cycle`].
    pub fn boot_step(&mut self, now_ms: u64) -> BootStatus {
        let deadline_ms = match self.boot {
            BootPhase::Running => return BootStatus::Configured,
            BootPhase::NotStarted => {
                self.start(now_ms);
                now_ms.saturating_add(self.settings.window_ms())
            }
            BootPhase::Awaiting { deadline_ms } => deadline_ms,
        };
        let (config, _) = self.drain_messages();
        if matches!(config, Some(ConfigEvent::Applied { .. } | ConfigEvent::Unchanged)) {
            self.boot = BootPhase::Running;
            return BootStatus::Configured;
        }
        if now_ms >= deadline_ms {
            warn!(
                "no config for {} within {} ms; running as '{}'",
                self.address,
                self.settings.window_ms(),
                self.config.name
            );
            self.boot = BootPhase::Running;
            return BootStatus::TimedOut;
        }
        BootStatus::Waiting
    }

    pub fn is_booted(&self) -> bool {
        self.boot == BootPhase::Running
    }

    // -- loop ---------------------------------------------------------------

    pub fn cycle(&mut self, now_ms: u64) -> CycleReport {
        let (config, tone) = self.drain_messages();
        let tick = self.sync.tick(&mut self.transport, now_ms);

        let samples = self.bank.read();
        let classification = self.classifier.classify(&samples);
        let state = self.machine.evaluate(self.player.is_ready(), classification);
        let playback = self.controller.step(&mut self.player, &state, now_ms);
        self.log_cycle(&state, &playback);

        let linked_peers: Vec<String> = state
            .linked_channels()
            .filter_map(|i| self.bank.peer(i))
            .map(str::to_string)
            .collect();
        let published = self.publisher.publish(
            &mut self.transport,
            &self.address,
            &self.config.name,
            &state,
            &linked_peers,
            now_ms,
        );

        self.last_playback = playback.state;
        self.cycles += 1;
        CycleReport {
            now_ms,
            state,
            playback,
            config,
            tone,
            requested: tick.requested,
            published,
        }
    }

    fn log_cycle(&self, state: &ContactState, playback: &StepReport) {
        match state.edge() {
            Some(LinkEdge::Connected) => {
                let peers: Vec<&str> = state
                    .linked_channels()
                    .filter_map(|i| self.bank.peer(i))
                    .collect();
                info!("'{}' linked with {}", self.config.name, peers.join(", "));
            }
            Some(LinkEdge::Disconnected) => info!("'{}' unlinked", self.config.name),
            None if state.peers_changed() => debug!("'{}' {}", self.config.name, state.status_line()),
            None => {}
        }
        if playback.paused {
            info!("paused, fading over {} ms", self.settings.pause_timeout_ms);
        }
        if playback.resumed {
            info!("resumed at volume {}", self.settings.playing_volume);
        }
        if playback.advanced {
            debug!("playlist advanced to {}", self.controller.cursor());
        }
        if let Some(track) = &playback.started {
            info!("playing {track}");
        }
        if let Some(track) = &playback.failed {
            warn!("could not start {track}; retrying next cycle");
        }
    }

    /// Boot, then cycle at the sampling period until `cancel` fires.
    /// Returns the number of completed cycles.
    pub async fn run(&mut self, cancel: CancellationToken) -> u64 {
        let started = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(self.settings.sample_period_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let now_ms = elapsed_ms(started);
                    if self.is_booted() {
                        self.cycle(now_ms);
                    } else {
                        self.boot_step(now_ms);
                    }
                }
            }
        }
        info!("'{}' stopped after {} cycles", self.config.name, self.cycles);
        self.cycles
    }

    // -- accessors ----------------------------------------------------------

    pub fn status_line(&self) -> String {
        format!(
            "{} {} playback={:?} track={} volume={:.2}",
            self.config.name,
            self.machine.state().status_line(),
            self.last_playback,
            self.controller.cursor(),
            self.controller.volume(),
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn state(&self) -> ContactState {
        self.machine.state()
    }

    pub fn threshold(&self) -> f32 {
        self.classifier.threshold()
    }

    pub fn bank(&self) -> &ToneBank<D, G> {
        &self.bank
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sync(&self) -> &ConfigSync {
        &self.sync
    }

    pub fn publisher(&self) -> &LinkPublisher {
        &self.publisher
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
