//! Simulated statues: a shared acoustic medium, software tone detectors,
//! a player with timed tracks, a config responder and a scripted scenario
//! runner in virtual time.
//!
//! A detector hears a peer's tone only while a touch bridges the two
//! statues. The coupling factor scales the tone as it passes through the
//! visitors; uniform noise is added to every detection block.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use touchlink_core::{
    ConfigResponse, DEFAULT_CONFIG_JSON, MAX_PEERS, Player, ToneChannelConfig, ToneCommand,
    ToneDetector, ToneGenerator, Topics, synthesize_sine, tone_energy,
};

use crate::error::{NodeError, Result};
use crate::node::{BootStatus, ConfigEvent, CycleReport, Node};
use crate::settings::NodeSettings;
use crate::transport::{BusClient, LinkSwitch, MemoryBus, StaticIdentity, Transport};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for simulated players.
#[derive(Clone, Debug)]
pub enum SimClock {
    /// Advanced explicitly by the scenario runner.
    Manual(Rc<Cell<u64>>),
    /// Follows tokio time from a start instant.
    Wall(Instant),
}

impl SimClock {
    pub fn manual() -> Self {
        SimClock::Manual(Rc::new(Cell::new(0)))
    }

    pub fn wall() -> Self {
        SimClock::Wall(Instant::now())
    }

    pub fn now_ms(&self) -> u64 {
        match self {
            SimClock::Manual(now) => now.get(),
            SimClock::Wall(start) => u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Move a manual clock to `now_ms`. No effect on a wall clock.
    pub fn set(&self, now_ms: u64) {
        if let SimClock::Manual(now) = self {
            now.set(now_ms);
        }
    }
}

// ---------------------------------------------------------------------------
// Medium
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Emission {
    frequency: u32,
    amplitude: f32,
}

#[derive(Debug, Default)]
struct Medium {
    emitters: HashMap<String, Emission>,
    touches: HashSet<(String, String)>,
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// The shared air between statues, keyed by node address.
#[derive(Clone, Debug)]
pub struct SimWorld {
    medium: Rc<RefCell<Medium>>,
    coupling: f32,
    noise: f32,
    sample_rate_hz: u32,
}

impl SimWorld {
    pub fn new(coupling: f32, noise: f32, sample_rate_hz: u32) -> Self {
        Self {
            medium: Rc::default(),
            coupling: coupling.clamp(0.0, 1.0),
            noise: noise.max(0.0),
            sample_rate_hz,
        }
    }

    pub fn set_frequency(&self, address: &str, frequency: u32) {
        self.medium
            .borrow_mut()
            .emitters
            .entry(address.to_string())
            .or_default()
            .frequency = frequency;
    }

    pub fn set_amplitude(&self, address: &str, amplitude: f32) {
        self.medium
            .borrow_mut()
            .emitters
            .entry(address.to_string())
            .or_default()
            .amplitude = amplitude;
    }

    pub fn touch(&self, a: &str, b: &str) {
        self.medium.borrow_mut().touches.insert(pair(a, b));
    }

    pub fn release(&self, a: &str, b: &str) {
        self.medium.borrow_mut().touches.remove(&pair(a, b));
    }

    pub fn release_all(&self) {
        self.medium.borrow_mut().touches.clear();
    }

    pub fn is_touching(&self, a: &str, b: &str) -> bool {
        self.medium.borrow().touches.contains(&pair(a, b))
    }

    /// Tones arriving at `address`: (frequency, amplitude after coupling).
    pub fn heard_by(&self, address: &str) -> Vec<(u32, f32)> {
        let medium = self.medium.borrow();
        medium
            .emitters
            .iter()
            .filter(|(from, e)| {
                from.as_str() != address
                    && e.amplitude > 0.0
                    && medium.touches.contains(&pair(from, address))
            })
            .map(|(_, e)| (e.frequency, e.amplitude * self.coupling))
            .collect()
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

/// Software tone detector: synthesizes what the medium carries and runs a
/// Goertzel estimate over one detection window.
pub struct SimDetector {
    address: String,
    world: SimWorld,
    config: Option<ToneChannelConfig>,
    offset: u64,
    rng: SmallRng,
}

impl SimDetector {
    pub fn new(address: impl Into<String>, world: SimWorld, seed: u64) -> Self {
        Self {
            address: address.into(),
            world,
            config: None,
            offset: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> Option<ToneChannelConfig> {
        self.config
    }
}

impl ToneDetector for SimDetector {
    fn configure(&mut self, config: ToneChannelConfig) {
        self.config = Some(config);
        self.offset = 0;
    }

    fn read(&mut self) -> f32 {
        let Some(config) = self.config else {
            return 0.0;
        };
        let rate = self.world.sample_rate_hz();
        let mut block = vec![0.0; config.window_samples(rate)];
        for (frequency, amplitude) in self.world.heard_by(&self.address) {
            synthesize_sine(&mut block, frequency as f32, amplitude, rate as f32, self.offset);
        }
        let noise = self.world.noise;
        if noise > 0.0 {
            for sample in &mut block {
                *sample += self.rng.random_range(-noise..=noise);
            }
        }
        self.offset = self.offset.wrapping_add(block.len() as u64);
        tone_energy(&block, config.frequency as f32, rate as f32)
    }
}

/// Puts the node's tone into the medium.
pub struct SimGenerator {
    address: String,
    world: SimWorld,
}

impl SimGenerator {
    pub fn new(address: impl Into<String>, world: SimWorld) -> Self {
        Self {
            address: address.into(),
            world,
        }
    }
}

impl ToneGenerator for SimGenerator {
    fn configure(&mut self, frequency: u32) {
        self.world.set_frequency(&self.address, frequency);
    }

    fn set_amplitude(&mut self, amplitude: f32) {
        self.world.set_amplitude(&self.address, amplitude);
    }
}

/// Player whose tracks run for a fixed duration of clock time.
#[derive(Debug)]
pub struct SimPlayer {
    clock: SimClock,
    track_ms: u64,
    durations: HashMap<String, u64>,
    missing: HashSet<String>,
    current: Option<(String, u64)>,
    volume: f32,
    history: Vec<String>,
}

impl SimPlayer {
    pub fn new(clock: SimClock, track_ms: u64) -> Self {
        Self {
            clock,
            track_ms,
            durations: HashMap::new(),
            missing: HashSet::new(),
            current: None,
            volume: 0.0,
            history: Vec::new(),
        }
    }

    pub fn with_duration(mut self, track: impl Into<String>, duration_ms: u64) -> Self {
        self.durations.insert(track.into(), duration_ms);
        self
    }

    /// Make `track` fail to start.
    pub fn with_missing(mut self, track: impl Into<String>) -> Self {
        self.missing.insert(track.into());
        self
    }

    pub fn current_track(&self) -> Option<&str> {
        self.current
            .as_ref()
            .filter(|_| self.is_playing())
            .map(|(track, _)| track.as_str())
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Every track successfully started, in order.
    pub fn history(&self) -> &[String] {
        &self.history
    }
}

impl Player for SimPlayer {
    fn play(&mut self, track: &str) -> bool {
        if self.missing.contains(track) {
            return false;
        }
        self.current = Some((track.to_string(), self.clock.now_ms()));
        self.history.push(track.to_string());
        true
    }

    fn stop(&mut self) {
        self.current = None;
    }

    fn is_playing(&self) -> bool {
        self.current.as_ref().is_some_and(|(track, started)| {
            let duration = self.durations.get(track).copied().unwrap_or(self.track_ms);
            self.clock.now_ms().saturating_sub(*started) < duration
        })
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }
}

pub type SimNode = Node<SimDetector, SimGenerator, SimPlayer, BusClient>;

/// Assemble a simulated node at `address` on `bus`. A `local_address`
/// in the settings takes precedence.
pub fn sim_node(
    settings: NodeSettings,
    address: &str,
    world: &SimWorld,
    bus: &MemoryBus,
    clock: SimClock,
    track_ms: u64,
    seed: u64,
) -> Result<SimNode> {
    let address = settings.local_address.as_deref().unwrap_or(address).to_string();
    let address = address.as_str();
    let detectors: [SimDetector; MAX_PEERS] = std::array::from_fn(|slot| {
        SimDetector::new(address, world.clone(), seed.wrapping_add(slot as u64))
    });
    Node::new(
        settings,
        &StaticIdentity(address.to_string()),
        detectors,
        SimGenerator::new(address, world.clone()),
        SimPlayer::new(clock, track_ms),
        bus.client(),
    )
}

// ---------------------------------------------------------------------------
// Controller stand-in
// ---------------------------------------------------------------------------

/// Answers every `config/request` with a fixed response.
pub struct ConfigResponder {
    client: BusClient,
    topics: Topics,
    payload: Vec<u8>,
    answered: u64,
}

impl ConfigResponder {
    pub fn new(bus: &MemoryBus, topics: Topics, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let mut client = bus.client();
        client.subscribe(&topics.config_request())?;
        Ok(Self {
            client,
            topics,
            payload: payload.into(),
            answered: 0,
        })
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// Answer every waiting request. Returns how many were answered.
    pub fn step(&mut self) -> usize {
        let mut answered = 0;
        while self.client.poll().is_some() {
            match self.client.publish(&self.topics.config_response(), &self.payload) {
                Ok(()) => answered += 1,
                Err(e) => tracing::debug!("config response dropped: {e}"),
            }
        }
        self.answered += answered as u64;
        answered
    }

    pub async fn serve(&mut self, cancel: CancellationToken, poll_every: Duration) {
        let mut interval = tokio::time::interval(poll_every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.step();
                }
            }
        }
    }

    pub fn answered(&self) -> u64 {
        self.answered
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Touch {
    pub between: [String; 2],
    pub from_ms: u64,
    pub to_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Outage {
    pub node: String,
    pub from_ms: u64,
    pub to_ms: u64,
}

/// A message the orchestrator sends at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Publish {
    pub at_ms: u64,
    pub topic: String,
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    pub duration_ms: u64,
    /// Statue names; each must have an address in the response table.
    pub nodes: Vec<String>,
    pub responder: bool,
    /// Config response JSON served to the nodes. Defaults to the
    /// compiled table.
    pub response: Option<String>,
    pub coupling: f32,
    pub noise: f32,
    pub seed: u64,
    pub track_ms: u64,
    pub touch: Vec<Touch>,
    pub outage: Vec<Outage>,
    pub publish: Vec<Publish>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            nodes: ["eros", "elektra", "ariel", "sophia", "ultimo"]
                .map(String::from)
                .to_vec(),
            responder: true,
            response: None,
            coupling: 0.2,
            noise: 0.001,
            seed: 7,
            track_ms: 4_000,
            touch: vec![
                Touch {
                    between: ["eros".into(), "elektra".into()],
                    from_ms: 1_000,
                    to_ms: 3_500,
                },
                Touch {
                    between: ["sophia".into(), "ultimo".into()],
                    from_ms: 5_000,
                    to_ms: 9_000,
                },
            ],
            outage: Vec::new(),
            publish: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn response_json(&self) -> &str {
        self.response.as_deref().unwrap_or(DEFAULT_CONFIG_JSON)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum SimEventKind {
    Booted(BootStatus),
    Config(ConfigEvent),
    Linked(Vec<String>),
    Unlinked,
    Started(String),
    StartFailed(String),
    Paused,
    Resumed,
    Tone(ToneCommand),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimEvent {
    pub at_ms: u64,
    pub node: String,
    pub kind: SimEventKind,
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>7} ms  {:<8} ", self.at_ms, self.node)?;
        match &self.kind {
            SimEventKind::Booted(status) => write!(f, "booted ({status:?})"),
            SimEventKind::Config(event) => write!(f, "config {event:?}"),
            SimEventKind::Linked(peers) => write!(f, "linked with {}", peers.join(", ")),
            SimEventKind::Unlinked => write!(f, "unlinked"),
            SimEventKind::Started(track) => write!(f, "playing {track}"),
            SimEventKind::StartFailed(track) => write!(f, "failed to start {track}"),
            SimEventKind::Paused => write!(f, "paused"),
            SimEventKind::Resumed => write!(f, "resumed"),
            SimEventKind::Tone(command) => write!(f, "tone {command:?}"),
        }
    }
}

/// Several nodes, a responder and a timeline, stepped in virtual time.
pub struct Simulation {
    scenario: Scenario,
    period_ms: u64,
    clock: SimClock,
    world: SimWorld,
    addresses: HashMap<String, String>,
    nodes: Vec<SimNode>,
    links: Vec<LinkSwitch>,
    responder: Option<ConfigResponder>,
    orchestrator: BusClient,
    now_ms: u64,
}

impl Simulation {
    pub fn new(scenario: Scenario, settings: NodeSettings) -> Result<Self> {
        let table = ConfigResponse::parse_str(scenario.response_json())?;
        let addresses: HashMap<String, String> = table
            .records
            .iter()
            .filter_map(|(name, r)| r.ip_address.clone().map(|ip| (name.clone(), ip)))
            .collect();
        let address_of = |name: &str| {
            addresses
                .get(name)
                .cloned()
                .ok_or_else(|| NodeError::Scenario(format!("'{name}' has no address")))
        };
        for touch in &scenario.touch {
            for name in &touch.between {
                address_of(name)?;
            }
        }

        let bus = MemoryBus::default();
        let topics = Topics::new(settings.topic_namespace.clone());
        let clock = SimClock::manual();
        let world = SimWorld::new(scenario.coupling, scenario.noise, settings.detector_sample_rate);

        let mut nodes = Vec::with_capacity(scenario.nodes.len());
        let mut links = Vec::with_capacity(scenario.nodes.len());
        for (i, name) in scenario.nodes.iter().enumerate() {
            let address = address_of(name)?;
            let seed = scenario.seed.wrapping_add(i as u64 * MAX_PEERS as u64);
            let node = sim_node(
                settings.clone(),
                &address,
                &world,
                &bus,
                clock.clone(),
                scenario.track_ms,
                seed,
            )?;
            links.push(node.transport().link());
            nodes.push(node);
        }

        let responder = if scenario.responder {
            Some(ConfigResponder::new(&bus, topics, scenario.response_json())?)
        } else {
            None
        };

        Ok(Self {
            period_ms: settings.sample_period_ms,
            orchestrator: bus.client(),
            scenario,
            clock,
            world,
            addresses,
            nodes,
            links,
            responder,
            now_ms: 0,
        })
    }

    fn apply_timeline(&mut self) {
        let now = self.now_ms;
        self.world.release_all();
        for touch in &self.scenario.touch {
            if (touch.from_ms..touch.to_ms).contains(&now)
                && let (Some(a), Some(b)) = (
                    self.addresses.get(&touch.between[0]),
                    self.addresses.get(&touch.between[1]),
                )
            {
                self.world.touch(a, b);
            }
        }

        for (node, link) in self.nodes.iter().zip(&self.links) {
            let down = self.scenario.outage.iter().any(|o| {
                o.node == node.config().name && (o.from_ms..o.to_ms).contains(&now)
            });
            link.set_online(!down);
        }

        let window = now..now + self.period_ms;
        for publish in &self.scenario.publish {
            if window.contains(&publish.at_ms)
                && let Err(e) = self
                    .orchestrator
                    .publish(&publish.topic, publish.payload.as_bytes())
            {
                tracing::debug!("scenario publish dropped: {e}");
            }
        }
    }

    /// Advance one sampling period.
    pub fn step(&mut self) -> Vec<SimEvent> {
        self.clock.set(self.now_ms);
        self.apply_timeline();
        if let Some(responder) = self.responder.as_mut() {
            responder.step();
        }

        let mut events = Vec::new();
        for node in &mut self.nodes {
            let at_ms = self.now_ms;
            if !node.is_booted() {
                let status = node.boot_step(at_ms);
                if status != BootStatus::Waiting {
                    events.push(SimEvent {
                        at_ms,
                        node: node.config().name.clone(),
                        kind: SimEventKind::Booted(status),
                    });
                }
                continue;
            }
            let report = node.cycle(at_ms);
            events.extend(
                cycle_events(node, &report)
                    .into_iter()
                    .map(|kind| SimEvent {
                        at_ms,
                        node: node.config().name.clone(),
                        kind,
                    }),
            );
        }
        self.now_ms += self.period_ms;
        events
    }

    /// Step until the scenario's duration has elapsed.
    pub fn run(&mut self) -> Vec<SimEvent> {
        let mut events = Vec::new();
        while self.now_ms < self.scenario.duration_ms {
            events.extend(self.step());
        }
        events
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&SimNode> {
        self.nodes.iter().find(|n| n.config().name == name)
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn responder_mut(&mut self) -> Option<&mut ConfigResponder> {
        self.responder.as_mut()
    }
}

fn cycle_events(node: &SimNode, report: &CycleReport) -> Vec<SimEventKind> {
    let mut kinds = Vec::new();
    if let Some(event) = report.config
        && event != ConfigEvent::Unchanged
    {
        kinds.push(SimEventKind::Config(event));
    }
    if let Some(command) = report.tone {
        kinds.push(SimEventKind::Tone(command));
    }
    match report.state.edge() {
        Some(touchlink_core::LinkEdge::Connected) => {
            let peers = report
                .state
                .linked_channels()
                .filter_map(|i| node.bank().peer(i))
                .map(str::to_string)
                .collect();
            kinds.push(SimEventKind::Linked(peers));
        }
        Some(touchlink_core::LinkEdge::Disconnected) => kinds.push(SimEventKind::Unlinked),
        None => {}
    }
    if report.playback.paused {
        kinds.push(SimEventKind::Paused);
    }
    if report.playback.resumed {
        kinds.push(SimEventKind::Resumed);
    }
    if let Some(track) = &report.playback.started {
        kinds.push(SimEventKind::Started(track.clone()));
    }
    if let Some(track) = &report.playback.failed {
        kinds.push(SimEventKind::StartFailed(track.clone()));
    }
    kinds
}
