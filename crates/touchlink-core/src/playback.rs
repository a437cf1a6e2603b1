//! Music playback driven by link transitions.
//!
//! Two layers run every cycle. The edge layer reacts to a link edge exactly
//! once (pause on disconnect, resume or restart on connect). The level layer
//! looks only at the current computed [`PlaybackState`] and handles timeouts,
//! natural track completion and restarting, so a missed edge heals itself
//! on the next cycle.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PAUSE_TIMEOUT_MS, DEFAULT_PAUSED_VOLUME, DEFAULT_PLAYING_VOLUME};
use crate::link::{ContactState, LinkEdge};

/// Audio output capability: one track at a time.
pub trait Player {
    /// Start `track`. Returns false if playback could not start.
    fn play(&mut self, track: &str) -> bool;
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    fn set_volume(&mut self, volume: f32);

    /// Whether the audio path is up. The link machine stays uninitialized
    /// until this reports true.
    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    NotStarted,
    Playing,
    Paused,
    PauseTimedOut,
    PauseFinished,
    Finished,
}

/// Which list the current track came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Contact,
    Idle,
}

/// Derive the playback state from the current observations.
pub fn compute_state(
    is_initialized: bool,
    is_paused: bool,
    pause_elapsed_ms: u64,
    pause_timeout_ms: u64,
    is_track_playing: bool,
) -> PlaybackState {
    if !is_initialized {
        PlaybackState::NotStarted
    } else if is_paused {
        if pause_elapsed_ms > pause_timeout_ms {
            PlaybackState::PauseTimedOut
        } else if !is_track_playing {
            PlaybackState::PauseFinished
        } else {
            PlaybackState::Paused
        }
    } else if !is_track_playing {
        PlaybackState::Finished
    } else {
        PlaybackState::Playing
    }
}

/// Linear fade from `playing_volume` to silence over the pause timeout.
pub fn fade_volume(playing_volume: f32, pause_elapsed_ms: u64, pause_timeout_ms: u64) -> f32 {
    let fraction = if pause_timeout_ms == 0 {
        1.0
    } else {
        (pause_elapsed_ms as f64 / pause_timeout_ms as f64).min(1.0)
    };
    playing_volume * (1.0 - fraction) as f32
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub playing_volume: f32,
    /// Floor for the fade while paused.
    pub paused_volume: f32,
    pub pause_timeout_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            playing_volume: DEFAULT_PLAYING_VOLUME,
            paused_volume: DEFAULT_PAUSED_VOLUME,
            pause_timeout_ms: DEFAULT_PAUSE_TIMEOUT_MS,
        }
    }
}

/// Contact tracks played in rotation, plus the idle loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Playlist {
    contact: Vec<String>,
    idle: String,
    cursor: usize,
}

impl Playlist {
    pub fn new(contact: Vec<String>, idle: impl Into<String>) -> Self {
        Self {
            contact,
            idle: idle.into(),
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.contact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contact.is_empty()
    }

    /// Move to the next contact track, wrapping at the end.
    pub fn advance(&mut self) {
        if !self.contact.is_empty() {
            self.cursor = (self.cursor + 1) % self.contact.len();
        }
    }

    /// Track to start for the given link level. Falls back to the idle
    /// track when no contact tracks are configured.
    pub fn select(&self, linked: bool) -> (&str, TrackKind) {
        match self.contact.get(self.cursor) {
            Some(track) if linked => (track, TrackKind::Contact),
            _ => (&self.idle, TrackKind::Idle),
        }
    }
}

/// What one controller step did, for the caller to log.
#[derive(Clone, Debug, PartialEq)]
pub struct StepReport {
    pub state: PlaybackState,
    pub paused: bool,
    pub resumed: bool,
    pub advanced: bool,
    pub started: Option<String>,
    pub failed: Option<String>,
    pub volume: f32,
}

impl StepReport {
    fn new(state: PlaybackState, volume: f32) -> Self {
        Self {
            state,
            paused: false,
            resumed: false,
            advanced: false,
            started: None,
            failed: None,
            volume,
        }
    }
}

pub struct PlaybackController {
    settings: PlaybackSettings,
    playlist: Playlist,
    is_paused: bool,
    pause_started_ms: u64,
    current: Option<TrackKind>,
    volume: f32,
}

impl PlaybackController {
    pub fn new(settings: PlaybackSettings, playlist: Playlist) -> Self {
        let volume = settings.playing_volume;
        Self {
            settings,
            playlist,
            is_paused: false,
            pause_started_ms: 0,
            current: None,
            volume,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn cursor(&self) -> usize {
        self.playlist.cursor()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn current(&self) -> Option<TrackKind> {
        self.current
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    fn pause_elapsed(&self, now_ms: u64) -> u64 {
        if self.is_paused {
            now_ms.saturating_sub(self.pause_started_ms)
        } else {
            0
        }
    }

    pub fn state<P: Player>(&self, player: &P, is_initialized: bool, now_ms: u64) -> PlaybackState {
        compute_state(
            is_initialized,
            self.is_paused,
            self.pause_elapsed(now_ms),
            self.settings.pause_timeout_ms,
            player.is_playing(),
        )
    }

    fn apply_volume<P: Player>(&mut self, player: &mut P, volume: f32) {
        if self.volume != volume {
            player.set_volume(volume);
            self.volume = volume;
        }
    }

    fn paused_volume(&self, now_ms: u64) -> f32 {
        fade_volume(
            self.settings.playing_volume,
            self.pause_elapsed(now_ms),
            self.settings.pause_timeout_ms,
        )
        .max(self.settings.paused_volume)
    }

    /// Run one cycle: edge actions, level actions, then restart if idle.
    pub fn step<P: Player>(&mut self, player: &mut P, contact: &ContactState, now_ms: u64) -> StepReport {
        if !contact.is_initialized {
            return StepReport::new(PlaybackState::NotStarted, self.volume);
        }
        let mut report = StepReport::new(PlaybackState::NotStarted, self.volume);

        match contact.edge() {
            Some(LinkEdge::Disconnected) => {
                if !self.is_paused && player.is_playing() {
                    self.is_paused = true;
                    self.pause_started_ms = now_ms;
                    let volume = self.paused_volume(now_ms);
                    self.apply_volume(player, volume);
                    report.paused = true;
                }
            }
            Some(LinkEdge::Connected) => match self.state(player, true, now_ms) {
                PlaybackState::Paused => {
                    self.is_paused = false;
                    player.set_volume(self.settings.playing_volume);
                    self.volume = self.settings.playing_volume;
                    report.resumed = true;
                }
                PlaybackState::Playing if self.current == Some(TrackKind::Idle) => {
                    player.stop();
                    self.current = None;
                }
                _ => {}
            },
            None => {}
        }

        let state = self.state(player, true, now_ms);
        match state {
            PlaybackState::PauseTimedOut | PlaybackState::PauseFinished => {
                player.stop();
                self.playlist.advance();
                self.is_paused = false;
                self.current = None;
                let volume = self.settings.playing_volume;
                self.apply_volume(player, volume);
                report.advanced = true;
            }
            PlaybackState::Finished => {
                if contact.is_linked && self.current == Some(TrackKind::Contact) {
                    self.playlist.advance();
                    report.advanced = true;
                }
                self.current = None;
            }
            PlaybackState::Paused if !contact.is_linked => {
                let volume = self.paused_volume(now_ms);
                self.apply_volume(player, volume);
            }
            _ => {}
        }
        report.state = state;

        if !player.is_playing() {
            let (track, kind) = self.playlist.select(contact.is_linked);
            let track = track.to_string();
            player.set_volume(self.settings.playing_volume);
            self.volume = self.settings.playing_volume;
            if player.play(&track) {
                self.current = Some(kind);
                report.started = Some(track);
            } else {
                self.current = None;
                report.failed = Some(track);
            }
        }

        report.volume = self.volume;
        report
    }
}
