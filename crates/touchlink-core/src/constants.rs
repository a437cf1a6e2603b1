/// Detector slots per node. Five statues means at most four remote peers.
pub const MAX_PEERS: usize = 4;

/// Lowest detection threshold accepted from config sync.
pub const THRESHOLD_MIN: f32 = 0.001;

/// Highest detection threshold accepted from config sync.
pub const THRESHOLD_MAX: f32 = 1.0;

/// Threshold bounds as received on the wire. Config values are checked
/// against these before narrowing to `f32`.
pub const THRESHOLD_MIN_F64: f64 = 0.001;
pub const THRESHOLD_MAX_F64: f64 = 1.0;

/// Compiled detection threshold used before any config arrives.
pub const DEFAULT_THRESHOLD: f32 = 0.01;

/// Sample rate the tone detectors analyze at (Hz).
pub const DETECTOR_SAMPLE_RATE_HZ: u32 = 44_100;

/// Sampling/evaluation loop period (ms).
pub const DEFAULT_SAMPLE_PERIOD_MS: u64 = 50;

/// How long a paused track may fade before the playlist advances (ms).
pub const DEFAULT_PAUSE_TIMEOUT_MS: u64 = 2_000;

/// Output volume while a track plays normally.
pub const DEFAULT_PLAYING_VOLUME: f32 = 0.5;

/// Floor the fade never drops below while paused.
pub const DEFAULT_PAUSED_VOLUME: f32 = 0.05;

/// Generator amplitude when the local tone is switched on.
pub const DEFAULT_TONE_AMPLITUDE: f32 = 0.5;

/// Interval between config requests (s).
pub const CONFIG_REFRESH_SECS: u64 = 60;

/// How long a config request waits for a matching response (s).
pub const CONFIG_WINDOW_SECS: u64 = 5;
