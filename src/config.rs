//! Application-level configuration loading, including gameplay tunables and the admin secret.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/arena.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ARENA_SYNC_CONFIG_PATH";
/// Environment variable holding the shared admin secret.
const ADMIN_PASSWORD_ENV: &str = "ARENA_ADMIN_PASSWORD";

/// Plausibility limits applied to movement updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementRules {
    /// Maximum distance a player may travel during one frame.
    pub max_speed: f64,
    /// Duration of one client frame in milliseconds.
    pub frame_ms: f64,
    /// Multiplier absorbing network jitter on top of the nominal speed.
    pub speed_tolerance: f64,
    /// Jumps longer than this are accepted as respawns or level changes.
    pub teleport_threshold: f64,
}

impl Default for MovementRules {
    fn default() -> Self {
        Self {
            max_speed: 12.0,
            frame_ms: 1000.0 / 60.0,
            speed_tolerance: 1.5,
            teleport_threshold: 500.0,
        }
    }
}

/// Limits applied to names and chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRules {
    /// Maximum number of characters kept from a display name.
    pub max_name_len: usize,
    /// Maximum number of characters kept from a chat message.
    pub max_chat_len: usize,
    /// Compare display names ignoring ASCII case.
    pub case_insensitive_names: bool,
}

impl Default for AdmissionRules {
    fn default() -> Self {
        Self {
            max_name_len: 15,
            max_chat_len: 140,
            case_insensitive_names: true,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Snapshot broadcasts per second.
    pub tick_rate_hz: u32,
    /// Sessions silent for longer than this are pruned by the broadcaster.
    pub stale_timeout: Duration,
    /// Interval between WebSocket ping probes.
    pub heartbeat_interval: Duration,
    /// Connections silent for longer than this are closed.
    pub heartbeat_timeout: Duration,
    /// Capacity of the chat/event log.
    pub event_log_capacity: usize,
    /// Whether exactly one session must carry the tagged role.
    pub role_policy_enabled: bool,
    /// Position assigned to freshly joined sessions.
    pub spawn: (f64, f64),
    /// Name and chat limits.
    pub admission: AdmissionRules,
    /// Anti-cheat limits.
    pub movement: MovementRules,
    /// Initial map layout, one string per tile row.
    pub map: Vec<String>,
    /// Maximum accepted number of map rows.
    pub max_map_rows: usize,
    /// Maximum accepted length of a map row.
    pub max_map_cols: usize,
    /// Shared secret required for admin map updates; `None` disables them.
    pub admin_password: Option<String>,
    /// Palette for server-assigned colors; empty means random hues.
    pub colors: Vec<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded arena config");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    /// Apply environment overrides on top of the file configuration.
    fn with_env_overrides(mut self) -> Self {
        if let Some(password) = env::var(ADMIN_PASSWORD_ENV)
            .ok()
            .filter(|value| !value.is_empty())
        {
            self.admin_password = Some(password);
        }
        if self.admin_password.is_none() {
            warn!("no admin password configured; admin map updates are disabled");
        }
        self
    }

    /// Period between two snapshot broadcasts.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }

    /// Pick a color for a new connection.
    ///
    /// Uses the configured palette when present, otherwise a random fully saturated hue.
    pub fn pick_color<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        if self.colors.is_empty() {
            let hue: u16 = rng.random_range(0..360);
            return format!("hsl({hue}, 100%, 50%)");
        }
        let index = rng.random_range(0..self.colors.len());
        self.colors[index].clone()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            stale_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            event_log_capacity: 50,
            role_policy_enabled: true,
            spawn: (50.0, 50.0),
            admission: AdmissionRules::default(),
            movement: MovementRules::default(),
            map: default_map(),
            max_map_rows: 64,
            max_map_cols: 256,
            admin_password: None,
            colors: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    tick_rate_hz: Option<u32>,
    stale_timeout_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_ms: Option<u64>,
    event_log_capacity: Option<usize>,
    role_policy_enabled: Option<bool>,
    spawn: Option<RawPoint>,
    max_name_len: Option<usize>,
    max_chat_len: Option<usize>,
    case_insensitive_names: Option<bool>,
    max_speed: Option<f64>,
    frame_ms: Option<f64>,
    speed_tolerance: Option<f64>,
    teleport_threshold: Option<f64>,
    map: Option<Vec<String>>,
    max_map_rows: Option<usize>,
    max_map_cols: Option<usize>,
    admin_password: Option<String>,
    colors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    x: f64,
    y: f64,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let admission = AdmissionRules {
            max_name_len: raw
                .max_name_len
                .unwrap_or(defaults.admission.max_name_len)
                .max(1),
            max_chat_len: raw
                .max_chat_len
                .unwrap_or(defaults.admission.max_chat_len)
                .max(1),
            case_insensitive_names: raw
                .case_insensitive_names
                .unwrap_or(defaults.admission.case_insensitive_names),
        };
        let movement = MovementRules {
            max_speed: raw.max_speed.unwrap_or(defaults.movement.max_speed),
            frame_ms: raw
                .frame_ms
                .filter(|ms| *ms > 0.0)
                .unwrap_or(defaults.movement.frame_ms),
            speed_tolerance: raw
                .speed_tolerance
                .unwrap_or(defaults.movement.speed_tolerance),
            teleport_threshold: raw
                .teleport_threshold
                .unwrap_or(defaults.movement.teleport_threshold),
        };

        Self {
            tick_rate_hz: raw.tick_rate_hz.unwrap_or(defaults.tick_rate_hz).max(1),
            stale_timeout: raw
                .stale_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stale_timeout),
            heartbeat_interval: raw
                .heartbeat_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            heartbeat_timeout: raw
                .heartbeat_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_timeout),
            event_log_capacity: raw
                .event_log_capacity
                .unwrap_or(defaults.event_log_capacity)
                .max(1),
            role_policy_enabled: raw
                .role_policy_enabled
                .unwrap_or(defaults.role_policy_enabled),
            spawn: raw
                .spawn
                .map(|point| (point.x, point.y))
                .unwrap_or(defaults.spawn),
            admission,
            movement,
            map: raw.map.unwrap_or(defaults.map),
            max_map_rows: raw.max_map_rows.unwrap_or(defaults.max_map_rows),
            max_map_cols: raw.max_map_cols.unwrap_or(defaults.max_map_cols),
            admin_password: raw.admin_password.filter(|value| !value.is_empty()),
            colors: raw.colors.unwrap_or_default(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in layout shipped with the binary.
fn default_map() -> Vec<String> {
    [
        "####################",
        "#..................#",
        "#..####......####..#",
        "#..................#",
        "#......######......#",
        "#..................#",
        "#..####......####..#",
        "#..................#",
        "####################",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
