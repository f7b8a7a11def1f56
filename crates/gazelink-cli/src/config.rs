//! Configuration vault – reads/writes `~/.gazelink/config.toml`.
//!
//! ```toml
//! watch_interval_ms = 1000
//!
//! [listener]
//! host = "192.168.1.40"
//! port = 9090
//! gaze_topic = "/ar/gaze_target"
//! pose_topic = "/ar/object_poses"
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use gazelink_middleware::ListenerConfig;
use gazelink_types::SpatialError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_watch_interval_ms() -> u64 {
    1_000
}

/// Persisted operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Period of the `/watch` context feed.
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,

    /// Bridge endpoint, topics and gaze windows.
    #[serde(default)]
    pub listener: ListenerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_interval_ms: default_watch_interval_ms(),
            listener: ListenerConfig::default(),
        }
    }
}

/// Path to `~/.gazelink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".gazelink").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  `Ok(None)`
/// if the file does not exist yet.
pub fn load() -> Result<Option<Config>, SpatialError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, SpatialError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| SpatialError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| SpatialError::Config(format!("cannot parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `GAZELINK_*` environment overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `GAZELINK_HOST` | `listener.host` |
/// | `GAZELINK_PORT` | `listener.port` |
/// | `GAZELINK_GAZE_TOPIC` | `listener.gaze_topic` |
/// | `GAZELINK_POSE_TOPIC` | `listener.pose_topic` |
/// | `GAZELINK_CONNECT_TIMEOUT_MS` | `listener.connect_timeout_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    let listener = &mut cfg.listener;
    if let Ok(v) = std::env::var("GAZELINK_HOST") {
        listener.host = v;
    }
    if let Ok(v) = std::env::var("GAZELINK_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        listener.port = port;
    }
    if let Ok(v) = std::env::var("GAZELINK_GAZE_TOPIC") {
        listener.gaze_topic = v;
    }
    if let Ok(v) = std::env::var("GAZELINK_POSE_TOPIC") {
        listener.pose_topic = v;
    }
    if let Ok(v) = std::env::var("GAZELINK_CONNECT_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        listener.connect_timeout_ms = ms;
    }
}

/// Save the config, creating `~/.gazelink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), SpatialError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), SpatialError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SpatialError::Config(format!("cannot create {}: {e}", parent.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| SpatialError::Config(format!("cannot restrict {}: {e}", parent.display())))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| SpatialError::Config(format!("cannot serialise: {e}")))?;
    let write_err = |e: std::io::Error| SpatialError::Config(format!("cannot write {}: {e}", path.display()));

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
