use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use warden_core::SessionConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus {other:?}")),
        }
    }
}

/// Optional TOML file contents; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub known_dir: Option<PathBuf>,
    pub unknown_dir: Option<PathBuf>,
    pub replay_manifest: Option<PathBuf>,
    pub frame_interval_ms: Option<u64>,
    pub match_tolerance: Option<f32>,
    pub dedup_tolerance: Option<f32>,
    pub cooldown_secs: Option<u64>,
    pub pad_fraction: Option<f32>,
    pub passport_size: Option<u32>,
    pub embedding_dim: Option<usize>,
    pub bus: Option<BusKind>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Daemon configuration.
///
/// Precedence: `WARDEN_*` environment variables, then the TOML file named by
/// `WARDEN_CONFIG`, then built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for enrolled identity images.
    pub known_dir: PathBuf,
    /// Directory for unknown-face crops.
    pub unknown_dir: PathBuf,
    /// JSON-lines frame manifest to replay. No frames are processed without one.
    pub replay_manifest: Option<PathBuf>,
    /// Pacing interval between submitted frames.
    pub frame_interval: Duration,
    pub match_tolerance: f32,
    pub dedup_tolerance: f32,
    pub cooldown: Duration,
    pub pad_fraction: f32,
    /// Side of the square unknown-face crop; 0 keeps the raw crop size.
    pub passport_size: u32,
    pub embedding_dim: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("WARDEN_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                tracing::info!(path = %path.display(), "loading config file");
                FileConfig::read(&path)?
            }
            None => FileConfig::default(),
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Merge a file config with an environment lookup.
    pub fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("warden");

        let config = Self {
            db_path: env_path(&env, "WARDEN_DB_PATH")
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("faces.db")),
            known_dir: env_path(&env, "WARDEN_KNOWN_DIR")
                .or(file.known_dir)
                .unwrap_or_else(|| data_dir.join("known_faces")),
            unknown_dir: env_path(&env, "WARDEN_UNKNOWN_DIR")
                .or(file.unknown_dir)
                .unwrap_or_else(|| data_dir.join("unknown_faces")),
            replay_manifest: env_path(&env, "WARDEN_REPLAY_MANIFEST").or(file.replay_manifest),
            frame_interval: Duration::from_millis(env_parse(
                &env,
                "WARDEN_FRAME_INTERVAL_MS",
                file.frame_interval_ms.unwrap_or(33),
            )),
            match_tolerance: env_parse(&env, "WARDEN_MATCH_TOLERANCE", file.match_tolerance.unwrap_or(0.6)),
            dedup_tolerance: env_parse(&env, "WARDEN_DEDUP_TOLERANCE", file.dedup_tolerance.unwrap_or(0.5)),
            cooldown: Duration::from_secs(env_parse(
                &env,
                "WARDEN_COOLDOWN_SECS",
                file.cooldown_secs.unwrap_or(60),
            )),
            pad_fraction: env_parse(&env, "WARDEN_PAD_FRACTION", file.pad_fraction.unwrap_or(0.2)),
            passport_size: env_parse(&env, "WARDEN_PASSPORT_SIZE", file.passport_size.unwrap_or(300)),
            embedding_dim: env_parse(&env, "WARDEN_EMBEDDING_DIM", file.embedding_dim.unwrap_or(128)),
            bus: env_parse(&env, "WARDEN_BUS", file.bus.unwrap_or(BusKind::Session)),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("match_tolerance", self.match_tolerance),
            ("dedup_tolerance", self.dedup_tolerance),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        if !self.pad_fraction.is_finite() || self.pad_fraction < 0.0 {
            return Err(ConfigError::Invalid {
                key: "pad_fraction",
                reason: format!("must be >= 0, got {}", self.pad_fraction),
            });
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid {
                key: "embedding_dim",
                reason: "must be at least 1".into(),
            });
        }
        if self.frame_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "frame_interval_ms",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            embedding_dim: self.embedding_dim,
            match_tolerance: self.match_tolerance,
            dedup_tolerance: self.dedup_tolerance,
            cooldown: self.cooldown,
            pad_fraction: self.pad_fraction,
            passport_size: self.passport_size,
            known_dir: self.known_dir.clone(),
            unknown_dir: self.unknown_dir.clone(),
        }
    }
}

fn env_path(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<PathBuf> {
    env(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Parse `key` from the environment, keeping `default` when unset or unparseable.
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                default
            }
        },
        None => default,
    }
}
