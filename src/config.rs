use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{BufferPolicy, EngineConfig};
use crate::limits::CLEANING_BUFFER_MS;

/// Runtime settings, read from `BANYA_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// JSON catalog seed. Without one the catalog starts empty.
    pub catalog_path: Option<PathBuf>,
    pub buffer_policy: BufferPolicy,
    pub lock_timeout: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            catalog_path: None,
            buffer_policy: BufferPolicy::Symmetric,
            lock_timeout: Duration::from_secs(5),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their default;
    /// set but unparsable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let buffer_policy = match var("BANYA_BUFFER_POLICY") {
            Some(v) => v.parse()?,
            None => defaults.buffer_policy,
        };
        let lock_timeout = match var("BANYA_LOCK_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_num("BANYA_LOCK_TIMEOUT_MS", &v)?),
            None => defaults.lock_timeout,
        };
        let compact_threshold = match var("BANYA_COMPACT_THRESHOLD") {
            Some(v) => parse_num("BANYA_COMPACT_THRESHOLD", &v)?,
            None => defaults.compact_threshold,
        };
        let metrics_port = match var("BANYA_METRICS_PORT") {
            Some(v) => Some(parse_num("BANYA_METRICS_PORT", &v)?),
            None => None,
        };

        Ok(Self {
            data_dir: var("BANYA_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            catalog_path: var("BANYA_CATALOG").map(PathBuf::from),
            buffer_policy,
            lock_timeout,
            compact_threshold,
            metrics_port,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_ms: CLEANING_BUFFER_MS,
            buffer_policy: self.buffer_policy,
            lock_timeout: self.lock_timeout,
            compact_threshold: self.compact_threshold,
        }
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{key}: cannot parse {value:?}"))
}
