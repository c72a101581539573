use std::path::PathBuf;
use std::str::FromStr;

use crate::model::Ms;

/// Server settings, read from `VIEWSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Slot length when a request gives only a start.
    pub default_duration_ms: Ms,
    pub sweep_interval_secs: u64,
    /// Optional JSON file of listings and verification records to load at start.
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7411,
            data_dir: PathBuf::from("./data"),
            password: "viewslot".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            default_duration_ms: 30 * 60_000,
            sweep_interval_secs: 30,
            seed_file: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("VIEWSLOT_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "VIEWSLOT_PORT").unwrap_or(defaults.port),
            data_dir: lookup("VIEWSLOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("VIEWSLOT_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "VIEWSLOT_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "VIEWSLOT_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "VIEWSLOT_METRICS_PORT"),
            default_duration_ms: parse_var(&lookup, "VIEWSLOT_DEFAULT_DURATION_MS")
                .filter(|d: &Ms| *d > 0)
                .unwrap_or(defaults.default_duration_ms),
            sweep_interval_secs: parse_var(&lookup, "VIEWSLOT_SWEEP_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            seed_file: lookup("VIEWSLOT_SEED_FILE").map(PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
