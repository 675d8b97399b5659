use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read once from `HALLBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    /// Prometheus exporter port; disabled when unset.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5480,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "hallbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_var(&lookup, "HALLBOOK_PORT").unwrap_or(defaults.port),
            bind: lookup("HALLBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("HALLBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("HALLBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "HALLBOOK_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "HALLBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "HALLBOOK_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
