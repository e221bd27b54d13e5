use std::path::PathBuf;
use std::str::FromStr;

/// How booking attempts are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// One lock per calendar date. Disjoint stays commit in parallel.
    PerDate,
    /// One process-wide lock for every date.
    Global,
}

impl FromStr for LockMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per-date" | "per_date" | "perdate" => Ok(LockMode::PerDate),
            "global" => Ok(LockMode::Global),
            _ => Err(ConfigError::Invalid {
                var: "CAMPSITE_LOCK_MODE",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::PerDate => f.write_str("per-date"),
            LockMode::Global => f.write_str("global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub lock_mode: LockMode,
    /// Directory of per-date lock files, shared between instances. `None`
    /// keeps the lock table in memory.
    pub lock_dir: Option<PathBuf>,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7070,
            data_dir: PathBuf::from("./data"),
            lock_mode: LockMode::PerDate,
            lock_dir: None,
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let lock_mode = match lookup("CAMPSITE_LOCK_MODE") {
            Some(s) => s.parse()?,
            None => defaults.lock_mode,
        };
        let metrics_port = match lookup("CAMPSITE_METRICS_PORT") {
            Some(s) => Some(parse_var("CAMPSITE_METRICS_PORT", &s)?),
            None => None,
        };

        let config = Config {
            bind: lookup("CAMPSITE_BIND").unwrap_or(defaults.bind),
            port: parse_or(&lookup, "CAMPSITE_PORT", defaults.port)?,
            data_dir: lookup("CAMPSITE_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            lock_mode,
            lock_dir: lookup("CAMPSITE_LOCK_DIR").map(PathBuf::from),
            max_connections: parse_or(&lookup, "CAMPSITE_MAX_CONNECTIONS", defaults.max_connections)?,
            compact_threshold: parse_or(
                &lookup,
                "CAMPSITE_COMPACT_THRESHOLD",
                defaults.compact_threshold,
            )?,
            metrics_port,
        };

        if config.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "CAMPSITE_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        if config.lock_dir.is_some() && config.lock_mode == LockMode::Global {
            return Err(ConfigError::Conflicting(
                "CAMPSITE_LOCK_DIR requires CAMPSITE_LOCK_MODE=per-date",
            ));
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(s) => parse_var(var, &s),
        None => Ok(default),
    }
}

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Conflicting(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid {var}: {value:?}"),
            ConfigError::Conflicting(msg) => write!(f, "conflicting settings: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
