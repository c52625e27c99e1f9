//! Agent configuration: JSON file under the XDG config dir, then `SENTINEL_*` env overrides.
//! Stored at $XDG_CONFIG_HOME/sentinel_agent/config.json
//! (fallback ~/.config/sentinel_agent/config.json).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub port: u16,
    pub enable_ssl: bool,
    /// When set, `/ws` and `POST /api/samples` require `?token=`.
    pub auth_token: Option<String>,
    pub log_level: String,
    pub storage: StorageConfig,
    pub sampling: SamplingConfig,
    pub classifier: ClassifierConfig,
    pub broadcast: BroadcastConfig,
    pub query: QueryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            enable_ssl: false,
            auth_token: None,
            log_level: "info".into(),
            storage: StorageConfig::default(),
            sampling: SamplingConfig::default(),
            classifier: ClassifierConfig::default(),
            broadcast: BroadcastConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("data/sentinel.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub enabled: bool,
    pub process_interval_ms: u64,
    pub connection_interval_ms: u64,
    pub stats_interval_ms: u64,
    /// Keep only the busiest N processes per tick (all when unset).
    pub process_top_k: Option<usize>,
    /// Emit only connections not seen on the previous scan.
    pub connections_only_new: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_interval_ms: 5_000,
            connection_interval_ms: 5_000,
            stats_interval_ms: 10_000,
            process_top_k: None,
            connections_only_new: true,
        }
    }
}

impl SamplingConfig {
    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }
    pub fn connection_interval(&self) -> Duration {
        Duration::from_millis(self.connection_interval_ms)
    }
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

/// Alert thresholds. Every trigger in the classifier reads from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub high_cpu_pct: f64,
    pub high_memory_kb: u64,
    pub cpu_spike_delta: f64,
    pub memory_spike_delta: f64,
    pub overload_load_per_core: f64,
    /// Logical cores used for the overload threshold; detected when unset.
    pub core_count: Option<usize>,
    pub suspicious_ports: BTreeSet<u16>,
    /// Known process names. UNKNOWN_PROCESS is only raised when a list is configured.
    pub process_allowlist: Option<Vec<String>>,
    /// One name per line, `#` comments allowed. Merged into `process_allowlist`.
    pub allowlist_file: Option<PathBuf>,
}

pub const DEFAULT_SUSPICIOUS_PORTS: [u16; 14] = [
    1234, 1337, 4444, 5555, 6666, 6667, 6668, 6669, 7777, 8888, 9999, 12345, 31337, 54321,
];

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            high_cpu_pct: 80.0,
            high_memory_kb: 1024 * 1024,
            cpu_spike_delta: 30.0,
            memory_spike_delta: 30.0,
            overload_load_per_core: 2.0,
            core_count: None,
            suspicious_ports: DEFAULT_SUSPICIOUS_PORTS.into_iter().collect(),
            process_allowlist: None,
            allowlist_file: None,
        }
    }
}

impl ClassifierConfig {
    pub fn effective_core_count(&self) -> usize {
        self.core_count
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }

    /// Inline allow-list plus the allow-list file, if either is configured.
    pub fn load_allowlist(&self) -> Result<Option<BTreeSet<String>>> {
        let mut names: Option<BTreeSet<String>> = self
            .process_allowlist
            .as_ref()
            .map(|v| v.iter().map(|s| s.trim().to_string()).collect());
        if let Some(path) = &self.allowlist_file {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading allow-list {}", path.display()))?;
            names
                .get_or_insert_with(BTreeSet::new)
                .extend(parse_allowlist(&raw));
        }
        Ok(names)
    }
}

pub fn parse_allowlist(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Events queued per subscriber before it is dropped.
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub timeout_ms: u64,
    pub max_limit: usize,
    pub active_window_secs: u64,
    pub alert_window_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_limit: 10_000,
            active_window_secs: 60,
            alert_window_secs: 3_600,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("sentinel_agent")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sentinel_agent")
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

impl AgentConfig {
    /// Reads `path` if given (must exist), else the default path if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = default_config_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|k| std::env::var(k).ok());
    }

    /// Env overrides; unparsable values are ignored, like the rest of the `SENTINEL_*` toggles.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(port) = get("SENTINEL_AGENT_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(token) = get("SENTINEL_AGENT_TOKEN") {
            self.auth_token = (!token.is_empty()).then_some(token);
        }
        if let Some(v) = get("SENTINEL_ENABLE_SSL") {
            self.enable_ssl = v != "0";
        }
        match get("SENTINEL_AGENT_STORAGE").as_deref() {
            Some("memory") => self.storage.backend = StorageBackend::Memory,
            Some("sqlite") => self.storage.backend = StorageBackend::Sqlite,
            _ => {}
        }
        if let Some(db) = get("SENTINEL_AGENT_DB").filter(|v| !v.is_empty()) {
            self.storage.path = PathBuf::from(db);
        }
        if let Some(level) = get("SENTINEL_AGENT_LOG").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
        if let Some(v) = get("SENTINEL_AGENT_SAMPLING") {
            self.sampling.enabled = v != "0";
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.sampling;
        if s.process_interval_ms == 0 || s.connection_interval_ms == 0 || s.stats_interval_ms == 0 {
            bail!("sampling intervals must be positive");
        }
        if s.process_top_k == Some(0) {
            bail!("sampling.process_top_k must be positive when set");
        }
        if self.broadcast.subscriber_buffer == 0 {
            bail!("broadcast.subscriber_buffer must be positive");
        }
        let q = &self.query;
        if q.timeout_ms == 0 || q.max_limit == 0 {
            bail!("query.timeout_ms and query.max_limit must be positive");
        }
        if q.active_window_secs == 0 || q.alert_window_secs == 0 {
            bail!("query windows must be positive");
        }
        let c = &self.classifier;
        for (name, v) in [
            ("high_cpu_pct", c.high_cpu_pct),
            ("cpu_spike_delta", c.cpu_spike_delta),
            ("memory_spike_delta", c.memory_spike_delta),
            ("overload_load_per_core", c.overload_load_per_core),
        ] {
            if !v.is_finite() || v < 0.0 {
                bail!("classifier.{name} must be a non-negative number");
            }
        }
        if c.core_count == Some(0) {
            bail!("classifier.core_count must be positive when set");
        }
        Ok(())
    }
}
