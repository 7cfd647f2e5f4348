use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master switch for every diagnostics feature
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Query result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Bandwidth monitoring configuration
    #[serde(default)]
    pub bandwidth: BandwidthConfig,

    /// Network tools configuration (ping, traceroute, iperf3)
    #[serde(default)]
    pub network_tools: NetworkToolsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: CacheConfig::default(),
            bandwidth: BandwidthConfig::default(),
            network_tools: NetworkToolsConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// What to do with a query when the cache store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFailurePolicy {
    /// Execute the query live and skip caching
    Bypass,
    /// Fail the request with `CacheUnavailable`
    Fail,
}

/// Query result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Sliding expiration in seconds
    pub timeout_secs: u64,
    /// Namespace prepended to every digest
    pub key_prefix: String,
    /// Behaviour when the store is unreachable
    pub on_unavailable: CacheFailurePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_CACHE_TIMEOUT_SECS,
            key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            on_unavailable: CacheFailurePolicy::Bypass,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bandwidth monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub enabled: bool,
    /// Start the sampler when the service starts
    pub auto_start: bool,
    /// Seconds between samples
    pub update_interval: u64,
    /// Samples retained per interface
    pub history_length: usize,
    /// Samples handed out per interface in a snapshot
    pub exposed_history: usize,
    /// Interface name prefixes that are never sampled
    pub excluded_interfaces: Vec<String>,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_start: true,
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
            history_length: DEFAULT_HISTORY_LENGTH,
            exposed_history: DEFAULT_EXPOSED_HISTORY,
            excluded_interfaces: DEFAULT_EXCLUDED_INTERFACES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl BandwidthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }
}

/// Network tools configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkToolsConfig {
    pub enabled: bool,
    pub ping_enabled: bool,
    pub traceroute_enabled: bool,
    pub iperf3_enabled: bool,
    /// Helper binary spawned for each diagnostic session
    pub iperf3_binary: String,
    /// Inclusive port range sessions are allocated from
    pub iperf3_port_range: (u16, u16),
    /// Random draws before giving up on allocation
    pub port_attempts: u32,
    /// Grace period between SIGTERM and SIGKILL
    pub stop_timeout_secs: u64,
    /// Lifetime of a session when the caller does not pass one
    pub default_session_duration: u64,
    pub max_ping_count: u32,
    pub max_traceroute_hops: u32,
    pub ping_timeout: u64,
    pub traceroute_timeout: u64,
}

impl Default for NetworkToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ping_enabled: true,
            traceroute_enabled: true,
            iperf3_enabled: true,
            iperf3_binary: DEFAULT_IPERF3_BINARY.to_string(),
            iperf3_port_range: DEFAULT_PORT_RANGE,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            default_session_duration: DEFAULT_SESSION_DURATION_SECS,
            max_ping_count: DEFAULT_MAX_PING_COUNT,
            max_traceroute_hops: DEFAULT_MAX_TRACEROUTE_HOPS,
            ping_timeout: DEFAULT_PING_TIMEOUT_SECS,
            traceroute_timeout: DEFAULT_TRACEROUTE_TIMEOUT_SECS,
        }
    }
}

impl NetworkToolsConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.default_session_duration)
    }
}

impl Config {
    /// Collect every configuration problem. An empty list means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if self.cache.timeout_secs == 0 {
            errors.push("Cache timeout must be at least 1 second".to_string());
        }
        if self.cache.key_prefix.trim().is_empty() {
            errors.push("Cache key prefix must not be empty".to_string());
        }

        let bw = &self.bandwidth;
        if bw.enabled {
            if !(1..=60).contains(&bw.update_interval) {
                errors.push("Update interval must be between 1 and 60 seconds".to_string());
            }
            if !(10..=3600).contains(&bw.history_length) {
                errors.push("History length must be between 10 and 3600 samples".to_string());
            }
            if bw.exposed_history == 0 || bw.exposed_history > bw.history_length {
                errors.push(format!(
                    "Exposed history must be between 1 and the history length ({})",
                    bw.history_length
                ));
            }
        }

        let tools = &self.network_tools;
        if tools.enabled {
            let (start, end) = tools.iperf3_port_range;
            if start >= end {
                errors.push("iPerf3 start port must be less than end port".to_string());
            }
            if start < MIN_UNPRIVILEGED_PORT {
                errors.push("iPerf3 ports must be between 1024 and 65535".to_string());
            }
            if tools.port_attempts == 0 {
                errors.push("Port allocation attempts must be at least 1".to_string());
            }
            if tools.iperf3_binary.trim().is_empty() {
                errors.push("iPerf3 binary must not be empty".to_string());
            }
            if !(1..=100).contains(&tools.max_ping_count) {
                errors.push("Max ping count must be between 1 and 100".to_string());
            }
            if !(1..=255).contains(&tools.max_traceroute_hops) {
                errors.push("Max traceroute hops must be between 1 and 255".to_string());
            }
            if !(5..=120).contains(&tools.ping_timeout) {
                errors.push("Ping timeout must be between 5 and 120 seconds".to_string());
            }
            if !(10..=300).contains(&tools.traceroute_timeout) {
                errors.push("Traceroute timeout must be between 10 and 300 seconds".to_string());
            }
        }

        errors
    }

    /// Names of the features that are switched on
    pub fn enabled_features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if !self.enabled {
            return features;
        }
        if self.network_tools.enabled {
            features.push("Network Tools");
        }
        if self.bandwidth.enabled {
            features.push("Bandwidth Monitor");
        }
        features
    }
}

/// Load configuration from multiple sources
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    // Add global config if it exists
    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.toml");
        if global_config.exists() {
            figment = figment.merge(Toml::file(&global_config));
        }
    }

    // Add local config if it exists
    let local_config = PathBuf::from("lookingglass.toml");
    if local_config.exists() {
        figment = figment.merge(Toml::file(&local_config));
    }

    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    // Add environment variables (LOOKINGGLASS_ prefix, nested with __)
    figment = figment.merge(Env::prefixed("LOOKINGGLASS_").split("__"));

    figment
        .extract()
        .context("Failed to load configuration")
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "lookingglass") {
        Ok(proj_dirs.config_dir().to_path_buf())
    } else {
        // Fallback to home directory
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        Ok(PathBuf::from(home).join(".config").join("lookingglass"))
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let path = if let Some(p) = path {
        p
    } else {
        get_config_dir()?.join("config.toml")
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

/// Create a default configuration file if it doesn't exist
pub fn init_config() -> Result<PathBuf> {
    let config_file = get_config_dir()?.join("config.toml");

    if !config_file.exists() {
        save_config(&Config::default(), Some(config_file.clone()))?;
        tracing::info!(path = %config_file.display(), "Created default configuration");
    }

    Ok(config_file)
}
