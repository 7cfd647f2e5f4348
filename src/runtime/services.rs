use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::app::Config;
use crate::bandwidth::{CounterSource, SamplerSettings, SystemSource, TelemetrySampler};
use crate::cache::{CacheStats, CachedQueryRunner, KeyValueStore, MemoryStore, ResultCache};
use crate::sessions::{DiagnosticSessionManager, SessionSettings, SessionStart};
use crate::tools::{check_requirements, missing_requirements, NetworkTools};
use crate::utils::{LookingGlassError, Result};

/// Snapshot of what the service is doing right now
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub enabled: bool,
    pub features: Vec<&'static str>,
    pub sampler_running: bool,
    pub live_sessions: Vec<u16>,
    pub cache: CacheStats,
}

/// What `startup` found
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub missing_tools: Vec<String>,
    pub sampler_started: bool,
}

/// What `shutdown` tore down
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ShutdownReport {
    pub sampler_stopped: bool,
    pub sessions_stopped: usize,
}

/// Process-lifetime owner of the diagnostics core.
///
/// Built once at startup and handed to whatever serves requests; `shutdown`
/// must run before the process exits so no helper process outlives it.
pub struct Services {
    config: Config,
    queries: Arc<CachedQueryRunner>,
    sampler: Arc<TelemetrySampler>,
    sessions: DiagnosticSessionManager,
    tools: NetworkTools,
}

impl Services {
    /// Wire the core against the host: in-memory cache store, OS counters,
    /// real iperf3 processes.
    pub fn new(config: Config) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let source: Arc<dyn CounterSource> = Arc::new(SystemSource::new());
        let sessions =
            DiagnosticSessionManager::with_system(SessionSettings::from(&config.network_tools));
        Self::from_parts(config, store, source, sessions)
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn CounterSource>,
        sessions: DiagnosticSessionManager,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(store, &config.cache));
        let queries = Arc::new(CachedQueryRunner::new(cache, config.cache.on_unavailable));
        let sampler = Arc::new(TelemetrySampler::new(
            source,
            SamplerSettings::from(&config.bandwidth),
        ));
        let tools = NetworkTools::new(config.network_tools.clone());

        Self {
            config,
            queries,
            sampler,
            sessions,
            tools,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queries(&self) -> &Arc<CachedQueryRunner> {
        &self.queries
    }

    pub fn sampler(&self) -> &Arc<TelemetrySampler> {
        &self.sampler
    }

    pub fn sessions(&self) -> &DiagnosticSessionManager {
        &self.sessions
    }

    pub fn tools(&self) -> &NetworkTools {
        &self.tools
    }

    fn bandwidth_enabled(&self) -> bool {
        self.config.enabled && self.config.bandwidth.enabled
    }

    fn iperf3_enabled(&self) -> bool {
        let tools = &self.config.network_tools;
        self.config.enabled && tools.enabled && tools.iperf3_enabled
    }

    /// Validate configuration, report missing tools and start the sampler
    pub async fn startup(&self) -> Result<StartupReport> {
        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(LookingGlassError::Config(errors.join("; ")));
        }

        let mut report = StartupReport::default();
        if !self.config.enabled {
            info!("Diagnostics disabled by configuration");
            return Ok(report);
        }

        info!(features = ?self.config.enabled_features(), "Starting diagnostics services");

        if self.config.network_tools.enabled {
            let statuses = check_requirements(&self.config.network_tools.iperf3_binary);
            report.missing_tools = missing_requirements(&statuses)
                .into_iter()
                .map(str::to_string)
                .collect();
            if !report.missing_tools.is_empty() {
                warn!(missing = ?report.missing_tools, "Some network tools are not installed");
            }
        }

        if self.bandwidth_enabled() && self.config.bandwidth.auto_start {
            report.sampler_started = self.sampler.start().await;
        }

        Ok(report)
    }

    /// Stop the sampler and every live session
    pub async fn shutdown(&self) -> ShutdownReport {
        let (sampler_stopped, sessions_stopped) =
            tokio::join!(self.sampler.stop(), self.sessions.shutdown());

        info!(sampler_stopped, sessions_stopped, "Diagnostics services shut down");
        ShutdownReport {
            sampler_stopped,
            sessions_stopped,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            enabled: self.config.enabled,
            features: self.config.enabled_features(),
            sampler_running: self.sampler.is_running(),
            live_sessions: self.sessions.live_ports(),
            cache: self.queries.cache().stats(),
        }
    }

    /// Start an iperf3 session if the feature is switched on
    pub async fn start_session(&self, duration: Option<Duration>) -> Result<SessionStart> {
        if !self.iperf3_enabled() {
            return Err(LookingGlassError::InvalidRequest(
                "iperf3 sessions are disabled".to_string(),
            ));
        }
        self.sessions.start(duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use crate::bandwidth::{InterfaceCounters, InterfaceInfo};
    use crate::sessions::{PortProbe, ProcessLauncher};

    struct QuietSource;

    #[async_trait]
    impl CounterSource for QuietSource {
        async fn read_all_interface_counters(&self) -> Result<HashMap<String, InterfaceCounters>> {
            Ok(HashMap::from([(
                "eth0".to_string(),
                InterfaceCounters::default(),
            )]))
        }

        async fn read_interface_addresses_and_link_state(&self) -> Result<Vec<InterfaceInfo>> {
            Ok(vec![InterfaceInfo::new("eth0")])
        }
    }

    struct NoSpawn;

    #[async_trait]
    impl ProcessLauncher for NoSpawn {
        async fn spawn(
            &self,
            _argv: &[String],
        ) -> std::io::Result<Box<dyn crate::sessions::HelperProcess>> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no iperf3"))
        }
    }

    struct FreeProbe;

    #[async_trait]
    impl PortProbe for FreeProbe {
        async fn try_bind(&self, _port: u16) -> bool {
            true
        }
    }

    fn services(config: Config) -> Services {
        let sessions = DiagnosticSessionManager::new(
            SessionSettings::from(&config.network_tools),
            Arc::new(NoSpawn),
            Arc::new(FreeProbe),
        );
        Services::from_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(QuietSource),
            sessions,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_and_shutdown() {
        let services = services(Config::default());

        let report = services.startup().await.unwrap();
        assert!(report.sampler_started);

        let status = services.status();
        assert!(status.sampler_running);
        assert!(status.live_sessions.is_empty());
        assert_eq!(status.features, vec!["Network Tools", "Bandwidth Monitor"]);

        let shutdown = services.shutdown().await;
        assert!(shutdown.sampler_stopped);
        assert_eq!(shutdown.sessions_stopped, 0);
        assert!(!services.status().sampler_running);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_startup() {
        let mut config = Config::default();
        config.network_tools.iperf3_port_range = (31000, 30000);

        let err = services(config).startup().await.unwrap_err();
        assert!(matches!(err, LookingGlassError::Config(_)));
    }

    #[tokio::test]
    async fn test_disabled_service_starts_nothing() {
        let config = Config {
            enabled: false,
            ..Default::default()
        };
        let services = services(config);

        let report = services.startup().await.unwrap();
        assert!(!report.sampler_started);
        assert!(!services.sampler().is_running());

        let err = services.start_session(None).await.unwrap_err();
        assert!(matches!(err, LookingGlassError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_session_spawn_failure_surfaces() {
        let services = services(Config::default());
        let err = services.start_session(None).await.unwrap_err();
        assert!(matches!(err, LookingGlassError::SpawnFailed { .. }));
        assert!(services.status().live_sessions.is_empty());
    }
}
