use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::history::InterfaceHistory;
use super::source::CounterSource;
use super::types::{
    CurrentRates, InterfaceCounters, InterfaceInfo, InterfaceSample, InterfaceSnapshot,
    SamplerState, TelemetrySnapshot,
};
use crate::app::BandwidthConfig;
use crate::utils::Result;

/// Tunables for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub capacity: usize,
    pub exposed: usize,
    pub excluded_prefixes: Vec<String>,
}

impl From<&BandwidthConfig> for SamplerSettings {
    fn from(config: &BandwidthConfig) -> Self {
        Self {
            interval: config.interval(),
            capacity: config.history_length,
            exposed: config.exposed_history,
            excluded_prefixes: config.excluded_interfaces.clone(),
        }
    }
}

impl SamplerSettings {
    pub fn is_excluded(&self, interface: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| interface.starts_with(prefix.as_str()))
    }
}

/// Rate of change between two counter readings, zero when no time has passed
fn rate(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        // A counter that went backwards was reset; report no traffic
        current.saturating_sub(previous) as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// Per-interface histories. Lives inside the sampling task while it runs.
pub struct SamplerCore {
    settings: SamplerSettings,
    histories: HashMap<String, InterfaceHistory>,
}

impl SamplerCore {
    pub fn new(settings: SamplerSettings) -> Self {
        Self {
            settings,
            histories: HashMap::new(),
        }
    }

    /// Fold one tick's counters into the histories.
    ///
    /// Interfaces missing from the tick have gone away, so their histories
    /// are dropped.
    pub fn record(
        &mut self,
        counters: HashMap<String, InterfaceCounters>,
        at: Instant,
        timestamp: DateTime<Utc>,
    ) {
        self.histories.retain(|interface, _| {
            let present = counters.contains_key(interface);
            if !present {
                debug!(interface = %interface, "Interface disappeared, dropping history");
            }
            present
        });

        for (interface, current) in counters {
            if self.settings.is_excluded(&interface) {
                continue;
            }

            let capacity = self.settings.capacity;
            let history = self
                .histories
                .entry(interface.clone())
                .or_insert_with(|| InterfaceHistory::with_capacity(capacity));

            let mut sample = InterfaceSample {
                interface_name: interface,
                at,
                timestamp,
                bytes_sent: current.bytes_sent,
                bytes_recv: current.bytes_recv,
                packets_sent: current.packets_sent,
                packets_recv: current.packets_recv,
                send_rate: 0.0,
                recv_rate: 0.0,
                send_packets_rate: 0.0,
                recv_packets_rate: 0.0,
            };

            if let Some(previous) = history.latest() {
                let elapsed = at.saturating_duration_since(previous.at).as_secs_f64();
                sample.send_rate = rate(current.bytes_sent, previous.bytes_sent, elapsed);
                sample.recv_rate = rate(current.bytes_recv, previous.bytes_recv, elapsed);
                sample.send_packets_rate =
                    rate(current.packets_sent, previous.packets_sent, elapsed);
                sample.recv_packets_rate =
                    rate(current.packets_recv, previous.packets_recv, elapsed);
            }

            history.push(sample);
        }
    }

    /// Copy out the latest rates and the exposed tail of every history
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let mut snapshot = BTreeMap::new();
        for (interface, history) in &self.histories {
            let Some(latest) = history.latest() else {
                continue;
            };
            snapshot.insert(
                interface.clone(),
                InterfaceSnapshot {
                    current: CurrentRates::from(latest),
                    history: history.recent(self.settings.exposed),
                },
            );
        }
        snapshot
    }

    /// Number of samples retained for `interface`
    pub fn retained(&self, interface: &str) -> usize {
        self.histories.get(interface).map_or(0, InterfaceHistory::len)
    }
}

struct Control {
    task: Option<(CancellationToken, JoinHandle<SamplerCore>)>,
    /// Histories kept between a stop and the next start
    parked: Option<SamplerCore>,
}

/// Background bandwidth sampler.
///
/// One task owns the histories and publishes an immutable snapshot after every
/// tick; readers only ever see those copies.
pub struct TelemetrySampler {
    source: Arc<dyn CounterSource>,
    settings: SamplerSettings,
    state: Arc<RwLock<SamplerState>>,
    control: Arc<Mutex<Control>>,
    published: Arc<watch::Sender<Arc<TelemetrySnapshot>>>,
}

impl TelemetrySampler {
    pub fn new(source: Arc<dyn CounterSource>, settings: SamplerSettings) -> Self {
        let (published, _) = watch::channel(Arc::new(TelemetrySnapshot::new()));
        Self {
            source,
            settings,
            state: Arc::new(RwLock::new(SamplerState::Stopped)),
            control: Arc::new(Mutex::new(Control {
                task: None,
                parked: None,
            })),
            published: Arc::new(published),
        }
    }

    pub fn state(&self) -> SamplerState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SamplerState::Running
    }

    /// Start the sampling loop. Returns false if it was already running.
    pub async fn start(&self) -> bool {
        let mut control = self.control.lock().await;
        if control.task.is_some() {
            return false;
        }

        *self.state.write() = SamplerState::Starting;

        let core = control
            .parked
            .take()
            .unwrap_or_else(|| SamplerCore::new(self.settings.clone()));
        let token = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(
            core,
            self.source.clone(),
            self.settings.interval,
            token.clone(),
            self.published.clone(),
        ));
        control.task = Some((token, handle));

        *self.state.write() = SamplerState::Running;
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "Started bandwidth monitoring"
        );
        true
    }

    /// Cancel the loop and wait for it to exit. Returns false if it was not running.
    ///
    /// The join runs in its own task holding the control lock, so dropping
    /// this future still parks the histories and reaches `Stopped`.
    pub async fn stop(&self) -> bool {
        let mut control = self.control.clone().lock_owned().await;
        let Some((token, handle)) = control.task.take() else {
            return false;
        };

        *self.state.write() = SamplerState::Stopping;
        token.cancel();

        let state = self.state.clone();
        let joiner = tokio::spawn(async move {
            match handle.await {
                Ok(core) => control.parked = Some(core),
                Err(e) => warn!(error = %e, "Bandwidth sampling task ended abnormally"),
            }
            *state.write() = SamplerState::Stopped;
            info!("Stopped bandwidth monitoring");
        });

        if let Err(e) = joiner.await {
            warn!(error = %e, "Bandwidth sampler stop task failed");
        }
        true
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.published.borrow().clone()
    }

    /// Receiver notified after every successful tick
    pub fn subscribe(&self) -> watch::Receiver<Arc<TelemetrySnapshot>> {
        self.published.subscribe()
    }

    /// Addresses and link state of every non-excluded interface
    pub async fn interface_info(&self) -> Result<BTreeMap<String, InterfaceInfo>> {
        let interfaces = self
            .source
            .read_interface_addresses_and_link_state()
            .await?;
        Ok(interfaces
            .into_iter()
            .filter(|info| !self.settings.is_excluded(&info.name))
            .map(|info| (info.name.clone(), info))
            .collect())
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        // Never leave a detached loop behind. A held lock means a stop is
        // already joining a cancelled loop.
        if let Ok(control) = self.control.try_lock() {
            if let Some((token, _)) = control.task.as_ref() {
                token.cancel();
            }
        }
    }
}

async fn sampling_loop(
    mut core: SamplerCore,
    source: Arc<dyn CounterSource>,
    interval: Duration,
    token: CancellationToken,
    published: Arc<watch::Sender<Arc<TelemetrySnapshot>>>,
) -> SamplerCore {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = source.read_all_interface_counters() => match result {
                Ok(counters) => {
                    core.record(counters, Instant::now(), Utc::now());
                    published.send_replace(Arc::new(core.snapshot()));
                }
                Err(e) => warn!(error = %e, "Error collecting network stats"),
            },
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Bandwidth sampling loop exited");
    core
}
