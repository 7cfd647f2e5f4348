use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ports::{PortAllocator, PortProbe, TcpPortProbe};
use super::process::{terminate, HelperProcess, ProcessLauncher, Termination, TokioLauncher};
use super::types::{SessionInfo, SessionSettings, SessionStart, SessionState};
use crate::utils::{LookingGlassError, Result};

struct Slot {
    /// Distinguishes successive sessions on the same port
    id: u64,
    state: SessionState,
    started_at: DateTime<Utc>,
    duration: Duration,
    process: Option<Box<dyn HelperProcess>>,
    watchdog: Option<JoinHandle<()>>,
}

struct Inner {
    settings: SessionSettings,
    launcher: Arc<dyn ProcessLauncher>,
    allocator: PortAllocator,
    slots: Mutex<HashMap<u16, Slot>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Signalled whenever a slot leaves the table
    released: Notify,
}

impl Inner {
    /// Claim a port for session `id`; false if any session holds it
    fn reserve(&self, port: u16, id: u64, duration: Duration) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains_key(&port) {
            return false;
        }
        slots.insert(
            port,
            Slot {
                id,
                state: SessionState::Starting,
                started_at: Utc::now(),
                duration,
                process: None,
                watchdog: None,
            },
        );
        true
    }

    /// Drop the slot for `port` if it still belongs to session `id`
    fn remove(&self, port: u16, id: u64) -> Option<Slot> {
        let removed = {
            let mut slots = self.slots.lock();
            match slots.get(&port) {
                Some(slot) if slot.id == id => slots.remove(&port),
                _ => None,
            }
        };
        if removed.is_some() {
            self.released.notify_waiters();
        }
        removed
    }

    fn has_stopping(&self) -> bool {
        self.slots
            .lock()
            .values()
            .any(|slot| slot.state == SessionState::Stopping)
    }

    fn argv(&self, port: u16) -> Vec<String> {
        vec![
            self.settings.binary.clone(),
            "-s".to_string(),
            "-p".to_string(),
            port.to_string(),
            // Serve exactly one client, then exit
            "-1".to_string(),
            "--json".to_string(),
        ]
    }
}

/// Releases a `Starting` reservation unless the session made it to `Running`.
///
/// Covers both spawn failure and a caller dropping `start` mid-flight.
struct Reservation<'a> {
    inner: &'a Inner,
    id: u64,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let id = self.id;
            self.inner
                .slots
                .lock()
                .retain(|_, slot| !(slot.id == id && slot.state == SessionState::Starting));
        }
    }
}

/// Owns every iperf3 server process this service starts.
///
/// Cheap to clone; clones share the same session table. No other component
/// signals or reaps these processes.
#[derive(Clone)]
pub struct DiagnosticSessionManager {
    inner: Arc<Inner>,
}

impl DiagnosticSessionManager {
    pub fn new(
        settings: SessionSettings,
        launcher: Arc<dyn ProcessLauncher>,
        probe: Arc<dyn PortProbe>,
    ) -> Self {
        let allocator = PortAllocator::new(settings.port_range, settings.port_attempts, probe);
        Self {
            inner: Arc::new(Inner {
                settings,
                launcher,
                allocator,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                released: Notify::new(),
            }),
        }
    }

    /// Manager that spawns real processes and probes real sockets
    pub fn with_system(settings: SessionSettings) -> Self {
        Self::new(settings, Arc::new(TokioLauncher), Arc::new(TcpPortProbe))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Start an iperf3 server on a free port, stopped automatically after
    /// `duration` (or the configured default).
    pub async fn start(&self, duration: Option<Duration>) -> Result<SessionStart> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(LookingGlassError::InvalidRequest(
                "session manager is shut down".to_string(),
            ));
        }
        self.reap_exited();

        let inner = &self.inner;
        let duration = duration.unwrap_or(inner.settings.default_duration);
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let reservation = Reservation {
            inner,
            id,
            armed: true,
        };

        let port = inner
            .allocator
            .allocate(
                |port| inner.reserve(port, id, duration),
                |port| {
                    inner.remove(port, id);
                },
            )
            .await?;

        let argv = inner.argv(port);
        let process = match inner.launcher.spawn(&argv).await {
            Ok(process) => process,
            Err(source) => {
                error!(port, binary = %inner.settings.binary, error = %source, "Failed to start iperf3 server");
                return Err(LookingGlassError::SpawnFailed {
                    program: inner.settings.binary.clone(),
                    source,
                });
            }
        };
        let pid = process.pid();

        inner.slots.lock().insert(
            port,
            Slot {
                id,
                state: SessionState::Running,
                started_at: Utc::now(),
                duration,
                process: Some(process),
                watchdog: None,
            },
        );
        reservation.commit();

        let watchdog = self.arm_watchdog(port, id, duration);
        {
            let mut slots = inner.slots.lock();
            match slots.get_mut(&port) {
                Some(slot) if slot.id == id && slot.state == SessionState::Running => {
                    slot.watchdog = Some(watchdog);
                }
                // Already stopping or gone
                _ => watchdog.abort(),
            }
        }

        info!(port, ?pid, duration_secs = duration.as_secs(), "Started iperf3 server");

        if inner.closed.load(Ordering::Acquire) {
            stop_session(inner, port, Some(id)).await;
            return Err(LookingGlassError::InvalidRequest(
                "session manager is shut down".to_string(),
            ));
        }

        Ok(SessionStart::new(port, duration))
    }

    /// Stop the session on `port`. False when no running session holds it.
    ///
    /// Termination runs on its own task, so dropping this future never
    /// leaves a helper half-stopped.
    pub async fn stop(&self, port: u16) -> bool {
        stop_session(&self.inner, port, None).await
    }

    /// Forget sessions whose helper exited on its own, returning their ports
    pub fn reap_exited(&self) -> Vec<u16> {
        let mut slots = self.inner.slots.lock();

        let exited: Vec<u16> = slots
            .iter_mut()
            .filter(|(_, slot)| slot.state == SessionState::Running)
            .filter_map(|(port, slot)| {
                let process = slot.process.as_mut()?;
                match process.has_exited() {
                    Ok(true) => Some(*port),
                    Ok(false) => None,
                    Err(e) => {
                        debug!(port, error = %e, "Exit check failed");
                        None
                    }
                }
            })
            .collect();

        for port in &exited {
            if let Some(slot) = slots.remove(port) {
                if let Some(watchdog) = slot.watchdog {
                    watchdog.abort();
                }
                info!(port, "iperf3 server exited on its own");
            }
        }

        exited
    }

    /// Every session still holding a port, ordered by port
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.reap_exited();

        let slots = self.inner.slots.lock();
        let mut sessions: Vec<SessionInfo> = slots
            .iter()
            .map(|(port, slot)| SessionInfo {
                port: *port,
                state: slot.state,
                pid: slot.process.as_ref().and_then(|p| p.pid()),
                started_at: slot.started_at,
                duration_secs: slot.duration.as_secs(),
            })
            .collect();
        sessions.sort_by_key(|s| s.port);
        sessions
    }

    pub fn live_ports(&self) -> Vec<u16> {
        self.sessions().into_iter().map(|s| s.port).collect()
    }

    /// Refuse new sessions and stop every running one concurrently.
    ///
    /// Stops already in flight, such as an expiring watchdog, are waited for
    /// too, so no helper outlives the call. Returns how many were stopped here.
    pub async fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::Release);

        let ports: Vec<u16> = {
            let slots = self.inner.slots.lock();
            slots
                .iter()
                .filter(|(_, slot)| slot.state == SessionState::Running)
                .map(|(port, _)| *port)
                .collect()
        };

        let stopped = join_all(ports.iter().map(|port| self.stop(*port)))
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count();

        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed
            released.as_mut().enable();
            if !self.inner.has_stopping() {
                break;
            }
            debug!("Waiting for in-flight session stops");
            released.await;
        }

        info!(stopped, "Session manager shut down");
        stopped
    }

    fn arm_watchdog(&self, port: u16, id: u64, duration: Duration) -> JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if stop_session(&inner, port, Some(id)).await {
                info!(port, "Session duration elapsed");
            }
        })
    }
}

/// Stop the running session on `port`, optionally only if it is session
/// `expected`. Returns once the helper is gone and the port is free.
async fn stop_session(inner: &Arc<Inner>, port: u16, expected: Option<u64>) -> bool {
    let (id, process, watchdog) = {
        let mut slots = inner.slots.lock();
        let Some(slot) = slots.get_mut(&port) else {
            return false;
        };
        if expected.is_some_and(|id| id != slot.id) || slot.state != SessionState::Running {
            return false;
        }
        slot.state = SessionState::Stopping;
        (slot.id, slot.process.take(), slot.watchdog.take())
    };

    // A watchdog-driven stop runs on the watchdog task itself
    if expected.is_none() {
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
    }

    let owner = Arc::clone(inner);
    let task = tokio::spawn(async move {
        let outcome = match process {
            Some(mut process) => {
                terminate(process.as_mut(), port, owner.settings.stop_timeout).await
            }
            None => Termination::AlreadyExited,
        };
        owner.remove(port, id);
        outcome
    });

    match task.await {
        Ok(outcome) => info!(port, ?outcome, "Stopped iperf3 server"),
        Err(e) => warn!(port, error = %e, "Stop task did not complete"),
    }
    true
}
