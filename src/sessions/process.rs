use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::utils::LookingGlassError;

/// Result of waiting on a helper process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Exit code, `None` when killed by a signal
    Exited(Option<i32>),
    TimedOut,
}

/// How a termination request was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Had already exited before we asked
    AlreadyExited,
    Graceful,
    Forced,
}

/// A spawned helper owned by the session manager
#[async_trait]
pub trait HelperProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Request a graceful exit (SIGTERM)
    fn signal_graceful(&mut self) -> io::Result<()>;

    async fn wait(&mut self, timeout: Duration) -> io::Result<WaitOutcome>;

    /// Forced kill, returning once the process is reaped
    async fn kill(&mut self) -> io::Result<()>;

    /// Non-blocking exit check that reaps the process if it is gone
    fn has_exited(&mut self) -> io::Result<bool>;
}

/// Spawns helper processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, argv: &[String]) -> io::Result<Box<dyn HelperProcess>>;
}

/// Launches real child processes through tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn spawn(&self, argv: &[String]) -> io::Result<Box<dyn HelperProcess>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        // Output is never read, so don't let a full pipe stall the helper
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        debug!(program = %program, pid = ?child.id(), "Spawned helper process");
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl HelperProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn signal_graceful(&mut self) -> io::Result<()> {
        // id() is None once the child has been reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    async fn wait(&mut self, timeout: Duration) -> io::Result<WaitOutcome> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(WaitOutcome::Exited(status?.code())),
            Err(_) => Ok(WaitOutcome::TimedOut),
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }
}

/// Stop a helper: SIGTERM, wait up to `timeout`, then SIGKILL.
///
/// Never fails; errors along the way are logged and the next step is tried.
pub async fn terminate(
    process: &mut dyn HelperProcess,
    port: u16,
    timeout: Duration,
) -> Termination {
    match process.has_exited() {
        Ok(true) => return Termination::AlreadyExited,
        Ok(false) => {}
        Err(e) => debug!(port, error = %e, "Exit check failed"),
    }

    if let Err(e) = process.signal_graceful() {
        warn!(port, error = %e, "Failed to send SIGTERM");
    }

    match process.wait(timeout).await {
        Ok(WaitOutcome::Exited(code)) => {
            debug!(port, ?code, "Helper exited after SIGTERM");
            return Termination::Graceful;
        }
        Ok(WaitOutcome::TimedOut) => {
            let err = LookingGlassError::ProcessTerminationTimeout { port, timeout };
            warn!(port, "{}, killing", err);
        }
        Err(e) => warn!(port, error = %e, "Wait after SIGTERM failed, killing"),
    }

    if let Err(e) = process.kill().await {
        warn!(port, error = %e, "Forced kill failed");
    }
    Termination::Forced
}
