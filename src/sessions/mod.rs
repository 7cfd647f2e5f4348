// Gateway module for diagnostic sessions - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod manager;
mod ports;
mod process;
mod types;

// Public re-exports - the ONLY way to access session functionality
pub use manager::DiagnosticSessionManager;
pub use ports::{PortAllocator, PortProbe, TcpPortProbe};
pub use process::{terminate, HelperProcess, ProcessLauncher, Termination, TokioLauncher, WaitOutcome};
pub use types::{SessionInfo, SessionSettings, SessionStart, SessionState};
