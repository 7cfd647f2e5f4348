use std::time::Duration;
use thiserror::Error;

/// Main error type for the looking glass diagnostics core
#[derive(Error, Debug)]
pub enum LookingGlassError {
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("No available port in range {start}-{end} after {attempts} attempts")]
    NoAvailablePort { start: u16, end: u16, attempts: u32 },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process on port {port} did not exit within {timeout:?}")]
    ProcessTerminationTimeout { port: u16, timeout: Duration },

    #[error("Telemetry read failed: {0}")]
    TelemetryReadFailure(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("{0} command not found")]
    ToolNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LookingGlassError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LookingGlassError::CacheUnavailable(_)
                | LookingGlassError::NoAvailablePort { .. }
                | LookingGlassError::ToolTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LookingGlassError>;
