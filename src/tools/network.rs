use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::app::NetworkToolsConfig;
use crate::utils::{LookingGlassError, Result};

/// Hostnames and IPv4/IPv6 literals; nothing a shell would interpret
static TARGET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9.:\-]+$").expect("target pattern is valid"));

/// Captured result of a one-shot diagnostic command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub target: String,
    pub output: String,
    /// Stderr, when the command wrote any
    pub error: Option<String>,
    /// `None` when the command was killed by a signal
    pub return_code: Option<i32>,
    /// Completion time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Runs ping and traceroute against user-supplied targets
#[derive(Debug, Clone)]
pub struct NetworkTools {
    config: NetworkToolsConfig,
}

impl NetworkTools {
    pub fn new(config: NetworkToolsConfig) -> Self {
        Self { config }
    }

    pub async fn ping(&self, target: &str, count: u32, ipv6: bool) -> Result<ToolOutput> {
        if !self.config.enabled || !self.config.ping_enabled {
            return Err(LookingGlassError::InvalidRequest("ping is disabled".to_string()));
        }
        validate_target(target)?;
        check_bound("count", count, self.config.max_ping_count)?;

        let program = if ipv6 { "ping6" } else { "ping" };
        let args = vec!["-c".to_string(), count.to_string(), target.to_string()];
        run_tool(
            program,
            &args,
            target,
            Duration::from_secs(self.config.ping_timeout),
        )
        .await
    }

    pub async fn traceroute(&self, target: &str, max_hops: u32, ipv6: bool) -> Result<ToolOutput> {
        if !self.config.enabled || !self.config.traceroute_enabled {
            return Err(LookingGlassError::InvalidRequest(
                "traceroute is disabled".to_string(),
            ));
        }
        validate_target(target)?;
        check_bound("max_hops", max_hops, self.config.max_traceroute_hops)?;

        let program = if ipv6 { "traceroute6" } else { "traceroute" };
        let args = vec!["-m".to_string(), max_hops.to_string(), target.to_string()];
        run_tool(
            program,
            &args,
            target,
            Duration::from_secs(self.config.traceroute_timeout),
        )
        .await
    }
}

pub fn validate_target(target: &str) -> Result<()> {
    // A leading dash would be read as an option
    if !TARGET_PATTERN.is_match(target) || target.starts_with('-') {
        return Err(LookingGlassError::InvalidRequest(format!(
            "Invalid target format: {:?}",
            target
        )));
    }
    Ok(())
}

fn check_bound(name: &str, value: u32, max: u32) -> Result<()> {
    if value < 1 || value > max {
        return Err(LookingGlassError::InvalidRequest(format!(
            "{} must be between 1 and {}",
            name, max
        )));
    }
    Ok(())
}

/// Run `program` to completion, killing it if it outlives `limit`
async fn run_tool(
    program: &str,
    args: &[String],
    target: &str,
    limit: Duration,
) -> Result<ToolOutput> {
    info!(program, ?args, "Running network tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LookingGlassError::ToolNotFound(program.to_string()),
            _ => LookingGlassError::Io(e),
        })?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            warn!(program, timeout_secs = limit.as_secs_f64(), "Network tool timed out");
            return Err(LookingGlassError::ToolTimeout {
                tool: program.to_string(),
                timeout: limit,
            });
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Ok(ToolOutput {
        target: target.to_string(),
        output: String::from_utf8_lossy(&output.stdout).into_owned(),
        error: (!stderr.is_empty()).then_some(stderr),
        return_code: output.status.code(),
        timestamp: Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_target_validation() {
        for ok in ["192.0.2.1", "2001:db8::1", "example.net", "core-1.fra.example.net"] {
            assert!(validate_target(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in ["", "8.8.8.8; rm -rf /", "host name", "$(id)", "-f", "a/b"] {
            assert!(validate_target(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_bounds() {
        assert!(check_bound("count", 1, 20).is_ok());
        assert!(check_bound("count", 20, 20).is_ok());
        assert!(check_bound("count", 0, 20).is_err());
        assert!(check_bound("count", 21, 20).is_err());
    }

    #[tokio::test]
    async fn test_rejects_before_running_anything() {
        let tools = NetworkTools::new(NetworkToolsConfig::default());

        let err = tools.ping("192.0.2.1", 500, false).await.unwrap_err();
        assert!(matches!(err, LookingGlassError::InvalidRequest(_)));

        let err = tools.traceroute("bad target", 10, false).await.unwrap_err();
        assert!(matches!(err, LookingGlassError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_disabled_tool_is_refused() {
        let config = NetworkToolsConfig {
            ping_enabled: false,
            ..Default::default()
        };
        let err = NetworkTools::new(config)
            .ping("192.0.2.1", 1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LookingGlassError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let result = run_tool(
            "sh",
            &args(&["-c", "echo reply; echo warning >&2; exit 3"]),
            "192.0.2.1",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(result.target, "192.0.2.1");
        assert_eq!(result.output, "reply\n");
        assert_eq!(result.error.as_deref(), Some("warning\n"));
        assert_eq!(result.return_code, Some(3));
        assert!(result.timestamp > 0);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let err = run_tool("sleep", &args(&["5"]), "x", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LookingGlassError::ToolTimeout { ref tool, .. } if tool == "sleep"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let err = run_tool("lookingglass-no-such-tool", &[], "x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LookingGlassError::ToolNotFound(_)));
    }
}
