use serde::Serialize;
use std::path::PathBuf;

use crate::constants::{DEFAULT_IPERF3_BINARY, REQUIRED_TOOLS};

/// Presence of one external command on this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub description: &'static str,
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

/// Look up every external command the diagnostics rely on.
///
/// `iperf3_binary` replaces the stock iperf3 name when configured.
pub fn check_requirements(iperf3_binary: &str) -> Vec<ToolStatus> {
    REQUIRED_TOOLS
        .iter()
        .map(|&(name, description)| {
            let name = if name == DEFAULT_IPERF3_BINARY {
                iperf3_binary
            } else {
                name
            };
            ToolStatus {
                name: name.to_string(),
                description,
                path: which::which(name).ok(),
            }
        })
        .collect()
}

/// Names of the commands that could not be found
pub fn missing_requirements(statuses: &[ToolStatus]) -> Vec<&str> {
    statuses
        .iter()
        .filter(|s| !s.is_available())
        .map(|s| s.name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_every_required_tool() {
        let statuses = check_requirements("iperf3");
        let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ping", "ping6", "traceroute", "traceroute6", "iperf3"]);
    }

    #[test]
    fn test_custom_iperf3_binary_is_checked() {
        let statuses = check_requirements("lookingglass-no-such-iperf3");
        let missing = missing_requirements(&statuses);
        assert!(missing.contains(&"lookingglass-no-such-iperf3"));
    }

    #[test]
    fn test_present_tool_has_path() {
        // sh stands in for a tool that every test host has
        let statuses = check_requirements("sh");
        let sh = statuses.iter().find(|s| s.name == "sh").unwrap();
        assert!(sh.is_available());
        assert!(!missing_requirements(&statuses).contains(&"sh"));
    }
}
