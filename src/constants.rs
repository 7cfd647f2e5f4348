/// Constants module to avoid magic numbers in the codebase

// Result cache
pub const DEFAULT_CACHE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "lookingglass.query";
pub const CACHE_FIELD_OUTPUT: &str = "output";
pub const CACHE_FIELD_TIMESTAMP: &str = "timestamp";

// Bandwidth telemetry
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_HISTORY_LENGTH: usize = 60;
pub const DEFAULT_EXPOSED_HISTORY: usize = 30;
pub const DEFAULT_EXCLUDED_INTERFACES: &[&str] = &["lo", "docker", "br-", "veth"];

// Diagnostic sessions (iperf3)
pub const DEFAULT_IPERF3_BINARY: &str = "iperf3";
pub const DEFAULT_PORT_RANGE: (u16, u16) = (30000, 31000);
pub const DEFAULT_PORT_ATTEMPTS: u32 = 100;
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 300;
pub const MIN_UNPRIVILEGED_PORT: u16 = 1024;

// One-shot tools
pub const DEFAULT_MAX_PING_COUNT: u32 = 20;
pub const DEFAULT_MAX_TRACEROUTE_HOPS: u32 = 64;
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TRACEROUTE_TIMEOUT_SECS: u64 = 60;

// System tools the diagnostics features shell out to
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("ping", "ping command for network connectivity tests"),
    ("ping6", "ping6 command for IPv6 connectivity tests"),
    ("traceroute", "traceroute command for network path analysis"),
    ("traceroute6", "traceroute6 command for IPv6 path analysis"),
    ("iperf3", "iperf3 command for bandwidth testing"),
];
