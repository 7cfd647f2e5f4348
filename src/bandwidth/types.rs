use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::time::Instant;

/// Raw monotonic counters for one interface, as reported by the OS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// One tick's worth of data for one interface
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSample {
    pub interface_name: String,
    /// Monotonic collection time, used for rate computation
    #[serde(skip)]
    pub at: Instant,
    /// Wall-clock collection time, for display
    pub timestamp: DateTime<Utc>,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    /// Bytes per second; zero on the first sample of an interface
    pub send_rate: f64,
    pub recv_rate: f64,
    /// Packets per second; zero on the first sample of an interface
    pub send_packets_rate: f64,
    pub recv_packets_rate: f64,
}

/// Latest rates and totals for an interface
#[derive(Debug, Clone, Serialize)]
pub struct CurrentRates {
    pub send_rate: f64,
    pub recv_rate: f64,
    pub send_packets_rate: f64,
    pub recv_packets_rate: f64,
    pub total_sent: u64,
    pub total_recv: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<&InterfaceSample> for CurrentRates {
    fn from(sample: &InterfaceSample) -> Self {
        Self {
            send_rate: sample.send_rate,
            recv_rate: sample.recv_rate,
            send_packets_rate: sample.send_packets_rate,
            recv_packets_rate: sample.recv_packets_rate,
            total_sent: sample.bytes_sent,
            total_recv: sample.bytes_recv,
            timestamp: sample.timestamp,
        }
    }
}

/// Read-only view of one interface handed to callers
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSnapshot {
    pub current: CurrentRates,
    /// Most recent samples, oldest first
    pub history: Vec<InterfaceSample>,
}

/// Immutable copy of every sampled interface, keyed by name
pub type TelemetrySnapshot = BTreeMap<String, InterfaceSnapshot>;

/// Lifecycle of the background sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressFamily {
    #[serde(rename = "AF_INET")]
    Inet,
    #[serde(rename = "AF_INET6")]
    Inet6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub family: AddressFamily,
    pub address: String,
    pub netmask: Option<String>,
}

/// Addresses and link state of a network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub addresses: Vec<InterfaceAddress>,
    pub is_up: bool,
    /// Link speed in Mbit/s, 0 when unknown
    pub speed_mbps: u32,
    pub mtu: u32,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
            is_up: false,
            speed_mbps: 0,
            mtu: 0,
        }
    }
}
