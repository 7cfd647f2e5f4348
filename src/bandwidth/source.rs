use async_trait::async_trait;
use std::collections::HashMap;
use sysinfo::Networks;

use super::interfaces::read_interface_details;
use super::types::{InterfaceCounters, InterfaceInfo};
use crate::utils::{LookingGlassError, Result};

/// Where interface telemetry comes from
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Counters for every interface, read in one OS query so interfaces don't skew
    async fn read_all_interface_counters(&self) -> Result<HashMap<String, InterfaceCounters>>;

    /// Addresses, link state, speed and MTU of every interface
    async fn read_interface_addresses_and_link_state(&self) -> Result<Vec<InterfaceInfo>>;
}

/// Reads the host's interfaces through sysinfo and getifaddrs
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSource;

impl SystemSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CounterSource for SystemSource {
    async fn read_all_interface_counters(&self) -> Result<HashMap<String, InterfaceCounters>> {
        tokio::task::spawn_blocking(|| {
            let networks = Networks::new_with_refreshed_list();
            networks
                .list()
                .iter()
                .map(|(name, data)| {
                    (
                        name.clone(),
                        InterfaceCounters {
                            bytes_sent: data.total_transmitted(),
                            bytes_recv: data.total_received(),
                            packets_sent: data.total_packets_transmitted(),
                            packets_recv: data.total_packets_received(),
                        },
                    )
                })
                .collect()
        })
        .await
        .map_err(|e| LookingGlassError::TelemetryReadFailure(format!("counter read task: {}", e)))
    }

    async fn read_interface_addresses_and_link_state(&self) -> Result<Vec<InterfaceInfo>> {
        tokio::task::spawn_blocking(read_interface_details)
            .await
            .map_err(|e| {
                LookingGlassError::TelemetryReadFailure(format!("interface read task: {}", e))
            })?
    }
}
