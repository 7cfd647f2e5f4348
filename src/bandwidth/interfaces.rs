use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use nix::sys::socket::SockaddrStorage;
use std::collections::BTreeMap;
use std::net::{SocketAddrV4, SocketAddrV6};
use std::path::Path;

use super::types::{AddressFamily, InterfaceAddress, InterfaceInfo};
use crate::utils::{LookingGlassError, Result};

const SYSFS_NET: &str = "/sys/class/net";

/// Enumerate interfaces with their IPv4/IPv6 addresses and link attributes
pub fn read_interface_details() -> Result<Vec<InterfaceInfo>> {
    let addrs = getifaddrs()
        .map_err(|e| LookingGlassError::TelemetryReadFailure(format!("getifaddrs: {}", e)))?;

    let mut by_name: BTreeMap<String, InterfaceInfo> = BTreeMap::new();
    for ifaddr in addrs {
        let info = by_name
            .entry(ifaddr.interface_name.clone())
            .or_insert_with(|| InterfaceInfo::new(ifaddr.interface_name.clone()));

        info.is_up |= ifaddr.flags.contains(InterfaceFlags::IFF_UP);

        let address = ifaddr
            .address
            .as_ref()
            .and_then(|a| to_address(a, ifaddr.netmask.as_ref()));
        if let Some(address) = address {
            info.addresses.push(address);
        }
    }

    for info in by_name.values_mut() {
        let dir = Path::new(SYSFS_NET).join(&info.name);
        info.mtu = read_sysfs_number(&dir.join("mtu")).unwrap_or(0);
        // Virtual and down links report -1 or fail the read
        info.speed_mbps = read_sysfs_number(&dir.join("speed")).unwrap_or(0);
    }

    Ok(by_name.into_values().collect())
}

fn to_address(
    addr: &SockaddrStorage,
    netmask: Option<&SockaddrStorage>,
) -> Option<InterfaceAddress> {
    if let Some(v4) = addr.as_sockaddr_in() {
        let netmask = netmask
            .and_then(|m| m.as_sockaddr_in())
            .map(|m| SocketAddrV4::from(*m).ip().to_string());
        return Some(InterfaceAddress {
            family: AddressFamily::Inet,
            address: SocketAddrV4::from(*v4).ip().to_string(),
            netmask,
        });
    }

    if let Some(v6) = addr.as_sockaddr_in6() {
        let netmask = netmask
            .and_then(|m| m.as_sockaddr_in6())
            .map(|m| SocketAddrV6::from(*m).ip().to_string());
        return Some(InterfaceAddress {
            family: AddressFamily::Inet6,
            address: SocketAddrV6::from(*v6).ip().to_string(),
            netmask,
        });
    }

    // Link-layer and other families carry no IP address
    None
}

fn read_sysfs_number(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|value| u32::try_from(value).ok())
}
