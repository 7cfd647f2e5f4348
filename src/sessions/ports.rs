use async_trait::async_trait;
use rand::Rng;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::debug;

use crate::utils::{LookingGlassError, Result};

/// Checks whether a TCP port can currently be bound
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn try_bind(&self, port: u16) -> bool;
}

/// Binds a throwaway listener on all IPv4 interfaces and releases it at once
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn try_bind(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) => {
                debug!(port, error = %e, "Port probe failed");
                false
            }
        }
    }
}

/// Draws ports uniformly from an inclusive range
pub struct PortAllocator {
    range: (u16, u16),
    attempts: u32,
    probe: Arc<dyn PortProbe>,
}

impl PortAllocator {
    pub fn new(range: (u16, u16), attempts: u32, probe: Arc<dyn PortProbe>) -> Self {
        let (start, end) = range;
        Self {
            range: (start.min(end), start.max(end)),
            attempts,
            probe,
        }
    }

    /// Find a port that is both unreserved and bindable.
    ///
    /// `reserve` claims a candidate atomically against other in-process
    /// sessions and returns false if it is already held. A reserved candidate
    /// that then fails the bind probe is handed back through `release`. Every
    /// draw counts toward the attempt bound, including draws of held ports.
    pub async fn allocate<R, F>(&self, mut reserve: R, mut release: F) -> Result<u16>
    where
        R: FnMut(u16) -> bool + Send,
        F: FnMut(u16) + Send,
    {
        let (start, end) = self.range;

        for _ in 0..self.attempts {
            let candidate = rand::thread_rng().gen_range(start..=end);
            if !reserve(candidate) {
                continue;
            }
            if self.probe.try_bind(candidate).await {
                return Ok(candidate);
            }
            release(candidate);
        }

        Err(LookingGlassError::NoAvailablePort {
            start,
            end,
            attempts: self.attempts,
        })
    }
}
