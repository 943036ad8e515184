//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// How long a probe result is reused before probing again.
const PROBE_TTL: Duration = Duration::from_secs(10);

/// Desktop network monitor implementation
///
/// Probes connectivity with a short TCP connect. A connected desktop is
/// reported as wired, which the download scheduler treats like wifi.
pub struct DesktopNetworkMonitor {
    probe_addr: String,
    cached_info: Arc<Mutex<Option<(Instant, NetworkInfo)>>>,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor
    pub fn new() -> Self {
        Self::with_probe_address("1.1.1.1:443")
    }

    /// Create a monitor probing a custom `host:port`
    pub fn with_probe_address(addr: impl Into<String>) -> Self {
        Self {
            probe_addr: addr.into(),
            cached_info: Arc::new(Mutex::new(None)),
        }
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            Duration::from_secs(3),
            tokio::net::TcpStream::connect(&self.probe_addr),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) | Err(_) => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let mut cached = self.cached_info.lock().await;

        if let Some((at, info)) = cached.as_ref() {
            if at.elapsed() < PROBE_TTL {
                return Ok(info.clone());
            }
        }

        let status = self.check_connectivity().await;
        let info = NetworkInfo {
            status,
            network_type: (status == NetworkStatus::Connected).then_some(NetworkType::Ethernet),
            is_metered: false,
        };

        *cached = Some((Instant::now(), info.clone()));
        debug!(status = ?status, "Network info updated");

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_probe_reports_disconnected() {
        // Port 9 (discard) on loopback is closed on test machines
        let monitor = DesktopNetworkMonitor::with_probe_address("127.0.0.1:9");
        let info = monitor.get_network_info().await.unwrap();

        assert_eq!(info.status, NetworkStatus::Disconnected);
        assert!(info.network_type.is_none());
        assert!(!monitor.is_wifi().await);
    }

    #[tokio::test]
    async fn test_reachable_probe_is_wifi_class() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {}
        });

        let monitor = DesktopNetworkMonitor::with_probe_address(addr);
        assert!(monitor.is_connected().await);
        assert!(monitor.is_wifi().await);
    }
}
