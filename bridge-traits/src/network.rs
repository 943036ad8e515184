//! Network Monitoring Abstraction
//!
//! Provides network connectivity and classification used by the download
//! scheduler to size its concurrency.

use async_trait::async_trait;

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Cellular/mobile data connection
    Cellular,
    /// WiFi connection
    WiFi,
    /// Ethernet connection
    Ethernet,
    /// Other or unknown connection type
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Connected to network
    Connected,
    /// Not connected to any network
    Disconnected,
    /// Connection status unknown or indeterminate
    Indeterminate,
}

/// Network information
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl NetworkInfo {
    /// Whether this connection counts as wifi for scheduling purposes.
    ///
    /// Wired connections are treated like wifi.
    pub fn is_wifi_class(&self) -> bool {
        self.status == NetworkStatus::Connected
            && matches!(
                self.network_type,
                Some(NetworkType::WiFi) | Some(NetworkType::Ethernet)
            )
    }
}

/// Network monitor trait
///
/// # Platform Support
///
/// - **Desktop**: simple connectivity probe
/// - **iOS**: Network framework (NWPathMonitor)
/// - **Android**: ConnectivityManager
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn parallelism(monitor: &dyn NetworkMonitor) -> usize {
///     if monitor.is_wifi().await { 3 } else { 1 }
/// }
/// ```
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                ..
            })
        )
    }

    /// Check if connected via a wifi-class network
    async fn is_wifi(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.is_wifi_class())
            .unwrap_or(false)
    }
}
