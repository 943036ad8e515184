//! # Core Configuration Module
//!
//! Builder-based configuration for the reader core.
//!
//! ## Overview
//!
//! `CoreConfig` carries every host capability the extension bridge and the
//! download orchestrator use, plus their tunables. The builder validates
//! fail-fast: a missing capability is reported with an actionable
//! [`Error::CapabilityMissing`] instead of surfacing later as a runtime
//! failure deep inside a download.
//!
//! ## Required Capabilities
//!
//! - `HttpClient` - every request an extension makes (desktop default: reqwest)
//! - `FileSystemAccess` - chapter storage (desktop default: tokio fs)
//! - `SettingsStore` - download records and extension storage
//!   (desktop default: SQLite file under the data directory, opened by the service)
//!
//! ## Optional Capabilities
//!
//! - `NetworkMonitor` - wifi classification for download parallelism
//! - `BackgroundDownloadHost` - OS background execution
//! - `LifecycleObserver` - foreground/background detection
//!
//! With `desktop-shims` each optional capability falls back to its
//! `bridge-desktop` adapter.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/var/mobile/reader")
//!     .http_client(Arc::new(MyHttpClient))
//!     .file_system(Arc::new(MyFileSystem))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .wifi_parallelism(4)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    BackgroundDownloadHost, FileSystemAccess, HttpClient, LifecycleObserver, NetworkMonitor,
    SettingsStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default user agent attached to every proxied extension request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Default accept header attached to every proxied extension request.
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Timeouts applied to calls across the sandbox boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTimeouts {
    /// Catalog, search, settings and every other plain call
    pub generic: Duration,
    /// Calls that wrap a network fetch or an image decode
    pub network: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            generic: Duration::from_secs(30),
            network: Duration::from_secs(60),
        }
    }
}

/// Network proxy defaults for extension requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub user_agent: String,
    pub accept: String,
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Extension bridge tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub rpc: RpcTimeouts,
    pub proxy: ProxyConfig,
    /// Quality used when re-encoding descrambled pages as JPEG (1-100)
    pub jpeg_quality: u8,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rpc: RpcTimeouts::default(),
            proxy: ProxyConfig::default(),
            jpeg_quality: 90,
        }
    }
}

/// Download scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Chapters downloaded at once on a wifi-class network
    pub wifi_parallelism: usize,
    /// Chapters downloaded at once on any other network
    pub other_parallelism: usize,
    /// Sleep between scheduler polls when every slot is busy
    pub poll_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            wifi_parallelism: 3,
            other_parallelism: 1,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl DownloadConfig {
    /// Concurrency bound for the given network classification.
    pub fn max_parallel(&self, wifi_class: bool) -> usize {
        if wifi_class {
            self.wifi_parallelism
        } else {
            self.other_parallelism
        }
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Keep downloading while the app is backgrounded (requires BackgroundDownloadHost)
    pub enable_background_downloads: bool,

    /// Size download parallelism by network type (requires NetworkMonitor)
    pub enable_network_awareness: bool,
}

/// Core configuration for the reader core.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root for durable app data
    pub data_dir: PathBuf,

    /// Root of `<mangaId>/<chapterId>/<index>.jpg` page files
    pub downloads_dir: PathBuf,

    pub http_client: Arc<dyn HttpClient>,

    pub file_system: Arc<dyn FileSystemAccess>,

    /// `None` only with `desktop-shims`: the service opens `settings.db`
    /// under `data_dir`
    pub settings_store: Option<Arc<dyn SettingsStore>>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub background_host: Option<Arc<dyn BackgroundDownloadHost>>,

    pub lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,

    pub bridge: BridgeConfig,

    pub downloads: DownloadConfig,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("downloads_dir", &self.downloads_dir)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field(
                "settings_store",
                &self.settings_store.as_ref().map(|_| "SettingsStore { ... }"),
            )
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "background_host",
                &self
                    .background_host
                    .as_ref()
                    .map(|_| "BackgroundDownloadHost { ... }"),
            )
            .field(
                "lifecycle_observer",
                &self
                    .lifecycle_observer
                    .as_ref()
                    .map(|_| "LifecycleObserver { ... }"),
            )
            .field("bridge", &self.bridge)
            .field("downloads", &self.downloads)
            .field("features", &self.features)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Path of the default SQLite settings database.
    pub fn default_settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.db")
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.downloads_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Downloads directory cannot be empty".to_string(),
            ));
        }

        if self.downloads.wifi_parallelism == 0 || self.downloads.other_parallelism == 0 {
            return Err(Error::Config(
                "Download parallelism must be at least 1".to_string(),
            ));
        }

        if self.downloads.poll_interval.is_zero() {
            return Err(Error::Config(
                "Scheduler poll interval must be greater than 0".to_string(),
            ));
        }

        if self.bridge.rpc.generic.is_zero() || self.bridge.rpc.network.is_zero() {
            return Err(Error::Config("RPC timeouts must be greater than 0".to_string()));
        }

        if !(1..=100).contains(&self.bridge.jpeg_quality) {
            return Err(Error::Config(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        if self.settings_store.is_none() && !cfg!(feature = "desktop-shims") {
            return Err(settings_store_missing_error());
        }

        if self.features.enable_background_downloads && self.background_host.is_none() {
            return Err(Error::Config(
                "Background downloads enabled but no BackgroundDownloadHost provided. \
                 Disable the feature or inject a BackgroundDownloadHost implementation."
                    .to_string(),
            ));
        }

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::Config(
                "Network awareness enabled but no NetworkMonitor provided. \
                 Disable the feature or inject a NetworkMonitor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required for download records and \
                 extension storage. Desktop: enable the 'desktop-shims' feature to use \
                 the default SqliteSettingsStore. Mobile: inject platform-native \
                 settings (UserDefaults/DataStore)."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to run extension requests. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Mobile: inject a URLSession/OkHttp-backed client."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(data_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_data_directory(
        data_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_data_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required to store chapter pages. \
                 Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                 Mobile: inject a sandboxed documents-directory implementation."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    Some(Arc::new(bridge_desktop::DesktopNetworkMonitor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn default_background_host() -> Option<Arc<dyn BackgroundDownloadHost>> {
    Some(Arc::new(bridge_desktop::TokioBackgroundHost::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_background_host() -> Option<Arc<dyn BackgroundDownloadHost>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn default_lifecycle_observer() -> Option<Arc<dyn LifecycleObserver>> {
    Some(Arc::new(bridge_desktop::DesktopLifecycleObserver::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_lifecycle_observer() -> Option<Arc<dyn LifecycleObserver>> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    downloads_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    background_host: Option<Arc<dyn BackgroundDownloadHost>>,
    lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    bridge: BridgeConfig,
    downloads: DownloadConfig,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the data directory (required).
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the downloads root.
    ///
    /// Default: `<data_dir>/downloads`
    pub fn downloads_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.downloads_dir = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Sets the network monitor (optional).
    ///
    /// Without one, every network is treated as non-wifi and downloads run
    /// one chapter at a time.
    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn background_host(mut self, host: Arc<dyn BackgroundDownloadHost>) -> Self {
        self.background_host = Some(host);
        self
    }

    pub fn lifecycle_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle_observer = Some(observer);
        self
    }

    pub fn rpc_timeouts(mut self, timeouts: RpcTimeouts) -> Self {
        self.bridge.rpc = timeouts;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.bridge.proxy.user_agent = user_agent.into();
        self
    }

    pub fn proxy_timeout(mut self, timeout: Duration) -> Self {
        self.bridge.proxy.request_timeout = timeout;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.bridge.jpeg_quality = quality;
        self
    }

    pub fn wifi_parallelism(mut self, chapters: usize) -> Self {
        self.downloads.wifi_parallelism = chapters;
        self
    }

    pub fn other_parallelism(mut self, chapters: usize) -> Self {
        self.downloads.other_parallelism = chapters;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.downloads.poll_interval = interval;
        self
    }

    pub fn enable_background_downloads(mut self, enabled: bool) -> Self {
        self.features.enable_background_downloads = enabled;
        self
    }

    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the data directory is missing or a tunable is out of range
    /// - [`Error::CapabilityMissing`] when a required capability has no implementation
    ///   and no desktop default is available
    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let downloads_dir = self
            .downloads_dir
            .unwrap_or_else(|| data_dir.join("downloads"));

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&data_dir)?,
        };

        let config = CoreConfig {
            data_dir,
            downloads_dir,
            http_client,
            file_system,
            settings_store: self.settings_store,
            network_monitor: self.network_monitor.or_else(default_network_monitor),
            background_host: self.background_host.or_else(default_background_host),
            lifecycle_observer: self.lifecycle_observer.or_else(default_lifecycle_observer),
            bridge: self.bridge,
            downloads: self.downloads,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        FileMetadata, HttpRequest, HttpResponse, NetworkInfo, NetworkStatus,
    };
    use mockall::mock;
    use std::path::Path;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    mock! {
        Fs {}

        #[async_trait]
        impl FileSystemAccess for Fs {
            async fn get_data_directory(&self) -> BridgeResult<PathBuf>;
            async fn exists(&self, path: &Path) -> BridgeResult<bool>;
            async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata>;
            async fn create_dir_all(&self, path: &Path) -> BridgeResult<()>;
            async fn read_file(&self, path: &Path) -> BridgeResult<bytes::Bytes>;
            async fn write_file(&self, path: &Path, data: bytes::Bytes) -> BridgeResult<()>;
            async fn delete_file(&self, path: &Path) -> BridgeResult<()>;
            async fn delete_dir_all(&self, path: &Path) -> BridgeResult<()>;
            async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>>;
        }
    }

    mock! {
        Settings {}

        #[async_trait]
        impl SettingsStore for Settings {
            async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()>;
            async fn get_string(&self, key: &str) -> BridgeResult<Option<String>>;
            async fn delete(&self, key: &str) -> BridgeResult<()>;
            async fn list_keys(&self) -> BridgeResult<Vec<String>>;
        }
    }

    struct Offline;

    #[async_trait]
    impl NetworkMonitor for Offline {
        async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
            Ok(NetworkInfo {
                status: NetworkStatus::Disconnected,
                network_type: None,
                is_metered: false,
            })
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .data_dir("/tmp/reader")
            .http_client(Arc::new(MockHttp::new()))
            .file_system(Arc::new(MockFs::new()))
            .settings_store(Arc::new(MockSettings::new()))
    }

    #[test]
    fn test_builder_requires_data_dir() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(MockHttp::new()))
            .file_system(Arc::new(MockFs::new()))
            .settings_store(Arc::new(MockSettings::new()))
            .build();

        match result {
            Err(Error::Config(message)) => assert!(message.contains("data_dir")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_defaults() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.downloads_dir, PathBuf::from("/tmp/reader/downloads"));
        assert_eq!(config.default_settings_path(), PathBuf::from("/tmp/reader/settings.db"));
        assert_eq!(config.bridge.rpc.generic, Duration::from_secs(30));
        assert_eq!(config.bridge.rpc.network, Duration::from_secs(60));
        assert_eq!(config.bridge.proxy.request_timeout, Duration::from_secs(60));
        assert_eq!(config.bridge.jpeg_quality, 90);
        assert_eq!(config.downloads.max_parallel(true), 3);
        assert_eq!(config.downloads.max_parallel(false), 1);
        assert_eq!(config.downloads.poll_interval, Duration::from_millis(500));
        assert_eq!(config.features, FeatureFlags::default());
    }

    #[test]
    fn test_custom_tunables() {
        let config = complete_builder()
            .downloads_dir("/sdcard/reader")
            .wifi_parallelism(5)
            .other_parallelism(2)
            .poll_interval(Duration::from_millis(50))
            .user_agent("reader-tests/1.0")
            .jpeg_quality(75)
            .build()
            .unwrap();

        assert_eq!(config.downloads_dir, PathBuf::from("/sdcard/reader"));
        assert_eq!(config.downloads.max_parallel(true), 5);
        assert_eq!(config.downloads.max_parallel(false), 2);
        assert_eq!(config.bridge.proxy.user_agent, "reader-tests/1.0");
        assert_eq!(config.bridge.jpeg_quality, 75);
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let result = complete_builder().wifi_parallelism(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_quality() {
        let result = complete_builder().jpeg_quality(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_background_downloads_require_host() {
        let result = complete_builder().enable_background_downloads(true).build();

        match result {
            Err(Error::Config(message)) => assert!(message.contains("BackgroundDownloadHost")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_network_awareness_requires_monitor() {
        assert!(complete_builder()
            .enable_network_awareness(true)
            .build()
            .is_err());

        assert!(complete_builder()
            .enable_network_awareness(true)
            .network_monitor(Arc::new(Offline))
            .build()
            .is_ok());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_capabilities_are_reported() {
        let result = CoreConfig::builder()
            .data_dir("/tmp/reader")
            .file_system(Arc::new(MockFs::new()))
            .settings_store(Arc::new(MockSettings::new()))
            .build();
        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient")
            }
            other => panic!("expected missing capability, got {:?}", other.map(|_| ())),
        }

        let result = CoreConfig::builder()
            .data_dir("/tmp/reader")
            .http_client(Arc::new(MockHttp::new()))
            .file_system(Arc::new(MockFs::new()))
            .build();
        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "SettingsStore")
            }
            other => panic!("expected missing capability, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder()
            .data_dir(std::env::temp_dir().join("reader-config-defaults"))
            .build()
            .unwrap();

        assert!(config.settings_store.is_none());
        assert!(config.network_monitor.is_some());
        assert!(config.background_host.is_some());
        assert!(config.lifecycle_observer.is_some());
    }

    #[tokio::test]
    async fn test_injected_monitor_wins_over_defaults() {
        let config = complete_builder()
            .network_monitor(Arc::new(Offline))
            .build()
            .unwrap();
        let monitor = config.network_monitor.unwrap();
        assert!(!monitor.is_connected().await);
        assert!(!monitor.is_wifi().await);
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = complete_builder().build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.data_dir, config.data_dir);
        assert!(format!("{:?}", cloned).contains("CoreConfig"));
    }
}
