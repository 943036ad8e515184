//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! settings, network, background execution) into the extension bridge and the
//! download orchestrator. Desktop apps typically enable the `desktop-shims`
//! feature (which depends on `bridge-desktop`) so missing capabilities fall
//! back to desktop adapters.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder().data_dir("/tmp/reader").build()?;
//! let core = CoreService::new(config, engine).await?;
//!
//! core.catalog().register(extension);
//! core.downloads().download_chapter(request).await;
//! ```

pub mod error;
pub mod pages;

pub use error::{CoreError, Result};
pub use pages::{BridgePageFetcher, BridgePageResolver};

use std::sync::Arc;

use bridge_traits::SettingsStore;
use core_downloads::{BackgroundDownloads, DownloadManager};
use core_extensions::sandbox::{ScriptEngine, SandboxOptions};
use core_extensions::{BridgeServices, ExtensionBridge, ExtensionCatalog};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use tracing::info;

/// Primary façade exposed to host applications.
pub struct CoreService {
    config: CoreConfig,
    event_bus: EventBus,
    bridge: Arc<ExtensionBridge>,
    downloads: DownloadManager,
    background: Option<BackgroundDownloads>,
}

impl CoreService {
    /// Build the bridge and the orchestrator from `config`.
    ///
    /// Extensions are linked through `engine`. Without an injected
    /// `SettingsStore`, the desktop build opens `settings.db` under the data
    /// directory.
    pub async fn new(config: CoreConfig, engine: Arc<dyn ScriptEngine>) -> Result<Self> {
        config.validate()?;

        let settings = match config.settings_store.clone() {
            Some(store) => store,
            None => open_default_settings(&config).await?,
        };
        let event_bus = EventBus::default();

        let catalog = Arc::new(ExtensionCatalog::new(Arc::clone(&config.http_client)));
        let bridge = Arc::new(ExtensionBridge::start(
            BridgeServices {
                http: Arc::clone(&config.http_client),
                settings: Arc::clone(&settings),
                events: Some(event_bus.clone()),
                config: config.bridge.clone(),
            },
            catalog,
            SandboxOptions::new(engine, &config.bridge),
        ));

        let mut downloads = DownloadManager::new(
            Arc::new(BridgePageResolver::new(Arc::clone(&bridge))),
            Arc::new(BridgePageFetcher::new(Arc::clone(&bridge))),
            Arc::clone(&config.file_system),
            settings,
            config.downloads_dir.clone(),
            config.downloads,
        )
        .with_event_bus(event_bus.clone());
        if let Some(monitor) = &config.network_monitor {
            downloads = downloads.with_network_monitor(Arc::clone(monitor));
        }

        let background = match (&config.background_host, config.features.enable_background_downloads) {
            (Some(host), true) => Some(BackgroundDownloads::new(downloads.clone(), Arc::clone(host))),
            _ => None,
        };

        info!(
            downloads_dir = ?config.downloads_dir,
            background = background.is_some(),
            "Core service initialized"
        );

        Ok(Self {
            config,
            event_bus,
            bridge,
            downloads,
            background,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn extensions(&self) -> &Arc<ExtensionBridge> {
        &self.bridge
    }

    pub fn catalog(&self) -> &Arc<ExtensionCatalog> {
        self.bridge.catalog()
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    /// Hand queued downloads to the background host, if one is configured.
    pub async fn enter_background(&self) -> Result<()> {
        if let Some(background) = &self.background {
            background.start().await?;
        }
        Ok(())
    }

    /// Take scheduling back from the background host.
    pub async fn enter_foreground(&self) -> Result<()> {
        if let Some(background) = &self.background {
            if background.is_running().await {
                background.stop().await?;
            }
        }
        self.downloads.ensure_scheduler();
        Ok(())
    }

    /// Align download scheduling with the host's lifecycle state.
    pub async fn sync_lifecycle(&self) -> Result<()> {
        let Some(observer) = &self.config.lifecycle_observer else {
            return Ok(());
        };
        if observer.is_foreground().await {
            self.enter_foreground().await
        } else {
            self.enter_background().await
        }
    }

    /// Stop the sandbox and fail calls still in flight.
    pub fn shutdown(&self) {
        self.bridge.shutdown();
    }
}

#[cfg(feature = "desktop-shims")]
async fn open_default_settings(config: &CoreConfig) -> Result<Arc<dyn SettingsStore>> {
    config
        .file_system
        .create_dir_all(&config.data_dir)
        .await
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
    let store = bridge_desktop::SqliteSettingsStore::new(config.default_settings_path())
        .await
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
async fn open_default_settings(_config: &CoreConfig) -> Result<Arc<dyn SettingsStore>> {
    Err(CoreError::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "Inject a SettingsStore or enable the 'desktop-shims' feature".to_string(),
    })
}
