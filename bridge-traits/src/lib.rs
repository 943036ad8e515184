//! # Host Bridge Traits
//!
//! Capability contracts between the reader core and the host platform.
//!
//! ## Overview
//!
//! The extension bridge and the download orchestrator never touch the network,
//! the disk, or the OS scheduler directly. Every effect goes through one of the
//! traits below so each platform (desktop, iOS, Android) can ship its own
//! adapter and tests can substitute mocks.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP used by the sandbox network proxy
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Chapter storage and cache-size accounting
//! - [`SettingsStore`](storage::SettingsStore) - Durable key-value storage (job metadata, extension storage)
//!
//! ### Platform Integration
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and wifi classification
//! - [`BackgroundDownloadHost`](background::BackgroundDownloadHost) - OS-level background execution with a progress notification
//! - [`LifecycleObserver`](background::LifecycleObserver) - Foreground/background state
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Platform
//! implementations should convert their native errors into it and include
//! enough context (paths, URLs) to act on the failure.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! between the scheduler task and concurrently running chapter downloads.

pub mod background;
pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{
    BackgroundDownloadHost, BackgroundLoop, LifecycleObserver, LifecycleState,
    NotificationUpdate,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use storage::{FileMetadata, FileSystemAccess, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
