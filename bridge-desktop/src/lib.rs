//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `NetworkMonitor` using a lightweight connectivity probe
//! - `BackgroundDownloadHost` using a Tokio task
//! - `LifecycleObserver` as always-foreground
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let fs = TokioFileSystem::new();
//!     // Hand both to `CoreConfig::builder()`
//! }
//! ```

mod background;
mod filesystem;
mod http;
mod network;
mod settings;

pub use background::{DesktopLifecycleObserver, TokioBackgroundHost};
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
pub use settings::SqliteSettingsStore;
