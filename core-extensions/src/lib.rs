//! # Extension Execution Bridge
//!
//! Runs untrusted content-source extensions behind a message-passing boundary
//! and exposes their catalog, chapter and image operations to the app.
//!
//! ## Components
//!
//! - [`rpc`] - request/response correlation with per-call timeouts
//! - [`sandbox`] - the isolated host that loads one extension at a time
//! - [`network_proxy`] - executes every HTTP request an extension makes
//! - [`image_codec`] - header parsing and deferred canvas compositing for DRM pages
//! - [`settings_menu`] - resolves declared settings trees and applies path mutations
//! - [`bridge`] - the app-side endpoint: loading, method calls, sandbox requests
//! - [`catalog`] - installed extensions and cached script bodies
//!
//! ## Example
//!
//! ```ignore
//! use core_extensions::{ExtensionBridge, ExtensionCatalog, BridgeServices};
//! use core_extensions::sandbox::{SandboxOptions, StaticScriptEngine};
//!
//! let catalog = Arc::new(ExtensionCatalog::new(http.clone()));
//! let engine = Arc::new(StaticScriptEngine::new().link("MangaDex", Arc::new(MangaDexFactory)));
//! let bridge = ExtensionBridge::start(
//!     BridgeServices { http, settings, events: None, config: BridgeConfig::default() },
//!     catalog,
//!     SandboxOptions::new(engine, &BridgeConfig::default()),
//! );
//!
//! let details = bridge.chapter_details("mangadex", "m1", "c1").await?;
//! ```

pub mod bridge;
pub mod catalog;
pub mod drm;
pub mod error;
pub mod image_codec;
pub mod network_proxy;
pub mod protocol;
pub mod rpc;
pub mod sandbox;
pub mod settings_menu;

pub use bridge::{BridgeServices, ChapterDetails, EncodedImage, ExtensionBridge};
pub use catalog::{Extension, ExtensionCatalog};
pub use drm::DrmTag;
pub use error::{CodecError, ExtensionError, MenuError, Result, RpcError, SandboxError};
pub use rpc::RpcChannel;
