//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the reader core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! The extension bridge and the download orchestrator both depend on this
//! crate for their logging conventions, the capability set handed to them at
//! startup, and the broadcast channel they report progress on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
