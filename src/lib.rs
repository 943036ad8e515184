//! Offline reader workspace root.
//!
//! Re-exports the service facade so hosts can depend on a single crate.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
