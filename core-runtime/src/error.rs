use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors raised while bootstrapping the runtime (config, logging, defaults).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Default capability failed to initialize: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
