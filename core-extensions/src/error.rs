use thiserror::Error;

/// Failures of the request/response correlation layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("RPC '{kind}' (request {request_id}) timed out after {after_ms}ms")]
    Timeout {
        kind: String,
        request_id: u64,
        after_ms: u64,
    },

    #[error("RPC '{kind}' failed on the remote side: {message}")]
    Remote { kind: String, message: String },

    #[error("RPC channel closed")]
    ChannelClosed,

    #[error("Malformed RPC message: {0}")]
    Malformed(String),
}

/// Failures while loading a script into the sandbox.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("Failed to load extension {extension_id}: {reason}")]
    Load {
        extension_id: String,
        reason: String,
    },

    #[error("Script registered {count} extension classes and none is named {extension_id}")]
    AmbiguousRegistry { extension_id: String, count: usize },

    #[error("Extension {0} is not loaded")]
    NotLoaded(String),

    #[error("Extension {0} is disabled")]
    Disabled(String),
}

/// Image decode/encode failures.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Canvas already bound to a different source image")]
    SourceMismatch,

    #[error("Nothing was drawn on the canvas")]
    EmptyCanvas,

    #[error("Invalid canvas size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Unsupported output type: {0}")]
    UnsupportedMime(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// Settings menu declaration and mutation failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MenuError {
    #[error("Failed to resolve menu rows: {0}")]
    Resolve(String),

    #[error("Rejected value for {id}: {reason}")]
    InvalidValue { id: String, reason: String },

    #[error("Action {id} failed: {reason}")]
    Action { id: String, reason: String },
}

/// Top-level error for the extension bridge.
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Menu(#[from] MenuError),

    #[error("DRM image could not be decoded: {0}")]
    DrmDecode(String),

    #[error("Extension method {method} failed: {message}")]
    Method { method: String, message: String },

    #[error("Unknown extension: {0}")]
    UnknownExtension(String),

    #[error("Failed to fetch script for {extension_id}: {reason}")]
    ScriptFetch {
        extension_id: String,
        reason: String,
    },

    #[error("Unexpected payload: {0}")]
    Payload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

impl ExtensionError {
    pub fn method(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Method {
            method: method.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtensionError>;
