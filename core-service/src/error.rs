use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Extension error: {0}")]
    Extension(#[from] core_extensions::ExtensionError),

    #[error("Download error: {0}")]
    Download(#[from] core_downloads::DownloadError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
