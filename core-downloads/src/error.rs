use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// A single page could not be fetched or written. The page is skipped and
    /// the chapter still completes.
    #[error("Page {index} of chapter {chapter_id} failed: {message}")]
    PageFetch {
        chapter_id: String,
        index: usize,
        message: String,
    },

    #[error("Failed to resolve pages for chapter {chapter_id}: {message}")]
    Resolver { chapter_id: String, message: String },

    /// The content source (extension) failed to serve a page.
    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Chapter {0} not found")]
    NotFound(String),

    #[error("Invalid download status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DownloadError>;
