//! # Download Orchestrator
//!
//! Downloads chapter pages produced by the extension bridge to local storage
//! for offline reading.
//!
//! ## Overview
//!
//! - [`manager`] - job queues, adaptive concurrency, pause/resume/cancel
//! - [`pipeline`] - page resolution and fetching seams, DRM routing
//! - [`records`] - durable [`DownloadedChapterRecord`] store
//! - [`job`] - job state machine and record types
//! - [`background`] - glue to the host's background execution
//!
//! Chapters land in `<downloads>/<mangaId>/<chapterId>/<index>.jpg`.

pub mod background;
pub mod error;
pub mod job;
pub mod manager;
pub mod pipeline;
pub mod records;

pub use background::BackgroundDownloads;
pub use error::{DownloadError, Result};
pub use job::{ChapterRequest, DownloadJob, DownloadStatus, DownloadedChapterRecord};
pub use manager::DownloadManager;
pub use pipeline::{fetch_page, ChapterPageResolver, PageFetcher};
pub use records::DownloadRecordStore;
