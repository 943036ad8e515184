//! # Download Job State Machine
//!
//! One chapter's download unit as tracked by the orchestrator, plus the
//! durable record written once a chapter finishes.
//!
//! ## State Machine
//!
//! ```text
//! Queued → Downloading → Completed
//!   ↑ ↓        ↓    ↘
//!   Paused ←───┘     Failed
//! ```
//!
//! `Paused` is reachable from `Queued` and `Downloading` and returns to
//! `Queued` on resume. Cancellation is not a status: a cancelled job simply
//! leaves the queue.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{DownloadError, Result};

/// The current status of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Waiting for a scheduler slot
    Queued,
    /// Pages are being fetched
    Downloading,
    /// Skipped by the scheduler until resumed
    Paused,
    Completed,
    Failed,
}

impl DownloadStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }

    /// Whether the scheduler may still pick this job up
    pub fn is_schedulable(&self) -> bool {
        matches!(self, DownloadStatus::Queued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Queued, Paused)
                | (Downloading, Paused)
                | (Paused, Queued)
                | (Downloading, Completed)
                | (Queued, Failed)
                | (Downloading, Failed)
        )
    }
}

impl FromStr for DownloadStatus {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(DownloadStatus::Queued),
            "downloading" => Ok(DownloadStatus::Downloading),
            "paused" => Ok(DownloadStatus::Paused),
            "completed" => Ok(DownloadStatus::Completed),
            "failed" => Ok(DownloadStatus::Failed),
            _ => Err(DownloadError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the caller asks to download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRequest {
    pub manga_id: String,
    pub chapter_id: String,
    /// Extension that serves the chapter
    pub source_id: String,
    pub manga_title: String,
    pub chapter_title: String,
    #[serde(default)]
    pub chapter_number: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_cover: Option<String>,
}

/// An entry of the visible download queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    #[serde(flatten)]
    pub chapter: ChapterRequest,
    /// Page count, known once the chapter's pages are resolved
    pub total: u32,
    /// Pages handled so far
    pub progress: u32,
    pub status: DownloadStatus,
}

impl DownloadJob {
    pub fn new(chapter: ChapterRequest) -> Self {
        Self {
            chapter,
            total: 0,
            progress: 0,
            status: DownloadStatus::Queued,
        }
    }

    pub fn chapter_id(&self) -> &str {
        &self.chapter.chapter_id
    }

    /// Fraction of pages handled, in `0.0..=1.0`
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.progress as f32 / self.total as f32).min(1.0)
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidStateTransition`] for illegal moves,
    /// e.g. resuming a job that is not paused.
    pub fn transition(&mut self, next: DownloadStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DownloadError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Durable metadata for a chapter that finished downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedChapterRecord {
    pub manga_id: String,
    pub chapter_id: String,
    pub chapter_number: f64,
    pub chapter_title: String,
    pub manga_title: String,
    #[serde(default)]
    pub manga_cover: Option<String>,
    pub source_id: String,
    /// Local URIs of the saved pages, in page order
    pub pages: Vec<String>,
    /// Unix timestamp in milliseconds
    pub downloaded_at: i64,
    /// Bytes on disk
    pub size: u64,
}

impl DownloadedChapterRecord {
    pub fn from_job(job: &DownloadJob, pages: Vec<String>, size: u64, downloaded_at: i64) -> Self {
        let chapter = &job.chapter;
        Self {
            manga_id: chapter.manga_id.clone(),
            chapter_id: chapter.chapter_id.clone(),
            chapter_number: chapter.chapter_number,
            chapter_title: chapter.chapter_title.clone(),
            manga_title: chapter.manga_title.clone(),
            manga_cover: chapter.manga_cover.clone(),
            source_id: chapter.source_id.clone(),
            pages,
            downloaded_at,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChapterRequest {
        ChapterRequest {
            manga_id: "m1".to_string(),
            chapter_id: "c1".to_string(),
            source_id: "mangadex".to_string(),
            manga_title: "Manga".to_string(),
            chapter_title: "Chapter 1".to_string(),
            chapter_number: 1.0,
            manga_cover: None,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            DownloadStatus::Queued,
            DownloadStatus::Downloading,
            DownloadStatus::Paused,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DownloadStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<DownloadStatus>().is_err());
    }

    #[test]
    fn test_pause_resume_transitions() {
        let mut job = DownloadJob::new(request());
        job.transition(DownloadStatus::Downloading).unwrap();
        job.transition(DownloadStatus::Paused).unwrap();
        assert!(job.transition(DownloadStatus::Completed).is_err());
        job.transition(DownloadStatus::Queued).unwrap();
        assert!(job.status.is_schedulable());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = DownloadJob::new(request());
        job.transition(DownloadStatus::Downloading).unwrap();
        job.transition(DownloadStatus::Completed).unwrap();
        assert!(job.status.is_terminal());
        assert!(matches!(
            job.transition(DownloadStatus::Paused),
            Err(DownloadError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_fraction() {
        let mut job = DownloadJob::new(request());
        assert_eq!(job.fraction(), 0.0);
        job.total = 4;
        job.progress = 1;
        assert_eq!(job.fraction(), 0.25);
    }

    #[test]
    fn test_record_json_shape() {
        let job = DownloadJob::new(request());
        let record = DownloadedChapterRecord::from_job(&job, vec!["file:///a/0.jpg".into()], 10, 1);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["mangaId"], "m1");
        assert_eq!(json["downloadedAt"], 1);
        assert_eq!(json["pages"][0], "file:///a/0.jpg");
    }
}
