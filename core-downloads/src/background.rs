//! Runs the scheduler through a [`BackgroundDownloadHost`].
//!
//! The host drives one [`DownloadManager::run_background_cycle`] per tick
//! and shows the currently downloading chapter in its notification.

use bridge_traits::{BackgroundDownloadHost, BackgroundLoop, NotificationUpdate};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::job::{DownloadJob, DownloadStatus};
use crate::manager::DownloadManager;

pub struct BackgroundDownloads {
    manager: DownloadManager,
    host: Arc<dyn BackgroundDownloadHost>,
}

impl BackgroundDownloads {
    pub fn new(manager: DownloadManager, host: Arc<dyn BackgroundDownloadHost>) -> Self {
        Self { manager, host }
    }

    /// Hand the scheduler to the host. A no-op while the host is running.
    pub async fn start(&self) -> Result<()> {
        let manager = self.manager.clone();
        let host = Arc::clone(&self.host);
        let loop_fn: BackgroundLoop = Arc::new(move || {
            let manager = manager.clone();
            let host = Arc::clone(&host);
            async move { run_cycle(&manager, host.as_ref()).await }.boxed()
        });

        self.host.start(loop_fn).await?;
        info!("Background downloads started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.host.stop().await?;
        info!("Background downloads stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.host.is_running().await
    }

    /// One background tick, as the host would run it.
    pub async fn run_cycle(&self) -> bool {
        run_cycle(&self.manager, self.host.as_ref()).await
    }
}

async fn run_cycle(manager: &DownloadManager, host: &dyn BackgroundDownloadHost) -> bool {
    let more = manager.run_background_cycle().await;
    if let Some(update) = notification(&manager.jobs()) {
        if let Err(e) = host.update_notification(update).await {
            warn!(error = %e, "Failed to update download notification");
        }
    }
    more
}

fn notification(jobs: &[DownloadJob]) -> Option<NotificationUpdate> {
    let job = jobs
        .iter()
        .find(|j| j.status == DownloadStatus::Downloading)?;
    Some(NotificationUpdate::new(
        job.chapter.manga_title.clone(),
        format!(
            "{} ({}/{})",
            job.chapter.chapter_title, job.progress, job.total
        ),
        job.fraction(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ChapterRequest;

    fn job(chapter_id: &str, status: DownloadStatus, progress: u32, total: u32) -> DownloadJob {
        let mut job = DownloadJob::new(ChapterRequest {
            manga_id: "m1".to_string(),
            chapter_id: chapter_id.to_string(),
            source_id: "src".to_string(),
            manga_title: "Blue Period".to_string(),
            chapter_title: format!("Chapter {}", chapter_id),
            chapter_number: 1.0,
            manga_cover: None,
        });
        job.status = status;
        job.progress = progress;
        job.total = total;
        job
    }

    #[test]
    fn test_notification_follows_first_downloading_job() {
        let jobs = vec![
            job("1", DownloadStatus::Paused, 0, 0),
            job("2", DownloadStatus::Downloading, 3, 12),
        ];
        let update = notification(&jobs).unwrap();
        assert_eq!(update.title, "Blue Period");
        assert_eq!(update.description, "Chapter 2 (3/12)");
        assert_eq!(update.progress, 0.25);
    }

    #[test]
    fn test_no_notification_when_nothing_downloads() {
        assert!(notification(&[job("1", DownloadStatus::Queued, 0, 0)]).is_none());
    }
}
