//! # Download Manager
//!
//! Network-aware, concurrency-bounded scheduler for chapter downloads.
//!
//! ## Overview
//!
//! `DownloadManager` owns three in-memory collections:
//! - a FIFO of pending chapter ids,
//! - the visible queue of [`DownloadJob`]s shown to the user,
//! - the set of chapters currently being fetched.
//!
//! `download_chapter` appends to the pending FIFO and makes sure a scheduler
//! task is running. The scheduler repeatedly sizes the free slots from the
//! network classification (`wifi_parallelism` on a wifi-class network,
//! `other_parallelism` otherwise), dequeues that many queued jobs and awaits
//! them as a batch. When every slot is busy it sleeps for `poll_interval`.
//!
//! Pages of one chapter are fetched strictly in order. A page that fails is
//! logged and skipped; the chapter still completes with fewer pages. Pages
//! already on disk are counted as done without a network call, which is what
//! makes pause/resume cheap.
//!
//! ## Cancellation and Pause
//!
//! Both are observed before a job starts and at every page boundary. A
//! cancelled job deletes its partial directory and leaves the queue without a
//! failure record. A paused job goes back to the head of the pending FIFO and
//! is skipped until resumed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = DownloadManager::new(resolver, fetcher, file_system, settings, downloads_dir, DownloadConfig::default())
//!     .with_network_monitor(network_monitor)
//!     .with_event_bus(event_bus);
//!
//! manager.download_chapter(request).await;
//! for job in manager.jobs() {
//!     println!("{}: {}/{}", job.chapter.chapter_title, job.progress, job.total);
//! }
//! ```

use bridge_traits::{Clock, FileSystemAccess, NetworkMonitor, SettingsStore, SystemClock};
use core_runtime::config::DownloadConfig;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{DownloadError, Result};
use crate::job::{ChapterRequest, DownloadJob, DownloadStatus, DownloadedChapterRecord};
use crate::pipeline::{fetch_page, ChapterPageResolver, PageFetcher};
use crate::records::DownloadRecordStore;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    jobs: Vec<DownloadJob>,
    active: HashSet<String>,
    cancelled: HashSet<String>,
}

impl QueueState {
    fn job_mut(&mut self, chapter_id: &str) -> Option<&mut DownloadJob> {
        self.jobs.iter_mut().find(|j| j.chapter_id() == chapter_id)
    }

    fn contains(&self, chapter_id: &str) -> bool {
        self.active.contains(chapter_id)
            || self.pending.iter().any(|id| id == chapter_id)
            || self.jobs.iter().any(|j| j.chapter_id() == chapter_id)
    }

    fn has_schedulable(&self) -> bool {
        self.pending.iter().any(|id| {
            self.jobs
                .iter()
                .any(|j| j.chapter_id() == id && j.status.is_schedulable())
        })
    }

    /// Move up to `slots` queued jobs from pending to active.
    fn take_launchable(&mut self, slots: usize) -> Vec<DownloadJob> {
        let mut launched = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.pending.len());

        while let Some(chapter_id) = self.pending.pop_front() {
            if launched.len() >= slots {
                remaining.push_back(chapter_id);
                continue;
            }
            let Some(job) = self.job_mut(&chapter_id) else {
                // Job left the visible queue; nothing to launch.
                continue;
            };
            if job.transition(DownloadStatus::Downloading).is_err() {
                remaining.push_back(chapter_id);
                continue;
            }
            launched.push(job.clone());
            self.active.insert(chapter_id);
        }

        self.pending = remaining;
        launched
    }

    fn remove_job(&mut self, chapter_id: &str) -> Option<DownloadJob> {
        self.pending.retain(|id| id != chapter_id);
        self.active.remove(chapter_id);
        let position = self.jobs.iter().position(|j| j.chapter_id() == chapter_id)?;
        Some(self.jobs.remove(position))
    }
}

enum JobOutcome {
    Completed {
        saved_pages: u32,
        total_pages: u32,
        size_bytes: u64,
    },
    Paused,
    Cancelled,
}

/// Chapter download scheduler. Cloning shares the same queue.
#[derive(Clone)]
pub struct DownloadManager {
    resolver: Arc<dyn ChapterPageResolver>,
    fetcher: Arc<dyn PageFetcher>,
    file_system: Arc<dyn FileSystemAccess>,
    records: Arc<DownloadRecordStore>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    event_bus: Option<EventBus>,
    clock: Arc<dyn Clock>,
    config: DownloadConfig,
    downloads_dir: PathBuf,
    queue: Arc<Mutex<QueueState>>,
    scheduler_running: Arc<AtomicBool>,
}

impl DownloadManager {
    /// Create a manager that stores chapters under `downloads_dir` and
    /// completion records in `settings`.
    pub fn new(
        resolver: Arc<dyn ChapterPageResolver>,
        fetcher: Arc<dyn PageFetcher>,
        file_system: Arc<dyn FileSystemAccess>,
        settings: Arc<dyn SettingsStore>,
        downloads_dir: PathBuf,
        config: DownloadConfig,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            file_system,
            records: Arc::new(DownloadRecordStore::new(settings)),
            network_monitor: None,
            event_bus: None,
            clock: Arc::new(SystemClock),
            config,
            downloads_dir,
            queue: Arc::new(Mutex::new(QueueState::default())),
            scheduler_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Size parallelism from the network classification. Without a monitor
    /// the manager assumes a non-wifi network.
    pub fn with_network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    // ========================================================================
    // Queue mutations
    // ========================================================================

    /// Queue a chapter and start the scheduler if it is idle.
    ///
    /// Returns `false` when the chapter is already active, pending, or in
    /// the visible queue.
    #[instrument(skip(self, request), fields(chapter_id = %request.chapter_id))]
    pub async fn download_chapter(&self, request: ChapterRequest) -> bool {
        let queued = self.enqueue(request);
        if queued {
            self.ensure_scheduler();
        }
        queued
    }

    /// Queue a chapter without starting the scheduler, for when a
    /// background host drives [`run_background_cycle`](Self::run_background_cycle).
    pub fn enqueue(&self, request: ChapterRequest) -> bool {
        let manga_id = request.manga_id.clone();
        let chapter_id = request.chapter_id.clone();
        {
            let mut queue = self.queue.lock();
            if queue.contains(&chapter_id) {
                debug!("Chapter already queued");
                return false;
            }
            queue.cancelled.remove(&chapter_id);
            queue.pending.push_back(chapter_id.clone());
            queue.jobs.push(DownloadJob::new(request));
        }

        info!("Queued chapter {} of manga {}", chapter_id, manga_id);
        self.emit(DownloadEvent::Queued {
            manga_id,
            chapter_id,
        });
        true
    }

    /// Cancel a chapter.
    ///
    /// A queued or paused chapter leaves the queue immediately without any
    /// network call. A running chapter stops at its next page boundary and
    /// its partial directory is deleted.
    #[instrument(skip(self))]
    pub async fn cancel(&self, chapter_id: &str) -> bool {
        let (running, manga_id) = {
            let mut queue = self.queue.lock();
            let manga_id = queue
                .jobs
                .iter()
                .find(|j| j.chapter_id() == chapter_id)
                .map(|j| j.chapter.manga_id.clone());
            let running = queue.active.contains(chapter_id);
            if manga_id.is_none() && !running {
                return false;
            }
            queue.pending.retain(|id| id != chapter_id);
            queue.jobs.retain(|j| j.chapter_id() != chapter_id);
            if running {
                queue.cancelled.insert(chapter_id.to_string());
            }
            (running, manga_id)
        };

        if !running {
            if let Some(manga_id) = manga_id {
                // A paused chapter may already have pages on disk.
                self.remove_partial(&manga_id, chapter_id).await;
            }
        }

        info!("Cancelled chapter {}", chapter_id);
        self.emit(DownloadEvent::Cancelled {
            chapter_id: chapter_id.to_string(),
        });
        true
    }

    /// Pause every queued or downloading chapter.
    pub fn pause_all(&self) -> usize {
        let paused: Vec<String> = {
            let mut queue = self.queue.lock();
            queue
                .jobs
                .iter_mut()
                .filter_map(|job| {
                    job.transition(DownloadStatus::Paused)
                        .ok()
                        .map(|_| job.chapter_id().to_string())
                })
                .collect()
        };
        for chapter_id in &paused {
            self.emit(DownloadEvent::Paused {
                chapter_id: chapter_id.clone(),
            });
        }
        info!("Paused {} chapter downloads", paused.len());
        paused.len()
    }

    pub fn pause(&self, chapter_id: &str) -> bool {
        let paused = {
            let mut queue = self.queue.lock();
            queue
                .job_mut(chapter_id)
                .map(|job| job.transition(DownloadStatus::Paused).is_ok())
                .unwrap_or(false)
        };
        if paused {
            self.emit(DownloadEvent::Paused {
                chapter_id: chapter_id.to_string(),
            });
        }
        paused
    }

    /// Return every paused chapter to the queue and restart scheduling.
    pub fn resume_all(&self) -> usize {
        let resumed: Vec<String> = {
            let mut queue = self.queue.lock();
            let ids: Vec<String> = queue
                .jobs
                .iter()
                .filter(|j| j.status == DownloadStatus::Paused)
                .map(|j| j.chapter_id().to_string())
                .collect();
            ids.into_iter()
                .filter(|id| Self::requeue(&mut queue, id))
                .collect()
        };
        for chapter_id in &resumed {
            self.emit(DownloadEvent::Resumed {
                chapter_id: chapter_id.clone(),
            });
        }
        if !resumed.is_empty() {
            self.ensure_scheduler();
        }
        info!("Resumed {} chapter downloads", resumed.len());
        resumed.len()
    }

    pub fn resume(&self, chapter_id: &str) -> bool {
        let resumed = {
            let mut queue = self.queue.lock();
            Self::requeue(&mut queue, chapter_id)
        };
        if resumed {
            self.emit(DownloadEvent::Resumed {
                chapter_id: chapter_id.to_string(),
            });
            self.ensure_scheduler();
        }
        resumed
    }

    fn requeue(queue: &mut QueueState, chapter_id: &str) -> bool {
        let Some(job) = queue.job_mut(chapter_id) else {
            return false;
        };
        if job.transition(DownloadStatus::Queued).is_err() {
            return false;
        }
        // A running job that has not reached its page boundary yet keeps
        // going; it is not pending.
        let pending = queue.pending.iter().any(|id| id == chapter_id);
        if !pending && !queue.active.contains(chapter_id) {
            queue.pending.push_back(chapter_id.to_string());
        }
        true
    }

    /// Delete a downloaded chapter's directory and its record.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NotFound`] if the chapter has no record.
    #[instrument(skip(self))]
    pub async fn delete_chapter(&self, chapter_id: &str) -> Result<()> {
        let record = self
            .records
            .get(chapter_id)
            .await?
            .ok_or_else(|| DownloadError::NotFound(chapter_id.to_string()))?;

        let dir = self.chapter_dir(&record.manga_id, chapter_id);
        if self.file_system.exists(&dir).await? {
            self.file_system.delete_dir_all(&dir).await?;
        }
        self.records.remove(chapter_id).await?;

        info!("Deleted chapter {} of manga {}", chapter_id, record.manga_id);
        self.emit(DownloadEvent::Deleted {
            manga_id: record.manga_id,
            chapter_id: chapter_id.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of the visible queue, in queue order.
    pub fn jobs(&self) -> Vec<DownloadJob> {
        self.queue.lock().jobs.clone()
    }

    pub fn job(&self, chapter_id: &str) -> Option<DownloadJob> {
        self.queue
            .lock()
            .jobs
            .iter()
            .find(|j| j.chapter_id() == chapter_id)
            .cloned()
    }

    /// Whether nothing is running and nothing queued is waiting for a slot.
    pub fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.active.is_empty() && !queue.has_schedulable()
    }

    pub async fn is_downloaded(&self, chapter_id: &str) -> Result<bool> {
        Ok(self.records.get(chapter_id).await?.is_some())
    }

    pub async fn downloaded_chapters(&self) -> Result<Vec<DownloadedChapterRecord>> {
        self.records.all().await
    }

    pub async fn downloaded_chapters_for(
        &self,
        manga_id: &str,
    ) -> Result<Vec<DownloadedChapterRecord>> {
        self.records.for_manga(manga_id).await
    }

    /// Bytes used under the downloads directory.
    pub async fn downloads_size(&self) -> Result<u64> {
        if !self.file_system.exists(&self.downloads_dir).await? {
            return Ok(0);
        }
        Ok(self.file_system.directory_size(&self.downloads_dir).await?)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    async fn max_parallel(&self) -> usize {
        let wifi = match &self.network_monitor {
            Some(monitor) => monitor.is_wifi().await,
            None => false,
        };
        self.config.max_parallel(wifi).max(1)
    }

    /// Start the foreground scheduler task unless one is already running.
    pub fn ensure_scheduler(&self) {
        if self.scheduler_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                manager.process_queue().await;
                manager.scheduler_running.store(false, Ordering::SeqCst);

                // Work queued between the last check and the store above.
                let more = manager.queue.lock().has_schedulable();
                if !more || manager.scheduler_running.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
    }

    /// Run the scheduler until no queued job is left, awaiting each launched
    /// batch before sizing the next one.
    pub async fn process_queue(&self) {
        loop {
            let max_parallel = self.max_parallel().await;
            let batch = {
                let mut queue = self.queue.lock();
                if !queue.has_schedulable() {
                    break;
                }
                let slots = max_parallel.saturating_sub(queue.active.len());
                if slots == 0 {
                    None
                } else {
                    Some(queue.take_launchable(slots))
                }
            };

            match batch {
                Some(batch) => {
                    debug!(count = batch.len(), max_parallel, "Launching chapter batch");
                    join_all(batch.into_iter().map(|job| self.run_job(job))).await;
                }
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// Launch as many queued jobs as there are free slots and return without
    /// waiting for them.
    ///
    /// Returns `true` while work remains, so a background host knows to call
    /// again.
    pub async fn run_background_cycle(&self) -> bool {
        let max_parallel = self.max_parallel().await;
        let batch = {
            let mut queue = self.queue.lock();
            let slots = max_parallel.saturating_sub(queue.active.len());
            queue.take_launchable(slots)
        };

        for job in batch {
            let manager = self.clone();
            tokio::spawn(async move { manager.run_job(job).await });
        }

        !self.is_idle()
    }

    #[instrument(skip(self, job), fields(chapter_id = %job.chapter.chapter_id))]
    async fn run_job(&self, job: DownloadJob) {
        let chapter_id = job.chapter.chapter_id.clone();
        let manga_id = job.chapter.manga_id.clone();

        match self.execute_job(&job).await {
            Ok(JobOutcome::Completed {
                saved_pages,
                total_pages,
                size_bytes,
            }) => {
                {
                    let mut queue = self.queue.lock();
                    queue.remove_job(&chapter_id);
                    queue.cancelled.remove(&chapter_id);
                }
                info!(
                    "Chapter {} completed with {}/{} pages",
                    chapter_id, saved_pages, total_pages
                );
                self.emit(DownloadEvent::Completed {
                    manga_id,
                    chapter_id,
                    saved_pages,
                    total_pages,
                    size_bytes,
                });
            }
            Ok(JobOutcome::Paused) => {
                let mut queue = self.queue.lock();
                queue.active.remove(&chapter_id);
                let known = queue.jobs.iter().any(|j| j.chapter_id() == chapter_id);
                if known && !queue.pending.iter().any(|id| *id == chapter_id) {
                    queue.pending.push_front(chapter_id.clone());
                }
                debug!("Chapter paused at page boundary");
            }
            Ok(JobOutcome::Cancelled) => {
                {
                    let mut queue = self.queue.lock();
                    queue.remove_job(&chapter_id);
                    queue.cancelled.remove(&chapter_id);
                }
                self.remove_partial(&manga_id, &chapter_id).await;
                debug!("Dropped cancelled chapter");
            }
            Err(e) => {
                let was_cancelled = {
                    let mut queue = self.queue.lock();
                    queue.remove_job(&chapter_id);
                    queue.cancelled.remove(&chapter_id)
                };
                if was_cancelled {
                    // Already reported as cancelled; the error is not a failure.
                    self.remove_partial(&manga_id, &chapter_id).await;
                    debug!(error = %e, "Dropped cancelled chapter after error");
                    return;
                }
                error!("Chapter {} failed: {}", chapter_id, e);
                self.emit(DownloadEvent::Failed {
                    chapter_id,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn execute_job(&self, job: &DownloadJob) -> Result<JobOutcome> {
        let chapter = &job.chapter;
        let chapter_id = chapter.chapter_id.as_str();

        if let Some(outcome) = self.checkpoint(chapter_id) {
            return Ok(outcome);
        }

        let pages = self
            .resolver
            .resolve_pages(&chapter.source_id, &chapter.manga_id, chapter_id)
            .await?;
        let total_pages = pages.len() as u32;
        self.update_job(chapter_id, |j| j.total = total_pages);
        self.emit(DownloadEvent::Started {
            manga_id: chapter.manga_id.clone(),
            chapter_id: chapter_id.to_string(),
            total_pages,
        });

        let dir = self.chapter_dir(&chapter.manga_id, chapter_id);
        self.file_system.create_dir_all(&dir).await?;

        let mut saved = Vec::with_capacity(pages.len());
        let mut size_bytes = 0u64;

        for (index, page_url) in pages.iter().enumerate() {
            if let Some(outcome) = self.checkpoint(chapter_id) {
                return Ok(outcome);
            }

            let path = dir.join(format!("{}.jpg", index));
            match self.save_page(chapter, index, page_url, &path).await {
                Ok(written) => {
                    saved.push(page_uri(&path));
                    size_bytes += written;
                }
                Err(e) => warn!(page = index, error = %e, "Skipping page"),
            }

            let completed_pages = index as u32 + 1;
            self.update_job(chapter_id, |j| j.progress = completed_pages);
            self.emit(DownloadEvent::Progress {
                chapter_id: chapter_id.to_string(),
                completed_pages,
                total_pages,
            });
        }

        if let Some(outcome) = self.checkpoint(chapter_id) {
            return Ok(outcome);
        }

        let saved_pages = saved.len() as u32;
        let record = DownloadedChapterRecord::from_job(
            job,
            saved,
            size_bytes,
            self.clock.unix_timestamp_millis(),
        );
        self.records.append(record).await?;

        Ok(JobOutcome::Completed {
            saved_pages,
            total_pages,
            size_bytes,
        })
    }

    /// Observe cancellation and pause requests.
    fn checkpoint(&self, chapter_id: &str) -> Option<JobOutcome> {
        let mut queue = self.queue.lock();
        if queue.cancelled.contains(chapter_id) {
            return Some(JobOutcome::Cancelled);
        }
        let job = match queue.job_mut(chapter_id) {
            Some(job) => job,
            None => return Some(JobOutcome::Cancelled),
        };
        match job.status {
            DownloadStatus::Paused => Some(JobOutcome::Paused),
            // Resumed before this job noticed the pause.
            DownloadStatus::Queued => {
                job.transition(DownloadStatus::Downloading).ok();
                None
            }
            _ => None,
        }
    }

    /// Write one page to `path`, returning its size on disk.
    async fn save_page(
        &self,
        chapter: &ChapterRequest,
        index: usize,
        page_url: &str,
        path: &Path,
    ) -> Result<u64> {
        if self.file_system.exists(path).await.unwrap_or(false) {
            debug!(page = index, "Page already on disk");
            let size = self
                .file_system
                .metadata(path)
                .await
                .map(|m| m.size)
                .unwrap_or(0);
            return Ok(size);
        }

        let page_error = |message: String| DownloadError::PageFetch {
            chapter_id: chapter.chapter_id.clone(),
            index,
            message,
        };

        let bytes = fetch_page(self.fetcher.as_ref(), &chapter.source_id, page_url)
            .await
            .map_err(|e| page_error(e.to_string()))?;
        let written = bytes.len() as u64;
        self.file_system
            .write_file(path, bytes)
            .await
            .map_err(|e| page_error(e.to_string()))?;
        Ok(written)
    }

    async fn remove_partial(&self, manga_id: &str, chapter_id: &str) {
        let dir = self.chapter_dir(manga_id, chapter_id);
        if !self.file_system.exists(&dir).await.unwrap_or(false) {
            return;
        }
        if let Err(e) = self.file_system.delete_dir_all(&dir).await {
            warn!(chapter_id, error = %e, "Failed to remove partial chapter");
        }
    }

    fn update_job(&self, chapter_id: &str, update: impl FnOnce(&mut DownloadJob)) {
        if let Some(job) = self.queue.lock().job_mut(chapter_id) {
            update(job);
        }
    }

    fn chapter_dir(&self, manga_id: &str, chapter_id: &str) -> PathBuf {
        self.downloads_dir
            .join(path_segment(manga_id))
            .join(path_segment(chapter_id))
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Download(event)).ok();
        }
    }
}

fn path_segment(id: &str) -> String {
    id.replace(['/', '\\'], "_")
}

fn page_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}
