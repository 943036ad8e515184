//! Background Download Host Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{
        BackgroundDownloadHost, BackgroundLoop, LifecycleObserver, LifecycleState,
        NotificationUpdate,
    },
    error::Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct RunningLoop {
    handle: JoinHandle<()>,
    cancel: oneshot::Sender<()>,
}

/// Tokio-based background host for desktop.
///
/// Desktop processes are never suspended, so "background" just means a Tokio
/// task that keeps invoking the download loop. The notification is recorded
/// and logged instead of being shown.
pub struct TokioBackgroundHost {
    idle_delay: Duration,
    running: Arc<Mutex<Option<RunningLoop>>>,
    last_notification: Arc<Mutex<Option<NotificationUpdate>>>,
}

impl TokioBackgroundHost {
    pub fn new() -> Self {
        Self::with_idle_delay(Duration::from_millis(500))
    }

    /// Create a host that waits `idle_delay` between loop cycles.
    pub fn with_idle_delay(idle_delay: Duration) -> Self {
        Self {
            idle_delay,
            running: Arc::new(Mutex::new(None)),
            last_notification: Arc::new(Mutex::new(None)),
        }
    }

    /// The most recent notification pushed by the scheduler.
    pub async fn last_notification(&self) -> Option<NotificationUpdate> {
        self.last_notification.lock().await.clone()
    }

    async fn drive(
        loop_fn: BackgroundLoop,
        idle_delay: Duration,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let more = tokio::select! {
                _ = &mut cancel_rx => return,
                more = loop_fn() => more,
            };

            if !more {
                debug!("Background loop reported no remaining work");
                return;
            }

            tokio::select! {
                _ = &mut cancel_rx => return,
                _ = tokio::time::sleep(idle_delay) => {}
            }
        }
    }
}

impl Default for TokioBackgroundHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundDownloadHost for TokioBackgroundHost {
    async fn start(&self, loop_fn: BackgroundLoop) -> Result<()> {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
        {
            debug!("Background host already running");
            return Ok(());
        }

        let (cancel, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::drive(
            loop_fn,
            self.idle_delay,
            cancel_rx,
        ));

        *running = Some(RunningLoop { handle, cancel });
        info!("Background download host started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            let _ = running.cancel.send(());
            let _ = running.handle.await;
            info!("Background download host stopped");
        }
        self.last_notification.lock().await.take();
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    async fn update_notification(&self, update: NotificationUpdate) -> Result<()> {
        debug!(
            title = %update.title,
            description = %update.description,
            progress = update.progress,
            "Background notification"
        );
        *self.last_notification.lock().await = Some(update);
        Ok(())
    }
}

/// Desktop lifecycle observer
///
/// Desktop applications are always reported as foreground.
pub struct DesktopLifecycleObserver;

impl DesktopLifecycleObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DesktopLifecycleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleObserver for DesktopLifecycleObserver {
    async fn get_state(&self) -> Result<LifecycleState> {
        Ok(LifecycleState::Foreground)
    }
}
