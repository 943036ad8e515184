//! Background Execution and Lifecycle
//!
//! Lets the download scheduler keep running while the app is not in the
//! foreground, and tells it which mode it is in.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::Result;

/// One cycle of background work.
///
/// The host calls it repeatedly; it resolves to `true` while work remains and
/// `false` once the host may stop.
pub type BackgroundLoop = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Progress shown in the OS-level notification while running in background.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationUpdate {
    pub title: String,
    pub description: String,
    /// Fraction in `0.0..=1.0`
    pub progress: f32,
}

impl NotificationUpdate {
    pub fn new(title: impl Into<String>, description: impl Into<String>, progress: f32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            progress: progress.clamp(0.0, 1.0),
        }
    }
}

/// Background execution trait
///
/// Abstracts the OS mechanism that keeps downloads alive in the background:
/// - **iOS**: `BGProcessingTask` / background URL session
/// - **Android**: foreground service with a progress notification
/// - **Desktop**: a Tokio task (the process is never suspended)
///
/// The host owns the loop cadence: it invokes the provided
/// [`BackgroundLoop`] once per cycle until it returns `false` or `stop` is
/// called.
#[async_trait]
pub trait BackgroundDownloadHost: Send + Sync {
    /// Start driving `loop_fn`. Starting an already running host is a no-op.
    async fn start(&self, loop_fn: BackgroundLoop) -> Result<()>;

    /// Stop driving the loop and dismiss the notification.
    async fn stop(&self) -> Result<()>;

    /// Whether the host is currently driving a loop.
    async fn is_running(&self) -> bool;

    /// Update the progress notification.
    async fn update_notification(&self, update: NotificationUpdate) -> Result<()>;
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Application is in the foreground and active
    Foreground,
    /// Application is in the background
    Background,
    /// Application is being suspended
    Suspended,
}

/// Lifecycle observer trait
///
/// # Platform Support
///
/// - **iOS**: UIApplication lifecycle notifications
/// - **Android**: ProcessLifecycleOwner
/// - **Desktop**: always foreground
#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    /// Get current lifecycle state
    async fn get_state(&self) -> Result<LifecycleState>;

    /// Convenience check used by the scheduler once per cycle
    async fn is_foreground(&self) -> bool {
        matches!(self.get_state().await, Ok(LifecycleState::Foreground))
    }
}
