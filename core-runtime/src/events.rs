//! # Event Bus System
//!
//! Typed events broadcast over `tokio::sync::broadcast` so the host UI can
//! follow downloads and extension loads without polling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐  subscribe  ┌────────────┐
//! │ Download manager ├──────────>│           ├────────────>│ Host UI    │
//! └──────────────────┘           │ EventBus  │             └────────────┘
//! ┌──────────────────┐   emit    │           │  subscribe  ┌────────────┐
//! │ Extension bridge ├──────────>│           ├────────────>│ Logger     │
//! └──────────────────┘           └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Download(DownloadEvent::Queued {
//!     manga_id: "m1".to_string(),
//!     chapter_id: "c1".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Download(_))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat it as shutdown.
//!
//! Emitting with no subscribers returns an error; producers ignore it with `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Download(DownloadEvent),
    Extension(ExtensionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Extension(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Extension(ExtensionEvent::LoadFailed { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Extension(ExtensionEvent::Loaded { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Serialize to the JSON shape handed to host UIs.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Chapter download lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Chapter accepted into the pending queue.
    Queued { manga_id: String, chapter_id: String },
    /// Chapter left the pending queue and began fetching pages.
    Started {
        manga_id: String,
        chapter_id: String,
        total_pages: u32,
    },
    /// One more page was handled (written, skipped as present, or skipped on error).
    Progress {
        chapter_id: String,
        completed_pages: u32,
        total_pages: u32,
    },
    Paused { chapter_id: String },
    Resumed { chapter_id: String },
    /// Chapter finished; `saved_pages` may be lower than `total_pages`.
    Completed {
        manga_id: String,
        chapter_id: String,
        saved_pages: u32,
        total_pages: u32,
        size_bytes: u64,
    },
    Failed { chapter_id: String, message: String },
    /// Chapter cancelled; partial files were removed.
    Cancelled { chapter_id: String },
    /// A completed chapter was deleted from disk and from the records.
    Deleted { manga_id: String, chapter_id: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Queued { .. } => "Chapter queued for download",
            DownloadEvent::Started { .. } => "Chapter download started",
            DownloadEvent::Progress { .. } => "Chapter download in progress",
            DownloadEvent::Paused { .. } => "Chapter download paused",
            DownloadEvent::Resumed { .. } => "Chapter download resumed",
            DownloadEvent::Completed { .. } => "Chapter downloaded",
            DownloadEvent::Failed { .. } => "Chapter download failed",
            DownloadEvent::Cancelled { .. } => "Chapter download cancelled",
            DownloadEvent::Deleted { .. } => "Downloaded chapter deleted",
        }
    }

    /// Chapter the event refers to.
    pub fn chapter_id(&self) -> &str {
        match self {
            DownloadEvent::Queued { chapter_id, .. }
            | DownloadEvent::Started { chapter_id, .. }
            | DownloadEvent::Progress { chapter_id, .. }
            | DownloadEvent::Paused { chapter_id }
            | DownloadEvent::Resumed { chapter_id }
            | DownloadEvent::Completed { chapter_id, .. }
            | DownloadEvent::Failed { chapter_id, .. }
            | DownloadEvent::Cancelled { chapter_id }
            | DownloadEvent::Deleted { chapter_id, .. } => chapter_id,
        }
    }
}

/// Extension sandbox lifecycle and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ExtensionEvent {
    /// Extension script evaluated and its class instantiated.
    Loaded { extension_id: String },
    /// Loading failed; the extension is disabled until reinstalled.
    LoadFailed {
        extension_id: String,
        message: String,
    },
    /// Diagnostic line emitted by extension code.
    Log {
        extension_id: Option<String>,
        message: String,
    },
}

impl ExtensionEvent {
    fn description(&self) -> &str {
        match self {
            ExtensionEvent::Loaded { .. } => "Extension loaded",
            ExtensionEvent::LoadFailed { .. } => "Extension failed to load",
            ExtensionEvent::Log { .. } => "Extension log",
        }
    }
}

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let downloads_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map(|f| f(event)).unwrap_or(true)
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
