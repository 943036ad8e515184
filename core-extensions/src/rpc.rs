//! # RPC Channel
//!
//! Correlates outbound requests with inbound responses across the sandbox
//! boundary. Both the app side and the sandbox side own one channel; each can
//! issue requests to, and answer requests from, the other.
//!
//! - Request ids are strictly increasing per channel.
//! - A pending entry is removed exactly once: by its response, by its
//!   timeout, or when the awaiting future is dropped.
//! - A response arriving after its timeout finds no entry and is dropped.
//! - Requests are independent; responses may arrive in any order.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::protocol::{self, WireMessage};

type Responder = oneshot::Sender<Result<Value, String>>;

/// Outbound half of the boundary.
pub type Outbound = mpsc::UnboundedSender<String>;

/// Inbound half of the boundary.
pub type Inbound = mpsc::UnboundedReceiver<String>;

/// Create one direction of the boundary.
pub fn boundary() -> (Outbound, Inbound) {
    mpsc::unbounded_channel()
}

pub struct RpcChannel {
    side: &'static str,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Responder>>,
    outbound: Outbound,
}

/// Removes the pending entry when the awaiting future finishes or is dropped.
struct PendingSlot<'a> {
    channel: &'a RpcChannel,
    request_id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.channel.pending.lock().remove(&self.request_id);
    }
}

impl RpcChannel {
    /// `side` only labels log lines ("app", "sandbox").
    pub fn new(side: &'static str, outbound: Outbound) -> Self {
        Self {
            side,
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            outbound,
        }
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no response arrives within `timeout`
    /// - [`RpcError::Remote`] if the other side answered with an error
    /// - [`RpcError::ChannelClosed`] if the boundary is gone
    pub async fn send(
        &self,
        kind: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = protocol::encode_request(kind, request_id, payload)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        let _slot = PendingSlot {
            channel: self,
            request_id,
        };

        self.outbound
            .send(message)
            .map_err(|_| RpcError::ChannelClosed)?;
        debug!(side = self.side, kind, request_id, "RPC request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(RpcError::Remote {
                kind: kind.to_string(),
                message,
            }),
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                warn!(
                    side = self.side,
                    kind,
                    request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "RPC request timed out"
                );
                Err(RpcError::Timeout {
                    kind: kind.to_string(),
                    request_id,
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Complete the pending request `request_id`.
    ///
    /// Returns `false` when no such request is pending (already answered,
    /// timed out, or never sent); the outcome is dropped.
    pub fn resolve(&self, request_id: u64, outcome: Result<Value, String>) -> bool {
        let responder = self.pending.lock().remove(&request_id);
        match responder {
            Some(responder) => {
                let _ = responder.send(outcome);
                true
            }
            None => {
                debug!(side = self.side, request_id, "Dropping response with no pending request");
                false
            }
        }
    }

    /// Answer a request received from the other side.
    pub fn respond(&self, request_id: u64, outcome: Result<Value, String>) -> Result<(), RpcError> {
        let message = protocol::encode_response(request_id, outcome)?;
        self.outbound
            .send(message)
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Post an out-of-band diagnostic line.
    pub fn post_log(&self, message: &str) -> Result<(), RpcError> {
        let message = protocol::encode_log(message)?;
        self.outbound
            .send(message)
            .map_err(|_| RpcError::ChannelClosed)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fail every pending request with [`RpcError::ChannelClosed`].
    pub fn close(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(side = self.side, count = drained.len(), "Failing pending RPC requests");
        }
    }
}

/// Serves requests arriving from the other side of the boundary.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request; `Err` is sent back as `{requestId, error}`.
    async fn handle(&self, kind: &str, payload: Value) -> Result<Value, String>;

    /// Out-of-band diagnostic from the other side.
    fn on_log(&self, message: &str) {
        tracing::info!(target: "extension", "{}", message);
    }
}

/// Run the inbound half of a channel until the boundary closes.
///
/// Responses complete pending requests on `channel`; requests are handed to
/// `handler` on their own task so a slow call never blocks the responses that
/// other calls are waiting for.
pub fn spawn_dispatch(
    channel: Arc<RpcChannel>,
    mut inbound: Inbound,
    handler: Arc<dyn RequestHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = inbound.recv().await {
            match protocol::decode(&text) {
                Ok(WireMessage::Response {
                    request_id,
                    outcome,
                }) => {
                    channel.resolve(request_id, outcome);
                }
                Ok(WireMessage::Log { message }) => handler.on_log(&message),
                Ok(WireMessage::Request {
                    kind,
                    request_id,
                    payload,
                }) => {
                    let channel = Arc::clone(&channel);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        let outcome = handler.handle(&kind, payload).await;
                        if let Err(e) = &outcome {
                            debug!(side = channel.side, kind = %kind, request_id, error = %e, "RPC handler failed");
                        }
                        if let Err(e) = channel.respond(request_id, outcome) {
                            warn!(side = channel.side, request_id, error = %e, "Failed to send RPC response");
                        }
                    });
                }
                Err(e) => warn!(side = channel.side, error = %e, "Ignoring malformed RPC message"),
            }
        }

        debug!(side = channel.side, "RPC boundary closed");
        channel.close();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sent_request_id(text: &str) -> u64 {
        match protocol::decode(text).unwrap() {
            WireMessage::Request { request_id, .. } => request_id,
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_response_resolves_exactly_once() {
        let (tx, mut rx) = boundary();
        let channel = Arc::new(RpcChannel::new("test", tx));

        let caller = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .send("getMangaDetails", json!({"mangaId": "m1"}), Duration::from_secs(5))
                    .await
            })
        };

        let request_id = sent_request_id(&rx.recv().await.unwrap());
        assert_eq!(channel.pending_count(), 1);

        assert!(channel.resolve(request_id, Ok(json!({"title": "Berserk"}))));
        assert!(!channel.resolve(request_id, Ok(json!({"title": "again"}))));

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result["title"], "Berserk");
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let (tx, mut rx) = boundary();
        let channel = Arc::new(RpcChannel::new("test", tx));

        for _ in 0..3 {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let _ = channel.send("ping", Value::Null, Duration::from_secs(5)).await;
            });
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(sent_request_id(&rx.recv().await.unwrap()));
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_slot_and_drops_late_response() {
        let (tx, mut rx) = boundary();
        let channel = RpcChannel::new("test", tx);

        let result = channel
            .send("search", json!({"query": "x"}), Duration::from_secs(30))
            .await;

        match result {
            Err(RpcError::Timeout { kind, after_ms, .. }) => {
                assert_eq!(kind, "search");
                assert_eq!(after_ms, 30_000);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(channel.pending_count(), 0);

        let request_id = sent_request_id(&rx.recv().await.unwrap());
        assert!(!channel.resolve(request_id, Ok(json!([]))));
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (tx, mut rx) = boundary();
        let channel = Arc::new(RpcChannel::new("test", tx));

        let first = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send("a", Value::Null, Duration::from_secs(5)).await })
        };
        let first_id = sent_request_id(&rx.recv().await.unwrap());
        let second = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send("b", Value::Null, Duration::from_secs(5)).await })
        };
        let second_id = sent_request_id(&rx.recv().await.unwrap());

        channel.resolve(second_id, Ok(json!("second")));
        channel.resolve(first_id, Err("nope".to_string()));

        assert_eq!(second.await.unwrap().unwrap(), json!("second"));
        assert_eq!(
            first.await.unwrap(),
            Err(RpcError::Remote {
                kind: "a".to_string(),
                message: "nope".to_string()
            })
        );
    }

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, kind: &str, payload: Value) -> Result<Value, String> {
            match kind {
                "echo" => Ok(payload),
                other => Err(format!("unknown request {}", other)),
            }
        }
    }

    #[tokio::test]
    async fn test_two_peers_talk_through_dispatch() {
        let (a_out, b_in) = boundary();
        let (b_out, a_in) = boundary();
        let a = Arc::new(RpcChannel::new("a", a_out));
        let b = Arc::new(RpcChannel::new("b", b_out));
        let _a_loop = spawn_dispatch(Arc::clone(&a), a_in, Arc::new(Echo));
        let _b_loop = spawn_dispatch(Arc::clone(&b), b_in, Arc::new(Echo));

        let echoed = a
            .send("echo", json!({"n": 1}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(echoed, json!({"n": 1}));

        let err = b
            .send("explode", Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { .. }));
        assert_eq!(a.pending_count(), 0);
        assert_eq!(b.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_boundary_fails_send() {
        let (tx, rx) = boundary();
        drop(rx);
        let channel = RpcChannel::new("test", tx);

        let err = channel
            .send("ping", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::ChannelClosed);
        assert_eq!(channel.pending_count(), 0);
    }
}
