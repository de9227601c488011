//! Request/reply correlation over a window's message channel
//!
//! A request records the reply kind it waits for in a pending queue and then
//! sends. Inbound envelopes resolve the oldest pending entry of their kind,
//! one entry per reply. Envelopes nobody waits for go to the default handler
//! registered for their kind.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::server::{Envelope, ErrorCode, MessageKind, WindowMessage};

/// How long a synchronous request waits for its reply
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors seen by callers of the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Request abandoned: the connection closed before a reply arrived")]
    Abandoned,

    #[error("Connection is closed")]
    Closed,

    #[error("Backend error: {message}")]
    Remote {
        message: String,
        code: Option<ErrorCode>,
    },

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("{0:?} does not expect a reply")]
    NoReply(MessageKind),

    #[error("Unexpected reply {0:?}")]
    UnexpectedReply(MessageKind),

    #[error("Failed to connect: {0}")]
    Connect(String),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Runs inside `dispatch` on the reply, before the requester is woken
pub type ReplyHook = Box<dyn FnOnce(&WindowMessage) + Send>;

type Resolver = oneshot::Sender<BridgeResult<WindowMessage>>;

struct PendingEntry {
    expected: MessageKind,
    resolver: Resolver,
    on_reply: Option<ReplyHook>,
}

struct SyncSlot {
    expected: MessageKind,
    resolver: Resolver,
}

#[derive(Default)]
struct BridgeState {
    pending: VecDeque<PendingEntry>,
    sync_slot: Option<SyncSlot>,
    handlers: HashMap<MessageKind, mpsc::UnboundedSender<WindowMessage>>,
    closed: bool,
}

impl BridgeState {
    /// Remove the oldest entry waiting for `kind`
    fn take_pending(&mut self, kind: MessageKind) -> Option<PendingEntry> {
        let index = self.pending.iter().position(|entry| entry.expected == kind)?;
        self.pending.remove(index)
    }
}

/// Reply kind an inbound message answers; errors name it in `replyTo`
fn answered_kind(message: &WindowMessage) -> MessageKind {
    match message {
        WindowMessage::Error {
            reply_to: Some(reply_to),
            ..
        } => *reply_to,
        message => message.kind(),
    }
}

fn into_result(message: WindowMessage) -> BridgeResult<WindowMessage> {
    match message {
        WindowMessage::Error { message, code, .. } => Err(BridgeError::Remote { message, code }),
        message => Ok(message),
    }
}

/// Front-end end of one window's channel
#[derive(Clone)]
pub struct ChannelBridge {
    outbound: mpsc::UnboundedSender<Envelope>,
    state: Arc<Mutex<BridgeState>>,
    sync_lock: Arc<tokio::sync::Mutex<()>>,
    sync_timeout: Duration,
}

impl ChannelBridge {
    /// Create a bridge that sends on `outbound`
    pub fn new(outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            outbound,
            state: Arc::new(Mutex::new(BridgeState::default())),
            sync_lock: Arc::new(tokio::sync::Mutex::new(())),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    /// Bound synchronous requests by `sync_timeout`
    pub fn with_sync_timeout(mut self, sync_timeout: Duration) -> Self {
        self.sync_timeout = sync_timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a message that expects no reply
    pub fn send(&self, message: WindowMessage) -> BridgeResult<()> {
        if self.state().closed {
            return Err(BridgeError::Closed);
        }
        self.outbound
            .send(Envelope::new(message))
            .map_err(|_| BridgeError::Closed)
    }

    /// Send a request and wait for its reply
    pub async fn request(&self, message: WindowMessage) -> BridgeResult<WindowMessage> {
        self.request_with(message, None).await
    }

    /// Like `request`, running `on_reply` on the reply as it is dispatched.
    ///
    /// The hook sees the reply before any later envelope is dispatched.
    pub async fn request_with(
        &self,
        message: WindowMessage,
        on_reply: Option<ReplyHook>,
    ) -> BridgeResult<WindowMessage> {
        let kind = message.kind();
        let expected = kind.expected_reply().ok_or(BridgeError::NoReply(kind))?;
        let (resolver, reply) = oneshot::channel();

        {
            let mut state = self.state();
            if state.closed {
                return Err(BridgeError::Closed);
            }
            state.pending.push_back(PendingEntry {
                expected,
                resolver,
                on_reply,
            });
            if self.outbound.send(Envelope::new(message)).is_err() {
                state.pending.pop_back();
                return Err(BridgeError::Closed);
            }
        }
        debug!(?kind, ?expected, "Request sent");

        reply.await.map_err(|_| BridgeError::Abandoned)?
    }

    /// Send a synchronous request and block until its reply or the timeout.
    ///
    /// Synchronous requests are serialized and never enter the pending queue.
    pub async fn request_sync(&self, message: WindowMessage) -> BridgeResult<WindowMessage> {
        let kind = message.kind();
        let expected = kind.expected_reply().ok_or(BridgeError::NoReply(kind))?;

        let _guard = self.sync_lock.lock().await;
        let (resolver, reply) = oneshot::channel();
        {
            let mut state = self.state();
            if state.closed {
                return Err(BridgeError::Closed);
            }
            state.sync_slot = Some(SyncSlot { expected, resolver });
            if self.outbound.send(Envelope::sync(message)).is_err() {
                state.sync_slot = None;
                return Err(BridgeError::Closed);
            }
        }

        match timeout(self.sync_timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Abandoned),
            Err(_) => {
                self.state().sync_slot = None;
                warn!(?kind, "Synchronous request timed out");
                Err(BridgeError::Timeout(self.sync_timeout))
            }
        }
    }

    /// Route unmatched envelopes of `kind` to `handler`
    pub fn set_default_handler(
        &self,
        kind: MessageKind,
        handler: mpsc::UnboundedSender<WindowMessage>,
    ) {
        self.state().handlers.insert(kind, handler);
    }

    /// Stop routing unmatched envelopes of `kind`
    pub fn remove_default_handler(&self, kind: MessageKind) {
        self.state().handlers.remove(&kind);
    }

    /// Number of requests waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Deliver one inbound envelope
    pub fn dispatch(&self, envelope: Envelope) {
        let kind = envelope.kind();
        let mut state = self.state();

        let expected = answered_kind(&envelope.message);

        if envelope.sync {
            match state.sync_slot.take() {
                Some(slot) if slot.expected == expected => {
                    let _ = slot.resolver.send(into_result(envelope.message));
                }
                Some(slot) => {
                    // Late reply to an earlier request that timed out
                    debug!(?kind, waiting = ?slot.expected, "Dropped stale synchronous reply");
                    state.sync_slot = Some(slot);
                }
                None => debug!(?kind, "Synchronous reply with no request waiting"),
            }
            return;
        }

        if let Some(entry) = state.take_pending(expected) {
            drop(state);
            if let Some(hook) = entry.on_reply {
                hook(&envelope.message);
            }
            let _ = entry.resolver.send(into_result(envelope.message));
            return;
        }

        if let WindowMessage::Error { message, .. } = &envelope.message {
            warn!("Backend error: {}", message);
            return;
        }

        match state.handlers.get(&kind) {
            Some(handler) => {
                if handler.send(envelope.message).is_err() {
                    debug!(?kind, "Default handler gone");
                    state.handlers.remove(&kind);
                }
            }
            None => debug!(?kind, "No handler for message"),
        }
    }

    /// Mark the transport closed, abandoning every waiting request
    pub fn close(&self) {
        let mut state = self.state();
        if state.closed {
            return;
        }
        state.closed = true;
        let abandoned = state.pending.len() + usize::from(state.sync_slot.is_some());
        state.pending.clear();
        state.sync_slot = None;
        state.handlers.clear();
        debug!(abandoned, "Channel closed");
    }

    /// Whether the transport has closed
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}
