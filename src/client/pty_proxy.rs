//! Front-end proxy for backend PTY sessions
//!
//! `PtyIpcBridge` creates sessions through the channel bridge and routes
//! their output and lifecycle messages to per-session event streams.
//! `RemotePty` implements the same `Pty` trait as a local session, turning
//! each call into a message.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::bridge::{BridgeError, BridgeResult, ChannelBridge, ReplyHook};
use crate::pty::{
    event_channel, BufferSizeChange, ExitReason, Pty, PtyError, PtyEventSenders, PtyEvents,
    PtyExit, PtyResult, TerminalSize, DEFAULT_WRITE_BUFFER_SIZE,
};
use crate::server::{MessageKind, PtyCreateRequest, SessionId, WindowMessage};

/// Output chunks handed to a session's consumer ahead of its reads
const ROUTE_CAPACITY: usize = 256;

/// Input buffer accounting mirrored from the backend's change events
#[derive(Debug)]
struct WriteBudget {
    total: AtomicUsize,
    queued: AtomicI64,
}

impl WriteBudget {
    fn new() -> Self {
        Self {
            total: AtomicUsize::new(DEFAULT_WRITE_BUFFER_SIZE),
            queued: AtomicI64::new(0),
        }
    }

    fn apply(&self, change: BufferSizeChange) {
        self.total.store(change.total_buffer_size, Ordering::Relaxed);
        self.queued.fetch_sub(change.available_delta, Ordering::Relaxed);
    }

    fn available(&self) -> usize {
        let queued = usize::try_from(self.queued.load(Ordering::Relaxed)).unwrap_or(0);
        self.total.load(Ordering::Relaxed).saturating_sub(queued)
    }
}

/// Routing entry of one session. Dropping it ends the session's streams once
/// queued output has been delivered.
struct Route {
    output: mpsc::UnboundedSender<String>,
    buffer_size: mpsc::UnboundedSender<BufferSizeChange>,
    budget: Arc<WriteBudget>,
}

#[derive(Clone, Default)]
struct Routes(Arc<Mutex<HashMap<SessionId, Route>>>);

impl Routes {
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Route>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates remote sessions and routes their events
#[derive(Clone)]
pub struct PtyIpcBridge {
    bridge: ChannelBridge,
    routes: Routes,
}

impl PtyIpcBridge {
    /// Take over the PTY event kinds of `bridge`
    pub fn new(bridge: ChannelBridge) -> Self {
        let routes = Routes::default();
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in [
            MessageKind::PtyOutput,
            MessageKind::PtyClose,
            MessageKind::PtyInputBufferSizeChange,
        ] {
            bridge.set_default_handler(kind, tx.clone());
        }
        tokio::spawn(route_events(rx, routes.clone()));
        Self { bridge, routes }
    }

    /// Number of sessions whose events are still being routed
    pub fn session_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Ask the backend for a new session
    pub async fn create_pty(&self, request: PtyCreateRequest) -> BridgeResult<(RemotePty, PtyEvents)> {
        let size = TerminalSize::new(request.columns, request.rows);
        let (registered_tx, registered_rx) = oneshot::channel();

        // The route must exist before the next envelope is dispatched, or the
        // session's first output would find no route
        let routes = self.routes.clone();
        let hook: ReplyHook = Box::new(move |reply| {
            if let WindowMessage::PtyCreated { id } = reply {
                let (senders, events) = event_channel(ROUTE_CAPACITY);
                let PtyEventSenders {
                    data,
                    buffer_size,
                    exit,
                } = senders;
                let (output_tx, output_rx) = mpsc::unbounded_channel();
                tokio::spawn(deliver_output(*id, output_rx, data, exit));

                let budget = Arc::new(WriteBudget::new());
                routes.lock().insert(
                    *id,
                    Route {
                        output: output_tx,
                        buffer_size,
                        budget: Arc::clone(&budget),
                    },
                );
                let _ = registered_tx.send((events, budget));
            }
        });

        let reply = self
            .bridge
            .request_with(WindowMessage::PtyCreate(request), Some(hook))
            .await?;
        let WindowMessage::PtyCreated { id } = reply else {
            return Err(BridgeError::UnexpectedReply(reply.kind()));
        };
        let (events, budget) = registered_rx.await.map_err(|_| BridgeError::Abandoned)?;
        debug!(session = id, "Remote session created");

        let pty = RemotePty {
            id,
            bridge: self.bridge.clone(),
            size: Mutex::new(size),
            destroyed: AtomicBool::new(false),
            budget,
        };
        Ok((pty, events))
    }
}

/// Shared by every session; never waits on a consumer.
async fn route_events(mut rx: mpsc::UnboundedReceiver<WindowMessage>, routes: Routes) {
    while let Some(message) = rx.recv().await {
        match message {
            WindowMessage::PtyOutput { id, data } => match routes.lock().get(&id) {
                Some(route) => {
                    let _ = route.output.send(data);
                }
                None => debug!(session = id, "Output for unknown session dropped"),
            },
            WindowMessage::PtyInputBufferSizeChange {
                id,
                total_buffer_size,
                available_delta,
            } => {
                if let Some(route) = routes.lock().get(&id) {
                    let change = BufferSizeChange {
                        total_buffer_size: usize::try_from(total_buffer_size).unwrap_or(usize::MAX),
                        available_delta,
                    };
                    route.budget.apply(change);
                    let _ = route.buffer_size.send(change);
                }
            }
            WindowMessage::PtyClose { id } => {
                if routes.lock().remove(&id).is_none() {
                    debug!(session = id, "Close for unknown session");
                }
            }
            other => debug!(kind = ?other.kind(), "Ignoring message"),
        }
    }

    // The channel closed; no session will hear from the backend again
    routes.lock().clear();
}

/// Feed one session's output to its consumer, then report the session's end
async fn deliver_output(
    id: SessionId,
    mut output: mpsc::UnboundedReceiver<String>,
    data: mpsc::Sender<String>,
    exit: oneshot::Sender<PtyExit>,
) {
    while let Some(chunk) = output.recv().await {
        if data.send(chunk).await.is_err() {
            debug!(session = id, "Output consumer gone");
            break;
        }
    }
    drop(data);
    let _ = exit.send(PtyExit {
        exit_code: None,
        reason: ExitReason::Unknown,
    });
}

/// Handle to a session living in the backend
pub struct RemotePty {
    id: SessionId,
    bridge: ChannelBridge,
    size: Mutex<TerminalSize>,
    destroyed: AtomicBool,
    budget: Arc<WriteBudget>,
}

impl RemotePty {
    /// Backend id of the session
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Last size sent to the backend
    pub fn size(&self) -> TerminalSize {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Pty for RemotePty {
    fn write(&self, data: &str) -> PtyResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PtyError::ProcessExited);
        }
        self.bridge
            .send(WindowMessage::pty_input(self.id, data))
            .map_err(|e| PtyError::WriteFailed(e.to_string()))
    }

    fn resize(&self, cols: u16, rows: u16) -> PtyResult<()> {
        let mut size = self.size.lock().unwrap_or_else(PoisonError::into_inner);
        let new_size = TerminalSize::new(cols, rows);
        if *size == new_size {
            return Ok(());
        }
        self.bridge
            .send(WindowMessage::PtyResize {
                id: self.id,
                columns: cols,
                rows,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;
        *size = new_size;
        Ok(())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.bridge.send(WindowMessage::PtyCloseRequest { id: self.id }) {
            debug!(session = self.id, "Close request not sent: {}", e);
        }
    }

    fn available_write_buffer_size(&self) -> usize {
        self.budget.available()
    }

    fn permitted_data_size(&self, size: i64) {
        let size = u64::try_from(size).unwrap_or(0);
        if let Err(e) = self
            .bridge
            .send(WindowMessage::PtyOutputBufferSize { id: self.id, size })
        {
            debug!(session = self.id, "Output buffer size not sent: {}", e);
        }
    }

    fn cwd(&self) -> Option<PathBuf> {
        None
    }
}
