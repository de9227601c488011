//! PTY session registry
//!
//! Owns every live session, keyed by id, together with the window that owns
//! it. Each session's events are forwarded to its window by a dedicated task;
//! when a session ends the task reports back so the entry can be dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::pty::{
    Pty, PtyConnector, PtyError, PtyEvents, SpawnOptions, TerminalSize, DEFAULT_WRITE_BUFFER_SIZE,
};
use crate::server::{Envelope, PtyCreateRequest, SessionId, WindowId, WindowMessage};

/// Outbound queue of one window's connection
pub type WindowSender = mpsc::UnboundedSender<Envelope>;

/// Errors that can occur during manager operations
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Failed to create session: {0}")]
    Spawn(#[from] PtyError),

    #[error("Session manager has stopped")]
    Stopped,
}

/// Result type for manager operations
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Settings applied to every spawned session
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Working directory when none is inherited
    pub default_cwd: Option<PathBuf>,
    /// Input write buffer capacity per session
    pub write_buffer_size: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_cwd: None,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
        }
    }
}

/// Information about a live session for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub window: WindowId,
}

struct SessionEntry {
    window: WindowId,
    pty: Box<dyn Pty>,
}

/// Registry of all live PTY sessions
pub struct PtyManager {
    connector: Arc<dyn PtyConnector>,
    settings: ManagerSettings,
    sessions: HashMap<SessionId, SessionEntry>,
    next_id: SessionId,
    exited_tx: mpsc::UnboundedSender<SessionId>,
}

impl PtyManager {
    /// Create an empty registry.
    ///
    /// The returned receiver yields the id of every session whose process has
    /// ended; feed each one back through `handle_exit`.
    pub fn new(
        connector: Arc<dyn PtyConnector>,
        settings: ManagerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionId>) {
        let (exited_tx, exited_rx) = mpsc::unbounded_channel();
        (
            Self {
                connector,
                settings,
                sessions: HashMap::new(),
                next_id: 1,
                exited_tx,
            },
            exited_rx,
        )
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether `id` is live
    #[cfg(test)]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Spawn a session on behalf of `window`.
    ///
    /// PTY_CREATED is queued on `sender` before forwarding starts, so the
    /// window always learns the id before the session's first output.
    pub fn create_pty(
        &mut self,
        window: WindowId,
        sender: WindowSender,
        request: PtyCreateRequest,
    ) -> ManagerResult<SessionId> {
        let cwd = self.inherited_cwd(request.from_pty_id);
        let options = SpawnOptions::new(TerminalSize::new(request.columns, request.rows), request.env)
            .with_cwd(cwd.or_else(|| self.settings.default_cwd.clone()))
            .with_write_buffer_size(self.settings.write_buffer_size);

        let (pty, events) = self
            .connector
            .spawn(&request.command, &request.args, options)?;

        let id = self.next_id;
        self.next_id += 1;

        let _ = sender.send(Envelope::new(WindowMessage::PtyCreated { id }));
        tokio::spawn(forward_events(id, events, sender, self.exited_tx.clone()));
        self.sessions.insert(id, SessionEntry { window, pty });

        info!(session = id, window, command = %request.command, "PTY session created");
        Ok(id)
    }

    fn inherited_cwd(&self, from: Option<SessionId>) -> Option<PathBuf> {
        let from = from?;
        match self.sessions.get(&from) {
            Some(entry) => entry.pty.cwd(),
            None => {
                debug!(session = from, "Session to inherit cwd from is gone");
                None
            }
        }
    }

    /// Queue input for a session
    pub fn write(&self, id: SessionId, data: &str) {
        match self.sessions.get(&id) {
            Some(entry) => {
                if let Err(e) = entry.pty.write(data) {
                    warn!(session = id, "Dropping input: {}", e);
                }
            }
            None => warn!(session = id, "Input for unknown session dropped"),
        }
    }

    /// Resize a session
    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) {
        match self.sessions.get(&id) {
            Some(entry) => {
                if let Err(e) = entry.pty.resize(cols, rows) {
                    warn!(session = id, "Resize failed: {}", e);
                }
            }
            None => warn!(session = id, "Resize for unknown session dropped"),
        }
    }

    /// Grant a session's window `size` more output characters
    pub fn permit_output(&self, id: SessionId, size: u64) {
        match self.sessions.get(&id) {
            Some(entry) => entry
                .pty
                .permitted_data_size(i64::try_from(size).unwrap_or(i64::MAX)),
            None => warn!(session = id, "Output buffer size for unknown session dropped"),
        }
    }

    /// Destroy and deregister a session. Unknown ids are ignored.
    pub fn close_pty(&mut self, id: SessionId) {
        match self.sessions.remove(&id) {
            Some(entry) => {
                entry.pty.destroy();
                info!(session = id, window = entry.window, "PTY session closed");
            }
            None => debug!(session = id, "Close for unknown session ignored"),
        }
    }

    /// Deregister a session whose process has ended
    pub fn handle_exit(&mut self, id: SessionId) {
        if let Some(entry) = self.sessions.remove(&id) {
            entry.pty.destroy();
            info!(session = id, window = entry.window, "PTY session removed after exit");
        }
    }

    /// Destroy every session owned by `window`; returns how many were closed
    pub fn clean_up_window(&mut self, window: WindowId) -> usize {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.window == window)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            self.close_pty(*id);
        }
        if !ids.is_empty() {
            info!(window, count = ids.len(), "Cleaned up window sessions");
        }
        ids.len()
    }

    /// Live sessions sorted by id
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                window: entry.window,
            })
            .collect();
        sessions.sort_by_key(|info| info.id);
        sessions
    }

    /// Destroy every session
    pub fn shutdown_all(&mut self) {
        info!("Shutting down {} PTY sessions", self.session_count());
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.close_pty(id);
        }
    }
}

/// Forward one session's events to its window until the session ends
async fn forward_events(
    id: SessionId,
    mut events: PtyEvents,
    sender: WindowSender,
    exited_tx: mpsc::UnboundedSender<SessionId>,
) {
    loop {
        tokio::select! {
            biased;
            chunk = events.data.recv() => match chunk {
                Some(data) => {
                    let _ = sender.send(Envelope::new(WindowMessage::PtyOutput { id, data }));
                }
                None => break,
            },
            Some(change) = events.buffer_size.recv() => {
                let _ = sender.send(Envelope::new(WindowMessage::PtyInputBufferSizeChange {
                    id,
                    total_buffer_size: change.total_buffer_size as u64,
                    available_delta: change.available_delta,
                }));
            }
        }
    }

    match events.exit.await {
        Ok(exit) => debug!(session = id, ?exit, "PTY process exited"),
        Err(_) => debug!(session = id, "PTY exit notification lost"),
    }

    let _ = sender.send(Envelope::new(WindowMessage::PtyClose { id }));
    let _ = exited_tx.send(id);
}
