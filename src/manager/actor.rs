//! Task owning the session registry
//!
//! Every connection talks to the registry through a cloneable
//! `ManagerHandle`; commands are applied one at a time by a single task, so
//! the registry itself needs no locking.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::registry::{ManagerError, ManagerResult, PtyManager, SessionInfo, WindowSender};
use crate::server::{PtyCreateRequest, SessionId, WindowId};

/// Commands accepted by the manager task
#[derive(Debug)]
pub enum ManagerCommand {
    Create {
        window: WindowId,
        sender: WindowSender,
        request: PtyCreateRequest,
        reply: oneshot::Sender<ManagerResult<SessionId>>,
    },
    Input {
        id: SessionId,
        data: String,
    },
    Resize {
        id: SessionId,
        cols: u16,
        rows: u16,
    },
    PermitOutput {
        id: SessionId,
        size: u64,
    },
    Close {
        id: SessionId,
    },
    CleanUpWindow {
        window: WindowId,
        reply: oneshot::Sender<usize>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the manager task
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl ManagerHandle {
    fn send(&self, command: ManagerCommand) -> ManagerResult<()> {
        self.tx.send(command).map_err(|_| ManagerError::Stopped)
    }

    /// Spawn a session owned by `window`
    pub async fn create_pty(
        &self,
        window: WindowId,
        sender: WindowSender,
        request: PtyCreateRequest,
    ) -> ManagerResult<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Create {
            window,
            sender,
            request,
            reply,
        })?;
        rx.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Queue input for a session
    pub fn write(&self, id: SessionId, data: String) -> ManagerResult<()> {
        self.send(ManagerCommand::Input { id, data })
    }

    /// Resize a session
    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) -> ManagerResult<()> {
        self.send(ManagerCommand::Resize { id, cols, rows })
    }

    /// Grant a session more output
    pub fn permit_output(&self, id: SessionId, size: u64) -> ManagerResult<()> {
        self.send(ManagerCommand::PermitOutput { id, size })
    }

    /// Close a session
    pub fn close_pty(&self, id: SessionId) -> ManagerResult<()> {
        self.send(ManagerCommand::Close { id })
    }

    /// Close every session owned by `window`
    pub async fn clean_up_window(&self, window: WindowId) -> ManagerResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::CleanUpWindow { window, reply })?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Live sessions
    pub async fn list_sessions(&self) -> ManagerResult<Vec<SessionInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::List { reply })?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Close every session and stop the manager task
    pub async fn shutdown(&self) -> ManagerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Shutdown { reply })?;
        rx.await.map_err(|_| ManagerError::Stopped)
    }
}

/// Move `manager` onto its own task and return a handle to it
pub fn spawn_manager(
    manager: PtyManager,
    exited: mpsc::UnboundedReceiver<SessionId>,
) -> ManagerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(manager, rx, exited));
    ManagerHandle { tx }
}

async fn run(
    mut manager: PtyManager,
    mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
    mut exited: mpsc::UnboundedReceiver<SessionId>,
) {
    debug!("Session manager started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ManagerCommand::Shutdown { reply }) => {
                    manager.shutdown_all();
                    let _ = reply.send(());
                    break;
                }
                Some(command) => apply(&mut manager, command),
                None => {
                    manager.shutdown_all();
                    break;
                }
            },
            Some(id) = exited.recv() => manager.handle_exit(id),
        }
    }
    info!("Session manager stopped");
}

fn apply(manager: &mut PtyManager, command: ManagerCommand) {
    match command {
        ManagerCommand::Create {
            window,
            sender,
            request,
            reply,
        } => {
            let _ = reply.send(manager.create_pty(window, sender, request));
        }
        ManagerCommand::Input { id, data } => manager.write(id, &data),
        ManagerCommand::Resize { id, cols, rows } => manager.resize(id, cols, rows),
        ManagerCommand::PermitOutput { id, size } => manager.permit_output(id, size),
        ManagerCommand::Close { id } => manager.close_pty(id),
        ManagerCommand::CleanUpWindow { window, reply } => {
            let _ = reply.send(manager.clean_up_window(window));
        }
        ManagerCommand::List { reply } => {
            let _ = reply.send(manager.list_sessions());
        }
        ManagerCommand::Shutdown { reply } => {
            manager.shutdown_all();
            let _ = reply.send(());
        }
    }
}
