//! Per-window message handling
//!
//! `Backend` holds the state shared by every connection; a
//! `ConnectionHandler` processes one window's inbound envelopes in order and
//! queues replies and pushes on that window's outbound queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::protocol::{Envelope, ErrorCode, ProtocolError, WindowId, WindowMessage};
use crate::config::{BackendConfig, ConfigError};
use crate::manager::{ManagerError, ManagerHandle, WindowSender};
use crate::services::{
    BulkFileError, BulkFileStore, SharedClipboard, TagAllocator, ThemeError, ThemeStore,
};

/// Window lifecycle events for the hosting application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    Opened { window: WindowId },
    Closed { window: WindowId },
    DevTools { window: WindowId, open: bool },
    Minimized { window: WindowId, minimized: bool },
    Maximized { window: WindowId, maximized: bool },
    NewWindowRequested { window: WindowId },
}

/// State shared by all connections
pub struct Backend {
    manager: ManagerHandle,
    app_settings: serde_json::Value,
    tags: TagAllocator,
    clipboard: SharedClipboard,
    themes: ThemeStore,
    bulk_files: BulkFileStore,
    window_events: broadcast::Sender<WindowEvent>,
    next_window: AtomicU64,
}

impl Backend {
    /// Build the shared state from `config`
    pub fn new(config: &BackendConfig, manager: ManagerHandle) -> Result<Self, ConfigError> {
        let (window_events, _) = broadcast::channel(64);
        Ok(Self {
            manager,
            app_settings: config.app_settings()?,
            tags: TagAllocator::new(),
            clipboard: SharedClipboard::from_mode(config.clipboard),
            themes: ThemeStore::new(config.themes_dir.clone()),
            bulk_files: BulkFileStore::new(config.bulk_file_dir()),
            window_events,
            next_window: AtomicU64::new(1),
        })
    }

    /// Session manager shared by all windows
    pub fn manager(&self) -> &ManagerHandle {
        &self.manager
    }

    /// Bulk file store shared by all windows
    pub fn bulk_files(&self) -> &BulkFileStore {
        &self.bulk_files
    }

    /// Subscribe to window lifecycle events
    pub fn subscribe_window_events(&self) -> broadcast::Receiver<WindowEvent> {
        self.window_events.subscribe()
    }

    fn emit(&self, event: WindowEvent) {
        // No subscribers is fine
        let _ = self.window_events.send(event);
    }

    fn allocate_window(&self) -> WindowId {
        self.next_window.fetch_add(1, Ordering::Relaxed)
    }
}

/// What the connection loop should do after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Continue,
    Close,
}

/// Presentation state of one window
#[derive(Debug, Clone, Copy, Default)]
struct WindowState {
    dev_tools_open: bool,
    minimized: bool,
    maximized: bool,
}

/// Handles the messages of a single window
pub struct ConnectionHandler {
    window: WindowId,
    backend: Arc<Backend>,
    outbound: WindowSender,
    state: WindowState,
    closed: bool,
}

impl ConnectionHandler {
    /// Register a new window whose outbound queue is `outbound`
    pub fn new(backend: Arc<Backend>, outbound: WindowSender) -> Self {
        let window = backend.allocate_window();
        backend.emit(WindowEvent::Opened { window });
        Self {
            window,
            backend,
            outbound,
            state: WindowState::default(),
            closed: false,
        }
    }

    /// Id of the window this handler serves
    pub fn window(&self) -> WindowId {
        self.window
    }

    fn push(&self, message: WindowMessage) {
        let _ = self.outbound.send(Envelope::new(message));
    }

    fn reply(&self, request: &Envelope, message: WindowMessage) {
        let _ = self.outbound.send(Envelope::reply_to(request, message));
    }

    /// Parse and handle one text frame
    pub async fn handle_text(&mut self, text: &str) -> HandleOutcome {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(window = self.window, "Invalid message: {}", e);
                self.push(ProtocolError::from(e).into());
                return HandleOutcome::Continue;
            }
        };

        if let Err(e) = envelope.validate() {
            warn!(window = self.window, kind = ?envelope.kind(), "Rejected message: {}", e);
            let code = match e {
                ProtocolError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
                _ => ErrorCode::InvalidMessage,
            };
            let error = match envelope.kind().expected_reply() {
                Some(reply_to) => WindowMessage::reply_error(e.to_string(), code, reply_to),
                None => WindowMessage::error_with_code(e.to_string(), code),
            };
            self.reply(&envelope, error);
            return HandleOutcome::Continue;
        }

        self.handle(envelope).await
    }

    /// Handle one validated envelope
    pub async fn handle(&mut self, envelope: Envelope) -> HandleOutcome {
        let window = self.window;
        debug!(window, kind = ?envelope.kind(), "Handling message");

        match &envelope.message {
            WindowMessage::ConfigRequest => {
                let config = self.backend.app_settings.clone();
                self.reply(&envelope, WindowMessage::Config { config });
            }

            WindowMessage::ThemeListRequest => match self.backend.themes.list() {
                Ok(themes) => self.reply(&envelope, WindowMessage::ThemeList { themes }),
                Err(e) => self.reply_failure(&envelope, e.to_string(), ErrorCode::InternalError),
            },

            WindowMessage::ThemeContentsRequest { theme_id } => {
                match self.backend.themes.contents(theme_id) {
                    Ok(contents) => self.reply(
                        &envelope,
                        WindowMessage::ThemeContents {
                            theme_id: theme_id.clone(),
                            contents,
                        },
                    ),
                    Err(e @ ThemeError::NotFound(_)) => {
                        self.reply_failure(&envelope, e.to_string(), ErrorCode::NotFound)
                    }
                    Err(e) => {
                        self.reply_failure(&envelope, e.to_string(), ErrorCode::InternalError)
                    }
                }
            }

            WindowMessage::PtyCreate(request) => {
                // On success the manager queues PTY_CREATED itself
                let result = self
                    .backend
                    .manager
                    .create_pty(window, self.outbound.clone(), request.clone())
                    .await;
                match result {
                    Ok(id) => debug!(window, session = id, "Created session for window"),
                    Err(e @ ManagerError::Spawn(_)) => {
                        warn!(window, command = %request.command, "{}", e);
                        self.reply_failure(&envelope, e.to_string(), ErrorCode::SpawnFailed);
                    }
                    Err(e) => self.reply_failure(&envelope, e.to_string(), ErrorCode::InternalError),
                }
            }

            WindowMessage::PtyInput { id, data } => {
                self.forward(self.backend.manager.write(*id, data.clone()));
            }

            WindowMessage::PtyResize { id, columns, rows } => {
                self.forward(self.backend.manager.resize(*id, *columns, *rows));
            }

            WindowMessage::PtyCloseRequest { id } => {
                self.forward(self.backend.manager.close_pty(*id));
            }

            WindowMessage::PtyOutputBufferSize { id, size } => {
                self.forward(self.backend.manager.permit_output(*id, *size));
            }

            WindowMessage::DevToolsRequest { open } => {
                self.state.dev_tools_open = *open;
                self.push(WindowMessage::DevToolsStatus { open: *open });
                self.backend.emit(WindowEvent::DevTools {
                    window,
                    open: *open,
                });
            }

            WindowMessage::ClipboardReadRequest => match self.backend.clipboard.read_text() {
                Ok(text) => self.reply(&envelope, WindowMessage::ClipboardRead { text }),
                Err(e) => self.reply_failure(&envelope, e.to_string(), ErrorCode::InternalError),
            },

            WindowMessage::ClipboardWrite { text } => {
                if let Err(e) = self.backend.clipboard.write_text(text) {
                    warn!(window, "{}", e);
                    self.push(WindowMessage::error_with_code(
                        e.to_string(),
                        ErrorCode::InternalError,
                    ));
                }
            }

            WindowMessage::WindowMinimizeRequest => {
                self.state.minimized = !self.state.minimized;
                self.backend.emit(WindowEvent::Minimized {
                    window,
                    minimized: self.state.minimized,
                });
            }

            WindowMessage::WindowMaximizeRequest => {
                self.state.maximized = !self.state.maximized;
                self.backend.emit(WindowEvent::Maximized {
                    window,
                    maximized: self.state.maximized,
                });
            }

            WindowMessage::WindowCloseRequest => {
                info!(window, "Window requested close");
                self.close().await;
                return HandleOutcome::Close;
            }

            WindowMessage::NewWindow => {
                self.backend.emit(WindowEvent::NewWindowRequested { window });
            }

            WindowMessage::NewTagRequest { .. } => {
                let tag = self.backend.tags.next_tag();
                self.reply(&envelope, WindowMessage::NewTag { tag });
            }

            WindowMessage::BulkFileCreate { metadata } => {
                match self.backend.bulk_files.create(window, metadata.clone()) {
                    Ok(identifier) => {
                        self.reply(&envelope, WindowMessage::BulkFileCreated { identifier })
                    }
                    Err(e) => {
                        self.reply_failure(&envelope, e.to_string(), ErrorCode::InternalError)
                    }
                }
            }

            WindowMessage::BulkFileWrite { identifier, data } => {
                let result = self.backend.bulk_files.write(*identifier, data);
                self.report_bulk_file(result.map(|_| ()));
            }

            WindowMessage::BulkFileClose {
                identifier,
                success,
            } => {
                let result = self.backend.bulk_files.close(*identifier, *success);
                self.report_bulk_file(result);
            }

            WindowMessage::BulkFileRef { identifier } => {
                let result = self.backend.bulk_files.add_ref(*identifier);
                self.report_bulk_file(result.map(|_| ()));
            }

            WindowMessage::BulkFileDeref { identifier } => {
                let result = self.backend.bulk_files.deref(*identifier);
                self.report_bulk_file(result.map(|_| ()));
            }

            WindowMessage::Error { message, .. } => {
                warn!(window, "Window reported error: {}", message);
            }

            // Kinds only the backend sends
            other => {
                warn!(window, kind = ?other.kind(), "Unexpected message from window");
                self.push(WindowMessage::error_with_code(
                    format!("{:?} is not accepted by the backend", other.kind()),
                    ErrorCode::InvalidMessage,
                ));
            }
        }

        HandleOutcome::Continue
    }

    /// Answer a failed request so the window's pending entry resolves
    fn reply_failure(&self, request: &Envelope, message: String, code: ErrorCode) {
        let error = match request.kind().expected_reply() {
            Some(reply_to) => WindowMessage::reply_error(message, code, reply_to),
            None => WindowMessage::error_with_code(message, code),
        };
        self.reply(request, error);
    }

    fn forward(&self, result: Result<(), ManagerError>) {
        if let Err(e) = result {
            warn!(window = self.window, "{}", e);
        }
    }

    fn report_bulk_file(&self, result: Result<(), BulkFileError>) {
        if let Err(e) = result {
            warn!(window = self.window, "{}", e);
            let code = match e {
                BulkFileError::NotFound(_) | BulkFileError::Closed(_) => ErrorCode::NotFound,
                BulkFileError::Io(_) => ErrorCode::InternalError,
            };
            self.push(WindowMessage::error_with_code(e.to_string(), code));
        }
    }

    /// Release everything the window owns. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let window = self.window;
        match self.backend.manager.clean_up_window(window).await {
            Ok(count) => debug!(window, sessions = count, "Released window sessions"),
            Err(e) => warn!(window, "{}", e),
        }
        let files = self.backend.bulk_files.release_window(window);
        if files > 0 {
            debug!(window, files, "Released window bulk files");
        }
        self.backend.emit(WindowEvent::Closed { window });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClipboardMode;
    use crate::manager::fake::FakeConnector;
    use crate::manager::{spawn_manager, ManagerSettings, PtyManager};
    use crate::server::{MessageKind, PtyCreateRequest};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Fixture {
        backend: Arc<Backend>,
        connector: Arc<FakeConnector>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("themes")).unwrap();
        std::fs::write(dir.path().join("themes/amber.css"), "body {}").unwrap();

        let config = BackendConfig::parse(&format!(
            r#"
            themes_dir = "{}"
            bulk_file_dir = "{}"
            clipboard = "memory"

            [app]
            font_size = 13
            "#,
            dir.path().join("themes").display(),
            dir.path().join("bulk").display(),
        ))
        .unwrap();
        assert_eq!(config.clipboard, ClipboardMode::Memory);

        let connector = Arc::new(FakeConnector::default());
        let (manager, exited) = PtyManager::new(connector.clone(), ManagerSettings::default());
        let backend = Backend::new(&config, spawn_manager(manager, exited)).unwrap();
        Fixture {
            backend: Arc::new(backend),
            connector,
            _dir: dir,
        }
    }

    fn connect(backend: &Arc<Backend>) -> (ConnectionHandler, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandler::new(Arc::clone(backend), tx), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("window queue closed")
    }

    #[tokio::test]
    async fn test_windows_get_distinct_ids() {
        let fixture = fixture();
        let (a, _) = connect(&fixture.backend);
        let (b, _) = connect(&fixture.backend);
        assert_eq!((a.window(), b.window()), (1, 2));
    }

    #[tokio::test]
    async fn test_config_request() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        handler.handle(Envelope::new(WindowMessage::ConfigRequest)).await;
        match next(&mut rx).await.message {
            WindowMessage::Config { config } => assert_eq!(config["font_size"], 13),
            other => panic!("Expected Config, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_theme_requests() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        handler.handle(Envelope::new(WindowMessage::ThemeListRequest)).await;
        match next(&mut rx).await.message {
            WindowMessage::ThemeList { themes } => assert_eq!(themes[0].id, "amber.css"),
            other => panic!("Expected ThemeList, got {:?}", other),
        }

        handler
            .handle(Envelope::new(WindowMessage::ThemeContentsRequest {
                theme_id: "missing.css".to_string(),
            }))
            .await;
        match next(&mut rx).await.message {
            WindowMessage::Error { code, reply_to, .. } => {
                assert_eq!(code, Some(ErrorCode::NotFound));
                assert_eq!(reply_to, Some(MessageKind::ThemeContents));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_connection() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        assert_eq!(handler.handle_text("not json").await, HandleOutcome::Continue);
        match next(&mut rx).await.message {
            WindowMessage::Error { code, .. } => assert_eq!(code, Some(ErrorCode::InvalidMessage)),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_create_answers_pending_reply() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        let text = r#"{"type":"PTY_CREATE","command":"sh","args":[],"columns":0,"rows":24,"env":{}}"#;
        handler.handle_text(text).await;
        match next(&mut rx).await.message {
            WindowMessage::Error { code, reply_to, .. } => {
                assert_eq!(code, Some(ErrorCode::InvalidMessage));
                assert_eq!(reply_to, Some(MessageKind::PtyCreated));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
        assert_eq!(fixture.connector.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_only_reaches_requester() {
        let fixture = fixture();
        let (mut requester, mut rx) = connect(&fixture.backend);
        let (_other, mut other_rx) = connect(&fixture.backend);

        requester
            .handle(Envelope::new(WindowMessage::PtyCreate(PtyCreateRequest::new(
                "missing",
                vec![],
                80,
                24,
            ))))
            .await;
        match next(&mut rx).await.message {
            WindowMessage::Error { code, reply_to, .. } => {
                assert_eq!(code, Some(ErrorCode::SpawnFailed));
                assert_eq!(reply_to, Some(MessageKind::PtyCreated));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_requests_reach_manager() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        handler
            .handle(Envelope::new(WindowMessage::PtyCreate(PtyCreateRequest::new(
                "sh",
                vec!["-l".to_string()],
                80,
                24,
            ))))
            .await;
        let id = match next(&mut rx).await.message {
            WindowMessage::PtyCreated { id } => id,
            other => panic!("Expected PtyCreated, got {:?}", other),
        };

        handler.handle(Envelope::new(WindowMessage::pty_input(id, "ls\n"))).await;
        handler
            .handle(Envelope::new(WindowMessage::PtyResize {
                id,
                columns: 100,
                rows: 30,
            }))
            .await;
        handler
            .handle(Envelope::new(WindowMessage::PtyOutputBufferSize { id, size: 512 }))
            .await;
        fixture.backend.manager().list_sessions().await.unwrap();

        let spawned = fixture.connector.spawned(0);
        assert_eq!(spawned.command, "sh");
        assert_eq!(spawned.args, vec!["-l"]);
        assert_eq!(*spawned.writes.lock().unwrap(), vec!["ls\n"]);
        assert_eq!(*spawned.resizes.lock().unwrap(), vec![(100, 30)]);
        assert_eq!(*spawned.permitted.lock().unwrap(), vec![512]);

        handler.handle(Envelope::new(WindowMessage::PtyCloseRequest { id })).await;
        assert_eq!(next(&mut rx).await.message, WindowMessage::PtyClose { id });
    }

    #[tokio::test]
    async fn test_new_tag_reply_keeps_sync_marker() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        handler
            .handle(Envelope::sync(WindowMessage::NewTagRequest { is_async: false }))
            .await;
        let first = next(&mut rx).await;
        assert!(first.sync);

        handler
            .handle(Envelope::new(WindowMessage::NewTagRequest { is_async: true }))
            .await;
        let second = next(&mut rx).await;
        assert!(!second.sync);
        assert_ne!(first.message, second.message);
    }

    #[tokio::test]
    async fn test_clipboard_is_shared_between_windows() {
        let fixture = fixture();
        let (mut a, _a_rx) = connect(&fixture.backend);
        let (mut b, mut b_rx) = connect(&fixture.backend);

        a.handle(Envelope::new(WindowMessage::ClipboardWrite {
            text: "copied".to_string(),
        }))
        .await;
        b.handle(Envelope::new(WindowMessage::ClipboardReadRequest)).await;
        assert_eq!(
            next(&mut b_rx).await.message,
            WindowMessage::ClipboardRead {
                text: "copied".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dev_tools_status_pushed() {
        let fixture = fixture();
        let mut events = fixture.backend.subscribe_window_events();
        let (mut handler, mut rx) = connect(&fixture.backend);
        assert_eq!(events.recv().await.unwrap(), WindowEvent::Opened { window: 1 });

        handler
            .handle(Envelope::new(WindowMessage::DevToolsRequest { open: true }))
            .await;
        assert_eq!(
            next(&mut rx).await.message,
            WindowMessage::DevToolsStatus { open: true }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WindowEvent::DevTools {
                window: 1,
                open: true
            }
        );
    }

    #[tokio::test]
    async fn test_window_state_events() {
        let fixture = fixture();
        let (mut handler, _rx) = connect(&fixture.backend);
        let mut events = fixture.backend.subscribe_window_events();

        handler.handle(Envelope::new(WindowMessage::WindowMaximizeRequest)).await;
        handler.handle(Envelope::new(WindowMessage::WindowMaximizeRequest)).await;
        handler.handle(Envelope::new(WindowMessage::WindowMinimizeRequest)).await;
        handler.handle(Envelope::new(WindowMessage::NewWindow)).await;

        let window = handler.window();
        assert_eq!(
            events.recv().await.unwrap(),
            WindowEvent::Maximized {
                window,
                maximized: true
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WindowEvent::Maximized {
                window,
                maximized: false
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WindowEvent::Minimized {
                window,
                minimized: true
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            WindowEvent::NewWindowRequested { window }
        );
    }

    #[tokio::test]
    async fn test_bulk_file_flow() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        let mut metadata = HashMap::new();
        metadata.insert("name".to_string(), "log.txt".to_string());
        handler
            .handle(Envelope::sync(WindowMessage::BulkFileCreate { metadata }))
            .await;
        let reply = next(&mut rx).await;
        assert!(reply.sync);
        let identifier = match reply.message {
            WindowMessage::BulkFileCreated { identifier } => identifier,
            other => panic!("Expected BulkFileCreated, got {:?}", other),
        };

        handler
            .handle(Envelope::new(WindowMessage::BulkFileWrite {
                identifier,
                data: b"payload".to_vec(),
            }))
            .await;
        handler
            .handle(Envelope::new(WindowMessage::BulkFileClose {
                identifier,
                success: true,
            }))
            .await;

        let info = fixture.backend.bulk_files().info(identifier).unwrap();
        assert_eq!(info.size, 7);
        assert!(info.closed);

        // Writing after close is reported, not fatal
        handler
            .handle(Envelope::new(WindowMessage::BulkFileWrite {
                identifier,
                data: b"late".to_vec(),
            }))
            .await;
        match next(&mut rx).await.message {
            WindowMessage::Error { code, .. } => assert_eq!(code, Some(ErrorCode::NotFound)),
            other => panic!("Expected Error, got {:?}", other),
        }

        handler
            .handle(Envelope::new(WindowMessage::BulkFileDeref { identifier }))
            .await;
        assert!(fixture.backend.bulk_files().info(identifier).is_none());
    }

    #[tokio::test]
    async fn test_window_close_releases_owned_resources() {
        let fixture = fixture();
        let (mut closing, mut closing_rx) = connect(&fixture.backend);
        let (mut staying, mut staying_rx) = connect(&fixture.backend);

        for _ in 0..3 {
            closing
                .handle(Envelope::new(WindowMessage::PtyCreate(PtyCreateRequest::new(
                    "sh",
                    vec![],
                    80,
                    24,
                ))))
                .await;
            next(&mut closing_rx).await;
        }
        staying
            .handle(Envelope::new(WindowMessage::PtyCreate(PtyCreateRequest::new(
                "sh",
                vec![],
                80,
                24,
            ))))
            .await;
        next(&mut staying_rx).await;

        closing
            .handle(Envelope::new(WindowMessage::BulkFileCreate {
                metadata: HashMap::new(),
            }))
            .await;
        next(&mut closing_rx).await;
        assert_eq!(fixture.backend.bulk_files().len(), 1);

        let outcome = closing
            .handle(Envelope::new(WindowMessage::WindowCloseRequest))
            .await;
        assert_eq!(outcome, HandleOutcome::Close);

        let sessions = fixture.backend.manager().list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].window, staying.window());
        assert!(fixture.backend.bulk_files().is_empty());

        // A second close is a no-op
        closing.close().await;
        assert_eq!(fixture.backend.manager().list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_only_kinds_rejected() {
        let fixture = fixture();
        let (mut handler, mut rx) = connect(&fixture.backend);

        handler.handle(Envelope::new(WindowMessage::PtyClose { id: 1 })).await;
        match next(&mut rx).await.message {
            WindowMessage::Error { code, .. } => assert_eq!(code, Some(ErrorCode::InvalidMessage)),
            other => panic!("Expected Error, got {:?}", other),
        }
    }
}
