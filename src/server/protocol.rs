//! Protocol message definitions
//!
//! Defines the envelopes exchanged between a window (front-end) and the
//! backend. Every WebSocket text frame carries one JSON `Envelope`: a version,
//! an optional `sync` marker, and a `WindowMessage` tagged by its `type`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Current protocol version
/// Increment when making breaking changes to message format
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum supported protocol version
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Maximum input length (1MB)
pub const MAX_INPUT_LENGTH: usize = 1024 * 1024;

/// Maximum bulk file chunk (4MB)
pub const MAX_BULK_CHUNK_LENGTH: usize = 4 * 1024 * 1024;

/// Backend-assigned PTY session identifier
pub type SessionId = u32;

/// Backend-assigned identifier of a connected window
pub type WindowId = u64;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Protocol version {0} not supported (min: {MIN_PROTOCOL_VERSION}, current: {PROTOCOL_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Message Kinds
// ============================================================================

/// The closed set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    ConfigRequest,
    Config,
    ThemeListRequest,
    ThemeList,
    ThemeContentsRequest,
    ThemeContents,
    PtyCreate,
    PtyCreated,
    PtyInput,
    PtyOutput,
    PtyResize,
    PtyCloseRequest,
    PtyClose,
    PtyOutputBufferSize,
    PtyInputBufferSizeChange,
    DevToolsRequest,
    DevToolsStatus,
    ClipboardReadRequest,
    ClipboardRead,
    ClipboardWrite,
    WindowMinimizeRequest,
    WindowMaximizeRequest,
    WindowCloseRequest,
    NewWindow,
    NewTagRequest,
    NewTag,
    BulkFileCreate,
    BulkFileCreated,
    BulkFileWrite,
    BulkFileClose,
    BulkFileRef,
    BulkFileDeref,
    Error,
}

impl MessageKind {
    /// The reply kind a request of this kind is answered with, if any
    pub fn expected_reply(self) -> Option<MessageKind> {
        match self {
            MessageKind::ConfigRequest => Some(MessageKind::Config),
            MessageKind::ThemeListRequest => Some(MessageKind::ThemeList),
            MessageKind::ThemeContentsRequest => Some(MessageKind::ThemeContents),
            MessageKind::PtyCreate => Some(MessageKind::PtyCreated),
            MessageKind::ClipboardReadRequest => Some(MessageKind::ClipboardRead),
            MessageKind::NewTagRequest => Some(MessageKind::NewTag),
            MessageKind::BulkFileCreate => Some(MessageKind::BulkFileCreated),
            _ => None,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Theme entry returned by THEME_LIST
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThemeInfo {
    /// Identifier used in THEME_CONTENTS_REQUEST
    pub id: String,
    /// Display name
    pub name: String,
    /// Location on the backend host
    pub path: String,
}

/// Payload of PTY_CREATE
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PtyCreateRequest {
    /// Executable to run
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Initial terminal columns
    pub columns: u16,
    /// Initial terminal rows
    pub rows: u16,
    /// Complete environment for the child
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Session whose working directory the new session starts in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_pty_id: Option<SessionId>,
}

impl PtyCreateRequest {
    /// Create a request with the given command line and geometry
    pub fn new(command: impl Into<String>, args: Vec<String>, columns: u16, rows: u16) -> Self {
        Self {
            command: command.into(),
            args,
            columns,
            rows,
            env: HashMap::new(),
            from_pty_id: None,
        }
    }

    /// Set the child environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Inherit the working directory of another session
    pub fn from_pty(mut self, id: SessionId) -> Self {
        self.from_pty_id = Some(id);
        self
    }
}

/// Messages exchanged between a window and the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum WindowMessage {
    /// Ask for the application configuration
    ConfigRequest,

    /// Application configuration
    Config { config: serde_json::Value },

    /// Ask for the available themes
    ThemeListRequest,

    /// Available themes
    ThemeList { themes: Vec<ThemeInfo> },

    /// Ask for the raw contents of a theme
    ThemeContentsRequest { theme_id: String },

    /// Raw theme contents
    ThemeContents { theme_id: String, contents: String },

    /// Create a PTY session
    PtyCreate(PtyCreateRequest),

    /// Session created
    PtyCreated { id: SessionId },

    /// Input for a session
    PtyInput { id: SessionId, data: String },

    /// Output from a session (unsolicited)
    PtyOutput { id: SessionId, data: String },

    /// Resize a session
    PtyResize {
        id: SessionId,
        columns: u16,
        rows: u16,
    },

    /// Ask the backend to close a session
    PtyCloseRequest { id: SessionId },

    /// Session ended (unsolicited)
    PtyClose { id: SessionId },

    /// Output characters the window can currently accept for a session
    PtyOutputBufferSize { id: SessionId, size: u64 },

    /// Input buffer capacity changed (unsolicited)
    PtyInputBufferSizeChange {
        id: SessionId,
        total_buffer_size: u64,
        available_delta: i64,
    },

    /// Open or close the window's developer tools
    DevToolsRequest { open: bool },

    /// Developer tools state (unsolicited)
    DevToolsStatus { open: bool },

    /// Ask for the clipboard text
    ClipboardReadRequest,

    /// Clipboard text
    ClipboardRead { text: String },

    /// Replace the clipboard text
    ClipboardWrite { text: String },

    /// Minimize the sending window
    WindowMinimizeRequest,

    /// Toggle maximization of the sending window
    WindowMaximizeRequest,

    /// Close the sending window and everything it owns
    WindowCloseRequest,

    /// Ask the hosting application for a new window
    NewWindow,

    /// Allocate a unique tag
    NewTagRequest {
        #[serde(rename = "async")]
        is_async: bool,
    },

    /// Allocated tag
    NewTag { tag: String },

    /// Create a bulk file sink
    BulkFileCreate {
        #[serde(default)]
        metadata: HashMap<String, String>,
    },

    /// Bulk file created
    BulkFileCreated { identifier: Uuid },

    /// Append data to a bulk file
    BulkFileWrite { identifier: Uuid, data: Vec<u8> },

    /// Finish writing a bulk file
    BulkFileClose { identifier: Uuid, success: bool },

    /// Take a reference on a bulk file
    BulkFileRef { identifier: Uuid },

    /// Drop a reference on a bulk file
    BulkFileDeref { identifier: Uuid },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code for programmatic handling
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        /// Reply kind the failed request was waiting for
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageKind>,
    },
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Failed to spawn a session
    SpawnFailed,
    /// Referenced theme or bulk file does not exist
    NotFound,
    /// Backend-side I/O failure
    InternalError,
    /// Unsupported protocol version
    UnsupportedVersion,
}

impl WindowMessage {
    /// Kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            WindowMessage::ConfigRequest => MessageKind::ConfigRequest,
            WindowMessage::Config { .. } => MessageKind::Config,
            WindowMessage::ThemeListRequest => MessageKind::ThemeListRequest,
            WindowMessage::ThemeList { .. } => MessageKind::ThemeList,
            WindowMessage::ThemeContentsRequest { .. } => MessageKind::ThemeContentsRequest,
            WindowMessage::ThemeContents { .. } => MessageKind::ThemeContents,
            WindowMessage::PtyCreate(_) => MessageKind::PtyCreate,
            WindowMessage::PtyCreated { .. } => MessageKind::PtyCreated,
            WindowMessage::PtyInput { .. } => MessageKind::PtyInput,
            WindowMessage::PtyOutput { .. } => MessageKind::PtyOutput,
            WindowMessage::PtyResize { .. } => MessageKind::PtyResize,
            WindowMessage::PtyCloseRequest { .. } => MessageKind::PtyCloseRequest,
            WindowMessage::PtyClose { .. } => MessageKind::PtyClose,
            WindowMessage::PtyOutputBufferSize { .. } => MessageKind::PtyOutputBufferSize,
            WindowMessage::PtyInputBufferSizeChange { .. } => {
                MessageKind::PtyInputBufferSizeChange
            }
            WindowMessage::DevToolsRequest { .. } => MessageKind::DevToolsRequest,
            WindowMessage::DevToolsStatus { .. } => MessageKind::DevToolsStatus,
            WindowMessage::ClipboardReadRequest => MessageKind::ClipboardReadRequest,
            WindowMessage::ClipboardRead { .. } => MessageKind::ClipboardRead,
            WindowMessage::ClipboardWrite { .. } => MessageKind::ClipboardWrite,
            WindowMessage::WindowMinimizeRequest => MessageKind::WindowMinimizeRequest,
            WindowMessage::WindowMaximizeRequest => MessageKind::WindowMaximizeRequest,
            WindowMessage::WindowCloseRequest => MessageKind::WindowCloseRequest,
            WindowMessage::NewWindow => MessageKind::NewWindow,
            WindowMessage::NewTagRequest { .. } => MessageKind::NewTagRequest,
            WindowMessage::NewTag { .. } => MessageKind::NewTag,
            WindowMessage::BulkFileCreate { .. } => MessageKind::BulkFileCreate,
            WindowMessage::BulkFileCreated { .. } => MessageKind::BulkFileCreated,
            WindowMessage::BulkFileWrite { .. } => MessageKind::BulkFileWrite,
            WindowMessage::BulkFileClose { .. } => MessageKind::BulkFileClose,
            WindowMessage::BulkFileRef { .. } => MessageKind::BulkFileRef,
            WindowMessage::BulkFileDeref { .. } => MessageKind::BulkFileDeref,
            WindowMessage::Error { .. } => MessageKind::Error,
        }
    }

    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            WindowMessage::PtyCreate(request) => {
                if request.command.is_empty() {
                    return Err(ProtocolError::ValidationError(
                        "command cannot be empty".to_string(),
                    ));
                }
                validate_dimensions(request.columns, request.rows)
            }

            WindowMessage::PtyResize { columns, rows, .. } => validate_dimensions(*columns, *rows),

            WindowMessage::PtyInput { data, .. } => {
                if data.len() > MAX_INPUT_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "input exceeds maximum length of {} bytes",
                        MAX_INPUT_LENGTH
                    )));
                }
                Ok(())
            }

            WindowMessage::ThemeContentsRequest { theme_id } => {
                if theme_id.is_empty()
                    || theme_id.contains(['/', '\\'])
                    || theme_id.starts_with('.')
                {
                    return Err(ProtocolError::ValidationError(format!(
                        "invalid theme id: {:?}",
                        theme_id
                    )));
                }
                Ok(())
            }

            WindowMessage::BulkFileWrite { data, .. } => {
                if data.len() > MAX_BULK_CHUNK_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "bulk file chunk exceeds maximum length of {} bytes",
                        MAX_BULK_CHUNK_LENGTH
                    )));
                }
                Ok(())
            }

            _ => Ok(()),
        }
    }

    /// Create a PTY_OUTPUT message
    pub fn pty_output(id: SessionId, data: impl Into<String>) -> Self {
        WindowMessage::PtyOutput {
            id,
            data: data.into(),
        }
    }

    /// Create a PTY_INPUT message
    pub fn pty_input(id: SessionId, data: impl Into<String>) -> Self {
        WindowMessage::PtyInput {
            id,
            data: data.into(),
        }
    }

    /// Create an Error message with code
    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        WindowMessage::Error {
            message: message.into(),
            code: Some(code),
            reply_to: None,
        }
    }

    /// Create an Error message answering a request that expected `reply_to`
    pub fn reply_error(message: impl Into<String>, code: ErrorCode, reply_to: MessageKind) -> Self {
        WindowMessage::Error {
            message: message.into(),
            code: Some(code),
            reply_to: Some(reply_to),
        }
    }
}

fn validate_dimensions(cols: u16, rows: u16) -> ProtocolResult<()> {
    if cols == 0 {
        return Err(ProtocolError::ValidationError(
            "columns must be at least 1".to_string(),
        ));
    }
    if rows == 0 {
        return Err(ProtocolError::ValidationError(
            "rows must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Message Envelope
// ============================================================================

/// Protocol envelope wrapping every message on the channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Protocol version used by the sender
    #[serde(default = "default_version")]
    pub version: u32,
    /// Set on synchronous requests and their replies
    #[serde(default, skip_serializing_if = "is_false")]
    pub sync: bool,
    /// The actual message payload
    #[serde(flatten)]
    pub message: WindowMessage,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Envelope {
    /// Create an asynchronous envelope with the current protocol version
    pub fn new(message: WindowMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sync: false,
            message,
        }
    }

    /// Create a synchronous envelope
    pub fn sync(message: WindowMessage) -> Self {
        Self {
            sync: true,
            ..Self::new(message)
        }
    }

    /// Wrap a reply, carrying over the request's `sync` marker
    pub fn reply_to(request: &Envelope, message: WindowMessage) -> Self {
        Self {
            sync: request.sync,
            ..Self::new(message)
        }
    }

    /// Kind of the wrapped message
    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Parse and validate an envelope from JSON
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let envelope: Self = serde_json::from_str(json)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Validate the envelope and its contents
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.version < MIN_PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        self.message.validate()
    }

    /// Serialize the envelope to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<ProtocolError> for WindowMessage {
    fn from(err: ProtocolError) -> Self {
        let code = match &err {
            ProtocolError::SerializationError(_) => ErrorCode::InvalidMessage,
            ProtocolError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            ProtocolError::ValidationError(_) => ErrorCode::InvalidMessage,
        };
        WindowMessage::error_with_code(err.to_string(), code)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Wire Shape Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_pty_create_wire_shape() {
        let json = r#"{
            "type": "PTY_CREATE",
            "command": "/bin/sh",
            "args": ["-l"],
            "columns": 80,
            "rows": 24,
            "env": {"TERM": "xterm-256color"},
            "fromPtyId": 3
        }"#;
        let envelope = Envelope::from_json(json).unwrap();
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert!(!envelope.sync);

        match envelope.message {
            WindowMessage::PtyCreate(request) => {
                assert_eq!(request.command, "/bin/sh");
                assert_eq!(request.args, vec!["-l".to_string()]);
                assert_eq!(request.columns, 80);
                assert_eq!(request.rows, 24);
                assert_eq!(request.env.get("TERM").unwrap(), "xterm-256color");
                assert_eq!(request.from_pty_id, Some(3));
            }
            other => panic!("Expected PtyCreate, got {:?}", other),
        }
    }

    #[test]
    fn test_pty_create_without_from_pty_id() {
        let json = r#"{"type": "PTY_CREATE", "command": "sh", "columns": 80, "rows": 24}"#;
        let envelope = Envelope::from_json(json).unwrap();
        match envelope.message {
            WindowMessage::PtyCreate(request) => {
                assert!(request.from_pty_id.is_none());
                assert!(request.args.is_empty());
                assert!(request.env.is_empty());
            }
            other => panic!("Expected PtyCreate, got {:?}", other),
        }

        let json = serde_json::to_string(&WindowMessage::PtyCreate(PtyCreateRequest::new(
            "sh",
            vec![],
            80,
            24,
        )))
        .unwrap();
        assert!(!json.contains("fromPtyId"));
    }

    #[test]
    fn test_input_buffer_size_change_field_names() {
        let msg = WindowMessage::PtyInputBufferSizeChange {
            id: 7,
            total_buffer_size: 65536,
            available_delta: -12,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"PTY_INPUT_BUFFER_SIZE_CHANGE\""));
        assert!(json.contains("\"totalBufferSize\":65536"));
        assert!(json.contains("\"availableDelta\":-12"));
    }

    #[test]
    fn test_pty_output_serialization() {
        let msg = WindowMessage::pty_output(1, "Hello, World!\n");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"PTY_OUTPUT\""));
        assert!(json.contains("\"data\":\"Hello, World!\\n\""));
    }

    #[test]
    fn test_new_tag_request_async_field() {
        let json = serde_json::to_string(&WindowMessage::NewTagRequest { is_async: true }).unwrap();
        assert_eq!(json, r#"{"type":"NEW_TAG_REQUEST","async":true}"#);
    }

    #[test]
    fn test_unit_variant_serialization() {
        let json = serde_json::to_string(&WindowMessage::ThemeListRequest).unwrap();
        assert_eq!(json, r#"{"type":"THEME_LIST_REQUEST"}"#);
    }

    #[test]
    fn test_error_serialization() {
        let msg = WindowMessage::reply_error("no such file", ErrorCode::SpawnFailed, MessageKind::PtyCreated);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ERROR\""));
        assert!(json.contains("\"code\":\"spawn_failed\""));
        assert!(json.contains("\"replyTo\":\"PTY_CREATED\""));
    }

    // -------------------------------------------------------------------------
    // Kind Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_every_reply_kind_is_distinct() {
        let requests = [
            MessageKind::ConfigRequest,
            MessageKind::ThemeListRequest,
            MessageKind::ThemeContentsRequest,
            MessageKind::PtyCreate,
            MessageKind::ClipboardReadRequest,
            MessageKind::NewTagRequest,
            MessageKind::BulkFileCreate,
        ];
        let mut replies: Vec<MessageKind> = requests
            .iter()
            .map(|kind| kind.expected_reply().unwrap())
            .collect();
        let total = replies.len();
        replies.sort_by_key(|kind| format!("{:?}", kind));
        replies.dedup();
        assert_eq!(replies.len(), total);
    }

    #[test]
    fn test_fire_and_forget_kinds_have_no_reply() {
        assert!(MessageKind::PtyInput.expected_reply().is_none());
        assert!(MessageKind::PtyResize.expected_reply().is_none());
        assert!(MessageKind::PtyCloseRequest.expected_reply().is_none());
        assert!(MessageKind::PtyOutputBufferSize.expected_reply().is_none());
    }

    #[test]
    fn test_kind_matches_type_tag() {
        let msg = WindowMessage::PtyClose { id: 1 };
        let json = serde_json::to_value(&msg).unwrap();
        let kind: MessageKind = serde_json::from_value(json["type"].clone()).unwrap();
        assert_eq!(kind, msg.kind());
    }

    // -------------------------------------------------------------------------
    // Envelope Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_envelope_sync_marker() {
        let json = Envelope::sync(WindowMessage::NewTagRequest { is_async: false })
            .to_json()
            .unwrap();
        assert!(json.contains("\"sync\":true"));

        let json = Envelope::new(WindowMessage::ConfigRequest).to_json().unwrap();
        assert!(!json.contains("sync"));
        assert!(json.contains(&format!("\"version\":{}", PROTOCOL_VERSION)));
    }

    #[test]
    fn test_reply_carries_sync_marker() {
        let request = Envelope::sync(WindowMessage::NewTagRequest { is_async: false });
        let reply = Envelope::reply_to(
            &request,
            WindowMessage::NewTag {
                tag: "tag-1".to_string(),
            },
        );
        assert!(reply.sync);
    }

    #[test]
    fn test_envelope_version_validation() {
        let json = r#"{"version": 0, "type": "CONFIG_REQUEST"}"#;
        let result = Envelope::from_json(json);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not supported"));
    }

    #[test]
    fn test_bulk_file_write_envelope() {
        let identifier = Uuid::new_v4();
        let envelope = Envelope::new(WindowMessage::BulkFileWrite {
            identifier,
            data: vec![1, 2, 3],
        });
        let parsed = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"type": "PTY_EXPLODE", "id": 1}"#;
        assert!(Envelope::from_json(json).is_err());
    }

    // -------------------------------------------------------------------------
    // Validation Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_pty_create_empty_command() {
        let msg = WindowMessage::PtyCreate(PtyCreateRequest::new("", vec![], 80, 24));
        let result = msg.validate();
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_resize_invalid_dimensions() {
        let msg = WindowMessage::PtyResize {
            id: 1,
            columns: 0,
            rows: 24,
        };
        assert!(msg.validate().unwrap_err().to_string().contains("columns must be"));

        let msg = WindowMessage::PtyResize {
            id: 1,
            columns: 80,
            rows: 0,
        };
        assert!(msg.validate().unwrap_err().to_string().contains("rows must be"));
    }

    #[test]
    fn test_large_dimensions_accepted() {
        let msg = WindowMessage::PtyResize {
            id: 1,
            columns: 1000,
            rows: 400,
        };
        assert!(msg.validate().is_ok());

        let msg = WindowMessage::PtyCreate(PtyCreateRequest::new("sh", vec![], u16::MAX, u16::MAX));
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_input_max_length() {
        let msg = WindowMessage::pty_input(1, "x".repeat(MAX_INPUT_LENGTH + 1));
        assert!(msg
            .validate()
            .unwrap_err()
            .to_string()
            .contains("exceeds maximum length"));
    }

    #[test]
    fn test_theme_id_path_traversal_rejected() {
        for theme_id in ["", "../secrets", "a/b", ".hidden"] {
            let msg = WindowMessage::ThemeContentsRequest {
                theme_id: theme_id.to_string(),
            };
            assert!(msg.validate().is_err(), "{:?} should be rejected", theme_id);
        }
    }

    #[test]
    fn test_protocol_error_to_window_message() {
        let err = ProtocolError::ValidationError("test error".to_string());
        let msg: WindowMessage = err.into();

        match msg {
            WindowMessage::Error { message, code, .. } => {
                assert!(message.contains("test error"));
                assert_eq!(code, Some(ErrorCode::InvalidMessage));
            }
            _ => panic!("Expected Error message"),
        }
    }
}
