//! PTY capability contract
//!
//! `Pty` is the surface every terminal consumer talks to, whether the session
//! lives in this process (`LocalPty`) or behind the message channel
//! (`RemotePty`). Events are delivered as streams in `PtyEvents` rather than
//! callbacks so that ordering and back-pressure stay explicit.

use std::collections::HashMap;
use std::path::PathBuf;

use portable_pty::PtySize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Default capacity of the input write buffer, in bytes
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Output characters a fresh session may emit before the consumer has granted
/// any budget through `permitted_data_size`
pub const INITIAL_PERMITTED_DATA_SIZE: i64 = 64 * 1024;

/// Errors that can occur during PTY operations
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY: {0}")]
    OpenFailed(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Failed to write to PTY: {0}")]
    WriteFailed(String),

    #[error("Failed to resize PTY: {0}")]
    ResizeFailed(String),

    #[error("Process already exited")]
    ProcessExited,

    #[error("PTY system error: {0}")]
    SystemError(String),
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Terminal size configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Convert to portable-pty PtySize
    pub(crate) fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Everything `PtyConnector::spawn` needs besides the command line
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Initial geometry
    pub size: TerminalSize,
    /// Complete child environment. Nothing is inherited from this process.
    pub env: HashMap<String, String>,
    /// Working directory, `None` for the connector's default
    pub cwd: Option<PathBuf>,
    /// Capacity of the input write buffer, `None` for the default
    pub write_buffer_size: Option<usize>,
}

impl SpawnOptions {
    /// Create spawn options with the given geometry and environment
    pub fn new(size: TerminalSize, env: HashMap<String, String>) -> Self {
        Self {
            size,
            env,
            cwd: None,
            write_buffer_size: None,
        }
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Set the input write buffer capacity
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = Some(size);
        self
    }
}

/// Change in the input write buffer capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizeChange {
    /// Total capacity of the buffer
    pub total_buffer_size: usize,
    /// Signed change in available space since the previous notification
    pub available_delta: i64,
}

/// Reason for process exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Process exited on its own
    Normal,
    /// Process was killed by `destroy`
    Killed,
    /// Exit status could not be determined
    Unknown,
}

/// Emitted once when a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyExit {
    /// Exit code if available
    pub exit_code: Option<u32>,
    /// Exit reason
    pub reason: ExitReason,
}

/// Event streams of one session.
///
/// `data` ends before `exit` fires, so a consumer that drains `data` to
/// completion and then awaits `exit` observes every chunk exactly once.
#[derive(Debug)]
pub struct PtyEvents {
    /// Output chunks in the order the child produced them
    pub data: mpsc::Receiver<String>,
    /// Input write buffer capacity changes
    pub buffer_size: mpsc::UnboundedReceiver<BufferSizeChange>,
    /// Fires exactly once when the session ends
    pub exit: oneshot::Receiver<PtyExit>,
}

/// Sending halves matching a `PtyEvents`
#[derive(Debug)]
pub struct PtyEventSenders {
    pub data: mpsc::Sender<String>,
    pub buffer_size: mpsc::UnboundedSender<BufferSizeChange>,
    pub exit: oneshot::Sender<PtyExit>,
}

/// Create a connected pair of event senders and receivers
pub fn event_channel(data_capacity: usize) -> (PtyEventSenders, PtyEvents) {
    let (data_tx, data_rx) = mpsc::channel(data_capacity);
    let (buffer_tx, buffer_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = oneshot::channel();
    (
        PtyEventSenders {
            data: data_tx,
            buffer_size: buffer_tx,
            exit: exit_tx,
        },
        PtyEvents {
            data: data_rx,
            buffer_size: buffer_rx,
            exit: exit_rx,
        },
    )
}

/// A terminal session, local or remote
pub trait Pty: Send + Sync {
    /// Queue input for the child. Never blocks.
    fn write(&self, data: &str) -> PtyResult<()>;

    /// Change the terminal geometry. Unchanged dimensions are a no-op.
    fn resize(&self, cols: u16, rows: u16) -> PtyResult<()>;

    /// Terminate the child and release its resources. Idempotent.
    fn destroy(&self);

    /// Bytes that can currently be written without exceeding the input buffer
    fn available_write_buffer_size(&self) -> usize;

    /// Tell the source how many more output characters the consumer accepts
    fn permitted_data_size(&self, size: i64);

    /// Current working directory of the child, if it can be determined
    fn cwd(&self) -> Option<PathBuf>;
}

/// Spawns processes attached to a pseudo-terminal
pub trait PtyConnector: Send + Sync {
    /// Spawn `command`. Failure to start the process is reported here and
    /// never as a later event.
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> PtyResult<(Box<dyn Pty>, PtyEvents)>;
}
