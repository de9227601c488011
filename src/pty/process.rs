//! Native PTY sessions
//!
//! Handles spawning processes with PTY terminal emulation, including:
//! - Full environment replacement and optional working directory
//! - Non-blocking input through a writer thread with buffer accounting
//! - Output flow control driven by the consumer's permitted size
//! - Idempotent teardown and a single exit notification

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::connector::{
    event_channel, BufferSizeChange, ExitReason, Pty, PtyConnector, PtyError, PtyEventSenders,
    PtyEvents, PtyExit, PtyResult, SpawnOptions, TerminalSize, DEFAULT_WRITE_BUFFER_SIZE,
    INITIAL_PERMITTED_DATA_SIZE,
};
use super::utf8::Utf8Accumulator;

/// Size of a single read from the PTY master
const READ_CHUNK_SIZE: usize = 4096;

/// Output chunks buffered between the reader thread and the consumer
const DATA_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connector backed by the platform's native PTY implementation
#[derive(Debug, Default, Clone)]
pub struct NativePtyConnector;

impl NativePtyConnector {
    pub fn new() -> Self {
        Self
    }
}

impl PtyConnector for NativePtyConnector {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> PtyResult<(Box<dyn Pty>, PtyEvents)> {
        let (pty, events) = LocalPty::spawn(command, args, options)?;
        Ok((Box::new(pty), events))
    }
}

/// Output budget shared between the session handle and its reader thread
#[derive(Debug)]
struct FlowControl {
    state: Mutex<FlowState>,
    resumed: Condvar,
}

#[derive(Debug)]
struct FlowState {
    permitted: i64,
    closed: bool,
    /// The child is gone; remaining output drains without a budget
    exited: bool,
}

impl FlowControl {
    fn new(permitted: i64) -> Self {
        Self {
            state: Mutex::new(FlowState {
                permitted,
                closed: false,
                exited: false,
            }),
            resumed: Condvar::new(),
        }
    }

    fn permit(&self, size: i64) {
        let mut state = lock(&self.state);
        let was_paused = state.permitted <= 0;
        state.permitted = size;
        if was_paused && size > 0 {
            self.resumed.notify_all();
        }
    }

    fn consume(&self, chars: usize) {
        let mut state = lock(&self.state);
        state.permitted = state.permitted.saturating_sub(chars as i64);
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).permitted <= 0
    }

    /// Block until output may flow. Returns false once the session is closed.
    fn wait_for_permit(&self) -> bool {
        let mut state = lock(&self.state);
        while state.permitted <= 0 && !state.closed && !state.exited {
            state = self
                .resumed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !state.closed
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.resumed.notify_all();
    }

    fn child_exited(&self) {
        lock(&self.state).exited = true;
        self.resumed.notify_all();
    }
}

/// Input bytes queued for the writer thread
#[derive(Debug)]
struct WriteBuffer {
    capacity: usize,
    queued: AtomicUsize,
    changes: mpsc::UnboundedSender<BufferSizeChange>,
}

impl WriteBuffer {
    fn available(&self) -> usize {
        self.capacity
            .saturating_sub(self.queued.load(Ordering::SeqCst))
    }

    fn queue(&self, len: usize) {
        self.queued.fetch_add(len, Ordering::SeqCst);
        self.notify(-(len as i64));
    }

    fn drain(&self, len: usize) {
        self.queued.fetch_sub(len, Ordering::SeqCst);
        self.notify(len as i64);
    }

    fn notify(&self, available_delta: i64) {
        let _ = self.changes.send(BufferSizeChange {
            total_buffer_size: self.capacity,
            available_delta,
        });
    }
}

/// A process running on a pseudo-terminal owned by this process
pub struct LocalPty {
    pid: Option<u32>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    size: Mutex<TerminalSize>,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    write_buffer: Arc<WriteBuffer>,
    flow: Arc<FlowControl>,
    destroyed: Arc<AtomicBool>,
}

impl LocalPty {
    /// Spawn `command` on a new PTY.
    ///
    /// The returned events carry the session's output, input buffer changes
    /// and its single exit notification.
    pub fn spawn(
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> PtyResult<(Self, PtyEvents)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(options.size.to_pty_size())
            .map_err(|e| PtyError::OpenFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.env_clear();
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &options.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("{}: {}", command, e)))?;
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = match pair.master.try_clone_reader() {
            Ok(reader) => reader,
            Err(e) => {
                terminate_child(child);
                return Err(PtyError::SystemError(e.to_string()));
            }
        };
        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(e) => {
                terminate_child(child);
                return Err(PtyError::SystemError(e.to_string()));
            }
        };

        let (senders, events) = event_channel(DATA_CHANNEL_CAPACITY);
        let PtyEventSenders {
            data,
            buffer_size,
            exit,
        } = senders;

        let write_buffer = Arc::new(WriteBuffer {
            capacity: options
                .write_buffer_size
                .unwrap_or(DEFAULT_WRITE_BUFFER_SIZE),
            queued: AtomicUsize::new(0),
            changes: buffer_size,
        });
        let flow = Arc::new(FlowControl::new(INITIAL_PERMITTED_DATA_SIZE));
        let destroyed = Arc::new(AtomicBool::new(false));
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        spawn_write_loop(writer, input_rx, Arc::clone(&write_buffer));

        let reader_flow = Arc::clone(&flow);
        let read_thread = std::thread::spawn(move || read_loop(reader, data, &reader_flow));

        let exit_flow = Arc::clone(&flow);
        let exit_destroyed = Arc::clone(&destroyed);
        std::thread::spawn(move || {
            let exit_code = wait_for_child(child);
            // Release a reader held back by an exhausted budget
            exit_flow.child_exited();
            let reason = read_thread.join().unwrap_or(ExitReason::Unknown);
            report_exit(exit_code, reason, &exit_destroyed, exit);
        });

        debug!(?pid, command, "PTY process spawned");

        Ok((
            Self {
                pid,
                master: Mutex::new(Some(pair.master)),
                killer: Mutex::new(killer),
                size: Mutex::new(options.size),
                input_tx,
                write_buffer,
                flow,
                destroyed,
            },
            events,
        ))
    }

    /// Current terminal size
    pub fn size(&self) -> TerminalSize {
        *lock(&self.size)
    }

    /// Whether output is held back waiting for the consumer
    pub fn is_paused(&self) -> bool {
        self.flow.is_paused()
    }

    /// Whether `destroy` has been called
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Pty for LocalPty {
    fn write(&self, data: &str) -> PtyResult<()> {
        if self.is_destroyed() {
            return Err(PtyError::ProcessExited);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.write_buffer.queue(data.len());
        self.input_tx
            .send(data.as_bytes().to_vec())
            .map_err(|_| PtyError::WriteFailed("writer thread has stopped".to_string()))
    }

    fn resize(&self, cols: u16, rows: u16) -> PtyResult<()> {
        let new_size = TerminalSize::new(cols, rows);
        let mut size = lock(&self.size);
        if *size == new_size {
            return Ok(());
        }

        let master = lock(&self.master);
        let master = master.as_ref().ok_or(PtyError::ProcessExited)?;
        master
            .resize(new_size.to_pty_size())
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        *size = new_size;
        Ok(())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = lock(&self.killer).kill() {
            // Already gone; the reader thread still reports the exit.
            debug!(pid = ?self.pid, "Kill failed: {}", e);
        }
        self.flow.close();
        lock(&self.master).take();
        debug!(pid = ?self.pid, "PTY process destroyed");
    }

    fn available_write_buffer_size(&self) -> usize {
        self.write_buffer.available()
    }

    fn permitted_data_size(&self, size: i64) {
        self.flow.permit(size);
    }

    fn cwd(&self) -> Option<PathBuf> {
        if self.is_destroyed() {
            return None;
        }
        process_cwd(self.pid?)
    }
}

impl Drop for LocalPty {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(target_os = "linux")]
fn process_cwd(pid: u32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{}/cwd", pid)).ok()
}

#[cfg(not(target_os = "linux"))]
fn process_cwd(_pid: u32) -> Option<PathBuf> {
    None
}

fn terminate_child(mut child: Box<dyn Child + Send + Sync>) {
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_write_loop(
    mut writer: Box<dyn Write + Send>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    write_buffer: Arc<WriteBuffer>,
) {
    std::thread::spawn(move || {
        while let Some(input) = input_rx.blocking_recv() {
            let result = writer.write_all(&input).and_then(|_| writer.flush());
            write_buffer.drain(input.len());
            if let Err(e) = result {
                debug!("PTY writer stopped: {}", e);
                break;
            }
        }
    });
}

/// Pump output to `data` until EOF, a read error, or teardown.
///
/// A chunk is held while the consumer's budget is exhausted; no further
/// reads happen meanwhile, which back-pressures the child through the PTY.
/// Once the child has exited the budget no longer applies and the remaining
/// output is drained, so `exit` still follows the last chunk.
fn read_loop(
    mut reader: Box<dyn Read + Send>,
    data: mpsc::Sender<String>,
    flow: &FlowControl,
) -> ExitReason {
    let mut buffer = [0u8; READ_CHUNK_SIZE];
    let mut decoder = Utf8Accumulator::new();

    let reason = loop {
        match reader.read(&mut buffer) {
            Ok(0) => break ExitReason::Normal,
            Ok(n) => {
                let text = decoder.push(&buffer[..n]);
                if text.is_empty() {
                    continue;
                }
                if !flow.wait_for_permit() {
                    break ExitReason::Killed;
                }
                flow.consume(text.chars().count());
                if data.blocking_send(text).is_err() {
                    break ExitReason::Unknown;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // Linux reports EIO on the master once the slave side is gone.
            Err(_) => break ExitReason::Normal,
        }
    };

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = data.blocking_send(tail);
    }
    reason
}

fn wait_for_child(mut child: Box<dyn Child + Send + Sync>) -> Option<u32> {
    match child.wait() {
        Ok(status) => Some(status.exit_code()),
        Err(e) => {
            warn!("Failed to wait for PTY child: {}", e);
            None
        }
    }
}

fn report_exit(
    exit_code: Option<u32>,
    reason: ExitReason,
    destroyed: &AtomicBool,
    exit: tokio::sync::oneshot::Sender<PtyExit>,
) {
    let reason = if destroyed.load(Ordering::SeqCst) {
        ExitReason::Killed
    } else if exit_code.is_none() {
        ExitReason::Unknown
    } else {
        reason
    };

    let _ = exit.send(PtyExit { exit_code, reason });
}
