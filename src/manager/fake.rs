//! Scripted connector for deterministic session tests

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::pty::{
    event_channel, BufferSizeChange, ExitReason, Pty, PtyConnector, PtyError, PtyEventSenders,
    PtyEvents, PtyExit, PtyResult, SpawnOptions, DEFAULT_WRITE_BUFFER_SIZE,
};

type SharedSenders = Arc<Mutex<Option<PtyEventSenders>>>;

fn finish(senders: &SharedSenders, reason: ExitReason) {
    if let Some(senders) = senders.lock().unwrap().take() {
        drop(senders.data);
        let _ = senders.exit.send(PtyExit {
            exit_code: None,
            reason,
        });
    }
}

/// Test double standing in for a spawned process
pub struct FakePty {
    writes: Arc<Mutex<Vec<String>>>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    permitted: Arc<Mutex<Vec<i64>>>,
    destroyed: Arc<AtomicUsize>,
    cwd: Option<PathBuf>,
    senders: SharedSenders,
}

impl Pty for FakePty {
    fn write(&self, data: &str) -> PtyResult<()> {
        if self.destroyed.load(Ordering::SeqCst) > 0 {
            return Err(PtyError::ProcessExited);
        }
        self.writes.lock().unwrap().push(data.to_string());
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> PtyResult<()> {
        self.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        finish(&self.senders, ExitReason::Killed);
    }

    fn available_write_buffer_size(&self) -> usize {
        DEFAULT_WRITE_BUFFER_SIZE
    }

    fn permitted_data_size(&self, size: i64) {
        self.permitted.lock().unwrap().push(size);
    }

    fn cwd(&self) -> Option<PathBuf> {
        self.cwd.clone()
    }
}

/// What the test sees of one fake spawn
#[derive(Clone)]
pub struct Spawned {
    pub command: String,
    pub args: Vec<String>,
    pub options: SpawnOptions,
    pub writes: Arc<Mutex<Vec<String>>>,
    pub resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    pub permitted: Arc<Mutex<Vec<i64>>>,
    pub destroyed: Arc<AtomicUsize>,
    pub buffer_size: mpsc::UnboundedSender<BufferSizeChange>,
    senders: SharedSenders,
}

impl Spawned {
    /// Produce output as the child would
    pub async fn emit(&self, data: &str) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .as_ref()
            .map(|senders| senders.data.clone());
        if let Some(sender) = sender {
            sender.send(data.to_string()).await.unwrap();
        }
    }

    /// End the child on its own
    pub fn exit(&self) {
        finish(&self.senders, ExitReason::Normal);
    }
}

/// Connector handing out `FakePty`s. The command `missing` fails to spawn.
#[derive(Default)]
pub struct FakeConnector {
    pub spawned: Mutex<Vec<Spawned>>,
    /// Working directory every spawned fake reports
    pub cwd: Mutex<Option<PathBuf>>,
}

impl FakeConnector {
    pub fn spawned(&self, index: usize) -> Spawned {
        self.spawned.lock().unwrap()[index].clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

impl PtyConnector for FakeConnector {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> PtyResult<(Box<dyn Pty>, PtyEvents)> {
        if command == "missing" {
            return Err(PtyError::SpawnFailed("missing: not found".to_string()));
        }

        let (senders, events) = event_channel(16);
        let spawned = Spawned {
            command: command.to_string(),
            args: args.to_vec(),
            options,
            writes: Arc::default(),
            resizes: Arc::default(),
            permitted: Arc::default(),
            destroyed: Arc::default(),
            buffer_size: senders.buffer_size.clone(),
            senders: Arc::new(Mutex::new(Some(senders))),
        };
        let pty = FakePty {
            writes: Arc::clone(&spawned.writes),
            resizes: Arc::clone(&spawned.resizes),
            permitted: Arc::clone(&spawned.permitted),
            destroyed: Arc::clone(&spawned.destroyed),
            cwd: self.cwd.lock().unwrap().clone(),
            senders: Arc::clone(&spawned.senders),
        };
        self.spawned.lock().unwrap().push(spawned);
        Ok((Box::new(pty), events))
    }
}
