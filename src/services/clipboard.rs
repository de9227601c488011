//! Clipboard access for CLIPBOARD_READ / CLIPBOARD_WRITE
//!
//! The backend owns the clipboard on behalf of its windows. The system
//! clipboard is reached through `arboard`; hosts without one (headless
//! servers, CI) get an in-memory clipboard shared by all windows.

use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::config::ClipboardMode;

#[derive(Error, Debug)]
#[error("Clipboard error: {0}")]
pub struct ClipboardError(String);

pub trait Clipboard: Send {
    fn read_text(&mut self) -> Result<String, ClipboardError>;
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// System clipboard backed by `arboard`
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let inner = arboard::Clipboard::new().map_err(|e| ClipboardError(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl Clipboard for SystemClipboard {
    fn read_text(&mut self) -> Result<String, ClipboardError> {
        self.inner
            .get_text()
            .map_err(|e| ClipboardError(e.to_string()))
    }

    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.inner
            .set_text(text.to_owned())
            .map_err(|e| ClipboardError(e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: String,
}

impl Clipboard for MemoryClipboard {
    fn read_text(&mut self) -> Result<String, ClipboardError> {
        Ok(self.text.clone())
    }

    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.text = text.to_owned();
        Ok(())
    }
}

/// Clipboard shared between connections
pub struct SharedClipboard {
    inner: Mutex<Box<dyn Clipboard>>,
}

impl SharedClipboard {
    pub fn new(clipboard: Box<dyn Clipboard>) -> Self {
        Self {
            inner: Mutex::new(clipboard),
        }
    }

    /// Build the clipboard selected by `mode`
    pub fn from_mode(mode: ClipboardMode) -> Self {
        match mode {
            ClipboardMode::Memory => Self::new(Box::<MemoryClipboard>::default()),
            ClipboardMode::System => match SystemClipboard::new() {
                Ok(clipboard) => Self::new(Box::new(clipboard)),
                Err(e) => {
                    warn!("System clipboard unavailable, using memory clipboard: {}", e);
                    Self::new(Box::<MemoryClipboard>::default())
                }
            },
        }
    }

    pub fn read_text(&self) -> Result<String, ClipboardError> {
        self.inner
            .lock()
            .map_err(|_| ClipboardError("clipboard lock poisoned".to_string()))?
            .read_text()
    }

    pub fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.inner
            .lock()
            .map_err(|_| ClipboardError("clipboard lock poisoned".to_string()))?
            .write_text(text)
    }
}
