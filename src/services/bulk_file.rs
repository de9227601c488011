//! Bulk file storage
//!
//! Large payloads produced by a window (downloads, inline images) are
//! streamed to the backend as BULK_FILE_WRITE chunks and stored on disk under
//! a uuid. Files are reference counted: the creator holds the first
//! reference, and a file is deleted once it is closed and unreferenced, or
//! when the window that created it closes.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::server::WindowId;

#[derive(Error, Debug)]
pub enum BulkFileError {
    #[error("Bulk file not found: {0}")]
    NotFound(Uuid),
    #[error("Bulk file already closed: {0}")]
    Closed(Uuid),
    #[error("Bulk file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BulkFileResult<T> = Result<T, BulkFileError>;

/// State of one stored file
#[derive(Debug)]
struct BulkFile {
    owner: WindowId,
    path: PathBuf,
    metadata: HashMap<String, String>,
    file: Option<File>,
    size: u64,
    success: Option<bool>,
    ref_count: u32,
}

/// Snapshot of a stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFileInfo {
    pub identifier: Uuid,
    pub path: PathBuf,
    pub metadata: HashMap<String, String>,
    pub size: u64,
    pub closed: bool,
    pub success: Option<bool>,
    pub ref_count: u32,
}

/// On-disk store of bulk files
#[derive(Debug)]
pub struct BulkFileStore {
    dir: PathBuf,
    files: Mutex<HashMap<Uuid, BulkFile>>,
}

impl BulkFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    fn files(&self) -> MutexGuard<'_, HashMap<Uuid, BulkFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty file owned by `owner`
    pub fn create(
        &self,
        owner: WindowId,
        metadata: HashMap<String, String>,
    ) -> BulkFileResult<Uuid> {
        std::fs::create_dir_all(&self.dir)?;

        let identifier = Uuid::new_v4();
        let path = self.dir.join(identifier.to_string());
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;

        self.files().insert(
            identifier,
            BulkFile {
                owner,
                path,
                metadata,
                file: Some(file),
                size: 0,
                success: None,
                ref_count: 1,
            },
        );
        debug!(%identifier, window = owner, "Bulk file created");
        Ok(identifier)
    }

    /// Append `data`
    pub fn write(&self, identifier: Uuid, data: &[u8]) -> BulkFileResult<()> {
        let mut files = self.files();
        let entry = files
            .get_mut(&identifier)
            .ok_or(BulkFileError::NotFound(identifier))?;
        let file = entry
            .file
            .as_mut()
            .ok_or(BulkFileError::Closed(identifier))?;
        file.write_all(data)?;
        entry.size += data.len() as u64;
        Ok(())
    }

    /// Finish writing. `success == false` marks the contents incomplete.
    pub fn close(&self, identifier: Uuid, success: bool) -> BulkFileResult<()> {
        let mut files = self.files();
        let entry = files
            .get_mut(&identifier)
            .ok_or(BulkFileError::NotFound(identifier))?;
        let mut file = entry.file.take().ok_or(BulkFileError::Closed(identifier))?;
        file.flush()?;
        entry.success = Some(success);

        if entry.ref_count == 0 {
            if let Some(entry) = files.remove(&identifier) {
                remove_file(&entry.path);
            }
        }
        Ok(())
    }

    /// Take a reference
    pub fn add_ref(&self, identifier: Uuid) -> BulkFileResult<u32> {
        let mut files = self.files();
        let entry = files
            .get_mut(&identifier)
            .ok_or(BulkFileError::NotFound(identifier))?;
        entry.ref_count += 1;
        Ok(entry.ref_count)
    }

    /// Drop a reference, deleting a closed file when none remain
    pub fn deref(&self, identifier: Uuid) -> BulkFileResult<u32> {
        let mut files = self.files();
        let entry = files
            .get_mut(&identifier)
            .ok_or(BulkFileError::NotFound(identifier))?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        let remaining = entry.ref_count;

        if remaining == 0 && entry.file.is_none() {
            if let Some(entry) = files.remove(&identifier) {
                remove_file(&entry.path);
                debug!(%identifier, "Bulk file released");
            }
        }
        Ok(remaining)
    }

    /// Delete every file created by `owner`; returns how many were removed
    pub fn release_window(&self, owner: WindowId) -> usize {
        let mut files = self.files();
        let ids: Vec<Uuid> = files
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(entry) = files.remove(id) {
                remove_file(&entry.path);
            }
        }
        ids.len()
    }

    /// Snapshot of a file
    pub fn info(&self, identifier: Uuid) -> Option<BulkFileInfo> {
        self.files().get(&identifier).map(|entry| BulkFileInfo {
            identifier,
            path: entry.path.clone(),
            metadata: entry.metadata.clone(),
            size: entry.size,
            closed: entry.file.is_none(),
            success: entry.success,
            ref_count: entry.ref_count,
        })
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove bulk file {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_close() {
        let dir = tempdir().unwrap();
        let store = BulkFileStore::new(dir.path());

        let mut metadata = HashMap::new();
        metadata.insert("mimeType".to_string(), "image/png".to_string());
        let id = store.create(1, metadata).unwrap();

        store.write(id, b"hello ").unwrap();
        store.write(id, b"world").unwrap();
        store.close(id, true).unwrap();

        let info = store.info(id).unwrap();
        assert_eq!(info.size, 11);
        assert!(info.closed);
        assert_eq!(info.success, Some(true));
        assert_eq!(info.metadata.get("mimeType").unwrap(), "image/png");
        assert_eq!(std::fs::read(&info.path).unwrap(), b"hello world");
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempdir().unwrap();
        let store = BulkFileStore::new(dir.path());
        let id = store.create(1, HashMap::new()).unwrap();
        store.close(id, false).unwrap();

        assert!(matches!(store.write(id, b"late"), Err(BulkFileError::Closed(_))));
        assert!(matches!(store.close(id, true), Err(BulkFileError::Closed(_))));
    }

    #[test]
    fn test_unknown_identifier() {
        let dir = tempdir().unwrap();
        let store = BulkFileStore::new(dir.path());
        let id = Uuid::new_v4();
        assert!(matches!(store.write(id, b"x"), Err(BulkFileError::NotFound(_))));
        assert!(matches!(store.add_ref(id), Err(BulkFileError::NotFound(_))));
    }

    #[test]
    fn test_ref_counting_deletes_after_close() {
        let dir = tempdir().unwrap();
        let store = BulkFileStore::new(dir.path());
        let id = store.create(1, HashMap::new()).unwrap();
        let path = store.info(id).unwrap().path;

        assert_eq!(store.add_ref(id).unwrap(), 2);
        store.close(id, true).unwrap();
        assert_eq!(store.deref(id).unwrap(), 1);
        assert!(path.exists());

        assert_eq!(store.deref(id).unwrap(), 0);
        assert!(!path.exists());
        assert!(store.info(id).is_none());
    }

    #[test]
    fn test_unreferenced_file_deleted_on_close() {
        let dir = tempdir().unwrap();
        let store = BulkFileStore::new(dir.path());
        let id = store.create(1, HashMap::new()).unwrap();
        let path = store.info(id).unwrap().path;

        assert_eq!(store.deref(id).unwrap(), 0);
        assert!(path.exists());

        store.close(id, true).unwrap();
        assert!(!path.exists());
        assert!(store.is_empty());
    }

    #[test]
    fn test_release_window_only_touches_owner() {
        let dir = tempdir().unwrap();
        let store = BulkFileStore::new(dir.path());
        let a = store.create(1, HashMap::new()).unwrap();
        let b = store.create(1, HashMap::new()).unwrap();
        let c = store.create(2, HashMap::new()).unwrap();

        assert_eq!(store.release_window(1), 2);
        assert!(store.info(a).is_none());
        assert!(store.info(b).is_none());
        assert!(store.info(c).is_some());
        assert_eq!(store.len(), 1);
    }
}
