//! Unique tag allocation for NEW_TAG requests

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out tags that are unique for the lifetime of the backend
#[derive(Debug)]
pub struct TagAllocator {
    next: AtomicU64,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next tag
    pub fn next_tag(&self) -> String {
        format!("tag-{}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self::new()
    }
}
