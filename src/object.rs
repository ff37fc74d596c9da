//! Object directory: path resolution and handle lifecycle
//!
//! The object directory owns the mount table (guest path → provider) and the
//! handle table. Guest paths are case-insensitive and accept either
//! separator, so lookups go through one normalization. Releasing a handle id
//! drops the table's reference and closes the handle — the emulation of a
//! guest close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{FileOpError, Result};
use crate::handle::{FileAccess, GuestFile};
use crate::provider::FileProvider;

/// First handle id handed out; 0 stays invalid for the guest
const FIRST_HANDLE_ID: u32 = 1;

struct DirectoryInner {
    mounts: HashMap<String, Arc<dyn FileProvider>>,
    handles: HashMap<u32, Arc<GuestFile>>,
    next_handle: u32,
}

/// Registry of resolvable guest paths and open handles
pub struct ObjectDirectory {
    inner: Mutex<DirectoryInner>,
}

impl ObjectDirectory {
    /// Empty directory with no mounts
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DirectoryInner {
                mounts: HashMap::new(),
                handles: HashMap::new(),
                next_handle: FIRST_HANDLE_ID,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `provider` resolvable at `guest_path`
    ///
    /// Re-registering a path replaces the previous provider; handles already
    /// open on it keep their original provider.
    pub fn register(&self, guest_path: &str, provider: Arc<dyn FileProvider>) {
        let key = normalize_guest_path(guest_path);
        tracing::debug!(path = %guest_path, "provider registered");
        self.lock().mounts.insert(key, provider);
    }

    /// Resolve a guest path to its provider
    ///
    /// # Errors
    ///
    /// [`FileOpError::NotFound`] if nothing is registered at the path.
    pub fn resolve(&self, guest_path: &str) -> Result<Arc<dyn FileProvider>> {
        let key = normalize_guest_path(guest_path);
        self.lock()
            .mounts
            .get(&key)
            .cloned()
            .ok_or_else(|| FileOpError::NotFound(guest_path.to_string()))
    }

    /// Resolve a path and open a new handle on it
    ///
    /// Every open creates an independent handle: same path twice gives two
    /// handles with independent cursors.
    ///
    /// # Errors
    ///
    /// [`FileOpError::NotFound`] if resolution fails.
    pub fn open(&self, guest_path: &str, access: FileAccess) -> Result<(u32, Arc<GuestFile>)> {
        let provider = self.resolve(guest_path)?;
        let handle = GuestFile::new(provider, access);
        let id = {
            let mut inner = self.lock();
            let id = inner.next_handle;
            inner.next_handle += 1;
            inner.handles.insert(id, Arc::clone(&handle));
            id
        };
        tracing::debug!(path = %guest_path, handle = id, "handle opened");
        Ok((id, handle))
    }

    /// Look up an open handle by id
    ///
    /// # Errors
    ///
    /// [`FileOpError::ObjectGone`] for ids never issued or already released.
    pub fn get(&self, handle_id: u32) -> Result<Arc<GuestFile>> {
        self.lock()
            .handles
            .get(&handle_id)
            .cloned()
            .ok_or(FileOpError::ObjectGone)
    }

    /// Release a handle id: drop the table reference and close the handle
    ///
    /// # Errors
    ///
    /// [`FileOpError::ObjectGone`] if the id is not open.
    pub fn release(&self, handle_id: u32) -> Result<()> {
        let handle = self
            .lock()
            .handles
            .remove(&handle_id)
            .ok_or(FileOpError::ObjectGone)?;
        handle.close();
        tracing::debug!(handle = handle_id, "handle released");
        Ok(())
    }

    /// Number of handles currently open
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }
}

impl Default for ObjectDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical form for guest path lookups
///
/// The guest treats paths case-insensitively and uses `\` and `/`
/// interchangeably.
fn normalize_guest_path(path: &str) -> String {
    path.trim().replace('\\', "/").to_ascii_lowercase()
}
