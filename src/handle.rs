//! Guest file handle: per-open state and the read/query contract
//!
//! One [`GuestFile`] is one open instance. The same path opened twice yields
//! two handles with independent cursors. A handle owns an explicitly settable
//! position cursor (reads never advance it; guest reads carry absolute
//! offsets), fixed access rights, an enumeration cursor, and at most one
//! pending asynchronous request.
//!
//! State machine: Created → Open → (async read) PendingAsync → (completion) →
//! Open → … → Closed. Closed is terminal; every operation thereafter fails
//! with [`FileOpError::ObjectGone`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{FileOpError, Result};
use crate::provider::FileProvider;
use crate::signal::CompletionSignal;
use crate::wire::{encode_directory_chain, FileInfo};

/// Access rights fixed at handle construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAccess(u32);

impl FileAccess {
    /// Generic read right
    pub const READ: FileAccess = FileAccess(0x8000_0000);
    /// Generic write right (no write operation exists at this layer yet;
    /// the right is carried so rights checks stay uniform)
    pub const WRITE: FileAccess = FileAccess(0x4000_0000);

    /// Construct from a raw guest access mask
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw guest access mask
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every right in `other` is granted
    #[must_use]
    pub const fn contains(self, other: FileAccess) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FileAccess {
    type Output = FileAccess;

    fn bitor(self, rhs: FileAccess) -> FileAccess {
        FileAccess(self.0 | rhs.0)
    }
}

/// Bookkeeping for the single in-flight asynchronous request
///
/// Exists only between submission and completion; never revived. The
/// destination buffer itself travels with the transfer task and comes back
/// through the signal's outcome.
struct PendingAsyncRequest {
    length: usize,
    offset: u64,
    #[allow(dead_code)] // held so the request owns its signal until completion
    signal: Arc<CompletionSignal>,
}

struct HandleState {
    position: u64,
    dir_cursor: usize,
    closed: bool,
    last_signal: Option<Arc<CompletionSignal>>,
}

/// An open guest file: validates state and arguments, delegates fetches to
/// its provider, and marshals results through the record encoder
pub struct GuestFile {
    provider: Arc<dyn FileProvider>,
    access: FileAccess,
    state: Mutex<HandleState>,
    /// Single-flight slot; shared with the in-flight transfer task, which
    /// clears it after firing the signal
    pending: Arc<Mutex<Option<PendingAsyncRequest>>>,
}

impl GuestFile {
    /// Open a handle over a resolved provider with fixed access rights
    #[must_use]
    pub fn new(provider: Arc<dyn FileProvider>, access: FileAccess) -> Arc<Self> {
        Arc::new(Self {
            provider,
            access,
            state: Mutex::new(HandleState {
                position: 0,
                dir_cursor: 0,
                closed: false,
                last_signal: None,
            }),
            pending: Arc::new(Mutex::new(None)),
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingAsyncRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        // The lock is never held across an await point, so poisoning can only
        // come from a panicking test assertion; recover the guard.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lock_state().closed {
            return Err(FileOpError::ObjectGone);
        }
        Ok(())
    }

    /// Access rights this handle was opened with
    #[must_use]
    pub fn access(&self) -> FileAccess {
        self.access
    }

    /// Final path component
    #[must_use]
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// Path relative to the mount device
    #[must_use]
    pub fn path(&self) -> &str {
        self.provider.path()
    }

    /// Full guest path including the device prefix
    #[must_use]
    pub fn absolute_path(&self) -> &str {
        self.provider.absolute_path()
    }

    /// Current position cursor
    ///
    /// The cursor is only ever moved by [`set_position`](Self::set_position);
    /// reads carry absolute offsets and leave it alone.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.lock_state().position
    }

    /// Move the position cursor
    ///
    /// # Errors
    ///
    /// [`FileOpError::ObjectGone`] once the handle is closed.
    pub fn set_position(&self, position: u64) -> Result<()> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(FileOpError::ObjectGone);
        }
        state.position = position;
        Ok(())
    }

    /// Validate a read and compute the clamped transfer length
    async fn prepare_read(&self, length: usize, byte_offset: u64) -> Result<usize> {
        self.ensure_open()?;
        if !self.access.contains(FileAccess::READ) {
            return Err(FileOpError::AccessDenied);
        }
        let info = match self.provider.query_info().await {
            Err(FileOpError::NotFound(_)) => return Err(FileOpError::ObjectGone),
            other => other?,
        };
        if byte_offset > info.file_length {
            return Err(FileOpError::InvalidOffset {
                offset: byte_offset,
                length: info.file_length,
            });
        }
        // Reading exactly at end-of-file is a successful zero-byte transfer.
        Ok(length.min((info.file_length - byte_offset) as usize))
    }

    /// Synchronous read at an absolute offset
    ///
    /// Reads up to `min(length, buf.len())` bytes starting at `byte_offset`
    /// and blocks the caller until the provider's fetch returns. The length
    /// clamps to what the store has available; `byte_offset == file_length`
    /// reads 0 bytes successfully.
    ///
    /// # Errors
    ///
    /// - [`FileOpError::AccessDenied`] without the read right
    /// - [`FileOpError::InvalidOffset`] when `byte_offset > file_length`
    /// - [`FileOpError::ObjectGone`] if closed or the backing node vanished
    /// - [`FileOpError::HostIo`] when the underlying transfer fails
    pub async fn read(
        &self,
        buf: Vec<u8>,
        length: usize,
        byte_offset: u64,
    ) -> Result<(usize, Vec<u8>)> {
        let clamped = self.prepare_read(length, byte_offset).await?;
        if clamped == 0 {
            return Ok((0, buf));
        }
        tracing::trace!(
            path = %self.absolute_path(),
            offset = byte_offset,
            length = clamped,
            "sync read"
        );
        self.provider.read_at(buf, clamped, byte_offset).await
    }

    /// Asynchronous read: submit the transfer and observe it via the signal
    ///
    /// Validation happens at submission, synchronously with respect to the
    /// caller: access, offset, and single-flight violations are rejected
    /// before any request exists. On success the transfer runs on the
    /// runtime; the returned [`CompletionSignal`] fires exactly once with the
    /// final byte count (or failure) after the destination buffer is fully
    /// committed. Once submitted a request always completes; there is no
    /// cancellation.
    ///
    /// # Errors
    ///
    /// Everything [`read`](Self::read) rejects, plus
    /// [`FileOpError::RequestAlreadyPending`] while another async request is
    /// outstanding on this handle.
    pub async fn read_async(
        &self,
        buf: Vec<u8>,
        length: usize,
        byte_offset: u64,
    ) -> Result<Arc<CompletionSignal>> {
        // Single-flight check up front: the state machine allows one pending
        // request per handle, full stop.
        if self.lock_pending().is_some() {
            return Err(FileOpError::RequestAlreadyPending);
        }
        let clamped = self.prepare_read(length, byte_offset).await?;

        let signal = Arc::new(CompletionSignal::new());
        {
            let mut pending = self.lock_pending();
            if pending.is_some() {
                return Err(FileOpError::RequestAlreadyPending);
            }
            *pending = Some(PendingAsyncRequest {
                length: clamped,
                offset: byte_offset,
                signal: Arc::clone(&signal),
            });
        }
        self.lock_state().last_signal = Some(Arc::clone(&signal));
        tracing::debug!(
            path = %self.absolute_path(),
            offset = byte_offset,
            length = clamped,
            "async read submitted"
        );

        let provider = Arc::clone(&self.provider);
        let pending_slot = Arc::clone(&self.pending);
        let task_signal = Arc::clone(&signal);
        compio::runtime::spawn(async move {
            let outcome = if clamped == 0 {
                Ok((0, buf))
            } else {
                provider.read_at(buf, clamped, byte_offset).await
            };
            // Outcome commits inside the signal before the set transition
            // becomes observable, then the handle returns to Open.
            task_signal.complete(outcome);
            pending_slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            tracing::debug!(path = %provider.absolute_path(), "async read completed");
        })
        .detach();

        Ok(signal)
    }

    /// Fresh metadata for the backing node
    ///
    /// # Errors
    ///
    /// [`FileOpError::ObjectGone`] if the handle is closed or the resolved
    /// path vanished since open; host failures pass through.
    pub async fn query_info(&self) -> Result<FileInfo> {
        self.ensure_open()?;
        match self.provider.query_info().await {
            Err(FileOpError::NotFound(_)) => Err(FileOpError::ObjectGone),
            other => other,
        }
    }

    /// Enumerate directory entries into a guest buffer
    ///
    /// Encodes as many entries as fit, starting at this handle's enumeration
    /// cursor, and advances the cursor past them. `restart` rewinds the
    /// cursor to the first entry, discarding any in-flight enumeration state.
    /// Returns the number of entries written together with the buffer; the
    /// guest walks the encoded chain to its terminating zero offset.
    ///
    /// # Errors
    ///
    /// - [`FileOpError::NoMoreFiles`] once exhausted without a restart
    /// - [`FileOpError::BufferTooSmall`] when not even one entry fits
    /// - [`FileOpError::ObjectGone`] once closed
    /// - provider failures pass through (a non-directory node is a host
    ///   `NotADirectory` failure)
    pub async fn query_directory(
        &self,
        mut buf: Vec<u8>,
        restart: bool,
    ) -> Result<(usize, Vec<u8>)> {
        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(FileOpError::ObjectGone);
            }
            if restart {
                state.dir_cursor = 0;
            }
        }
        let entries = self.provider.read_directory().await?;

        let start = {
            let state = self.lock_state();
            if state.closed {
                return Err(FileOpError::ObjectGone);
            }
            state.dir_cursor
        };
        if start >= entries.len() {
            return Err(FileOpError::NoMoreFiles);
        }

        let mut fit = 0usize;
        let mut used = 0usize;
        for entry in &entries[start..] {
            let len = entry.encoded_len();
            if used + len > buf.len() {
                break;
            }
            used += len;
            fit += 1;
        }
        if fit == 0 {
            return Err(FileOpError::BufferTooSmall {
                needed: entries[start].encoded_len(),
                capacity: buf.len(),
            });
        }

        encode_directory_chain(&entries[start..start + fit], &mut buf, 0)?;
        self.lock_state().dir_cursor = start + fit;
        tracing::trace!(
            path = %self.absolute_path(),
            from = start,
            written = fit,
            "directory enumeration"
        );
        Ok((fit, buf))
    }

    /// Signal of the most recent asynchronous read
    ///
    /// `None` if this handle was never used asynchronously. The guest's
    /// wait/poll logic observes the returned signal directly.
    #[must_use]
    pub fn get_wait_handle(&self) -> Option<Arc<CompletionSignal>> {
        self.lock_state().last_signal.clone()
    }

    /// Offset and length of the pending async request, if one is in flight
    #[must_use]
    pub fn pending_request(&self) -> Option<(u64, usize)> {
        self.lock_pending().as_ref().map(|r| (r.offset, r.length))
    }

    /// Transition the handle to its terminal Closed state
    ///
    /// Called by the object directory when the last reference is released.
    /// Idempotent. An in-flight async request still runs to completion and
    /// fires its signal; no new operation succeeds afterwards.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if !state.closed {
            state.closed = true;
            tracing::debug!(path = %self.absolute_path(), "handle closed");
        }
    }

    /// True once [`close`](Self::close) has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }
}

impl std::fmt::Debug for GuestFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("GuestFile")
            .field("path", &self.provider.absolute_path())
            .field("access", &self.access)
            .field("position", &state.position)
            .field("closed", &state.closed)
            .field("pending", &self.lock_pending().is_some())
            .finish_non_exhaustive()
    }
}
