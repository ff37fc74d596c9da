//! Error taxonomy for guest file operations
//!
//! Deterministic, local contract violations (`AccessDenied`, `InvalidOffset`,
//! `RequestAlreadyPending`, `BufferTooSmall`) are returned synchronously so the
//! caller can correct and retry. Backing-store failures (`HostIo`,
//! `ObjectGone`) are surfaced verbatim; translating them into the guest's
//! status-code space is the call-dispatch layer's job. `NoMoreFiles` signals
//! enumeration exhaustion, not failure.

use thiserror::Error;

/// Result type for all guest file operations
pub type Result<T> = std::result::Result<T, FileOpError>;

/// Errors produced by the guest file-object layer
#[derive(Debug, Error)]
pub enum FileOpError {
    /// The handle's access rights do not permit the attempted operation
    #[error("access denied by handle rights")]
    AccessDenied,

    /// The requested byte offset lies past the end of the backing store
    #[error("invalid offset {offset} for file of length {length}")]
    InvalidOffset {
        /// Offset the caller asked for
        offset: u64,
        /// Current logical length of the file
        length: u64,
    },

    /// The destination buffer cannot hold the record(s) to encode
    ///
    /// A prefix of the output may already have been written; callers must
    /// re-issue with a larger buffer rather than trust partial contents.
    #[error("buffer too small: need {needed} bytes, capacity is {capacity}")]
    BufferTooSmall {
        /// Bytes the encode would have needed
        needed: usize,
        /// Capacity the caller supplied
        capacity: usize,
    },

    /// An asynchronous request is already outstanding on this handle
    #[error("an async request is already pending on this handle")]
    RequestAlreadyPending,

    /// The handle was closed, or its backing object vanished since open
    #[error("object is gone")]
    ObjectGone,

    /// Directory enumeration is exhausted
    #[error("no more files")]
    NoMoreFiles,

    /// Path resolution failed
    #[error("not found: {0}")]
    NotFound(String),

    /// The host-side transfer failed
    #[error("host I/O failure: {0}")]
    HostIo(#[from] std::io::Error),
}
