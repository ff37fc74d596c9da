//! # guestfile
//!
//! File-object emulation layer for a guest kernel: translated guest code
//! issues handle-based reads, directory enumeration, and metadata queries
//! against real host storage, and this crate reproduces the guest kernel's
//! exact binary contract — fixed-layout, big-endian, status-coded structures
//! the guest parses straight out of its own memory. It provides:
//!
//! - Byte-exact encoding of metadata and directory-entry records ([`wire`])
//! - The per-open handle contract and state machine ([`handle`])
//! - A single-shot completion signal bridging host transfers to guest
//!   wait/poll logic ([`signal`])
//! - Pluggable backing providers for resolved paths ([`provider`], [`host`])
//! - Path resolution and handle lifecycle ([`object`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use guestfile::{FileAccess, HostPathProvider, ObjectDirectory, SystemClock};
//!
//! # async fn example() -> guestfile::Result<()> {
//! let objects = ObjectDirectory::new();
//! objects.register(
//!     r"game:\default.xex",
//!     Arc::new(HostPathProvider::new(
//!         r"game:\default.xex",
//!         "/data/titles/default.xex",
//!         Arc::new(SystemClock),
//!     )),
//! );
//!
//! let (_id, file) = objects.open(r"game:\default.xex", FileAccess::READ)?;
//! let (read, buf) = file.read(vec![0u8; 4096], 4096, 0).await?;
//! println!("read {read} bytes, magic {:02x?}", &buf[..4]);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod host;
pub mod object;
pub mod provider;
pub mod signal;
pub mod time;
pub mod wire;

// Re-export main types
pub use error::{FileOpError, Result};
pub use handle::{FileAccess, GuestFile};
pub use host::HostPathProvider;
pub use object::ObjectDirectory;
pub use provider::{FileProvider, MemoryChild, MemoryProvider};
pub use signal::{CompletionSignal, ReadOutcome};
pub use time::{FixedClock, SystemClock, TimeSource};
pub use wire::{DirectoryEntry, FileAttributes, FileInfo, DIR_ENTRY_HEADER_LEN, FILE_INFO_LEN};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
