//! Backing-provider seam and the in-memory store
//!
//! A [`FileProvider`] supplies real bytes and metadata for one resolved guest
//! path. Concrete variants are selected once at path-resolution time and
//! shared behind `Arc<dyn FileProvider>`; a provider backing multiple handles
//! is responsible for its own internal concurrency safety. Reads follow the
//! buffer-ownership pattern: the destination buffer is passed by value and
//! returned together with the byte count.

use async_trait::async_trait;

use crate::error::Result;
use crate::wire::{DirectoryEntry, FileAttributes, FileInfo};

/// Allocation granularity stores report to the guest
pub const ALLOCATION_GRANULARITY: u64 = 4096;

/// Round a logical length up to the store allocation granularity
#[must_use]
pub fn allocation_size_for(length: u64) -> u64 {
    length.div_ceil(ALLOCATION_GRANULARITY) * ALLOCATION_GRANULARITY
}

/// Store-specific fetch/query/enumerate operations for one resolved path
///
/// Object safe so handles can hold `Arc<dyn FileProvider>`; futures are
/// `?Send` because the runtime is single threaded per core.
#[async_trait(?Send)]
pub trait FileProvider {
    /// Final path component
    fn name(&self) -> &str;

    /// Path relative to the mount device
    fn path(&self) -> &str;

    /// Full guest path including the device prefix
    fn absolute_path(&self) -> &str;

    /// Fresh metadata for the node
    ///
    /// # Errors
    ///
    /// [`FileOpError::NotFound`](crate::FileOpError::NotFound) if the backing
    /// node vanished since resolution; host failures pass through.
    async fn query_info(&self) -> Result<FileInfo>;

    /// Read up to `min(length, buf.len())` bytes at `offset` into `buf`
    ///
    /// Returns the byte count together with the buffer. A short count means
    /// the store ran out of bytes; 0 means `offset` is at or past the end.
    ///
    /// # Errors
    ///
    /// Host transfer failures surface as
    /// [`FileOpError::HostIo`](crate::FileOpError::HostIo).
    async fn read_at(&self, buf: Vec<u8>, length: usize, offset: u64)
        -> Result<(usize, Vec<u8>)>;

    /// Snapshot the directory's entries in a stable order
    ///
    /// Order is stable across calls on one unmutated store; concurrent
    /// mutation of the backing store leaves the order undefined, matching the
    /// emulated contract.
    ///
    /// # Errors
    ///
    /// [`FileOpError::NotFound`](crate::FileOpError::NotFound) if the node
    /// vanished; a host `NotADirectory` failure if it is not a directory.
    async fn read_directory(&self) -> Result<Vec<DirectoryEntry>>;
}

impl std::fmt::Debug for dyn FileProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProvider")
            .field("absolute_path", &self.absolute_path())
            .finish()
    }
}

/// In-memory provider node contents
enum MemoryNode {
    File {
        data: Vec<u8>,
        attributes: FileAttributes,
    },
    Directory {
        children: Vec<MemoryChild>,
    },
}

/// One named child of an in-memory directory
pub struct MemoryChild {
    /// Child name as the guest sees it
    pub name: String,
    /// File contents
    pub data: Vec<u8>,
    /// Attribute bitmask; [`FileAttributes::NORMAL`] when empty
    pub attributes: FileAttributes,
}

impl MemoryChild {
    /// Plain file child with normal attributes
    #[must_use]
    pub fn file(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data,
            attributes: FileAttributes::NORMAL,
        }
    }
}

/// Provider backed by bytes held in memory
///
/// Used for packaged virtual content and deterministic tests. Every
/// timestamp is stamped from the injected [`TimeSource`] at construction.
///
/// [`TimeSource`]: crate::time::TimeSource
pub struct MemoryProvider {
    absolute_path: String,
    path: String,
    name: String,
    stamp: u64,
    node: MemoryNode,
}

impl MemoryProvider {
    /// In-memory file at `guest_path` holding `data`
    #[must_use]
    pub fn file(guest_path: &str, data: Vec<u8>, clock: &dyn crate::time::TimeSource) -> Self {
        Self::build(
            guest_path,
            clock.now(),
            MemoryNode::File {
                data,
                attributes: FileAttributes::NORMAL,
            },
        )
    }

    /// In-memory directory at `guest_path` with the given children
    ///
    /// Children keep the order given here; that order is the enumeration
    /// order handles observe.
    #[must_use]
    pub fn directory(
        guest_path: &str,
        children: Vec<MemoryChild>,
        clock: &dyn crate::time::TimeSource,
    ) -> Self {
        Self::build(guest_path, clock.now(), MemoryNode::Directory { children })
    }

    fn build(guest_path: &str, stamp: u64, node: MemoryNode) -> Self {
        let (path, name) = split_guest_path(guest_path);
        Self {
            absolute_path: guest_path.to_string(),
            path,
            name,
            stamp,
            node,
        }
    }
}

/// Split a full guest path into (device-relative path, final component)
pub(crate) fn split_guest_path(guest_path: &str) -> (String, String) {
    let path = match guest_path.split_once(':') {
        Some((_device, rest)) => rest.trim_start_matches(['\\', '/']).to_string(),
        None => guest_path.to_string(),
    };
    let name = path
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or_default()
        .to_string();
    (path, name)
}

#[async_trait(?Send)]
impl FileProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn absolute_path(&self) -> &str {
        &self.absolute_path
    }

    async fn query_info(&self) -> Result<FileInfo> {
        let (length, attributes) = match &self.node {
            MemoryNode::File { data, attributes } => (data.len() as u64, *attributes),
            MemoryNode::Directory { .. } => (0, FileAttributes::DIRECTORY),
        };
        Ok(FileInfo {
            creation_time: self.stamp,
            last_access_time: self.stamp,
            last_write_time: self.stamp,
            change_time: self.stamp,
            allocation_size: allocation_size_for(length),
            file_length: length,
            attributes,
        })
    }

    async fn read_at(
        &self,
        mut buf: Vec<u8>,
        length: usize,
        offset: u64,
    ) -> Result<(usize, Vec<u8>)> {
        let MemoryNode::File { data, .. } = &self.node else {
            return Err(std::io::Error::from(std::io::ErrorKind::IsADirectory).into());
        };
        let Ok(start) = usize::try_from(offset) else {
            return Ok((0, buf));
        };
        if start >= data.len() {
            return Ok((0, buf));
        }
        let count = length.min(buf.len()).min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok((count, buf))
    }

    async fn read_directory(&self) -> Result<Vec<DirectoryEntry>> {
        let MemoryNode::Directory { children } = &self.node else {
            return Err(std::io::Error::from(std::io::ErrorKind::NotADirectory).into());
        };
        Ok(children
            .iter()
            .enumerate()
            .map(|(index, child)| DirectoryEntry {
                file_index: index as u32,
                creation_time: self.stamp,
                last_access_time: self.stamp,
                last_write_time: self.stamp,
                change_time: self.stamp,
                end_of_file: child.data.len() as u64,
                allocation_size: allocation_size_for(child.data.len() as u64),
                attributes: if child.attributes.bits() == 0 {
                    FileAttributes::NORMAL
                } else {
                    child.attributes
                },
                name: child.name.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedClock;

    const CLOCK: FixedClock = FixedClock(777);

    #[test]
    fn allocation_rounds_up_to_granularity() {
        assert_eq!(allocation_size_for(0), 0);
        assert_eq!(allocation_size_for(1), ALLOCATION_GRANULARITY);
        assert_eq!(allocation_size_for(4096), ALLOCATION_GRANULARITY);
        assert_eq!(allocation_size_for(4097), 2 * ALLOCATION_GRANULARITY);
    }

    #[test]
    fn guest_paths_split_into_path_and_name() {
        assert_eq!(
            split_guest_path(r"game:\media\intro.bik"),
            (r"media\intro.bik".to_string(), "intro.bik".to_string())
        );
        assert_eq!(
            split_guest_path("game:/media"),
            ("media".to_string(), "media".to_string())
        );
        assert_eq!(
            split_guest_path("plain.txt"),
            ("plain.txt".to_string(), "plain.txt".to_string())
        );
    }

    #[compio::test]
    async fn memory_file_reports_stamped_metadata() {
        let provider = MemoryProvider::file(r"game:\data\save.bin", vec![0u8; 100], &CLOCK);
        let info = provider.query_info().await.unwrap();
        assert_eq!(info.creation_time, 777);
        assert_eq!(info.file_length, 100);
        assert_eq!(info.allocation_size, ALLOCATION_GRANULARITY);
        assert_eq!(info.attributes, FileAttributes::NORMAL);
        assert_eq!(provider.name(), "save.bin");
    }

    #[compio::test]
    async fn memory_read_clamps_to_buffer_and_store() {
        let data: Vec<u8> = (0..10).collect();
        let provider = MemoryProvider::file("game:/f", data, &CLOCK);

        // Clamped by requested length.
        let (count, buf) = provider.read_at(vec![0u8; 16], 4, 0).await.unwrap();
        assert_eq!(count, 4);
        assert_eq!(&buf[..4], &[0, 1, 2, 3]);

        // Clamped by store length.
        let (count, buf) = provider.read_at(vec![0u8; 16], 16, 6).await.unwrap();
        assert_eq!(count, 4);
        assert_eq!(&buf[..4], &[6, 7, 8, 9]);

        // Past the end reads nothing.
        let (count, _) = provider.read_at(vec![0u8; 16], 16, 50).await.unwrap();
        assert_eq!(count, 0);
    }

    #[compio::test]
    async fn memory_directory_enumerates_in_given_order() {
        let provider = MemoryProvider::directory(
            "game:/media",
            vec![
                MemoryChild::file("b.txt", vec![1, 2]),
                MemoryChild::file("a.txt", vec![3]),
            ],
            &CLOCK,
        );
        let entries = provider.read_directory().await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["b.txt", "a.txt"]);
        assert_eq!(entries[0].file_index, 0);
        assert_eq!(entries[1].file_index, 1);
        assert_eq!(entries[0].end_of_file, 2);
    }

    #[compio::test]
    async fn memory_file_rejects_enumeration() {
        let provider = MemoryProvider::file("game:/f", vec![1], &CLOCK);
        assert!(provider.read_directory().await.is_err());
    }
}
