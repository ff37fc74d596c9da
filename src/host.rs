//! Host-storage backed provider
//!
//! Maps one resolved guest path onto a real host file or directory. Reads go
//! through `compio::fs` positional I/O; metadata comes from the host and is
//! converted to guest ticks, falling back to the injected [`TimeSource`] when
//! the host cannot supply a timestamp (filesystems without birth times, for
//! example).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use compio::io::AsyncReadAt;

use crate::error::{FileOpError, Result};
use crate::provider::{allocation_size_for, split_guest_path, FileProvider};
use crate::time::{guest_time_from_system, TimeSource};
use crate::wire::{DirectoryEntry, FileAttributes, FileInfo};

/// Provider backed by a host path
pub struct HostPathProvider {
    absolute_path: String,
    path: String,
    name: String,
    host_path: PathBuf,
    clock: Arc<dyn TimeSource>,
}

impl HostPathProvider {
    /// Back `guest_path` with the host file or directory at `host_path`
    #[must_use]
    pub fn new(guest_path: &str, host_path: impl Into<PathBuf>, clock: Arc<dyn TimeSource>) -> Self {
        let (path, name) = split_guest_path(guest_path);
        Self {
            absolute_path: guest_path.to_string(),
            path,
            name,
            host_path: host_path.into(),
            clock,
        }
    }

    /// Host path this provider reads from
    #[must_use]
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    fn map_io(&self, err: std::io::Error) -> FileOpError {
        if err.kind() == std::io::ErrorKind::NotFound {
            FileOpError::NotFound(self.absolute_path.clone())
        } else {
            FileOpError::HostIo(err)
        }
    }

    fn timestamps(&self, meta: &std::fs::Metadata) -> (u64, u64, u64) {
        let fallback = self.clock.now();
        let to_ticks = |t: std::io::Result<SystemTime>| {
            t.map(guest_time_from_system).unwrap_or(fallback)
        };
        let written = to_ticks(meta.modified());
        let accessed = to_ticks(meta.accessed());
        let created = meta
            .created()
            .map(guest_time_from_system)
            .unwrap_or(written);
        (created, accessed, written)
    }

    fn info_from_metadata(&self, meta: &std::fs::Metadata) -> FileInfo {
        let (created, accessed, written) = self.timestamps(meta);
        let length = if meta.is_dir() { 0 } else { meta.len() };
        FileInfo {
            creation_time: created,
            last_access_time: accessed,
            last_write_time: written,
            change_time: written,
            allocation_size: allocation_size_for(length),
            file_length: length,
            attributes: host_attributes(meta),
        }
    }
}

fn host_attributes(meta: &std::fs::Metadata) -> FileAttributes {
    if meta.is_dir() {
        FileAttributes::DIRECTORY
    } else if meta.permissions().readonly() {
        FileAttributes::READONLY
    } else {
        FileAttributes::NORMAL
    }
}

#[async_trait(?Send)]
impl FileProvider for HostPathProvider {
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
        let meta = std::fs::metadata(&self.host_path).map_err(|e| self.map_io(e))?;
        Ok(self.info_from_metadata(&meta))
    }

    async fn read_at(&self, mut buf: Vec<u8>, length: usize, offset: u64)
        -> Result<(usize, Vec<u8>)> {
        let want = length.min(buf.len());
        if want == 0 {
            return Ok((0, buf));
        }
        let file = compio::fs::File::open(&self.host_path)
            .await
            .map_err(|e| self.map_io(e))?;

        // Positional reads can come back short; keep going until the request
        // is satisfied or the store runs out of bytes.
        let mut total = 0usize;
        while total < want {
            let chunk = vec![0u8; want - total];
            let result = file.read_at(chunk, offset + total as u64).await;
            let count = result.0.map_err(FileOpError::HostIo)?;
            if count == 0 {
                break;
            }
            buf[total..total + count].copy_from_slice(&result.1[..count]);
            total += count;
        }
        tracing::trace!(
            path = %self.absolute_path,
            offset,
            requested = want,
            read = total,
            "host read"
        );
        Ok((total, buf))
    }

    async fn read_directory(&self) -> Result<Vec<DirectoryEntry>> {
        let mut names: Vec<(String, std::fs::Metadata)> = Vec::new();
        let dir = std::fs::read_dir(&self.host_path).map_err(|e| self.map_io(e))?;
        for entry in dir {
            let entry = entry.map_err(FileOpError::HostIo)?;
            let meta = entry.metadata().map_err(FileOpError::HostIo)?;
            names.push((entry.file_name().to_string_lossy().into_owned(), meta));
        }
        // Name order keeps the snapshot stable across calls on one handle.
        names.sort_by(|a, b| a.0.cmp(&b.0));

        let entries = names
            .into_iter()
            .enumerate()
            .map(|(index, (name, meta))| {
                let (created, accessed, written) = self.timestamps(&meta);
                let length = if meta.is_dir() { 0 } else { meta.len() };
                DirectoryEntry {
                    file_index: index as u32,
                    creation_time: created,
                    last_access_time: accessed,
                    last_write_time: written,
                    change_time: written,
                    end_of_file: length,
                    allocation_size: allocation_size_for(length),
                    attributes: host_attributes(&meta),
                    name,
                }
            })
            .collect();
        tracing::debug!(path = %self.absolute_path, "host directory snapshot");
        Ok(entries)
    }
}
