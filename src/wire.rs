//! Fixed-layout guest records and the big-endian encoder
//!
//! The guest parses these structures straight out of its own addressable
//! memory, so every multi-byte field is written big-endian at a fixed offset
//! irrespective of host byte order. Two record shapes exist:
//!
//! - [`FileInfo`]: a 56-byte metadata record (timestamps, sizes, attributes)
//! - [`DirectoryEntry`]: a 64-byte header followed by a length-prefixed,
//!   non-terminated name; entries chain through `next_entry_offset`
//!
//! Encoding is pure: identical inputs at identical offsets always produce
//! identical bytes. An encode that would overflow the destination fails with
//! [`FileOpError::BufferTooSmall`] and may leave a partial prefix behind;
//! callers re-issue with a larger buffer.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{FileOpError, Result};

/// Encoded size of a [`FileInfo`] record, trailing pad included
pub const FILE_INFO_LEN: usize = 56;

/// Encoded size of a [`DirectoryEntry`] header, name bytes excluded
pub const DIR_ENTRY_HEADER_LEN: usize = 64;

/// Guest file attribute bitmask
///
/// The bit values follow the guest kernel's attribute convention; unknown
/// bits pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileAttributes(u32);

impl FileAttributes {
    /// File cannot be written by the guest
    pub const READONLY: FileAttributes = FileAttributes(0x0000_0001);
    /// Hidden from default listings
    pub const HIDDEN: FileAttributes = FileAttributes(0x0000_0002);
    /// System file
    pub const SYSTEM: FileAttributes = FileAttributes(0x0000_0004);
    /// The node is a directory
    pub const DIRECTORY: FileAttributes = FileAttributes(0x0000_0010);
    /// Marked for archival
    pub const ARCHIVE: FileAttributes = FileAttributes(0x0000_0020);
    /// Ordinary file with no other attributes set
    pub const NORMAL: FileAttributes = FileAttributes(0x0000_0080);

    /// Construct from a raw guest bitmask
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw guest bitmask
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`
    #[must_use]
    pub const fn contains(self, other: FileAttributes) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if the directory bit is set
    #[must_use]
    pub const fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }
}

impl std::ops::BitOr for FileAttributes {
    type Output = FileAttributes;

    fn bitor(self, rhs: FileAttributes) -> FileAttributes {
        FileAttributes(self.0 | rhs.0)
    }
}

/// Guest-visible file metadata record
///
/// Timestamps are guest ticks (see [`crate::time`]). Produced fresh per query
/// call; carries no identity of its own.
///
/// Encoded layout (offsets relative to record start, all big-endian):
///
/// | offset | size | field             |
/// |--------|------|-------------------|
/// | 0      | 8    | `creation_time`   |
/// | 8      | 8    | `last_access_time`|
/// | 16     | 8    | `last_write_time` |
/// | 24     | 8    | `change_time`     |
/// | 32     | 8    | `allocation_size` |
/// | 40     | 8    | `file_length`     |
/// | 48     | 4    | `attributes`      |
/// | 52     | 4    | zero pad          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInfo {
    /// Creation timestamp, guest ticks
    pub creation_time: u64,
    /// Last access timestamp, guest ticks
    pub last_access_time: u64,
    /// Last write timestamp, guest ticks
    pub last_write_time: u64,
    /// Last metadata change timestamp, guest ticks
    pub change_time: u64,
    /// Bytes the backing store has reserved for the file
    pub allocation_size: u64,
    /// Logical file length in bytes
    pub file_length: u64,
    /// Attribute bitmask
    pub attributes: FileAttributes,
}

impl FileInfo {
    /// Encode the record at `offset` within `buf`
    ///
    /// # Errors
    ///
    /// Returns [`FileOpError::BufferTooSmall`] if the 56 bytes starting at
    /// `offset` do not fit in `buf`. Nothing is written in that case.
    pub fn encode(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        let needed = offset.saturating_add(FILE_INFO_LEN);
        if needed > buf.len() {
            return Err(FileOpError::BufferTooSmall {
                needed,
                capacity: buf.len(),
            });
        }
        let dst = &mut buf[offset..needed];
        BigEndian::write_u64(&mut dst[0..8], self.creation_time);
        BigEndian::write_u64(&mut dst[8..16], self.last_access_time);
        BigEndian::write_u64(&mut dst[16..24], self.last_write_time);
        BigEndian::write_u64(&mut dst[24..32], self.change_time);
        BigEndian::write_u64(&mut dst[32..40], self.allocation_size);
        BigEndian::write_u64(&mut dst[40..48], self.file_length);
        BigEndian::write_u32(&mut dst[48..52], self.attributes.bits());
        BigEndian::write_u32(&mut dst[52..56], 0);
        Ok(())
    }
}

/// One node of a directory-enumeration chain
///
/// Host-side the name lives apart from the fixed header; only the encoder
/// linearizes the two into the guest-visible contiguous buffer. The encoded
/// form is a 64-byte header (`next_entry_offset` at 0, `file_index` at 4,
/// timestamps and sizes at 8..56, attributes at 56, `file_name_length` at 60)
/// followed by the raw name bytes with no terminator and no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Ordinal index of the file within its directory
    pub file_index: u32,
    /// Creation timestamp, guest ticks
    pub creation_time: u64,
    /// Last access timestamp, guest ticks
    pub last_access_time: u64,
    /// Last write timestamp, guest ticks
    pub last_write_time: u64,
    /// Last metadata change timestamp, guest ticks
    pub change_time: u64,
    /// Logical file length in bytes
    pub end_of_file: u64,
    /// Bytes the backing store has reserved for the file
    pub allocation_size: u64,
    /// Attribute bitmask
    pub attributes: FileAttributes,
    /// File name, encoded as raw bytes prefixed by `file_name_length`
    pub name: String,
}

impl DirectoryEntry {
    /// Encoded size of this entry: header plus name bytes
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        DIR_ENTRY_HEADER_LEN + self.name.len()
    }

    /// Write the entry into `dst`, which must be exactly `encoded_len` bytes
    fn encode_into(&self, dst: &mut [u8], next_entry_offset: u32) {
        BigEndian::write_u32(&mut dst[0..4], next_entry_offset);
        BigEndian::write_u32(&mut dst[4..8], self.file_index);
        BigEndian::write_u64(&mut dst[8..16], self.creation_time);
        BigEndian::write_u64(&mut dst[16..24], self.last_access_time);
        BigEndian::write_u64(&mut dst[24..32], self.last_write_time);
        BigEndian::write_u64(&mut dst[32..40], self.change_time);
        BigEndian::write_u64(&mut dst[40..48], self.end_of_file);
        BigEndian::write_u64(&mut dst[48..56], self.allocation_size);
        BigEndian::write_u32(&mut dst[56..60], self.attributes.bits());
        BigEndian::write_u32(&mut dst[60..64], self.name.len() as u32);
        dst[DIR_ENTRY_HEADER_LEN..].copy_from_slice(self.name.as_bytes());
    }
}

/// Encode an ordered sequence of entries as one contiguous chain
///
/// Entries are written back to back starting at `offset`. Each entry's
/// `next_entry_offset` is the distance to the entry that follows it; the last
/// entry's is 0, and a reader must stop as soon as it reads 0.
///
/// # Returns
///
/// Total bytes written.
///
/// # Errors
///
/// Returns [`FileOpError::BufferTooSmall`] if the chain would overflow `buf`.
/// Entries already written stay in place; the caller re-issues with a larger
/// buffer.
pub fn encode_directory_chain(
    entries: &[DirectoryEntry],
    buf: &mut [u8],
    offset: usize,
) -> Result<usize> {
    let mut cursor = offset;
    for (i, entry) in entries.iter().enumerate() {
        let len = entry.encoded_len();
        let end = cursor.saturating_add(len);
        if end > buf.len() {
            return Err(FileOpError::BufferTooSmall {
                needed: end,
                capacity: buf.len(),
            });
        }
        let last = i + 1 == entries.len();
        let next = if last { 0 } else { len as u32 };
        entry.encode_into(&mut buf[cursor..end], next);
        cursor = end;
    }
    Ok(cursor - offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn sample_info() -> FileInfo {
        FileInfo {
            creation_time: 0x0123_4567_89ab_cdef,
            last_access_time: 0xfedc_ba98_7654_3210,
            last_write_time: 42,
            change_time: 7,
            allocation_size: 8192,
            file_length: 5000,
            attributes: FileAttributes::ARCHIVE | FileAttributes::READONLY,
        }
    }

    fn entry(index: u32, name: &str, len: u64) -> DirectoryEntry {
        DirectoryEntry {
            file_index: index,
            creation_time: 100,
            last_access_time: 200,
            last_write_time: 300,
            change_time: 400,
            end_of_file: len,
            allocation_size: 4096,
            attributes: FileAttributes::NORMAL,
            name: name.to_string(),
        }
    }

    #[test]
    fn file_info_round_trips_through_reference_reader() {
        let info = sample_info();
        let mut buf = vec![0u8; FILE_INFO_LEN];
        info.encode(&mut buf, 0).unwrap();

        let mut rd = Cursor::new(&buf);
        assert_eq!(rd.read_u64::<BigEndian>().unwrap(), info.creation_time);
        assert_eq!(rd.read_u64::<BigEndian>().unwrap(), info.last_access_time);
        assert_eq!(rd.read_u64::<BigEndian>().unwrap(), info.last_write_time);
        assert_eq!(rd.read_u64::<BigEndian>().unwrap(), info.change_time);
        assert_eq!(rd.read_u64::<BigEndian>().unwrap(), info.allocation_size);
        assert_eq!(rd.read_u64::<BigEndian>().unwrap(), info.file_length);
        assert_eq!(rd.read_u32::<BigEndian>().unwrap(), info.attributes.bits());
        assert_eq!(rd.read_u32::<BigEndian>().unwrap(), 0, "pad must be zero");
    }

    #[test]
    fn file_info_extreme_values_round_trip() {
        for value in [0u64, u64::MAX] {
            let info = FileInfo {
                creation_time: value,
                last_access_time: value,
                last_write_time: value,
                change_time: value,
                allocation_size: value,
                file_length: value,
                attributes: FileAttributes::from_bits(if value == 0 { 0 } else { u32::MAX }),
            };
            let mut buf = vec![0u8; FILE_INFO_LEN];
            info.encode(&mut buf, 0).unwrap();

            let mut rd = Cursor::new(&buf);
            for _ in 0..6 {
                assert_eq!(rd.read_u64::<BigEndian>().unwrap(), value);
            }
            assert_eq!(rd.read_u32::<BigEndian>().unwrap(), info.attributes.bits());
        }
    }

    #[test]
    fn file_info_encodes_at_offset() {
        let info = sample_info();
        let mut buf = vec![0xaau8; FILE_INFO_LEN + 16];
        info.encode(&mut buf, 16).unwrap();

        // Bytes ahead of the offset stay untouched
        assert!(buf[..16].iter().all(|&b| b == 0xaa));
        let mut rd = Cursor::new(&buf[16..]);
        assert_eq!(rd.read_u64::<BigEndian>().unwrap(), info.creation_time);
    }

    #[test]
    fn file_info_rejects_short_buffer() {
        let info = sample_info();
        let mut buf = vec![0u8; FILE_INFO_LEN - 1];
        match info.encode(&mut buf, 0) {
            Err(FileOpError::BufferTooSmall { needed, capacity }) => {
                assert_eq!(needed, FILE_INFO_LEN);
                assert_eq!(capacity, FILE_INFO_LEN - 1);
            }
            other => panic!("expected BufferTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn file_info_encoding_is_pure() {
        let info = sample_info();
        let mut a = vec![0u8; FILE_INFO_LEN];
        let mut b = vec![0u8; FILE_INFO_LEN];
        info.encode(&mut a, 0).unwrap();
        info.encode(&mut b, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn chain_offsets_walk_every_entry_and_terminate_once() {
        let entries = vec![entry(0, "a", 10), entry(1, "bb", 20), entry(2, "ccc", 30)];
        let total: usize = entries.iter().map(DirectoryEntry::encoded_len).sum();
        let mut buf = vec![0u8; total];
        let written = encode_directory_chain(&entries, &mut buf, 0).unwrap();
        assert_eq!(written, total);

        // Walk the chain the way a guest reader would.
        let mut pos = 0usize;
        let mut seen = Vec::new();
        let mut zeros = 0;
        loop {
            let next = BigEndian::read_u32(&buf[pos..pos + 4]) as usize;
            let name_len = BigEndian::read_u32(&buf[pos + 60..pos + 64]) as usize;
            let name = &buf[pos + 64..pos + 64 + name_len];
            seen.push(String::from_utf8(name.to_vec()).unwrap());
            if next == 0 {
                zeros += 1;
                break;
            }
            // Absolute positions strictly increase.
            assert!(pos + next > pos);
            pos += next;
        }
        assert_eq!(zeros, 1);
        assert_eq!(seen, vec!["a", "bb", "ccc"]);

        // With non-decreasing name lengths the raw offset values themselves
        // form a strictly increasing sequence terminated by the single zero.
        let offsets: Vec<u32> = {
            let mut out = Vec::new();
            let mut p = 0usize;
            loop {
                let next = BigEndian::read_u32(&buf[p..p + 4]);
                out.push(next);
                if next == 0 {
                    break;
                }
                p += next as usize;
            }
            out
        };
        assert!(offsets[..offsets.len() - 1].windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*offsets.last().unwrap(), 0);
    }

    #[test]
    fn chain_records_name_lengths_exactly() {
        let entries = vec![entry(0, "file.dat", 1), entry(1, "x", 2)];
        let mut buf = vec![0u8; 512];
        encode_directory_chain(&entries, &mut buf, 0).unwrap();

        let first_len = BigEndian::read_u32(&buf[60..64]) as usize;
        assert_eq!(first_len, "file.dat".len());
        let second = entries[0].encoded_len();
        let second_len = BigEndian::read_u32(&buf[second + 60..second + 64]) as usize;
        assert_eq!(second_len, 1);
    }

    #[test]
    fn chain_overflow_leaves_written_prefix() {
        let entries = vec![entry(0, "first", 1), entry(1, "second", 2)];
        // Room for the first entry only.
        let mut buf = vec![0u8; entries[0].encoded_len() + 8];
        let err = encode_directory_chain(&entries, &mut buf, 0).unwrap_err();
        assert!(matches!(err, FileOpError::BufferTooSmall { .. }));

        // The first entry's bytes are still there (with a non-zero next
        // offset; the caller must not trust a failed encode).
        let name_len = BigEndian::read_u32(&buf[60..64]) as usize;
        assert_eq!(&buf[64..64 + name_len], b"first");
    }

    #[test]
    fn single_entry_chain_terminates_immediately() {
        let entries = vec![entry(0, "only", 9)];
        let mut buf = vec![0u8; 128];
        let written = encode_directory_chain(&entries, &mut buf, 0).unwrap();
        assert_eq!(written, DIR_ENTRY_HEADER_LEN + 4);
        assert_eq!(BigEndian::read_u32(&buf[0..4]), 0);
        assert_eq!(BigEndian::read_u32(&buf[4..8]), 0);
        assert_eq!(BigEndian::read_u64(&buf[40..48]), 9);
    }

    #[test]
    fn attributes_compose_and_test() {
        let attrs = FileAttributes::DIRECTORY | FileAttributes::HIDDEN;
        assert!(attrs.is_directory());
        assert!(attrs.contains(FileAttributes::HIDDEN));
        assert!(!attrs.contains(FileAttributes::SYSTEM));
        assert_eq!(attrs.bits(), 0x12);
    }
}
