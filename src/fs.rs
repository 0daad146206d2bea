//! The file system seam between the instruction handlers and the storage
//! stack.
//!
//! On the hardware [`FileSystem`] is implemented over a FAT volume on the SD
//! card (see `infra::sdcard`).  The handlers only ever see this trait, so
//! they can be exercised against an in-memory file system on the host.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;
use core::ops::ControlFlow;
use md5::{Digest, Md5};

use crate::constants::DIGEST_SIZE;

/// First name byte of a directory slot which has never been used.  No used
/// slots follow it.
pub const DIR_NAME_FREE: u8 = 0x00;

/// First name byte of a directory slot whose file has been deleted.
pub const DIR_NAME_DELETED: u8 = 0xE5;

bitflags! {
    /// The mode a file is opened with.  The bits are the values sent by the
    /// host in the OPEN instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        /// Open for reading.
        const READ = 0x01;
        /// Open for writing.
        const WRITE = 0x02;
        /// Writes append to the end of the file.
        const APPEND = 0x04;
        /// Synchronise after every write.  Accepted and ignored.
        const SYNC = 0x08;
        /// Create the file if it doesn't exist.
        const CREATE = 0x10;
        /// With CREATE, fail if the file already exists.
        const EXCLUSIVE = 0x20;
        /// Truncate the file to zero length.
        const TRUNCATE = 0x40;
    }
}

impl OpenMode {
    /// Read only.
    pub const OPEN_READ: Self = Self::READ;
    /// Read and write, created if necessary, positioned at the start.
    pub const OPEN_WRITE: Self = Self::READ.union(Self::WRITE).union(Self::CREATE);
    /// Read and write, writes appended.
    pub const OPEN_APPEND: Self = Self::READ.union(Self::WRITE).union(Self::APPEND);
    /// Write only, created if necessary, truncated.
    pub const OPEN_TRUNC: Self = Self::WRITE.union(Self::CREATE).union(Self::TRUNCATE);

    /// Decodes the mode byte sent by the host.  Unknown bits are kept, and
    /// ignored by the file system.
    pub fn from_wire(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    /// A mode must allow at least one of reading and writing.
    pub fn is_valid(self) -> bool {
        self.intersects(Self::READ | Self::WRITE)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    /// Whether a newly opened file should be positioned at its start.
    /// Appending files are positioned at their end.
    pub fn starts_at_beginning(self) -> bool {
        !self.contains(Self::APPEND)
    }
}

/// File system errors.  These are mapped to protocol error codes by the
/// instruction handlers, which know what the operation was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsError {
    NotFound,
    AlreadyExists,
    InvalidName,
    NotADirectory,
    OutOfRange,
    TooManyOpen,
    /// The file is already open, and the file system allows only one
    /// handle per file.
    AlreadyOpen,
    ReadOnly,
    Io,
}

/// What kind of object a directory entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryKind {
    File,
    Directory,
    /// Volume labels and the like, which are never listed.
    Other,
}

/// A raw directory slot, in the order the file system stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirEntry {
    /// 8.3 name, space padded, without the dot.
    pub name: [u8; 11],
    pub kind: EntryKind,
    pub size: u32,
}

impl DirEntry {
    /// Builds an entry from an 8.3 name's base and extension.  Longer parts
    /// are truncated, shorter ones space padded.
    pub fn from_parts(base: &[u8], extension: &[u8], kind: EntryKind, size: u32) -> Self {
        let mut name = [b' '; 11];
        for (dst, src) in name[..8].iter_mut().zip(base) {
            *dst = *src;
        }
        for (dst, src) in name[8..].iter_mut().zip(extension) {
            *dst = *src;
        }
        Self { name, kind, size }
    }

    /// A free slot marks the end of the directory.
    pub fn is_end_marker(&self) -> bool {
        self.name[0] == DIR_NAME_FREE
    }

    /// Whether the entry is one a listing should show: a file or directory
    /// which isn't deleted, and isn't `.` or `..`.
    pub fn is_listable(&self) -> bool {
        self.name[0] != DIR_NAME_DELETED
            && self.name[0] != b'.'
            && matches!(self.kind, EntryKind::File | EntryKind::Directory)
    }
}

/// Target of a change directory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DirTarget<'a> {
    /// The volume's root directory.
    Root,
    /// A directory within the current directory.
    Child(&'a str),
}

/// How many levels below the root the current directory is.  Lets a move up
/// to the root be recognised without looking at the directory itself.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirDepth(usize);

impl DirDepth {
    pub fn is_root(self) -> bool {
        self.0 == 0
    }

    /// The depth after moving to `target`, or `None` for `..` at the root.
    pub fn after(self, target: DirTarget<'_>) -> Option<Self> {
        match target {
            DirTarget::Root => Some(Self(0)),
            DirTarget::Child(".") => Some(self),
            DirTarget::Child("..") => self.0.checked_sub(1).map(Self),
            DirTarget::Child(_) => Some(Self(self.0 + 1)),
        }
    }
}

/// The file system operations the instruction handlers need.  All names are
/// relative to the current directory.
pub trait FileSystem {
    /// A handle to an open file.
    type File;

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<Self::File, FsError>;

    /// Flushes (if necessary) and closes the file.
    fn close(&mut self, file: Self::File) -> Result<(), FsError>;

    fn flush(&mut self, file: &mut Self::File) -> Result<(), FsError>;

    /// Reads up to `buf.len()` bytes from the current position.  Returns the
    /// number read, which is 0 at the end of the file.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Writes at the current position, returning the number of bytes
    /// written.
    fn write(&mut self, file: &mut Self::File, buf: &[u8]) -> Result<usize, FsError>;

    /// Seeks to an absolute position.  Seeking beyond the end of the file is
    /// an error.
    fn seek(&mut self, file: &mut Self::File, position: u32) -> Result<(), FsError>;

    fn size(&mut self, file: &Self::File) -> Result<u32, FsError>;

    fn position(&mut self, file: &Self::File) -> Result<u32, FsError>;

    /// Whether a file (not a directory) of this name exists.  Unlike
    /// opening it, this works while the file is open.
    fn exists(&mut self, name: &str) -> Result<bool, FsError>;

    fn remove(&mut self, name: &str) -> Result<(), FsError>;

    fn change_dir(&mut self, target: DirTarget<'_>) -> Result<(), FsError>;

    /// Visits the current directory's slots in storage order, until the
    /// visitor breaks or the slots run out.
    fn for_each_entry<V>(&mut self, visit: V) -> Result<(), FsError>
    where
        V: FnMut(&DirEntry) -> ControlFlow<()>;
}

/// Computes a content digest incrementally.
pub trait ContentHasher: Default {
    fn update(&mut self, data: &[u8]);

    fn finalize(self) -> [u8; DIGEST_SIZE];
}

/// MD5, as returned by the FILE_MD5 instruction.
#[derive(Default)]
pub struct Md5Hasher(Md5);

impl ContentHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self) -> [u8; DIGEST_SIZE] {
        let mut digest = [0; DIGEST_SIZE];
        digest.copy_from_slice(&self.0.finalize());
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_presets_match_wire_values() {
        assert_eq!(OpenMode::OPEN_READ.bits(), 0x01);
        assert_eq!(OpenMode::OPEN_WRITE.bits(), 0x13);
        assert_eq!(OpenMode::OPEN_APPEND.bits(), 0x07);
        assert_eq!(OpenMode::OPEN_TRUNC.bits(), 0x52);
    }

    #[test]
    fn mode_needs_read_or_write() {
        assert!(OpenMode::from_wire(0x01).is_valid());
        assert!(OpenMode::from_wire(0x02).is_valid());
        assert!(!OpenMode::from_wire(0x00).is_valid());
        assert!(!OpenMode::from_wire(0x10).is_valid());
        assert!(!OpenMode::from_wire(0x80).is_valid());
    }

    #[test]
    fn append_mode_starts_at_end() {
        assert!(OpenMode::OPEN_WRITE.starts_at_beginning());
        assert!(!OpenMode::OPEN_APPEND.starts_at_beginning());
        assert!(OpenMode::OPEN_APPEND.is_writable());
        assert!(!OpenMode::OPEN_READ.is_writable());
    }

    #[test]
    fn entry_names_are_space_padded() {
        let entry = DirEntry::from_parts(b"README", b"MD", EntryKind::File, 10);
        assert_eq!(&entry.name, b"README  MD ");
        let entry = DirEntry::from_parts(b"DATA", b"", EntryKind::Directory, 0);
        assert_eq!(&entry.name, b"DATA       ");
    }

    #[test]
    fn dot_deleted_and_volume_entries_are_not_listable() {
        let file = DirEntry::from_parts(b"A", b"TXT", EntryKind::File, 1);
        assert!(file.is_listable());
        let dot = DirEntry::from_parts(b"..", b"", EntryKind::Directory, 0);
        assert!(!dot.is_listable());
        let deleted = DirEntry::from_parts(&[DIR_NAME_DELETED, b'B'], b"TXT", EntryKind::File, 1);
        assert!(!deleted.is_listable());
        let label = DirEntry::from_parts(b"VOLUME", b"", EntryKind::Other, 0);
        assert!(!label.is_listable());
        let free = DirEntry::from_parts(&[DIR_NAME_FREE], b"", EntryKind::File, 0);
        assert!(free.is_end_marker());
    }

    #[test]
    fn dir_depth_follows_moves() {
        let depth = DirDepth::default();
        assert!(depth.is_root());
        assert_eq!(depth.after(DirTarget::Child("..")), None);
        assert_eq!(depth.after(DirTarget::Child(".")), Some(depth));

        let games = depth.after(DirTarget::Child("GAMES")).unwrap();
        assert!(!games.is_root());
        assert!(games.after(DirTarget::Child("..")).unwrap().is_root());
        assert!(games.after(DirTarget::Root).unwrap().is_root());

        let deeper = games.after(DirTarget::Child("OLD")).unwrap();
        let up = deeper.after(DirTarget::Child("..")).unwrap();
        assert_eq!(up, games);
        assert!(!up.is_root());
    }

    #[test]
    fn md5_of_known_vectors() {
        let hasher = Md5Hasher::default();
        assert_eq!(
            hasher.finalize(),
            [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
                0x42, 0x7e
            ]
        );

        let mut hasher = Md5Hasher::default();
        hasher.update(b"a");
        hasher.update(b"bc");
        assert_eq!(
            hasher.finalize(),
            [
                0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28, 0xe1,
                0x7f, 0x72
            ]
        );
    }
}
