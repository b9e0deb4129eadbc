//! Common types shared by the packing stages.

use std::fs::Metadata;
use std::path::PathBuf;

use crate::fsx;

/// What a walked path turned out to be, as seen by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Sockets, FIFOs and devices. Kept in the walk, ignored by the packager.
    Other,
}

/// Metadata snapshot for a single walked path.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Absolute (root-joined) path of the entry.
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    /// Unix permission bits; `0` on platforms without them.
    pub mode: u32,
}

impl Entry {
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        Self { path, kind, size: metadata.len(), mode: fsx::mode(metadata) }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}
