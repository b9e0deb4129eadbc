use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for packing operations in the `asarpack` crate.
#[derive(Debug, Error)]
pub enum PackError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// A packed file does not fit into the 32-bit size field of the format.
    #[error("{}: file size can not be larger than 4.2GB ({size} bytes)", path.display())]
    FileTooLarge { path: PathBuf, size: u64 },

    /// A symlink resolves to a location outside of the source directory.
    #[error("{}: file links out of the package", real_path.display())]
    LinkOutsidePackage { real_path: PathBuf },

    /// A JSON document (root manifest, metadata override) could not be parsed or written.
    #[error("Invalid JSON in '{}': {source}", path.display())]
    Json { source: serde_json::Error, path: PathBuf },

    /// A file changed size between the walk and the moment its bytes were streamed.
    #[error("{}: expected {expected} bytes but streamed {actual}", path.display())]
    SizeMismatch { path: PathBuf, expected: u64, actual: u64 },

    /// The serialized header exceeds what the 32-bit size record can describe.
    #[error("Archive header is too large ({0} bytes)")]
    HeaderTooLarge(usize),

    /// An unpack or exclude pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The external block map tool failed or printed something that is not JSON.
    #[error("Block map tool failed for '{}': {message}", path.display())]
    BlockMap { path: PathBuf, message: String },
}

impl PackError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PackError::Io { source, path: path.into() }
    }
}

/// Errors raised while reading an existing archive header.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// The file ends before the header records are complete.
    #[error("Unexpected end of archive header")]
    Truncated,

    /// The framing records are internally inconsistent.
    #[error("Malformed archive header: {0}")]
    Malformed(String),

    #[error("Invalid header JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested path is not present in the node tree.
    #[error("\"{0}\" was not found in this archive")]
    NotFound(String),

    /// Following `link` entries did not terminate.
    #[error("Too many levels of links while resolving \"{0}\"")]
    LinkLoop(String),
}

/// Outcome categories of [`crate::integrity::check_file_in_archive`].
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The archive file itself is absent.
    #[error("{prefix} \"{entry}\" in the \"{}\" does not exist. Seems like a wrong configuration.", archive.display())]
    ArchiveMissing { prefix: String, entry: String, archive: PathBuf },

    /// The archive exists but its header (or the entry's data) is unusable.
    #[error("{prefix} \"{entry}\" in the \"{}\" is corrupted: {reason}", archive.display())]
    Corrupted { prefix: String, entry: String, archive: PathBuf, reason: String },

    /// The archive is readable but has no such entry.
    #[error("{prefix} \"{entry}\" in the \"{}\" does not exist.", archive.display())]
    EntryMissing { prefix: String, entry: String, archive: PathBuf },
}
