//! Post-build verification that an archive contains a usable entry.

use std::path::Path;

use crate::error::{HeaderError, IntegrityError};
use crate::reader::{list_package, read_header};

/// Checks that `relative` exists in `archive` with a non-zero size.
///
/// Failures are classified as:
/// - archive missing on disk: likely a misconfiguration;
/// - header unreadable, entry empty or its bytes past the end of the file: corrupted;
/// - anything else: the entry does not exist.
pub fn check_file_in_archive(archive: &Path, relative: &str, message_prefix: &str) -> Result<(), IntegrityError> {
    let entry = relative.to_string();
    let prefix = message_prefix.to_string();

    let lookup = read_header(archive).and_then(|header| {
        let node = header.lookup(relative, true)?.clone();
        Ok((header, node))
    });

    let (header, node) = match lookup {
        Ok(found) => found,
        Err(err) => return Err(classify_lookup_failure(archive, entry, prefix, err)),
    };

    let corrupted = |reason: String| IntegrityError::Corrupted {
        prefix: message_prefix.to_string(),
        entry: relative.to_string(),
        archive: archive.to_path_buf(),
        reason,
    };

    // Directories carry no size and pass.
    let Some(size) = node.size else {
        return Ok(());
    };
    if size == 0 {
        return Err(corrupted("size 0".to_string()));
    }

    if let (false, Some(offset)) = (node.unpacked, node.offset) {
        let archive_len = std::fs::metadata(archive).map(|m| m.len()).map_err(|e| corrupted(e.to_string()))?;
        let end = header
            .payload_start()
            .checked_add(offset)
            .and_then(|start| start.checked_add(size))
            .ok_or_else(|| corrupted("offset out of range".to_string()))?;
        if end > archive_len {
            return Err(corrupted(format!("data ends at byte {end} but the archive has {archive_len} bytes")));
        }
    }
    Ok(())
}

fn classify_lookup_failure(archive: &Path, entry: String, prefix: String, err: HeaderError) -> IntegrityError {
    if !archive.exists() {
        return IntegrityError::ArchiveMissing { prefix, entry, archive: archive.to_path_buf() };
    }
    if let Err(list_err) = list_package(archive) {
        return IntegrityError::Corrupted { prefix, entry, archive: archive.to_path_buf(), reason: list_err.to_string() };
    }
    tracing::debug!("Lookup of \"{entry}\" failed: {err}");
    IntegrityError::EntryMissing { prefix, entry, archive: archive.to_path_buf() }
}
