//! # Concurrent Tree Walker
//!
//! Enumerates everything below a root directory into a deterministic list.
//!
//! - Children of a directory are emitted sorted by name, directories in place.
//! - Subdirectories are then descended depth-first from an explicit stack, so
//!   deep trees never grow the call stack.
//! - Entries of one directory are `lstat`ed on a bounded worker pool; the
//!   filter and the result list are only touched by the calling thread.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::common::Entry;
use crate::config::MAX_FILE_REQUESTS;
use crate::error::PackError;

/// Inclusion filter. Returning `false` drops the entry and, for a directory,
/// its entire subtree.
pub type Filter = dyn Fn(&Path, &Metadata) -> bool + Send + Sync;

/// Walks `root` with a private pool of [`MAX_FILE_REQUESTS`] workers.
pub fn walk(root: &Path, filter: Option<&Filter>) -> Result<Vec<Entry>, PackError> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(MAX_FILE_REQUESTS).build()?;
    walk_with_pool(root, filter, &pool)
}

/// Walks `root` and returns every accepted descendant (the root excluded).
///
/// Any unreadable directory or failed `lstat` aborts the walk.
pub fn walk_with_pool(root: &Path, filter: Option<&Filter>, pool: &ThreadPool) -> Result<Vec<Entry>, PackError> {
    let mut result = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir_path) = stack.pop() {
        let mut names = Vec::new();
        let read_dir = fs::read_dir(&dir_path).map_err(|e| PackError::io(e, &dir_path))?;
        for dirent in read_dir {
            let dirent = dirent.map_err(|e| PackError::io(e, &dir_path))?;
            names.push(dirent.file_name());
        }
        names.sort();

        let stats: Vec<(PathBuf, Metadata)> = pool.install(|| {
            names
                .par_iter()
                .map(|name| {
                    let path = dir_path.join(name);
                    fs::symlink_metadata(&path)
                        .map(|metadata| (path.clone(), metadata))
                        .map_err(|e| PackError::io(e, path))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut subdirs = Vec::new();
        for (path, metadata) in stats {
            if let Some(filter) = filter {
                if !filter(&path, &metadata) {
                    continue;
                }
            }
            let entry = Entry::from_metadata(path, &metadata);
            if entry.is_dir() {
                subdirs.push(entry.path.clone());
            }
            result.push(entry);
        }

        // Reverse so the first sibling is popped first.
        stack.extend(subdirs.into_iter().rev());
    }

    Ok(result)
}
