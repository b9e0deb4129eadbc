//! Options controlling a single packing run.
//!
//! Nothing in the library reads the process environment; switches such as
//! "running on CI" are resolved by the caller and handed over here.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::PackError;

/// Cap on concurrent filesystem requests (stats, copies, manifest reads).
pub const MAX_FILE_REQUESTS: usize = 8;

/// How unpacked files reach the `<archive>.unpacked` mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Stream a full copy, preserving the permission bits.
    #[default]
    Copy,
    /// Hard-link the source file. Saves copy time on throwaway build machines.
    HardLink,
}

impl LinkMode {
    /// Resolves the link policy from an explicit flag plus the usual CI switches.
    ///
    /// Priority:
    /// 1. `explicit` (`--hard-links`).
    /// 2. `USE_HARD_LINKS=true`.
    /// 3. A truthy `CI` variable.
    ///
    /// Hard links are never chosen on Windows.
    pub fn from_env(explicit: bool) -> Self {
        if cfg!(windows) {
            return LinkMode::Copy;
        }
        let hard_links_requested = std::env::var("USE_HARD_LINKS").map(|v| v == "true").unwrap_or(false);
        let on_ci = std::env::var("CI")
            .map(|v| !v.is_empty() && v != "false" && v != "0")
            .unwrap_or(false);
        if explicit || hard_links_requested || on_ci {
            LinkMode::HardLink
        } else {
            LinkMode::Copy
        }
    }
}

/// Glob patterns matched against source-relative paths (unpack and exclude lists).
///
/// Patterns are matched against the `/`-separated path relative to the source
/// root. A pattern without a `/` also matches the bare file name, so `*.node`
/// catches native addons at any depth.
#[derive(Debug, Clone)]
pub struct PathPattern {
    by_path: GlobSet,
    by_name: GlobSet,
}

impl PathPattern {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PackError> {
        let mut by_path = GlobSetBuilder::new();
        let mut by_name = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern)?;
            if pattern.contains('/') {
                by_path.add(glob);
            } else {
                by_name.add(glob);
            }
        }
        Ok(Self { by_path: by_path.build()?, by_name: by_name.build()? })
    }

    /// `relative` is the entry's path under the source root.
    pub fn is_match(&self, relative: &Path) -> bool {
        let normalized = normalize_separators(relative);
        if self.by_path.is_match(&normalized) {
            return true;
        }
        match relative.file_name() {
            Some(name) => self.by_name.is_match(name),
            None => false,
        }
    }
}

/// Replace platform separators with `/`.
pub(crate) fn normalize_separators(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Holds all configuration options for a packing operation.
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Ordering hint file; `None` keeps walk order.
    pub ordering: Option<PathBuf>,
    /// Detect `node_modules` dependencies with native payloads and extract them.
    pub smart_unpack: bool,
    /// Additional files to extract regardless of smart unpack.
    pub unpack: Option<PathPattern>,
    /// Deep-merged into the root `package.json` when present.
    pub extra_metadata: Option<serde_json::Value>,
    pub link_mode: LinkMode,
    /// Record the owner-execute bit as `executable` on packed files.
    pub record_executable: bool,
    /// Size of the worker pool used for stats, copies and manifest reads.
    pub concurrency: usize,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            ordering: None,
            smart_unpack: true,
            unpack: None,
            extra_metadata: None,
            link_mode: LinkMode::Copy,
            record_executable: cfg!(unix),
            concurrency: MAX_FILE_REQUESTS,
        }
    }
}

impl PackOptions {
    pub(crate) fn build_pool(&self) -> Result<rayon::ThreadPool, PackError> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency.max(1))
            .thread_name(|i| format!("asarpack-io-{i}"))
            .build()?)
    }
}
