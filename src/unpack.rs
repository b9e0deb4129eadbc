//! # Unpack Classifier
//!
//! Decides which `node_modules` dependencies cannot live inside the archive
//! because they ship native code, and prepares their mirror directories.
//!
//! A dependency is extracted as soon as one of its files is a `.dll`, an `.exe`
//! or an extensionless binary. Dependency manifests are cleaned along the way.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::common::Entry;
use crate::error::PackError;
use crate::manifest::{cleanup_manifest, MANIFEST_NAME};

/// Directory component that roots third-party dependencies.
pub const DEPENDENCY_ROOT: &str = "node_modules";

/// Bytes inspected when sniffing extensionless files.
const SNIFF_LEN: usize = 512;

/// Directories (source paths) whose contents are extracted instead of packed.
///
/// The set only grows during a run.
#[derive(Debug, Clone, Default)]
pub struct UnpackedDirs {
    dirs: HashSet<PathBuf>,
}

impl UnpackedDirs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.contains(dir)
    }

    /// Returns `true` if `dir` was not yet present.
    pub fn insert(&mut self, dir: PathBuf) -> bool {
        self.dirs.insert(dir)
    }

    /// Whether `dir` lies strictly below any member, on component boundaries.
    pub fn has_ancestor_of(&self, dir: &Path) -> bool {
        self.dirs.iter().any(|member| dir != member && dir.starts_with(member))
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// Result of classifying one file list.
#[derive(Debug, Default)]
pub struct Classification {
    pub unpacked_dirs: UnpackedDirs,
    /// Cleaned dependency manifests, keyed by source path. Only manifests that
    /// actually changed are present.
    pub manifests: HashMap<PathBuf, String>,
}

/// Returns the dependency directory that owns `path`, if `path` lies strictly
/// inside one below `src`.
///
/// The owner is the component right after the last `node_modules`, so scoped
/// packages resolve to their `@scope` directory.
pub fn owning_dependency_dir(src: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(src).ok()?;
    let components: Vec<Component<'_>> = relative.components().collect();
    let marker = components
        .iter()
        .rposition(|c| matches!(c, Component::Normal(name) if *name == OsStr::new(DEPENDENCY_ROOT)))?;
    // node_modules / <dependency> / <at least one more component>
    if components.len() < marker + 3 {
        return None;
    }
    let mut owner = src.to_path_buf();
    for component in &components[..=marker + 1] {
        owner.push(component.as_os_str());
    }
    Some(owner)
}

/// Heuristic binary detection on the first bytes of a file.
///
/// Empty files are text. A NUL byte means binary; valid UTF-8 means text;
/// otherwise more than 10% control bytes means binary.
pub fn is_binary_file(path: &Path) -> io::Result<bool> {
    let mut sample = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?.take(SNIFF_LEN as u64).read_to_end(&mut sample)?;
    Ok(is_binary_sample(&sample))
}

fn is_binary_sample(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => return false,
        // Sample cut inside a multi-byte sequence.
        Err(e) if e.error_len().is_none() => return false,
        Err(_) => {}
    }
    let suspicious = sample
        .iter()
        .filter(|&&b| (b < 7 || b > 14) && (b < 32 || b > 127))
        .count();
    suspicious * 10 > sample.len()
}

fn should_unpack(path: &Path) -> Result<bool, PackError> {
    match path.extension().and_then(OsStr::to_str) {
        Some("dll") | Some("exe") => Ok(true),
        Some(_) => Ok(false),
        None => is_binary_file(path).map_err(|e| PackError::io(e, path)),
    }
}

fn relative_to(base: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(base).map(Path::to_path_buf).unwrap_or_default()
}

/// Scans `entries` for dependencies that must be extracted.
///
/// Mirror directories are created below `unpacked_dest` before returning, and
/// all scheduled manifest cleanups have finished.
pub fn classify(entries: &[Entry], src: &Path, unpacked_dest: &Path, pool: &ThreadPool) -> Result<Classification, PackError> {
    let mut unpacked_dirs = UnpackedDirs::new();
    // dependency dir (relative to src) -> subdirectories (relative to it) to create
    let mut dirs_to_create: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut manifest_reads: Vec<&Path> = Vec::new();

    for entry in entries {
        if !entry.is_file() {
            continue;
        }
        let file = entry.path.as_path();
        let Some(dependency_dir) = owning_dependency_dir(src, file) else {
            continue;
        };
        let Some(file_parent) = file.parent() else {
            continue;
        };

        if file_parent == dependency_dir && file.file_name() == Some(OsStr::new(MANIFEST_NAME)) {
            manifest_reads.push(file);
        }

        if unpacked_dirs.contains(&dependency_dir) {
            if file_parent != dependency_dir && unpacked_dirs.insert(file_parent.to_path_buf()) {
                dirs_to_create
                    .entry(relative_to(src, &dependency_dir))
                    .or_default()
                    .push(relative_to(&dependency_dir, file_parent));
            }
            continue;
        }

        if !should_unpack(file)? {
            continue;
        }

        tracing::debug!(
            "{} is not packed into asar archive - contains executable code",
            relative_to(src, &dependency_dir).display()
        );

        dirs_to_create
            .entry(relative_to(src, &dependency_dir))
            .or_default()
            .push(relative_to(&dependency_dir, file_parent));

        let mut dir = file_parent;
        while dir != dependency_dir {
            unpacked_dirs.insert(dir.to_path_buf());
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        unpacked_dirs.insert(dependency_dir);
    }

    let manifests = pool.install(|| {
        manifest_reads
            .par_iter()
            .map(|path| {
                let raw = fs::read(path).map_err(|e| PackError::io(e, *path))?;
                Ok(cleanup_manifest(&raw).map(|text| (path.to_path_buf(), text)))
            })
            .collect::<Result<Vec<_>, PackError>>()
    })?;

    // Parents first: each dependency dir is created before its own subdirectories,
    // and subdirectories are created one after another.
    pool.install(|| {
        dirs_to_create.par_iter().try_for_each(|(dependency, subdirs)| {
            let base = unpacked_dest.join(dependency);
            fs::create_dir_all(&base).map_err(|e| PackError::io(e, &base))?;
            for subdir in subdirs {
                let dir = base.join(subdir);
                fs::create_dir_all(&dir).map_err(|e| PackError::io(e, &dir))?;
            }
            Ok::<(), PackError>(())
        })
    })?;

    tracing::debug!("{} dependency directories marked unpacked", unpacked_dirs.len());
    Ok(Classification { unpacked_dirs, manifests: manifests.into_iter().flatten().collect() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::walk;
    use tempfile::tempdir;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn owner_is_component_after_last_marker() {
        let src = Path::new("/app");
        assert_eq!(
            owning_dependency_dir(src, Path::new("/app/node_modules/a/node_modules/b/lib/x.js")),
            Some(PathBuf::from("/app/node_modules/a/node_modules/b"))
        );
        assert_eq!(
            owning_dependency_dir(src, Path::new("/app/node_modules/@scope/pkg/index.js")),
            Some(PathBuf::from("/app/node_modules/@scope"))
        );
        assert_eq!(owning_dependency_dir(src, Path::new("/app/node_modules/loose.js")), None);
        assert_eq!(owning_dependency_dir(src, Path::new("/app/lib/index.js")), None);
    }

    #[test]
    fn sniffing_distinguishes_text_and_binary() {
        assert!(!is_binary_sample(b""));
        assert!(!is_binary_sample(b"#!/usr/bin/env node\nconsole.log('hi')\n"));
        assert!(!is_binary_sample("caf\u{e9} \u{2713}".as_bytes()));
        assert!(is_binary_sample(b"\x7fELF\x02\x01\x01\x00\x00"));
        assert!(is_binary_sample(&[0xCF, 0xFA, 0xED, 0xFE, 0x07, 0x01, 0x02, 0x03]));
    }

    #[test]
    fn native_dependency_is_marked_and_mirrored() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("app");
        let native = src.join("node_modules/native");
        fs::create_dir_all(native.join("bin/linux")).unwrap();
        fs::create_dir_all(native.join("lib")).unwrap();
        fs::write(native.join("lib/index.js"), b"module.exports = 1").unwrap();
        fs::write(native.join("bin/linux/helper"), b"\x7fELF\x00\x00binary").unwrap();
        fs::write(src.join("node_modules/plain.js"), b"x").unwrap();
        fs::create_dir_all(src.join("node_modules/pure")).unwrap();
        fs::write(src.join("node_modules/pure/index.js"), b"x").unwrap();
        fs::write(src.join("node_modules/pure/README"), b"plain text readme").unwrap();

        let entries = walk(&src, None).unwrap();
        let dest = dir.path().join("app.asar.unpacked");
        let result = classify(&entries, &src, &dest, &pool()).unwrap();

        assert!(result.unpacked_dirs.contains(&native));
        assert!(result.unpacked_dirs.contains(&native.join("bin/linux")));
        assert!(result.unpacked_dirs.contains(&native.join("bin")));
        assert!(!result.unpacked_dirs.contains(&src.join("node_modules/pure")));
        assert!(dest.join("node_modules/native/bin/linux").is_dir());
    }

    #[test]
    fn dll_and_exe_always_unpack() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("app");
        fs::create_dir_all(src.join("node_modules/win")).unwrap();
        fs::write(src.join("node_modules/win/helper.exe"), b"MZ text").unwrap();
        let entries = walk(&src, None).unwrap();
        let result = classify(&entries, &src, &dir.path().join("out.unpacked"), &pool()).unwrap();
        assert!(result.unpacked_dirs.contains(&src.join("node_modules/win")));
    }

    #[test]
    fn dependency_manifests_are_cleaned() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("app");
        fs::create_dir_all(src.join("node_modules/dep")).unwrap();
        fs::create_dir_all(src.join("node_modules/clean")).unwrap();
        fs::write(src.join("node_modules/dep/package.json"), br#"{"name":"dep","_from":"x","gitHead":"y"}"#).unwrap();
        fs::write(src.join("node_modules/clean/package.json"), br#"{"name":"clean"}"#).unwrap();
        fs::write(src.join("package.json"), br#"{"name":"app","_private":true}"#).unwrap();

        let entries = walk(&src, None).unwrap();
        let result = classify(&entries, &src, &dir.path().join("out.unpacked"), &pool()).unwrap();
        assert_eq!(result.manifests.len(), 1);
        let cleaned = &result.manifests[&src.join("node_modules/dep/package.json")];
        assert_eq!(cleaned, "{\n  \"name\": \"dep\"\n}");
        assert!(result.unpacked_dirs.is_empty());
    }

    #[test]
    fn has_ancestor_of_respects_component_boundaries() {
        let mut dirs = UnpackedDirs::new();
        dirs.insert(PathBuf::from("/app/node_modules/foo"));
        assert!(dirs.has_ancestor_of(Path::new("/app/node_modules/foo/lib")));
        assert!(!dirs.has_ancestor_of(Path::new("/app/node_modules/foobar")));
        assert!(!dirs.has_ancestor_of(Path::new("/app/node_modules/foo")));
    }
}
