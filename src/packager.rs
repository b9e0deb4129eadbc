//! # Archive Assembler
//!
//! Drives one packing run: walk the source tree, classify native dependencies,
//! optionally reorder, build the node tree, then stream the archive.
//!
//! Unpacked files are copied (or hard-linked) into `<output>.unpacked` in
//! bounded batches while the tree is being built. Packed files are only
//! recorded; their bytes are streamed sequentially once the header is known.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::common::{Entry, EntryKind};
use crate::config::{normalize_separators, PackOptions};
use crate::error::PackError;
use crate::fsx;
use crate::header::{Filesystem, MAX_PACKED_FILE_SIZE};
use crate::manifest::{apply_overrides, MANIFEST_NAME};
use crate::ordering::{self, Coverage};
use crate::reader::unpacked_dir;
use crate::unpack::{classify, Classification, UnpackedDirs};
use crate::walk::{walk_with_pool, Filter};

// use 8 MiB buffer to reduce syscall overhead while streaming payloads
const WRITE_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Totals reported after a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub packed_files: usize,
    pub unpacked_files: usize,
    pub directories: usize,
    pub links: usize,
    /// Bytes in the payload region (sum of packed node sizes).
    pub payload_size: u64,
    /// Byte length of the header record.
    pub header_size: usize,
    pub coverage: Option<Coverage>,
}

/// A file headed for the unpacked mirror.
struct UnpackJob {
    src: PathBuf,
    dest: PathBuf,
    mode: u32,
    /// Rewritten manifest content replacing the file on disk.
    content: Option<String>,
}

/// Packs `src` into the archive at `output`.
pub fn create_asar_archive(
    src: &Path,
    output: &Path,
    options: PackOptions,
    filter: Option<&Filter>,
) -> Result<PackSummary, PackError> {
    AsarPackager::new(src, output, options).pack(filter)
}

/// State of a single packing run.
pub struct AsarPackager {
    src: PathBuf,
    output: PathBuf,
    unpacked_dest: PathBuf,
    options: PackOptions,
    fs: Filesystem,
    /// Packed files in payload order, with their recorded sizes.
    to_pack: Vec<(PathBuf, u64)>,
    /// Packed files whose bytes come from memory instead of disk.
    changed_files: HashMap<PathBuf, String>,
    src_real_path: Option<PathBuf>,
    summary: PackSummary,
}

impl AsarPackager {
    pub fn new(src: &Path, output: &Path, options: PackOptions) -> Self {
        Self {
            src: src.to_path_buf(),
            output: output.to_path_buf(),
            unpacked_dest: unpacked_dir(output),
            options,
            fs: Filesystem::new(),
            to_pack: Vec::new(),
            changed_files: HashMap::new(),
            src_real_path: None,
            summary: PackSummary::default(),
        }
    }

    pub fn pack(mut self, filter: Option<&Filter>) -> Result<PackSummary, PackError> {
        let pool = self.options.build_pool()?;
        let entries = walk_with_pool(&self.src, filter, &pool)?;

        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PackError::io(e, parent))?;
        }

        let classification = if self.options.smart_unpack {
            classify(&entries, &self.src, &self.unpacked_dest, &pool)?
        } else {
            Classification::default()
        };

        let entries = match self.options.ordering.clone() {
            Some(hint_file) => {
                let (sorted, coverage) = ordering::order_from_file(entries, &hint_file, &self.src)
                    .map_err(|e| PackError::io(e, &hint_file))?;
                self.summary.coverage = Some(coverage);
                sorted
            }
            None => entries,
        };

        self.create_package_from_entries(&entries, classification, &pool)?;
        self.write_archive()?;

        tracing::info!(
            archive = %self.output.display(),
            packed = self.summary.packed_files,
            unpacked = self.summary.unpacked_files,
            payload_bytes = self.summary.payload_size,
            "Finished asar archive"
        );
        Ok(self.summary)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.src).map(Path::to_path_buf).unwrap_or_default()
    }

    /// Builds the node tree and places unpacked files into the mirror.
    pub fn create_package_from_entries(
        &mut self,
        entries: &[Entry],
        classification: Classification,
        pool: &ThreadPool,
    ) -> Result<(), PackError> {
        let Classification { mut unpacked_dirs, manifests } = classification;
        let root_manifest = self.src.join(MANIFEST_NAME);
        let mut jobs: Vec<UnpackJob> = Vec::new();

        for entry in entries {
            match entry.kind {
                EntryKind::File => {
                    let new_data = match manifests.get(&entry.path) {
                        Some(cleaned) => Some(cleaned.clone()),
                        None => self.root_manifest_override(&entry.path, &root_manifest)?,
                    };
                    if let Some(job) = self.add_file(entry, new_data, &mut unpacked_dirs)? {
                        jobs.push(job);
                        if jobs.len() >= self.options.concurrency.max(1) {
                            self.run_unpack_jobs(&mut jobs, pool)?;
                        }
                    }
                }
                EntryKind::Directory => {
                    self.add_directory(entry, &mut unpacked_dirs)?;
                }
                EntryKind::Symlink => self.add_link(&entry.path)?,
                EntryKind::Other => {
                    tracing::warn!("Skipping special file {}", entry.path.display());
                }
            }
        }

        self.run_unpack_jobs(&mut jobs, pool)
    }

    fn root_manifest_override(&self, path: &Path, root_manifest: &Path) -> Result<Option<String>, PackError> {
        let Some(overrides) = &self.options.extra_metadata else {
            return Ok(None);
        };
        if path != root_manifest {
            return Ok(None);
        }
        let raw = fs::read(path).map_err(|e| PackError::io(e, path))?;
        let text = apply_overrides(&raw, overrides).map_err(|source| PackError::Json { source, path: path.to_path_buf() })?;
        Ok(Some(text))
    }

    fn add_file(
        &mut self,
        entry: &Entry,
        new_data: Option<String>,
        unpacked_dirs: &mut UnpackedDirs,
    ) -> Result<Option<UnpackJob>, PackError> {
        let relative = self.relative(&entry.path);
        let relative_parent = relative.parent().map(Path::to_path_buf).unwrap_or_default();
        let size = new_data.as_ref().map_or(entry.size, |d| d.len() as u64);

        let parent_unpacked = self.fs.is_unpacked_dir(&relative_parent);
        let matches_pattern = self.options.unpack.as_ref().is_some_and(|p| p.is_match(&relative));

        if parent_unpacked || matches_pattern {
            let node = self.fs.node_mut(&relative);
            node.size = Some(size);
            node.unpacked = true;

            // A pattern match adopts its parent: directories visited later below it are
            // unpacked too, while files directly in it are still checked one by one.
            let file_parent = entry.path.parent().map(Path::to_path_buf).unwrap_or_default();
            if !parent_unpacked && unpacked_dirs.insert(file_parent) {
                let dest_parent = self.unpacked_dest.join(&relative_parent);
                fs::create_dir_all(&dest_parent).map_err(|e| PackError::io(e, &dest_parent))?;
            }
            self.summary.unpacked_files += 1;
            return Ok(Some(UnpackJob {
                src: entry.path.clone(),
                dest: self.unpacked_dest.join(&relative),
                mode: entry.mode,
                content: new_data,
            }));
        }

        if size > MAX_PACKED_FILE_SIZE {
            return Err(PackError::FileTooLarge { path: entry.path.clone(), size });
        }
        if let Some(data) = new_data {
            self.changed_files.insert(entry.path.clone(), data);
        }

        let offset = self.fs.allocate(size);
        let node = self.fs.node_mut(&relative);
        node.size = Some(size);
        node.offset = Some(offset);
        if self.options.record_executable && fsx::is_owner_executable(entry.mode) {
            node.executable = true;
        }
        self.to_pack.push((entry.path.clone(), size));
        self.summary.packed_files += 1;
        self.summary.payload_size += size;
        Ok(None)
    }

    /// Marks a directory unpacked when it is listed directly or lies below an
    /// already-known unpacked directory. Only directories known at visit time
    /// are considered.
    fn add_directory(
        &mut self,
        entry: &Entry,
        unpacked_dirs: &mut UnpackedDirs,
    ) -> Result<(), PackError> {
        let relative = self.relative(&entry.path);
        let unpacked = if unpacked_dirs.contains(&entry.path) {
            true
        } else if unpacked_dirs.has_ancestor_of(&entry.path) {
            unpacked_dirs.insert(entry.path.clone());
            let dest = self.unpacked_dest.join(&relative);
            fs::create_dir_all(&dest).map_err(|e| PackError::io(e, &dest))?;
            true
        } else {
            false
        };
        self.fs.insert_directory(&relative, unpacked);
        self.summary.directories += 1;
        Ok(())
    }

    fn src_real_path(&mut self) -> Result<&Path, PackError> {
        if self.src_real_path.is_none() {
            let real = fs::canonicalize(&self.src).map_err(|e| PackError::io(e, &self.src))?;
            self.src_real_path = Some(real);
        }
        Ok(self.src_real_path.as_deref().unwrap_or(&self.src))
    }

    /// Records a symlink as a `link` node relative to the real source root.
    fn add_link(&mut self, path: &Path) -> Result<(), PackError> {
        let real_file = fs::canonicalize(path).map_err(|e| PackError::io(e, path))?;
        let src_real = self.src_real_path()?.to_path_buf();
        let link = match real_file.strip_prefix(&src_real) {
            Ok(inside) => normalize_separators(inside),
            Err(_) => return Err(PackError::LinkOutsidePackage { real_path: real_file.clone() }),
        };
        let relative = self.relative(path);
        self.fs.node_mut(&relative).link = Some(link);
        self.summary.links += 1;
        Ok(())
    }

    fn run_unpack_jobs(&self, jobs: &mut Vec<UnpackJob>, pool: &ThreadPool) -> Result<(), PackError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let link_mode = self.options.link_mode;
        pool.install(|| {
            jobs.par_iter().try_for_each(|job| {
                let result = match &job.content {
                    Some(content) => fsx::remove_if_exists(&job.dest).and_then(|()| fs::write(&job.dest, content)),
                    None => fsx::copy_or_link(&job.src, &job.dest, job.mode, link_mode),
                };
                result.map_err(|e| PackError::io(e, &job.dest))
            })
        })?;
        jobs.clear();
        Ok(())
    }

    /// Streams size record, header record and every packed payload into `output`.
    ///
    /// Bytes go to a temporary file next to `output`, which replaces `output`
    /// only once everything has been flushed.
    pub fn write_archive(&mut self) -> Result<(), PackError> {
        let (size_buf, header_buf) = self.fs.encode_header()?;
        self.summary.header_size = header_buf.len();
        tracing::debug!(header_bytes = header_buf.len(), payload_bytes = self.fs.offset(), "Writing archive");

        let out_dir = match self.output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".asarpack-")
            .tempfile_in(&out_dir)
            .map_err(|e| PackError::io(e, &out_dir))?;

        {
            let out_err = |e| PackError::io(e, tmp.path());
            let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, tmp.as_file());
            writer.write_all(&size_buf).map_err(out_err)?;
            writer.write_all(&header_buf).map_err(out_err)?;

            for (path, expected) in &self.to_pack {
                if let Some(data) = self.changed_files.get(path) {
                    writer.write_all(data.as_bytes()).map_err(out_err)?;
                    continue;
                }
                let mut reader = File::open(path).map_err(|e| PackError::io(e, path))?;
                let copied = io::copy(&mut reader, &mut writer).map_err(|e| PackError::io(e, path))?;
                if copied != *expected {
                    return Err(PackError::SizeMismatch { path: path.clone(), expected: *expected, actual: copied });
                }
            }
            writer.flush().map_err(out_err)?;
        }

        tmp.as_file().sync_all().map_err(|e| PackError::io(e, tmp.path()))?;
        tmp.persist(&self.output).map_err(|e| PackError::io(e.error, &self.output))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read_file, read_header};
    use tempfile::tempdir;

    #[test]
    fn offsets_follow_packed_sizes() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("app");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("a.txt"), b"aaaa").unwrap();
        fs::write(src.join("lib/b.txt"), b"bb").unwrap();
        fs::write(src.join("lib/c.txt"), b"c").unwrap();
        let out = dir.path().join("out/app.asar");

        let summary = create_asar_archive(&src, &out, PackOptions::default(), None).unwrap();
        assert_eq!(summary.packed_files, 3);
        assert_eq!(summary.payload_size, 7);

        let header = read_header(&out).unwrap();
        assert_eq!(header.lookup("a.txt", true).unwrap().offset, Some(0));
        assert_eq!(header.lookup("lib/b.txt", true).unwrap().offset, Some(4));
        assert_eq!(header.lookup("lib/c.txt", true).unwrap().offset, Some(6));
        assert_eq!(fs::metadata(&out).unwrap().len(), header.payload_start() + 7);
        assert_eq!(read_file(&out, "lib/b.txt").unwrap(), b"bb");
    }

    #[test]
    fn pattern_unpacked_file_adopts_its_parent_directory() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("app");
        fs::create_dir_all(src.join("res/sub")).unwrap();
        fs::write(src.join("res/a.node"), b"native").unwrap();
        fs::write(src.join("res/b.js"), b"sibling").unwrap();
        fs::write(src.join("res/sub/c.js"), b"js").unwrap();
        let out = dir.path().join("app.asar");
        let options = PackOptions {
            unpack: Some(crate::config::PathPattern::new(&["*.node"]).unwrap()),
            ..PackOptions::default()
        };

        let summary = create_asar_archive(&src, &out, options, None).unwrap();
        assert_eq!(summary.unpacked_files, 2);
        assert_eq!(summary.packed_files, 1);
        assert_eq!(fs::read(dir.path().join("app.asar.unpacked/res/a.node")).unwrap(), b"native");
        assert_eq!(fs::read(dir.path().join("app.asar.unpacked/res/sub/c.js")).unwrap(), b"js");

        let header = read_header(&out).unwrap();
        assert!(!header.lookup("res", true).unwrap().unpacked);
        assert!(!header.lookup("res/b.js", true).unwrap().unpacked);
        assert!(header.lookup("res/sub", true).unwrap().unpacked);
        assert!(header.lookup("res/sub/c.js", true).unwrap().unpacked);
    }

    #[test]
    fn failed_write_leaves_no_archive() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("app");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("grows.txt"), b"12").unwrap();
        let out = dir.path().join("app.asar");

        let mut packager = AsarPackager::new(&src, &out, PackOptions::default());
        let pool = packager.options.build_pool().unwrap();
        let entries = walk_with_pool(&src, None, &pool).unwrap();
        packager.create_package_from_entries(&entries, Classification::default(), &pool).unwrap();
        fs::write(src.join("grows.txt"), b"12345").unwrap();

        let err = packager.write_archive().unwrap_err();
        assert!(matches!(err, PackError::SizeMismatch { expected: 2, actual: 5, .. }));
        assert!(!out.exists());
    }
}
