//! Reading existing archives: header parsing, lookups, listing and file reads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::HeaderError;
use crate::header::{decode_header, decode_size_record, relative_names, Node, SIZE_RECORD_LEN};

/// Upper bound on `link` hops while resolving one path.
const MAX_LINK_HOPS: usize = 40;

/// A parsed archive header.
#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    pub root: Node,
    /// Byte length of the header record.
    pub header_size: u32,
}

impl ArchiveHeader {
    /// Absolute file position where the payload region begins.
    pub fn payload_start(&self) -> u64 {
        SIZE_RECORD_LEN as u64 + u64::from(self.header_size)
    }

    /// Resolves `relative`, following links in intermediate directories and,
    /// when `follow_links` is set, on the final node as well.
    pub fn lookup(&self, relative: &str, follow_links: bool) -> Result<&Node, HeaderError> {
        self.resolve(relative, follow_links).map(|(_, node)| node)
    }

    /// Like [`lookup`](Self::lookup), also returning the link-free names leading
    /// to the node from the archive root.
    pub fn resolve(&self, relative: &str, follow_links: bool) -> Result<(Vec<String>, &Node), HeaderError> {
        let mut pending: Vec<String> = relative_names(Path::new(relative));
        pending.reverse();
        let mut resolved: Vec<String> = Vec::new();
        let mut node = &self.root;
        let mut hops = 0;

        while let Some(name) = pending.pop() {
            let child = node
                .files
                .as_ref()
                .and_then(|files| files.get(&name))
                .ok_or_else(|| HeaderError::NotFound(relative.to_string()))?;

            let is_last = pending.is_empty();
            match &child.link {
                Some(link) if !is_last || follow_links => {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return Err(HeaderError::LinkLoop(relative.to_string()));
                    }
                    // Links are relative to the archive root: restart from there.
                    let mut target = relative_names(Path::new(link));
                    target.reverse();
                    pending.extend(target);
                    resolved.clear();
                    node = &self.root;
                }
                _ => {
                    resolved.push(name);
                    node = child;
                }
            }
        }
        Ok((resolved, node))
    }

    /// Every path in the archive, `/`-prefixed, parents before children.
    pub fn list(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<(String, &Node)> = vec![(String::new(), &self.root)];
        while let Some((prefix, node)) = stack.pop() {
            let Some(files) = &node.files else { continue };
            let mut dirs = Vec::new();
            for (name, child) in files {
                let path = format!("{prefix}/{name}");
                out.push(path.clone());
                if child.files.is_some() {
                    dirs.push((path, child));
                }
            }
            stack.extend(dirs.into_iter().rev());
        }
        out
    }
}

/// Size, location and flags of one resolved entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub offset: Option<u64>,
    pub unpacked: bool,
    pub executable: bool,
}

/// Reads and parses the header records of `archive`.
pub fn read_header(archive: &Path) -> Result<ArchiveHeader, HeaderError> {
    let io_err = |source: std::io::Error| HeaderError::Io { source, path: archive.to_path_buf() };
    let mut file = File::open(archive).map_err(io_err)?;

    let mut size_buf = [0u8; SIZE_RECORD_LEN];
    read_exact_or_truncated(&mut file, &mut size_buf, archive)?;
    let header_size = decode_size_record(&size_buf)?;

    let mut header_buf = vec![0u8; header_size as usize];
    read_exact_or_truncated(&mut file, &mut header_buf, archive)?;
    let root = decode_header(&header_buf)?;
    if !root.is_directory() {
        return Err(HeaderError::Malformed("root node has no files".into()));
    }
    Ok(ArchiveHeader { root, header_size })
}

fn read_exact_or_truncated(file: &mut File, buf: &mut [u8], archive: &Path) -> Result<(), HeaderError> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            HeaderError::Truncated
        } else {
            HeaderError::Io { source: e, path: archive.to_path_buf() }
        }
    })
}

/// Looks up `relative` in `archive`, following links.
pub fn stat_file(archive: &Path, relative: &str) -> Result<FileInfo, HeaderError> {
    let header = read_header(archive)?;
    let node = header.lookup(relative, true)?;
    Ok(FileInfo {
        size: node.size.unwrap_or(0),
        offset: node.offset,
        unpacked: node.unpacked,
        executable: node.executable,
    })
}

/// Lists every path stored in `archive`.
pub fn list_package(archive: &Path) -> Result<Vec<String>, HeaderError> {
    Ok(read_header(archive)?.list())
}

/// Mirror directory holding the unpacked files of `archive`.
pub fn unpacked_dir(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".unpacked");
    PathBuf::from(name)
}

/// Returns the content of the file at `relative`.
///
/// Unpacked files are read from the `<archive>.unpacked` mirror.
pub fn read_file(archive: &Path, relative: &str) -> Result<Vec<u8>, HeaderError> {
    let header = read_header(archive)?;
    let (names, node) = header.resolve(relative, true)?;
    if node.is_directory() {
        return Err(HeaderError::Malformed(format!("\"{relative}\" is a directory")));
    }
    let size = node.size.unwrap_or(0);

    if node.unpacked {
        let path = names.iter().fold(unpacked_dir(archive), |path, name| path.join(name));
        return std::fs::read(&path).map_err(|source| HeaderError::Io { source, path });
    }

    let offset = node
        .offset
        .ok_or_else(|| HeaderError::Malformed(format!("\"{relative}\" has no offset")))?;
    let io_err = |source: std::io::Error| HeaderError::Io { source, path: archive.to_path_buf() };
    let mut file = File::open(archive).map_err(io_err)?;
    let archive_len = file.metadata().map_err(io_err)?.len();
    let start = header.payload_start().checked_add(offset);
    match start.and_then(|start| start.checked_add(size)) {
        Some(end) if end <= archive_len => {}
        _ => return Err(HeaderError::Malformed(format!("\"{relative}\" lies outside the archive"))),
    }
    file.seek(SeekFrom::Start(header.payload_start() + offset)).map_err(io_err)?;
    let mut buf = vec![0u8; size as usize];
    read_exact_or_truncated(&mut file, &mut buf, archive)?;
    Ok(buf)
}
