//! Cross-platform filesystem helpers.
//!
//! Permission bits only exist on Unix; on Windows the helpers degrade to the
//! plain `std::fs` behaviour so call-sites stay identical across OSes.

use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::LinkMode;

/// Returns the permission bits of `metadata`, or `0` where the platform has none.
pub fn mode(metadata: &Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0
    }
}

/// Owner-execute bit (`0o100`).
pub fn is_owner_executable(mode: u32) -> bool {
    mode & 0o100 != 0
}

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
/// No-op on Windows: POSIX permission bits are not preserved.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Removes `path` if it exists.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Places `src` at `dest` according to `link_mode`.
///
/// An existing `dest` is unlinked first: it may be a hard link to `src` left by
/// an earlier run, and opening it for writing would truncate the source.
/// Copies keep the original permission bits so extracted executables still run.
pub fn copy_or_link(src: &Path, dest: &Path, mode: u32, link_mode: LinkMode) -> io::Result<()> {
    remove_if_exists(dest)?;
    match link_mode {
        LinkMode::HardLink => fs::hard_link(src, dest),
        LinkMode::Copy => {
            let mut reader = BufReader::new(File::open(src)?);
            let mut writer = BufWriter::new(File::create(dest)?);
            io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            drop(writer);
            if mode != 0 {
                set_unix_permissions(dest, mode & 0o7777)?;
            }
            Ok(())
        }
    }
}
