//! Boundary to the external block map builder used for differential updates.
//!
//! The tool is invoked as `-in <file> -out <file>.blockmap` or as
//! `-in <file> -append -compression deflate`, and prints a JSON description of block checksums and sizes. That JSON is
//! passed through untouched.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::PackError;

pub const BLOCK_MAP_FILE_SUFFIX: &str = ".blockmap";

/// Codec of a block map appended to the file it describes.
pub const APPENDED_COMPRESSION: &str = "deflate";

/// Path of the sidecar block map written next to `file`.
pub fn block_map_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(BLOCK_MAP_FILE_SUFFIX);
    PathBuf::from(name)
}

/// Handle on the block map builder executable.
#[derive(Debug, Clone)]
pub struct BlockMapTool {
    program: PathBuf,
}

impl BlockMapTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Writes `<file>.blockmap` and returns the tool's description of it.
    pub fn create(&self, file: &Path) -> Result<serde_json::Value, PackError> {
        let out = block_map_path(file);
        self.run(file, &["-out".into(), out.into_os_string()])
    }

    /// Appends the block map to `file` itself.
    pub fn append(&self, file: &Path) -> Result<serde_json::Value, PackError> {
        self.run(file, &["-append".into(), "-compression".into(), APPENDED_COMPRESSION.into()])
    }

    fn run(&self, file: &Path, mode_args: &[OsString]) -> Result<serde_json::Value, PackError> {
        let fail = |message: String| PackError::BlockMap { path: file.to_path_buf(), message };

        let output = Command::new(&self.program)
            .arg("-in")
            .arg(file)
            .args(mode_args)
            .output()
            .map_err(|e| PackError::io(e, &self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!("exited with {}: {}", output.status, stderr.trim())));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| fail(format!("invalid JSON output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_path_appends_suffix() {
        assert_eq!(block_map_path(Path::new("dist/app.exe")), PathBuf::from("dist/app.exe.blockmap"));
    }

    #[cfg(unix)]
    #[test]
    fn passes_arguments_and_returns_json() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fake-tool");
        std::fs::write(&tool, "#!/bin/sh\nprintf '{\"args\":\"%s\"}' \"$*\"\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let value = BlockMapTool::new(&tool).append(Path::new("x.zip")).unwrap();
        assert_eq!(value["args"], "-in x.zip -append -compression deflate");

        let value = BlockMapTool::new(&tool).create(Path::new("x.zip")).unwrap();
        assert_eq!(value["args"], "-in x.zip -out x.zip.blockmap");
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_is_reported() {
        let err = BlockMapTool::new("/bin/false").create(Path::new("x.zip")).unwrap_err();
        assert!(matches!(err, PackError::BlockMap { .. }));
    }
}
