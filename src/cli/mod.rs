use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::MAX_FILE_REQUESTS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Pack an application directory into an asar archive.
    #[command(alias = "p")]
    Pack {
        /// The application directory to pack.
        #[arg(required = true)]
        src: PathBuf,

        /// The path for the output archive (e.g., resources/app.asar).
        #[arg(short, long)]
        output: PathBuf,

        /// Ordering hint file; listed paths are packed first.
        #[arg(long)]
        ordering: Option<PathBuf>,

        /// Glob of files to extract next to the archive. Repeatable.
        #[arg(long = "unpack", value_name = "GLOB")]
        unpack: Vec<String>,

        /// Glob of directories whose files are extracted next to the archive. Repeatable.
        #[arg(long = "unpack-dir", value_name = "GLOB")]
        unpack_dir: Vec<String>,

        /// Glob of paths to leave out entirely. Repeatable.
        #[arg(long = "exclude", value_name = "GLOB")]
        exclude: Vec<String>,

        /// Disable automatic extraction of dependencies with native binaries.
        #[arg(long = "no-smart-unpack", action = clap::ArgAction::SetFalse, default_value_t = true)]
        smart_unpack: bool,

        /// JSON file deep-merged into the root package.json.
        #[arg(long)]
        extra_metadata: Option<PathBuf>,

        /// Hard-link unpacked files instead of copying them. Implied by CI=true or USE_HARD_LINKS=true.
        #[arg(long)]
        hard_links: bool,

        /// Number of concurrent filesystem requests.
        #[arg(long, default_value_t = MAX_FILE_REQUESTS)]
        concurrency: usize,
    },

    /// Verify that an entry exists in an archive and is not empty.
    Check {
        #[arg(required = true)]
        archive: PathBuf,

        /// Path of the entry relative to the archive root (e.g., index.js).
        #[arg(required = true)]
        entry: String,
    },

    /// List the contents of an archive.
    #[command(alias = "l")]
    List {
        #[arg(required = true)]
        archive: PathBuf,
    },

    /// Print one file from an archive to stdout.
    Cat {
        #[arg(required = true)]
        archive: PathBuf,

        #[arg(required = true)]
        entry: String,
    },

    /// Run the external block map builder on a file.
    Blockmap {
        /// File to describe.
        #[arg(required = true)]
        file: PathBuf,

        /// Block map builder executable.
        #[arg(long, env = "ASARPACK_BLOCKMAP_TOOL")]
        tool: PathBuf,

        /// Append the block map to the file instead of writing <file>.blockmap.
        #[arg(long)]
        append: bool,
    },
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::parse())
}

/// Converts directory globs into file globs matching everything below them.
pub fn dir_globs_to_file_globs(dirs: &[String]) -> Vec<String> {
    dirs.iter()
        .map(|d| format!("{}/**", d.trim_end_matches('/')))
        .collect()
}
