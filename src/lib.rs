//! # asarpack Core Library
//!
//! This crate packs an application directory into a single asar archive: a
//! size-prefixed JSON header followed by the concatenated file contents. Files
//! that cannot be loaded from inside an archive (native dependencies, explicitly
//! selected patterns) are extracted into `<archive>.unpacked/` instead.
//!
//! ## Key Modules
//!
//! - [`walk`]: Deterministic, bounded-concurrency directory traversal.
//! - [`unpack`]: Detection of `node_modules` dependencies that ship native code.
//! - [`manifest`]: `package.json` cleanup and root manifest overrides.
//! - [`ordering`]: Reordering of packed files from an ordering hint file.
//! - [`header`]: Record framing and the in-memory node tree.
//! - [`packager`]: The archive assembler tying the stages together.
//! - [`reader`] and [`integrity`]: Reading and verifying finished archives.
//!
//! ## Examples
//!
//! ```no_run
//! use asarpack::{create_asar_archive, PackOptions};
//! use std::path::Path;
//!
//! let summary = create_asar_archive(
//!     Path::new("build/app"),
//!     Path::new("dist/resources/app.asar"),
//!     PackOptions::default(),
//!     None,
//! )?;
//! println!("{} files packed", summary.packed_files);
//! # Ok::<(), asarpack::PackError>(())
//! ```

pub mod blockmap;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod error;
pub mod fsx;
pub mod header;
pub mod integrity;
pub mod manifest;
pub mod ordering;
pub mod packager;
pub mod reader;
pub mod unpack;
pub mod walk;

pub use config::{LinkMode, PackOptions, PathPattern};
pub use error::{HeaderError, IntegrityError, PackError};
pub use integrity::check_file_in_archive;
pub use packager::{create_asar_archive, AsarPackager, PackSummary};
