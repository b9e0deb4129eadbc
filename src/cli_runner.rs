//! CLI runner shared by the `asarpack` binary and integration tests.

use std::fs::Metadata;
use std::io::Write;
use std::path::Path;

use crate::blockmap::BlockMapTool;
use crate::cli::{self, Args, Commands};
use crate::config::{LinkMode, PackOptions, PathPattern};
use crate::error::PackError;
use crate::integrity::check_file_in_archive;
use crate::packager::create_asar_archive;
use crate::reader;
use crate::walk::Filter;

/// Installs the `tracing` subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    init_logging(args.verbose);
    execute(args)
}

pub fn execute(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Commands::Pack {
            src,
            output,
            ordering,
            unpack,
            unpack_dir,
            exclude,
            smart_unpack,
            extra_metadata,
            hard_links,
            concurrency,
        } => {
            let mut unpack_globs = unpack;
            unpack_globs.extend(cli::dir_globs_to_file_globs(&unpack_dir));
            let unpack = if unpack_globs.is_empty() { None } else { Some(PathPattern::new(&unpack_globs)?) };

            let extra_metadata = match extra_metadata {
                Some(path) => {
                    let raw = std::fs::read(&path).map_err(|e| PackError::io(e, &path))?;
                    Some(serde_json::from_slice(&raw).map_err(|source| PackError::Json { source, path })?)
                }
                None => None,
            };

            let options = PackOptions {
                ordering,
                smart_unpack,
                unpack,
                extra_metadata,
                link_mode: LinkMode::from_env(hard_links),
                concurrency,
                ..PackOptions::default()
            };

            let exclude_filter = exclude_filter(&src, &exclude)?;
            let summary = create_asar_archive(&src, &output, options, exclude_filter.as_deref())?;
            println!(
                "Packed {} files ({} bytes), unpacked {} files → {}",
                summary.packed_files,
                summary.payload_size,
                summary.unpacked_files,
                output.display()
            );
        }
        Commands::Check { archive, entry } => {
            check_file_in_archive(&archive, &entry, "Application entry file")?;
            println!("OK: \"{}\" in \"{}\"", entry, archive.display());
        }
        Commands::List { archive } => {
            for path in reader::list_package(&archive)? {
                println!("{path}");
            }
        }
        Commands::Cat { archive, entry } => {
            let data = reader::read_file(&archive, &entry)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Commands::Blockmap { file, tool, append } => {
            let tool = BlockMapTool::new(tool);
            let info = if append { tool.append(&file)? } else { tool.create(&file)? };
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

/// Builds a walk filter dropping every path matched by `globs`.
fn exclude_filter(src: &Path, globs: &[String]) -> Result<Option<Box<Filter>>, PackError> {
    if globs.is_empty() {
        return Ok(None);
    }
    let pattern = PathPattern::new(globs)?;
    let src = src.to_path_buf();
    let filter = move |path: &Path, _: &Metadata| {
        let relative = path.strip_prefix(&src).unwrap_or(path);
        !pattern.is_match(relative)
    };
    let filter: Box<Filter> = Box::new(filter);
    Ok(Some(filter))
}
