//! Command-line interface for archive extraction.
//!
//! This CLI tool provides a simple interface for extracting tar archives
//! and probing archive metadata from the command line.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use tar_extractor::{extract, probe, ExtractOptions, ExtractStats};
use tracing::debug;

#[derive(Parser)]
#[command(name = "untar")]
#[command(version, about = "Extract untrusted tar archives without escaping the destination", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract one or more archives
    Extract {
        /// Archive files to extract
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Strip leading path components
        #[arg(long, default_value = "0")]
        strip_components: u32,

        /// Size limit in bytes
        #[arg(long)]
        size_limit: Option<u64>,

        /// Permission ceiling in octal, applied to every entry mode
        #[arg(long, default_value = "755", value_parser = parse_octal)]
        mode_mask: u32,

        /// Reject symbolic links instead of creating them
        #[arg(long)]
        no_symlinks: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe archive metadata
    Probe {
        /// Archive file to probe
        archive: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Outcome of one archive, as reported by `extract --json`.
#[derive(Serialize)]
struct ExtractReport {
    archive: PathBuf,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<ExtractStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract {
            archives,
            out,
            strip_components,
            size_limit,
            mode_mask,
            no_symlinks,
            json,
        } => {
            let mut options = ExtractOptions {
                mode_mask,
                allow_symlinks: !no_symlinks,
                strip_components,
                ..ExtractOptions::default()
            };
            if size_limit.is_some() {
                options.size_limit_bytes = size_limit;
            }
            handle_extract(archives, out, &options, json)
        }
        Commands::Probe { archive, json } => handle_probe(archive, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn parse_octal(value: &str) -> Result<u32, String> {
    let digits = value.trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o777)
        .ok_or_else(|| format!("'{}' is not an octal mode between 0 and 777", value))
}

fn handle_extract(
    archives: Vec<PathBuf>,
    out: PathBuf,
    options: &ExtractOptions,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reports = Vec::with_capacity(archives.len());

    for archive in archives {
        debug!(archive = %archive.display(), out = %out.display(), "extracting");
        let report = match extract(&archive, &out, options) {
            Ok(stats) => {
                if !json {
                    println!(
                        "{}: {} files, {} directories, {} symlinks, {} bytes",
                        archive.display(),
                        stats.files_extracted,
                        stats.directories_created,
                        stats.symlinks_created,
                        stats.bytes_written
                    );
                }
                ExtractReport {
                    archive,
                    success: true,
                    stats: Some(stats),
                    error: None,
                }
            }
            Err(e) => {
                if !json {
                    eprintln!("{}: {}", archive.display(), e);
                }
                ExtractReport {
                    archive,
                    success: false,
                    stats: None,
                    error: Some(e.to_string()),
                }
            }
        };
        reports.push(report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let failed = reports.iter().filter(|report| !report.success).count();
    if failed > 0 {
        return Err(format!("{} of {} archives failed to extract", failed, reports.len()).into());
    }
    Ok(())
}

fn handle_probe(archive: PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let info = probe(&archive)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Format:  {}", info.format);
    println!("Entries: {}", info.entries);
    println!(
        "Size:    {} bytes ({} bytes of file content)",
        info.archive_bytes, info.uncompressed_estimate
    );
    for entry in &info.entry_list {
        match &entry.link_target {
            Some(target) => println!(
                "  {:o} {:>12} {} -> {}",
                entry.mode,
                entry.kind,
                entry.name.display(),
                target.display()
            ),
            None => println!(
                "  {:o} {:>12} {} ({} bytes)",
                entry.mode,
                entry.kind,
                entry.name.display(),
                entry.size
            ),
        }
    }
    Ok(())
}
