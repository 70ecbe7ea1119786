//! CLI entry point for the timelapse engine
//!
//! `timelapse scan` lists the image sequences under a directory and
//! `timelapse encode` renders them into videos with ffmpeg.

mod display;
mod encode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use timelapse_engine::{count_sequences, discover_candidate_directories, enumerate_sequences, Config};
use tracing_subscriber::EnvFilter;

/// Exit code for configuration and usage errors.
const EXIT_CONFIG: u8 = 2;

/// Timelapse - turn numbered still images into video files
#[derive(Parser, Debug)]
#[command(name = "timelapse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file; missing file means defaults
    #[arg(short, long, global = true, default_value = "timelapse.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the image sequences found under a directory
    Scan {
        /// Directory whose subdirectories hold the images
        parent: PathBuf,

        /// Filename prefix before the frame number
        #[arg(long)]
        prefix: Option<String>,

        /// Filename suffix after the frame number
        #[arg(long)]
        suffix: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encode image sequences into videos
    Encode(encode::EncodeArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))
    {
        Ok(config) => match cli.command {
            Commands::Scan {
                parent,
                prefix,
                suffix,
                json,
            } => scan_command(&config, &parent, prefix, suffix, json),
            Commands::Encode(args) => encode::run(config, args).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn scan_command(
    config: &Config,
    parent: &Path,
    prefix: Option<String>,
    suffix: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let prefix = prefix.unwrap_or_else(|| config.scan.prefix.clone());
    let suffix = suffix.unwrap_or_else(|| config.scan.suffix.clone());

    let directories = discover_candidate_directories(parent, &prefix, &suffix)?;
    let total = count_sequences(&directories, &prefix, &suffix);

    let mut listing = Vec::with_capacity(directories.len());
    for dir in &directories {
        let sequences: Vec<_> = enumerate_sequences(dir, &prefix, &suffix)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .collect();
        listing.push((dir, sequences));
    }

    if json {
        let directories: Vec<_> = listing
            .iter()
            .map(|(dir, sequences)| {
                serde_json::json!({
                    "directory": dir,
                    "sequences": sequences
                        .iter()
                        .map(|s| serde_json::json!({
                            "start": s.start_digits,
                            "frames": s.frame_count(),
                            "first_frame": s.first_frame(),
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let report = serde_json::json!({ "directories": directories, "total": total });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(ExitCode::SUCCESS);
    }

    if directories.is_empty() {
        println!("No directories with {}####{} images under {}", prefix, suffix, parent.display());
        return Ok(ExitCode::SUCCESS);
    }

    for (dir, sequences) in &listing {
        let name = dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        println!("{}/ ({} sequences)", name, sequences.len());
        for s in sequences {
            println!("  {}  {:>6} frames", s.start_digits, s.frame_count());
        }
    }
    println!("Total: {} sequences in {} directories", total, directories.len());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["timelapse", "scan", "/shots", "-v", "--config", "x.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Commands::Scan { json: false, .. }));
    }

    #[test]
    fn test_scan_missing_parent_is_an_error() {
        let result = scan_command(
            &Config::default(),
            Path::new("/nonexistent/shots"),
            None,
            None,
            false,
        );
        assert!(result.is_err());
    }
}
