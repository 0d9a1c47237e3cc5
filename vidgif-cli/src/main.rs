//! # vidgif
//!
//! Converts each file named on the command line into an animated GIF next to
//! it, using the settings file beside the executable.
//!
//! ```bash
//! vidgif intro.png loop.gif frames/
//! RUST_LOG=vidgif_core=debug vidgif --report clip.gif
//! ```

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use vidgif_core::paths::{default_settings_path, gif_path};
use vidgif_core::{convert_file, Completion, ConvertConfig, ConvertOptions, JobReport};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug)]
struct AppOptions {
    config: PathBuf,
    convert: ConvertOptions,
    report: bool,
    inputs: Vec<PathBuf>,
}

impl AppOptions {
    fn from_args(args: &[String]) -> Result<Self> {
        let mut config = None;
        let mut convert = ConvertOptions::default();
        let mut report = false;
        let mut inputs = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    let value = args
                        .get(i + 1)
                        .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                    config = Some(PathBuf::from(value));
                    i += 2;
                }
                "--input-fps" => {
                    let value = args
                        .get(i + 1)
                        .ok_or_else(|| anyhow::anyhow!("Missing value for --input-fps"))?;
                    convert.input_fps = value
                        .parse::<u32>()
                        .ok()
                        .filter(|fps| *fps > 0)
                        .ok_or_else(|| anyhow::anyhow!("Invalid input frame rate {}", value))?;
                    i += 2;
                }
                "--report" => {
                    report = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => {
                    inputs.push(PathBuf::from(other));
                    i += 1;
                }
            }
        }

        Ok(Self {
            config: config.unwrap_or_else(default_settings_path),
            convert,
            report,
            inputs,
        })
    }
}

fn print_usage() {
    println!("vidgif {}", vidgif_core::VERSION);
    println!();
    println!("Usage: vidgif [OPTIONS] FILE...");
    println!();
    println!("  FILE               animated .gif/.png, or a directory of still images");
    println!("  -c, --config PATH  settings file (default: vidgif.ini next to the executable)");
    println!("  --input-fps N      frame rate of image directories (default: 25)");
    println!("  --report           print a JSON report per file");
    println!("  -h, --help         show this help");
}

// ============================================================================
// Conversion
// ============================================================================

fn convert_one(input: &Path, config: &ConvertConfig, options: &AppOptions) -> Result<JobReport> {
    let output = gif_path(input);
    let report = convert_file(input, &output, config, &options.convert)
        .with_context(|| format!("Failed to convert {:?}", input))?;

    match &report.completion {
        Completion::Full => info!(
            "{:?} -> {:?}: {} frames in {}ms",
            input, output, report.frames_encoded, report.elapsed_ms
        ),
        Completion::Degraded { failed_workers } => warn!(
            "{:?} -> {:?}: {} frames in {}ms, {} filter worker(s) failed",
            input,
            output,
            report.frames_encoded,
            report.elapsed_ms,
            failed_workers.len()
        ),
    }

    if options.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vidgif=info".parse()?)
                .add_directive("vidgif_core=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = AppOptions::from_args(&args)?;
    if options.inputs.is_empty() {
        print_usage();
        anyhow::bail!("No input files");
    }

    let config = ConvertConfig::load_or_create(&options.config)
        .with_context(|| format!("Failed to load settings from {:?}", options.config))?;
    info!("vidgif v{} with {:?}", vidgif_core::VERSION, config);

    let mut failed = 0usize;
    for input in &options.inputs {
        if !input.exists() {
            warn!("Skipping {:?}: no such file or directory", input);
            failed += 1;
            continue;
        }
        if let Err(e) = convert_one(input, &config, &options) {
            error!("{:#}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", failed, options.inputs.len());
    }
    Ok(())
}
