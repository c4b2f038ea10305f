//! Trace Prep CLI
//!
//! A processing tool for sampled performance-trace captures.
//! Upgrades versioned capture documents and normalizes them into
//! analysis-ready columnar tables.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

mod commands;

use commands::{execute_process, validate_args, ProcessArgs};
use trace_prep::utils::config::{
    ANALYSIS_VERSION, OLDEST_ANALYSIS_VERSION, OLDEST_RAW_CAPTURE_VERSION, RAW_CAPTURE_VERSION,
};

/// Trace Prep - capture normalization for performance traces
#[derive(Parser, Debug)]
#[command(name = "trace-prep")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize a capture file of any supported format
    Process {
        /// Input capture file (raw, analysis, or legacy format)
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the normalized capture JSON
        #[arg(short, long, default_value = "capture.json")]
        output: PathBuf,

        /// Delta-encode timestamp columns in the output
        #[arg(long)]
        delta_times: bool,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,

        /// Number of top functions per thread in the summary
        #[arg(long, default_value = "10")]
        top_funcs: usize,
    },

    /// Validate a normalized capture JSON file
    Validate {
        /// Path to capture JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display format version information
    Schema {
        /// Show full format details
        #[arg(long)]
        show: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Process {
            input,
            output,
            delta_times,
            summary,
            top_funcs,
        } => {
            let args = ProcessArgs {
                input,
                output,
                delta_times,
                print_summary: summary,
                top_funcs,
            };

            // Validate args first
            validate_args(&args)?;

            execute_process(args)?;
        }

        Commands::Validate { file } => {
            validate_capture_file(file)?;
        }

        Commands::Schema { show } => {
            display_schema(show);
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}

/// Validate a normalized capture JSON file
///
/// **Private** - internal command implementation
fn validate_capture_file(file_path: PathBuf) -> Result<()> {
    use trace_prep::call_tree::CallTreeCache;
    use trace_prep::output::read_capture;

    println!("Validating capture: {}", file_path.display());

    let capture = read_capture(&file_path)?;

    // Building the call trees walks every prefix chain and catches dangling
    // or cyclic references.
    let mut cache = CallTreeCache::new();
    for thread_index in 0..capture.threads.len() {
        cache.get_or_build(&capture, thread_index, false)?;
        cache.get_or_build(&capture, thread_index, true)?;
    }

    let total_samples: usize = capture.threads.iter().map(|t| t.samples.length).sum();
    let total_markers: usize = capture.threads.iter().map(|t| t.markers.length).sum();

    println!("✓ Valid capture JSON");
    println!("  Format Version: {}", capture.meta.preprocessed_version);
    println!("  Product: {}", capture.meta.product);
    println!("  Threads: {}", capture.threads.len());
    println!("  Samples: {}", total_samples);
    println!("  Markers: {}", total_markers);
    println!("  Libraries: {}", capture.libs.len());
    println!("  Counters: {}", capture.counters.len());

    Ok(())
}

/// Display format version information
///
/// **Private** - internal command implementation
fn display_schema(show_details: bool) {
    println!("Trace Prep Capture Formats");
    println!(
        "Raw capture: versions {} through {}",
        OLDEST_RAW_CAPTURE_VERSION, RAW_CAPTURE_VERSION
    );
    println!(
        "Analysis:    versions {} through {}",
        OLDEST_ANALYSIS_VERSION, ANALYSIS_VERSION
    );
    println!();

    if show_details {
        println!("Normalized capture structure:");
        println!("  meta: object             - Capture metadata");
        println!("    preprocessedVersion    - Analysis format version");
        println!("    interval               - Sampling interval (ms)");
        println!("    startTime              - Capture start (ms)");
        println!("  libs: array              - Deduplicated libraries");
        println!("  shared: object           - Cross-thread shared data");
        println!("    stringArray            - Deduplicated string table");
        println!("  threads: array           - Per-thread columnar tables");
        println!("    funcTable              - Functions (name, file, line)");
        println!("    frameTable             - Frames (func, address)");
        println!("    stackTable             - Prefix-linked stack nodes");
        println!("    samples                - Sampled stacks with weights");
        println!("    markers                - Timed events");
        println!("  counters: array          - Cumulative counter tracks");
    } else {
        println!("Use --show for detailed format information");
    }
}

/// Display version information
///
/// **Private** - internal command implementation
fn display_version() {
    println!("Trace Prep v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Supported formats: raw capture v{}-v{}, analysis v{}-v{}",
        OLDEST_RAW_CAPTURE_VERSION, RAW_CAPTURE_VERSION, OLDEST_ANALYSIS_VERSION, ANALYSIS_VERSION
    );
    println!();
    println!("A processing tool for sampled performance-trace captures.");
}
