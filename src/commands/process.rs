//! Process command implementation.
//!
//! The process command:
//! 1. Reads a capture document of any supported format
//! 2. Upgrades it to the current format and normalizes the tables
//! 3. Derives call-node trees (which also validates table integrity)
//! 4. Writes the normalized capture as JSON

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;

use trace_prep::call_tree::{CallNodeInfo, CallTreeCache};
use trace_prep::output::{write_capture, TimestampEncoding};
use trace_prep::pipeline::process_file;
use trace_prep::string_table::StringTable;
use trace_prep::tables::{Capture, Thread};

/// Arguments for the process command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct ProcessArgs {
    /// Input capture file (raw, analysis, or legacy format)
    pub input: PathBuf,

    /// Output path for the normalized capture JSON
    pub output: PathBuf,

    /// Delta-encode timestamp columns in the output
    pub delta_times: bool,

    /// Print text summary to stdout
    pub print_summary: bool,

    /// Number of top functions to include in the summary
    pub top_funcs: usize,
}

impl Default for ProcessArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::from("capture.json"),
            delta_times: false,
            print_summary: false,
            top_funcs: 10,
        }
    }
}

/// Validate process arguments
///
/// **Public** - can be called before execute_process for early validation
pub fn validate_args(args: &ProcessArgs) -> Result<()> {
    if args.input.as_os_str().is_empty() {
        anyhow::bail!("Input path cannot be empty");
    }

    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    if args.output.as_os_str().is_empty() {
        anyhow::bail!("Output path cannot be empty");
    }

    if args.top_funcs == 0 {
        anyhow::bail!("top_funcs must be greater than 0");
    }

    if args.top_funcs > 1000 {
        anyhow::bail!("top_funcs is too large (max 1000)");
    }

    Ok(())
}

/// Execute the process command
///
/// **Public** - main entry point called from main.rs
pub fn execute_process(args: ProcessArgs) -> Result<()> {
    let start_time = Instant::now();

    info!("Processing capture: {}", args.input.display());

    // Step 1: Detect, upgrade and normalize
    info!("Step 1/3: Normalizing capture...");
    let capture = process_file(&args.input).context("Failed to process capture file")?;

    debug!(
        "Normalized capture: {} threads, {} libraries, {} strings",
        capture.threads.len(),
        capture.libs.len(),
        capture.shared.string_array.len()
    );

    // Step 2: Derive call trees. This doubles as an integrity check on the
    // stack tables before anything is written out.
    info!("Step 2/3: Building call trees...");
    let mut cache = CallTreeCache::new();
    for thread_index in 0..capture.threads.len() {
        let info = cache
            .get_or_build(&capture, thread_index, false)
            .with_context(|| format!("Corrupt tables in thread {thread_index}"))?;
        debug!(
            "thread {thread_index}: {} call nodes from {} stacks",
            info.table.length,
            capture.threads[thread_index].stack_table.length
        );
    }

    // Step 3: Write output
    info!("Step 3/3: Writing normalized capture...");
    let encoding = if args.delta_times {
        TimestampEncoding::Delta
    } else {
        TimestampEncoding::Absolute
    };
    write_capture(&capture, &args.output, encoding).context("Failed to write capture JSON")?;

    info!("✓ Capture written to: {}", args.output.display());

    if args.print_summary {
        print_summary(&capture, &mut cache, args.top_funcs)?;
    }

    let elapsed = start_time.elapsed();
    info!("Processing completed in {:.2}s", elapsed.as_secs_f64());

    Ok(())
}

/// Print a text summary of the normalized capture
///
/// **Private** - internal helper for execute_process
fn print_summary(capture: &Capture, cache: &mut CallTreeCache, top_funcs: usize) -> Result<()> {
    println!("\n{}", "=".repeat(80));
    println!("CAPTURE SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Product:  {}", capture.meta.product);
    println!("Interval: {} ms", capture.meta.interval);
    println!("Threads:  {}", capture.threads.len());
    println!("Counters: {}", capture.counters.len());

    for (thread_index, thread) in capture.threads.iter().enumerate() {
        let info = cache.get_or_build(capture, thread_index, false)?;
        println!(
            "\nThread '{}' (tid {}): {} samples, {} markers, {} call nodes",
            thread.name, thread.tid, thread.samples.length, thread.markers.length,
            info.table.length
        );
        for (name, weight) in top_self_funcs(thread, info, &capture.shared.string_array, top_funcs)
        {
            println!("  {weight:>10.1}  {name}");
        }
    }

    println!("{}", "=".repeat(80));
    Ok(())
}

/// Rank functions by the total self weight of the samples that landed on
/// them.
fn top_self_funcs(
    thread: &Thread,
    info: &CallNodeInfo,
    strings: &StringTable,
    limit: usize,
) -> Vec<(String, f64)> {
    let mut self_weight: std::collections::HashMap<usize, f64> = std::collections::HashMap::new();
    for i in 0..thread.samples.length {
        let Some(stack) = thread.samples.stack[i] else {
            continue;
        };
        if let Some(node) = info.stack_to_node[stack] {
            *self_weight.entry(info.table.func[node]).or_insert(0.0) += thread.samples.weight[i];
        }
    }

    let mut ranked: Vec<(String, f64)> = self_weight
        .into_iter()
        .map(|(func, weight)| {
            let name = strings
                .get(thread.func_table.name[func])
                .unwrap_or("<unknown>")
                .to_string();
            (name, weight)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_args_empty_input() {
        let args = ProcessArgs::default();
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_missing_input() {
        let args = ProcessArgs {
            input: PathBuf::from("/definitely/not/a/real/file.json"),
            ..Default::default()
        };
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_top_funcs_bounds() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let base = ProcessArgs {
            input: temp.path().to_path_buf(),
            ..Default::default()
        };
        assert!(validate_args(&base).is_ok());

        let zero = ProcessArgs {
            top_funcs: 0,
            ..base.clone()
        };
        assert!(validate_args(&zero).is_err());

        let huge = ProcessArgs {
            top_funcs: 2000,
            ..base
        };
        assert!(validate_args(&huge).is_err());
    }
}
