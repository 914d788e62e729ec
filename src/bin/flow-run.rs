//! CLI tool to run flow (.flow) files against numeric input.
//!
//! Usage:
//!   flow-run <program.flow> <input.data>
//!   flow-run <program.flow> - -o <output.data> --mode parallel:4
//!
//! If no output file is specified, writes to stdout.

use clap::Parser;
use libloop::{ExecMode, execute_flow_with};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Run a flow program over integer input, one value per line.
#[derive(Parser)]
#[command(name = "flow-run")]
struct Cli {
    /// Flow program file (.flow)
    flow: PathBuf,

    /// Input data file, or `-` for stdin
    input: String,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force every FILTER and MAP stage into one mode
    /// (sequential, parallel, parallel:N, vectorized)
    #[arg(short, long)]
    mode: Option<ExecMode>,

    /// Log stage dispatch and batches on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("libloop=debug,flow_run=debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

fn read_input(input: &str) -> io::Result<String> {
    if input == "-" {
        io::read_to_string(io::stdin())
    } else {
        fs::read_to_string(input)
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let flow_text = match fs::read_to_string(&cli.flow) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading flow file '{}': {e}", cli.flow.display());
            process::exit(1);
        }
    };

    let input_text = match read_input(&cli.input) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading input '{}': {e}", cli.input);
            process::exit(1);
        }
    };

    tracing::debug!(flow = %cli.flow.display(), input = %cli.input, mode = ?cli.mode, "running flow");

    let report = match execute_flow_with(&input_text, &flow_text, cli.mode) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Flow error: {e}");
            process::exit(1);
        }
    };

    let mut output = report.render();
    if !output.is_empty() {
        output.push('\n');
    }

    if let Some(out_path) = &cli.output {
        if let Some(parent) = Path::new(out_path).parent()
            && !parent.as_os_str().is_empty()
            && fs::create_dir_all(parent).is_err()
        {
            eprintln!("Error creating output directory for '{}'", out_path.display());
            process::exit(1);
        }
        if let Err(e) = fs::write(out_path, &output) {
            eprintln!("Error writing output file '{}': {e}", out_path.display());
            process::exit(1);
        }
        eprintln!(
            "Processed {} -> {} values, output: {}",
            report.input_count,
            report.output_count,
            out_path.display()
        );
    } else {
        if let Err(e) = io::stdout().write_all(output.as_bytes()) {
            eprintln!("Error writing output: {e}");
            process::exit(1);
        }
        eprintln!(
            "Processed {} -> {} values",
            report.input_count, report.output_count
        );
    }
}
