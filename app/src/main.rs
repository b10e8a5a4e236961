//! `croprec` command line: train, evaluate and query crop models.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "croprec", version, about = "Crop recommendation from soil and climate readings")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare the configured models, keep the best and save its bundle
    Train {
        #[arg(short, long)]
        config: PathBuf,

        /// Also write the evaluation report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Run the same comparison without saving a bundle
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Predict the crop for a JSON request
    Predict {
        /// Model bundle produced by `train`
        #[arg(short, long)]
        model: PathBuf,

        /// Request file; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    croprec::logging::init(cli.verbose)?;

    match cli.command {
        Command::Train { config, report } => commands::train(&config, report.as_deref()),
        Command::Evaluate { config, report } => commands::evaluate(&config, report.as_deref()),
        Command::Predict {
            model,
            input,
            timeout_ms,
        } => commands::predict(&model, input.as_deref(), timeout_ms),
    }
}
