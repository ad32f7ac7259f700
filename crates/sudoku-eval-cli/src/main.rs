//! sudoku-eval CLI - exact-match scoring for Sudoku solver outputs

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// Exact-match Sudoku accuracy scoring tool.
#[derive(Parser)]
#[command(name = "sudoku-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a JSON file of batches and predictions
    Score {
        /// Input JSON file: array of {"batch": {...}, "preds": {...}}
        #[arg(short, long)]
        input: PathBuf,

        /// Evaluator configuration (JSON)
        #[arg(short, long, env = "SUDOKU_EVAL_CONFIG")]
        config: Option<PathBuf>,

        /// Directory for the results file
        #[arg(short, long)]
        save_path: Option<PathBuf>,

        /// Number of in-process workers to split batches across
        #[arg(short, long, default_value_t = 1)]
        workers: usize,

        /// Warn on every batch that cannot be scored
        #[arg(long)]
        strict: bool,

        /// Also write sudoku_results.json
        #[arg(long)]
        json_report: bool,

        /// Append a summary row to this CSV file
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Show a previously written JSON report
    Report {
        /// Report file (sudoku_results.json)
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Score {
            input,
            config,
            save_path,
            workers,
            strict,
            json_report,
            history,
        } => commands::score::run(commands::score::ScoreArgs {
            input,
            config,
            save_path,
            workers,
            strict,
            json_report,
            history,
        }),
        Commands::Report { input } => commands::report::run(input),
    }
}
