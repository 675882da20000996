mod case;
mod cli;
mod config;
mod harness;
mod judge;
mod outcome;
mod report;
mod results;
mod run;
mod workspace;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "eval", version, about = "Evaluation harness for modeler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List case ids under `eval/cases/`.
    List,
    /// Run a case through the pipeline and judge the result.
    Run {
        case_id: String,
        #[arg(long, default_value_t = 1)]
        runs: u32,
        /// Override the case's retry budget.
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Aggregate recorded results for a case.
    Report { case_id: String },
    /// Remove workspaces and results for a case.
    Clean { case_id: String },
}

fn main() -> Result<()> {
    modeler::logging::init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::List => cli::list_cases(&repo_root),
        Command::Run {
            case_id,
            runs,
            max_retries,
        } => cli::run_case_by_id(&repo_root, &case_id, runs, max_retries),
        Command::Report { case_id } => cli::report_case(&repo_root, &case_id),
        Command::Clean { case_id } => cli::clean_case(&repo_root, &case_id),
    }
}
