//! Retry-bounded optimization modeling pipeline.
//!
//! Every command works on the `.modeler/` workspace in the current directory.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modeler::core::gates::Route;
use modeler::exit_codes;
use modeler::io::config::{PipelineConfig, load_config};
use modeler::io::llm::CodexBackend;
use modeler::io::python::SubprocessPython;
use modeler::io::workspace::{WorkspacePaths, init_workspace, require_initialized};
use modeler::logging;
use modeler::pipeline::{PipelineOptions, PipelineOutcome, PipelineStop, run_pipeline};
use modeler::start::{read_problem, start_run};
use modeler::status::{describe_run, list_runs};
use modeler::step::{StepLimitExceededError, StepOptions, StepOutcome, run_stage};

#[derive(Parser)]
#[command(
    name = "modeler",
    version,
    about = "Turn optimization problems into solved OR-Tools models"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.modeler/` with a default config.
    Init {
        /// Overwrite an existing workspace config.
        #[arg(short, long)]
        force: bool,
    },
    /// Start a run from a problem file (`-` reads stdin) and print its id.
    Start { problem: PathBuf },
    /// Run the next stage of a run.
    Step {
        run_id: String,
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Start a run and drive it until it is saved or aborted.
    Solve {
        problem: PathBuf,
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Continue an existing run until it is saved or aborted.
    Resume {
        run_id: String,
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Describe one run.
    Status { run_id: String },
    /// List all runs.
    List,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit_code(exit_codes::ERROR)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(cli: Cli) -> Result<i32> {
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Start { problem } => cmd_start(&root, &problem),
        Command::Step {
            run_id,
            max_retries,
        } => cmd_step(&root, &run_id, max_retries),
        Command::Solve {
            problem,
            max_retries,
        } => {
            let run_id = start_from_file(&root, &problem)?;
            cmd_resume(&root, &run_id, max_retries)
        }
        Command::Resume {
            run_id,
            max_retries,
        } => cmd_resume(&root, &run_id, max_retries),
        Command::Status { run_id } => {
            print!("{}", describe_run(&root, &run_id)?);
            Ok(exit_codes::OK)
        }
        Command::List => {
            for summary in list_runs(&root)? {
                println!("{}", summary.render_line());
            }
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, force)?;
    println!("initialized {}", paths.modeler_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_start(root: &Path, problem: &Path) -> Result<i32> {
    let run_id = start_from_file(root, problem)?;
    println!("{run_id}");
    Ok(exit_codes::OK)
}

fn start_from_file(root: &Path, problem: &Path) -> Result<String> {
    let text = read_problem(problem)?;
    Ok(start_run(root, &text)?.run_id)
}

fn cmd_step(root: &Path, run_id: &str, max_retries: Option<u32>) -> Result<i32> {
    let cfg = workspace_config(root)?;
    let backend = codex_backend(&cfg);
    let python = SubprocessPython::new(cfg.sandbox.interpreter.clone())?;
    let options = StepOptions {
        max_retries,
        deadline: None,
    };
    match run_stage(root, run_id, &backend, &python, &options) {
        Ok(step) => {
            println!("{}", render_step(&step));
            Ok(exit_codes::OK)
        }
        Err(err) if err.downcast_ref::<StepLimitExceededError>().is_some() => {
            eprintln!("{err:#}");
            Ok(exit_codes::STEP_LIMIT)
        }
        Err(err) => Err(err),
    }
}

fn cmd_resume(root: &Path, run_id: &str, max_retries: Option<u32>) -> Result<i32> {
    let cfg = workspace_config(root)?;
    let backend = codex_backend(&cfg);
    let python = SubprocessPython::new(cfg.sandbox.interpreter.clone())?;
    let options = PipelineOptions { max_retries };
    let outcome = run_pipeline(root, run_id, &backend, &python, &options, |step| {
        println!("{}", render_step(step));
    })?;
    println!("{}", render_outcome(&outcome));
    Ok(outcome.stop.exit_code())
}

fn workspace_config(root: &Path) -> Result<PipelineConfig> {
    let paths = WorkspacePaths::new(root);
    require_initialized(&paths)?;
    load_config(&paths.config_path)
}

fn codex_backend(cfg: &PipelineConfig) -> CodexBackend {
    CodexBackend::new(cfg.agent.program.clone(), cfg.agent.reasoning_effort.clone())
}

fn render_step(step: &StepOutcome) -> String {
    let route = match step.route {
        Route::Next(stage) => format!("-> {stage}"),
        Route::Retry(stage) => format!("retry -> {stage}"),
        Route::Abort => "-> abort".to_string(),
        Route::Finished(status) => format!("finished ({})", status.as_str()),
    };
    let mut line = format!(
        "step {:03} {} {} [retries={}]",
        step.step, step.stage, route, step.retry_count
    );
    if let Some(failure) = &step.failure {
        let first_line = failure.detail.lines().next().unwrap_or_default();
        line.push_str(&format!(" {}: {}", failure.kind.as_str(), first_line));
    }
    line
}

fn render_outcome(outcome: &PipelineOutcome) -> String {
    match &outcome.stop {
        PipelineStop::Saved => format!(
            "run {} saved after {} steps ({} retries)",
            outcome.run_id, outcome.steps_executed, outcome.retry_count
        ),
        PipelineStop::Aborted => format!(
            "run {} aborted after {} retries",
            outcome.run_id, outcome.retry_count
        ),
        PipelineStop::StepLimit {
            steps_taken,
            max_steps,
        } => format!(
            "run {} stopped at max_steps ({steps_taken}/{max_steps}); `modeler resume` continues it after raising max_steps",
            outcome.run_id
        ),
    }
}
