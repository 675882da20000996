//! Case execution orchestration.
//!
//! Coordinates workspace creation, the in-process pipeline, checks, and
//! result capture.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use modeler::io::config::PipelineConfig;
use modeler::io::llm::{CodexBackend, LlmBackend};
use modeler::io::python::{PythonRunner, SubprocessPython};
use modeler::io::run_store::load_state;
use modeler::io::workspace::WorkspacePaths;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::harness::run_in_workspace;
use crate::judge::{CommandLimits, JudgeInput, run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};
use crate::workspace::create_workspace;

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    pub eval_run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
}

/// Run a case end-to-end with the configured codex backend and interpreter.
pub fn run_case(repo_root: &Path, case_path: &Path, case: &CaseFile) -> Result<RunOutcome> {
    let cfg = apply_case_config(PipelineConfig::default(), &case.config)?;
    let backend = CodexBackend::new(cfg.agent.program.clone(), cfg.agent.reasoning_effort.clone());
    let python = SubprocessPython::new(cfg.sandbox.interpreter.clone())?;
    run_case_with(repo_root, case_path, case, &cfg, &backend, &python)
}

/// Run a case end-to-end: workspace creation, pipeline, result capture, checks.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case_with<B, P>(
    repo_root: &Path,
    case_path: &Path,
    case: &CaseFile,
    cfg: &PipelineConfig,
    backend: &B,
    python: &P,
) -> Result<RunOutcome>
where
    B: LlmBackend + ?Sized,
    P: PythonRunner + ?Sized,
{
    info!("case run started");
    let eval_dir = repo_root.join("eval");

    debug!("creating workspace");
    let workspace = create_workspace(&eval_dir.join("workspaces"), &case.case.id, cfg)
        .context("create workspace")?;

    let started_at = Utc::now();
    let eval_run_id = build_eval_run_id(&started_at.format("%Y%m%d_%H%M%S").to_string());
    let results_base = eval_dir.join("results");
    let log_path = results_base
        .join(&case.case.id)
        .join(&eval_run_id)
        .join("pipeline.log");

    debug!("running pipeline");
    let run = run_in_workspace(&workspace.root, &case.case.problem, backend, python, &log_path)
        .context("run pipeline")?;
    let finished_at = Utc::now();
    info!(
        exit_code = run.exit_code,
        duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        "pipeline finished"
    );

    debug!("capturing results");
    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        eval_run_id: &eval_run_id,
        modeler_run_id: run.run_id.as_deref(),
        exit_code: Some(run.exit_code),
        runner_error: run.error.as_deref(),
        started_at,
        finished_at,
        workspace_root: &workspace.root,
        repo_root,
    };
    let results_dir = capture_results(&results_base, &capture_input).context("capture results")?;

    debug!("running checks");
    let paths = WorkspacePaths::new(&workspace.root);
    let run_paths = run.run_id.as_deref().map(|id| paths.run(id));
    let state = run_paths
        .as_ref()
        .and_then(|run| load_state(&run.state_path).ok());
    let input = JudgeInput {
        state: state.as_ref(),
        artifacts_dir: run_paths.as_ref().map(|run| run.artifacts_dir.as_path()),
    };
    let judgment = run_checks(&case.checks, input, CommandLimits::default_limits())
        .context("run checks")?;
    write_judgment(&results_dir.join("checks.json"), &judgment).context("write checks")?;

    let outcome = classify_outcome(Some(run.exit_code), &judgment);
    update_outcome(&results_dir, outcome).context("update outcome")?;
    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
    })
}

/// `eval-<timestamp>-<6 random chars>`; repeated runs within a second stay distinct.
fn build_eval_run_id(timestamp: &str) -> String {
    let mut rng = rand::thread_rng();
    let short: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("eval-{timestamp}-{short}")
}
