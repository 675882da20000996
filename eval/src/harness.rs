//! In-process pipeline invocation for one eval run.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use modeler::exit_codes;
use modeler::io::llm::LlmBackend;
use modeler::io::python::PythonRunner;
use modeler::pipeline::{PipelineOptions, run_pipeline};
use modeler::start::start_run;
use tracing::warn;

/// What the pipeline did in a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessRun {
    /// Absent when the run could not even be started.
    pub run_id: Option<String>,
    /// Exit code `modeler solve` would have returned.
    pub exit_code: i32,
    /// Runner error that stopped the pipeline, if any.
    pub error: Option<String>,
}

/// Start a run for `problem` and drive it to completion.
///
/// Step lines and any runner error go to `log_path`. Runner errors are
/// recorded in the result instead of failing the eval run.
pub fn run_in_workspace<B, P>(
    workspace_root: &Path,
    problem: &str,
    backend: &B,
    python: &P,
    log_path: &Path,
) -> Result<HarnessRun>
where
    B: LlmBackend + ?Sized,
    P: PythonRunner + ?Sized,
{
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create logs dir {}", parent.display()))?;
    }
    let mut log = fs::File::create(log_path)
        .with_context(|| format!("create log {}", log_path.display()))?;

    let run_id = match start_run(workspace_root, problem) {
        Ok(started) => started.run_id,
        Err(err) => return record_error(&mut log, None, &err),
    };

    let mut write_err = None;
    let result = run_pipeline(
        workspace_root,
        &run_id,
        backend,
        python,
        &PipelineOptions::default(),
        |step| {
            let failure = step
                .failure
                .as_ref()
                .map(|f| format!(" {}", f.kind.as_str()))
                .unwrap_or_default();
            if let Err(err) = writeln!(
                log,
                "step {:03} {} -> {:?} retries={}{failure}",
                step.step, step.stage, step.route, step.retry_count
            ) {
                if write_err.is_none() {
                    write_err = Some(err);
                }
            }
        },
    );
    if let Some(err) = write_err {
        return Err(err).with_context(|| format!("write log {}", log_path.display()));
    }

    match result {
        Ok(outcome) => Ok(HarnessRun {
            run_id: Some(run_id),
            exit_code: outcome.stop.exit_code(),
            error: None,
        }),
        Err(err) => record_error(&mut log, Some(run_id), &err),
    }
}

fn record_error(
    log: &mut fs::File,
    run_id: Option<String>,
    err: &anyhow::Error,
) -> Result<HarnessRun> {
    warn!(err = %format!("{err:#}"), "pipeline stopped by runner error");
    writeln!(log, "runner error: {err:#}").context("write runner error")?;
    Ok(HarnessRun {
        run_id,
        exit_code: exit_codes::ERROR,
        error: Some(format!("{err:#}")),
    })
}
