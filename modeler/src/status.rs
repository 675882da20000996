//! `modeler status` and `modeler list`.

use std::path::Path;

use anyhow::Result;

use crate::core::state::PipelineState;
use crate::core::types::{RunStatus, Stage};
use crate::io::run_store::{list_run_ids, load_run};
use crate::io::workspace::{WorkspacePaths, require_initialized};

/// One-line view of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    /// Next stage while running; the terminal stage otherwise.
    pub stage: Stage,
    pub retry_count: u32,
    pub steps_taken: u32,
}

impl RunSummary {
    fn from_state(state: &PipelineState) -> Self {
        let stage = match state.status {
            RunStatus::Running => state.stage,
            RunStatus::Saved => Stage::Save,
            RunStatus::Aborted => Stage::Abort,
        };
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            stage,
            retry_count: state.retry_count,
            steps_taken: state.steps_taken,
        }
    }

    pub fn render_line(&self) -> String {
        format!(
            "{}\t{}\tstage={}\tretries={}\tsteps={}",
            self.run_id,
            self.status.as_str(),
            self.stage,
            self.retry_count,
            self.steps_taken
        )
    }
}

/// Multi-line description of one run for humans.
pub fn describe_run(root: &Path, run_id: &str) -> Result<String> {
    let paths = WorkspacePaths::new(root);
    require_initialized(&paths)?;
    let state = load_run(&paths, run_id)?;
    let summary = RunSummary::from_state(&state);

    let mut buf = String::new();
    buf.push_str(&format!("run: {}\n", summary.run_id));
    buf.push_str(&format!("status: {}\n", summary.status.as_str()));
    buf.push_str(&format!("stage: {}\n", summary.stage));
    buf.push_str(&format!("retries: {}\n", summary.retry_count));
    buf.push_str(&format!("steps: {}\n", summary.steps_taken));
    if let Some(report) = state.execution.as_ref().and_then(|e| e.report.as_ref()) {
        buf.push_str(&format!("solver: {}\n", report.status.as_str()));
        if let Some(objective) = report.objective {
            buf.push_str(&format!("objective: {objective}\n"));
        }
    }
    if let Some(failure) = &state.last_failure {
        let first_line = failure.detail.lines().next().unwrap_or_default();
        buf.push_str(&format!(
            "last failure: {} at {} -> {}: {}\n",
            failure.kind.as_str(),
            failure.stage,
            failure.retry_stage,
            first_line
        ));
    }
    if state.status == RunStatus::Saved {
        buf.push_str(&format!(
            "artifacts: {}\n",
            paths.run(run_id).artifacts_dir.display()
        ));
    }
    Ok(buf)
}

pub fn list_runs(root: &Path) -> Result<Vec<RunSummary>> {
    let paths = WorkspacePaths::new(root);
    require_initialized(&paths)?;
    list_run_ids(&paths)?
        .into_iter()
        .map(|id| load_run(&paths, &id).map(|state| RunSummary::from_state(&state)))
        .collect()
}
