//! Final artifacts written by the save and abort stages.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::state::PipelineState;
use crate::core::types::{Failure, RunStatus, SolverStatus};
use crate::io::fsutil::{write_atomic, write_json};

pub const FORMULATION_MD: &str = "formulation.md";
pub const FORMULATION_JSON: &str = "formulation.json";
pub const MODEL_PY: &str = "model.py";
pub const SOLUTION_JSON: &str = "solution.json";
pub const OUTCOME_JSON: &str = "outcome.json";

/// Summary of how a run ended (`artifacts/outcome.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub retry_count: u32,
    pub steps_taken: u32,
    pub solver_status: Option<SolverStatus>,
    pub objective: Option<f64>,
    pub failures: Vec<Failure>,
}

impl RunOutcome {
    fn from_state(state: &PipelineState, status: RunStatus) -> Self {
        let report = state.execution.as_ref().and_then(|exec| exec.report.as_ref());
        Self {
            run_id: state.run_id.clone(),
            status,
            retry_count: state.retry_count,
            steps_taken: state.steps_taken,
            solver_status: report.map(|r| r.status),
            objective: report.and_then(|r| r.objective),
            failures: state.failures.clone(),
        }
    }
}

/// Persist the accepted model, its code, and the solution.
///
/// Returns the paths written, in write order.
pub fn save_artifacts(dir: &Path, state: &PipelineState) -> Result<Vec<PathBuf>> {
    let formulation = state
        .formulation
        .as_ref()
        .ok_or_else(|| anyhow!("cannot save: run has no formulation"))?;
    let code = state
        .code
        .as_deref()
        .ok_or_else(|| anyhow!("cannot save: run has no code"))?;
    let report = state
        .execution
        .as_ref()
        .and_then(|exec| exec.report.as_ref())
        .ok_or_else(|| anyhow!("cannot save: run has no solver report"))?;
    if !state.coherent {
        return Err(anyhow!("cannot save: solution was not judged coherent"));
    }

    create_dir(dir)?;
    let mut written = Vec::new();

    let path = dir.join(FORMULATION_MD);
    write_atomic(&path, &formulation.to_markdown())?;
    written.push(path);

    let path = dir.join(FORMULATION_JSON);
    write_json(&path, formulation)?;
    written.push(path);

    let path = dir.join(MODEL_PY);
    write_atomic(&path, code)?;
    written.push(path);

    let path = dir.join(SOLUTION_JSON);
    write_json(&path, report)?;
    written.push(path);

    let path = dir.join(OUTCOME_JSON);
    write_json(&path, &RunOutcome::from_state(state, RunStatus::Saved))?;
    written.push(path);

    info!(run_id = %state.run_id, dir = %dir.display(), "artifacts saved");
    Ok(written)
}

/// Record why the run gave up.
pub fn write_abort(dir: &Path, state: &PipelineState) -> Result<PathBuf> {
    create_dir(dir)?;
    let path = dir.join(OUTCOME_JSON);
    write_json(&path, &RunOutcome::from_state(state, RunStatus::Aborted))?;
    info!(run_id = %state.run_id, failures = state.failures.len(), "abort recorded");
    Ok(path)
}

pub fn load_outcome(dir: &Path) -> Result<Option<RunOutcome>> {
    let path = dir.join(OUTCOME_JSON);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let outcome =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(outcome))
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create artifacts dir {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FailureKind, Stage};
    use crate::test_support::{sample_execution, sample_model};

    fn solved_state() -> PipelineState {
        let mut state = PipelineState::new("run-1", "problem");
        state.set_formulation(sample_model());
        state.set_code("from ortools.linear_solver import pywraplp\n".to_string());
        state.set_execution(sample_execution());
        state.coherent = true;
        state
    }

    #[test]
    fn save_writes_every_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let written = save_artifacts(temp.path(), &solved_state()).expect("save");
        let names: Vec<_> = written
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        assert_eq!(
            names,
            vec![FORMULATION_MD, FORMULATION_JSON, MODEL_PY, SOLUTION_JSON, OUTCOME_JSON]
        );
        let outcome = load_outcome(temp.path()).expect("load").expect("outcome");
        assert_eq!(outcome.status, RunStatus::Saved);
        assert_eq!(outcome.solver_status, Some(SolverStatus::Optimal));
        assert_eq!(outcome.objective, Some(42.0));
    }

    #[test]
    fn save_refuses_incoherent_solution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = solved_state();
        state.coherent = false;
        let err = save_artifacts(temp.path(), &state).unwrap_err();
        assert!(err.to_string().contains("coherent"));
        assert!(!temp.path().join(MODEL_PY).exists());
    }

    #[test]
    fn abort_records_failure_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = PipelineState::new("run-1", "problem");
        state.failures.push(Failure::new(
            Stage::Validate,
            FailureKind::ValidationError,
            Stage::Generate,
            "code does not import ortools",
        ));
        write_abort(temp.path(), &state).expect("abort");
        let outcome = load_outcome(temp.path()).expect("load").expect("outcome");
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.solver_status, None);
    }

    #[test]
    fn missing_outcome_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_outcome(temp.path()).expect("load").is_none());
    }
}
