//! Starting a new run.
//!
//! A run is one attempt at one problem, identified by a stable `run_id`.
//! Starting a run writes `problem.md` and the initial `state.json`; no agent
//! is called until the first step.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::info;

use crate::core::state::PipelineState;
use crate::io::run_store::write_state;
use crate::io::workspace::{WorkspacePaths, require_initialized};

/// Outcome of `modeler start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
}

/// Create a run for `problem` in the workspace at `root`.
pub fn start_run(root: &Path, problem: &str) -> Result<StartOutcome> {
    let paths = WorkspacePaths::new(root);
    require_initialized(&paths)?;

    let problem = problem.trim();
    if problem.is_empty() {
        return Err(anyhow!("problem text is empty"));
    }

    let run_id = unique_run_id(&paths)?;
    let run = paths.run(&run_id);
    fs::create_dir_all(&run.dir).with_context(|| format!("create {}", run.dir.display()))?;
    fs::write(&run.problem_path, format!("{problem}\n"))
        .with_context(|| format!("write {}", run.problem_path.display()))?;
    write_state(&run.state_path, &PipelineState::new(&run_id, problem))?;

    info!(run_id = %run_id, "run started");
    Ok(StartOutcome {
        run_id,
        run_dir: run.dir,
    })
}

/// Read the problem from a file, or from stdin when `path` is `-`.
pub fn read_problem(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
            .context("read problem from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("read problem {}", path.display()))
}

fn unique_run_id(paths: &WorkspacePaths) -> Result<String> {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    for _ in 0..16 {
        let id = build_run_id(&stamp, &short_id());
        if !paths.run(&id).dir.exists() {
            return Ok(id);
        }
    }
    Err(anyhow!("could not allocate a unique run id"))
}

pub fn build_run_id(timestamp: &str, short_id: &str) -> String {
    format!("run-{timestamp}-{short_id}")
}

fn short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RunStatus, Stage};
    use crate::io::run_store::load_run;
    use crate::io::workspace::init_workspace;

    #[test]
    fn start_creates_run_at_formulate() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), false).expect("init");

        let out = start_run(temp.path(), "  Minimize shipping cost.\n").expect("start");

        assert!(out.run_id.starts_with("run-"));
        assert_eq!(out.run_id.len(), "run-20260101-000000-abcdef".len());
        let state = load_run(&WorkspacePaths::new(temp.path()), &out.run_id).expect("load");
        assert_eq!(state.stage, Stage::Formulate);
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.problem, "Minimize shipping cost.");
        assert!(out.run_dir.join("problem.md").exists());
    }

    #[test]
    fn start_requires_init_and_problem() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = start_run(temp.path(), "p").unwrap_err();
        assert!(err.to_string().contains("modeler init"));

        init_workspace(temp.path(), false).expect("init");
        let err = start_run(temp.path(), "   ").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn run_ids_are_distinct() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), false).expect("init");
        let a = start_run(temp.path(), "p").expect("a");
        let b = start_run(temp.path(), "p").expect("b");
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn run_id_format() {
        assert_eq!(build_run_id("20260101-120000", "abc123"), "run-20260101-120000-abc123");
    }
}
