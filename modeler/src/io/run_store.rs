//! Persistence for `state.json` of each run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::state::PipelineState;
use crate::io::fsutil::{read_json, write_json};
use crate::io::workspace::WorkspacePaths;

pub fn load_state(path: &Path) -> Result<PipelineState> {
    if !path.exists() {
        return Err(anyhow!("missing run state {}", path.display()));
    }
    read_json(path)
}

/// Atomically replace the run state.
pub fn write_state(path: &Path, state: &PipelineState) -> Result<()> {
    write_json(path, state)
}

/// Load the state of `run_id`, failing with a hint if the run is unknown.
pub fn load_run(paths: &WorkspacePaths, run_id: &str) -> Result<PipelineState> {
    let run = paths.run(run_id);
    if !run.state_path.exists() {
        return Err(anyhow!("unknown run '{run_id}' (see `modeler list`)"));
    }
    let state = load_state(&run.state_path)?;
    if state.run_id != run_id {
        return Err(anyhow!(
            "run id mismatch: directory '{run_id}' holds state for '{}'",
            state.run_id
        ));
    }
    Ok(state)
}

/// Ids of every run with a state file, oldest first.
///
/// Run ids start with a UTC timestamp, so lexical order is creation order.
pub fn list_run_ids(paths: &WorkspacePaths) -> Result<Vec<String>> {
    if !paths.runs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&paths.runs_dir)
        .with_context(|| format!("read {}", paths.runs_dir.display()))?
    {
        let entry = entry.with_context(|| format!("read {}", paths.runs_dir.display()))?;
        if !entry.path().join("state.json").is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}
