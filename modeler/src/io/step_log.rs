//! Per-step logs under `.modeler/runs/<run-id>/steps/`.
//!
//! Step logs are product output: they are always written and are independent
//! of `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::{Failure, RunStatus, Stage};
use crate::io::fsutil::write_json;

/// Gate decision recorded for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRoute {
    Next,
    Retry,
    Abort,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMeta {
    pub run_id: String,
    pub step: u32,
    pub stage: Stage,
    pub route: StepRoute,
    /// Stage scheduled after this one, absent once the run is finished.
    pub next_stage: Option<Stage>,
    pub status: RunStatus,
    pub retry_count: u32,
    pub failure: Option<Failure>,
    pub started_at: String,
    pub duration_ms: u64,
}

/// Files belonging to one step.
#[derive(Debug, Clone)]
pub struct StepPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub output_path: PathBuf,
    pub agent_log_path: PathBuf,
    pub stream_path: PathBuf,
    pub execute_log_path: PathBuf,
    pub runner_error_log_path: PathBuf,
}

impl StepPaths {
    pub fn new(steps_dir: &Path, step: u32, stage: Stage) -> Self {
        let dir = steps_dir.join(format!("{step:03}-{stage}"));
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            output_path: dir.join("output.json"),
            agent_log_path: dir.join("agent.log"),
            stream_path: dir.join("stream.jsonl"),
            execute_log_path: dir.join("execute.log"),
            runner_error_log_path: dir.join("runner_error.log"),
            dir,
        }
    }

    /// Create the step directory, clearing an error log left by an
    /// interrupted attempt at the same step.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create step dir {}", self.dir.display()))?;
        if self.runner_error_log_path.exists() {
            fs::remove_file(&self.runner_error_log_path).with_context(|| {
                format!("remove {}", self.runner_error_log_path.display())
            })?;
        }
        Ok(())
    }
}

pub fn write_meta(paths: &StepPaths, meta: &StepMeta) -> Result<()> {
    write_json(&paths.meta_path, meta)
}

pub fn write_prompt(paths: &StepPaths, prompt: &str) -> Result<()> {
    fs::write(&paths.prompt_path, prompt)
        .with_context(|| format!("write {}", paths.prompt_path.display()))
}

/// Record a runner-side error (agent crash, schema violation, I/O failure).
pub fn write_runner_error(paths: &StepPaths, err: &anyhow::Error) -> Result<()> {
    fs::write(&paths.runner_error_log_path, format!("runner error: {err:#}\n"))
        .with_context(|| format!("write {}", paths.runner_error_log_path.display()))
}

/// Output of a locally evaluated stage (validate, execute, save, abort).
pub fn write_output<T: Serialize>(paths: &StepPaths, value: &T) -> Result<()> {
    write_json(&paths.output_path, value)
}
