//! LLM backend abstraction.
//!
//! The [`LlmBackend`] trait decouples stage orchestration from the agent CLI
//! that actually talks to a model (currently `codex exec`). Tests use scripted
//! backends that write canned JSON without spawning anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{Keep, RunLimits, run_command};

/// Parameters for one agent call.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    pub prompt: String,
    /// JSON Schema constraining the final message.
    pub output_schema_path: PathBuf,
    /// Where the agent must write its final JSON message.
    pub output_path: PathBuf,
    /// Combined stdout/stderr of the agent process.
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// JSONL event stream. When set, `--json` is passed and events are teed here.
    pub stream_path: Option<PathBuf>,
}

/// Anything that can answer an [`AgentRequest`].
pub trait LlmBackend {
    /// Run the agent. Must write its answer to `request.output_path`.
    fn invoke(&self, request: &AgentRequest) -> Result<()>;
}

/// Backend that spawns `codex exec` with a structured-output schema.
#[derive(Debug, Clone)]
pub struct CodexBackend {
    pub program: String,
    pub reasoning_effort: String,
}

impl Default for CodexBackend {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            reasoning_effort: "medium".to_string(),
        }
    }
}

impl CodexBackend {
    pub fn new(program: impl Into<String>, reasoning_effort: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            reasoning_effort: reasoning_effort.into(),
        }
    }

    fn command(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("exec")
            .arg("-c")
            .arg(format!("model_reasoning_effort={}", self.reasoning_effort))
            .arg("--sandbox")
            .arg("read-only")
            // Run directories are not git repositories.
            .arg("--skip-git-repo-check");
        if request.stream_path.is_some() {
            cmd.arg("--json");
        }
        cmd.arg("--output-schema")
            .arg(&request.output_schema_path)
            .arg("--output-last-message")
            .arg(&request.output_path)
            .arg("-")
            .current_dir(&request.workdir);
        cmd
    }
}

impl LlmBackend for CodexBackend {
    #[instrument(
        skip_all,
        fields(program = %self.program, timeout_secs = request.timeout.as_secs())
    )]
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting agent");

        if !request.output_schema_path.exists() {
            return Err(anyhow!(
                "missing output schema {}",
                request.output_schema_path.display()
            ));
        }
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let output = run_command(
            self.command(request),
            Some(request.prompt.as_bytes()),
            RunLimits {
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
                keep: Keep::Head,
                stream_path: request.stream_path.as_deref(),
            },
        )
        .with_context(|| format!("run {} exec", self.program))?;

        write_agent_log(
            &request.log_path,
            &output.render_log("agent", request.output_limit_bytes),
        )?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!("agent failed with status {:?}", output.status.code()));
        }

        debug!("agent completed");
        Ok(())
    }
}

/// Invoke the backend, then check the answer against the request's schema and
/// deserialize it as `T`.
#[instrument(skip_all, fields(output_path = %request.output_path.display()))]
pub fn invoke_and_load<B: LlmBackend + ?Sized, T: DeserializeOwned>(
    backend: &B,
    request: &AgentRequest,
) -> Result<T> {
    backend.invoke(request)?;
    if !request.output_path.exists() {
        return Err(anyhow!("missing agent output {}", request.output_path.display()));
    }
    let contents = fs::read_to_string(&request.output_path)
        .with_context(|| format!("read agent output {}", request.output_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", request.output_path.display()))?;
    validate_against_schema(&request.output_schema_path, &value)?;
    serde_json::from_value(value)
        .with_context(|| format!("deserialize {}", request.output_path.display()))
}

fn validate_against_schema(schema_path: &Path, instance: &Value) -> Result<()> {
    let schema_contents = fs::read_to_string(schema_path)
        .with_context(|| format!("read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_contents)
        .with_context(|| format!("parse schema {}", schema_path.display()))?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    if compiled.is_valid(instance) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(anyhow!("agent output violates schema: {}", messages.join("; ")))
}

fn write_agent_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write agent log {}", path.display()))
}
