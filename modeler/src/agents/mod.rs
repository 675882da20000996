//! Agents: one LLM call each, constrained by a JSON Schema.
//!
//! Every agent renders its prompt from the pipeline state, writes its schema
//! next to the workspace config, and returns a typed value. Routing decisions
//! are made by `core::gates` from those typed values only.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::budget::remaining_budget;
use crate::core::state::PipelineState;
use crate::io::config::AgentConfig;
use crate::io::llm::{AgentRequest, LlmBackend, invoke_and_load};
use crate::io::prompt::{PromptBuilder, PromptInputs, PromptKind};
use crate::io::step_log::{StepPaths, write_prompt};

pub mod coder;
pub mod critic;
pub mod formulation;
pub mod reflection;

/// Limits shared by every agent call.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
}

impl From<&AgentConfig> for AgentSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            prompt_budget_bytes: cfg.prompt_budget_bytes,
        }
    }
}

/// The agent call itself failed: the process errored or timed out, or its
/// answer was missing or violated the schema.
///
/// Only this error becomes a retryable `AgentError` failure. Anything else
/// `run_agent` returns (schema or prompt writes, an expired deadline) is a
/// runner error.
#[derive(Debug)]
pub struct AgentCallError(anyhow::Error);

impl fmt::Display for AgentCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for AgentCallError {}

/// Where and until when an agent may run.
#[derive(Debug, Clone, Copy)]
pub struct AgentCall<'a> {
    pub workdir: &'a Path,
    pub step: &'a StepPaths,
    pub deadline: Instant,
}

pub(crate) fn write_output_schema(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create schema dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write schema {}", path.display()))
}

/// Shared body of every agent: schema, prompt, request, typed load.
pub(crate) fn run_agent<B: LlmBackend + ?Sized, T: DeserializeOwned>(
    backend: &B,
    kind: PromptKind,
    schema_path: &Path,
    schema: &str,
    settings: &AgentSettings,
    state: &PipelineState,
    call: AgentCall<'_>,
) -> Result<T> {
    write_output_schema(schema_path, schema)?;

    let inputs = PromptInputs::from_state(state, kind);
    let prompt = PromptBuilder::new(settings.prompt_budget_bytes)
        .build(kind, &inputs)?
        .render();
    write_prompt(call.step, &prompt)?;

    let timeout = remaining_budget(call.deadline)?.min(settings.timeout);
    debug!(
        ?kind,
        timeout_secs = timeout.as_secs(),
        prompt_bytes = prompt.len(),
        "invoking agent"
    );
    let request = AgentRequest {
        workdir: call.workdir.to_path_buf(),
        prompt,
        output_schema_path: schema_path.to_path_buf(),
        output_path: call.step.output_path.clone(),
        log_path: call.step.agent_log_path.clone(),
        timeout,
        output_limit_bytes: settings.output_limit_bytes,
        stream_path: Some(call.step.stream_path.clone()),
    };
    invoke_and_load(backend, &request).map_err(|err| AgentCallError(err).into())
}
