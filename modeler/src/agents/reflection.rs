//! Reflection agent: judges whether a solved model answers the problem.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::state::PipelineState;
use crate::core::types::ReflectionOutput;
use crate::io::llm::LlmBackend;
use crate::io::prompt::PromptKind;

use super::{AgentCall, AgentSettings, run_agent};

const REFLECTION_SCHEMA: &str = include_str!("../../schemas/reflection.schema.json");

#[derive(Debug, Clone)]
pub struct ReflectionAgent {
    schema_path: PathBuf,
    settings: AgentSettings,
}

impl ReflectionAgent {
    pub fn new(schemas_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            schema_path: schemas_dir.join("reflection.schema.json"),
            settings,
        }
    }

    pub fn run<B: LlmBackend + ?Sized>(
        &self,
        backend: &B,
        state: &PipelineState,
        call: AgentCall<'_>,
    ) -> Result<ReflectionOutput> {
        run_agent(
            backend,
            PromptKind::Reflect,
            &self.schema_path,
            REFLECTION_SCHEMA,
            &self.settings,
            state,
            call,
        )
    }
}
