//! Formulation agent: problem text to a five-element math model.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::state::PipelineState;
use crate::core::types::MathModel;
use crate::io::llm::LlmBackend;
use crate::io::prompt::PromptKind;

use super::{AgentCall, AgentSettings, run_agent};

const FORMULATION_SCHEMA: &str = include_str!("../../schemas/formulation.schema.json");

#[derive(Debug, Clone)]
pub struct FormulationAgent {
    schema_path: PathBuf,
    settings: AgentSettings,
}

impl FormulationAgent {
    pub fn new(schemas_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            schema_path: schemas_dir.join("formulation.schema.json"),
            settings,
        }
    }

    pub fn run<B: LlmBackend + ?Sized>(
        &self,
        backend: &B,
        state: &PipelineState,
        call: AgentCall<'_>,
    ) -> Result<MathModel> {
        run_agent(
            backend,
            PromptKind::Formulate,
            &self.schema_path,
            FORMULATION_SCHEMA,
            &self.settings,
            state,
            call,
        )
    }
}
