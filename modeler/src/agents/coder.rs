//! Code agent: formulation to an OR-Tools script.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::state::PipelineState;
use crate::core::types::GeneratedCode;
use crate::io::llm::LlmBackend;
use crate::io::prompt::PromptKind;

use super::{AgentCall, AgentSettings, run_agent};

const CODE_SCHEMA: &str = include_str!("../../schemas/code.schema.json");

#[derive(Debug, Clone)]
pub struct CoderAgent {
    schema_path: PathBuf,
    settings: AgentSettings,
}

impl CoderAgent {
    pub fn new(schemas_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            schema_path: schemas_dir.join("code.schema.json"),
            settings,
        }
    }

    /// The returned code is raw agent text; callers strip fences.
    pub fn run<B: LlmBackend + ?Sized>(
        &self,
        backend: &B,
        state: &PipelineState,
        call: AgentCall<'_>,
    ) -> Result<GeneratedCode> {
        run_agent(
            backend,
            PromptKind::Generate,
            &self.schema_path,
            CODE_SCHEMA,
            &self.settings,
            state,
            call,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Stage;
    use crate::io::step_log::StepPaths;
    use crate::test_support::{GOOD_CODE, ScriptedBackend, ScriptedReply, code_reply, sample_model};
    use std::fs;
    use std::time::{Duration, Instant};

    #[test]
    fn coder_agent_sees_formulation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let step = StepPaths::new(&temp.path().join("steps"), 2, Stage::Generate);
        step.create().expect("step dir");
        let backend = ScriptedBackend::new(vec![ScriptedReply::Json(code_reply(GOOD_CODE))]);
        let agent = CoderAgent::new(
            &temp.path().join("schemas"),
            AgentSettings {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 10_000,
                prompt_budget_bytes: 40_000,
            },
        );
        let mut state = PipelineState::new("run-1", "problem");
        state.set_formulation(sample_model());

        let got = agent
            .run(
                &backend,
                &state,
                AgentCall {
                    workdir: temp.path(),
                    step: &step,
                    deadline: Instant::now() + Duration::from_secs(5),
                },
            )
            .expect("run");

        assert_eq!(got.code, GOOD_CODE);
        let prompt = fs::read_to_string(&step.prompt_path).expect("prompt");
        assert!(prompt.contains("### Formulation"));
        assert!(prompt.contains("units_chairs"));
    }
}
