//! Critic agent: reviews code against the formulation before it runs.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::state::PipelineState;
use crate::core::types::CritiqueOutput;
use crate::io::llm::LlmBackend;
use crate::io::prompt::PromptKind;

use super::{AgentCall, AgentSettings, run_agent};

const CRITIQUE_SCHEMA: &str = include_str!("../../schemas/critique.schema.json");

#[derive(Debug, Clone)]
pub struct CriticAgent {
    schema_path: PathBuf,
    settings: AgentSettings,
}

impl CriticAgent {
    pub fn new(schemas_dir: &Path, settings: AgentSettings) -> Self {
        Self {
            schema_path: schemas_dir.join("critique.schema.json"),
            settings,
        }
    }

    pub fn run<B: LlmBackend + ?Sized>(
        &self,
        backend: &B,
        state: &PipelineState,
        call: AgentCall<'_>,
    ) -> Result<CritiqueOutput> {
        run_agent(
            backend,
            PromptKind::Critique,
            &self.schema_path,
            CRITIQUE_SCHEMA,
            &self.settings,
            state,
            call,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CritiqueVerdict, RevisionTarget, Stage};
    use crate::io::step_log::StepPaths;
    use crate::test_support::{GOOD_CODE, ScriptedBackend, ScriptedReply, sample_model};
    use std::time::{Duration, Instant};

    fn run_with(reply: serde_json::Value) -> Result<CritiqueOutput> {
        let temp = tempfile::tempdir().expect("tempdir");
        let step = StepPaths::new(&temp.path().join("steps"), 4, Stage::Critique);
        step.create().expect("step dir");
        let backend = ScriptedBackend::new(vec![ScriptedReply::Json(reply)]);
        let agent = CriticAgent::new(
            &temp.path().join("schemas"),
            AgentSettings {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 10_000,
                prompt_budget_bytes: 40_000,
            },
        );
        let mut state = PipelineState::new("run-1", "problem");
        state.set_formulation(sample_model());
        state.set_code(GOOD_CODE.to_string());
        agent.run(
            &backend,
            &state,
            AgentCall {
                workdir: temp.path(),
                step: &step,
                deadline: Instant::now() + Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn approval_with_issues_is_still_approval() {
        let out = run_with(serde_json::json!({
            "verdict": "approved",
            "target": "code",
            "issues": ["variable names could be clearer"],
            "summary": "NOT OK in style, but correct"
        }))
        .expect("run");
        assert_eq!(out.verdict, CritiqueVerdict::Approved);
        assert_eq!(out.issues.len(), 1);
    }

    #[test]
    fn free_text_verdicts_are_rejected() {
        let err = run_with(serde_json::json!({
            "verdict": "OK",
            "target": "code",
            "issues": [],
            "summary": "OK"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("violates schema"));
    }

    #[test]
    fn rejection_carries_target() {
        let out = run_with(serde_json::json!({
            "verdict": "rejected",
            "target": "model",
            "issues": ["capacity constraint missing"],
            "summary": "formulation ignores capacity"
        }))
        .expect("run");
        assert_eq!(out.verdict, CritiqueVerdict::Rejected);
        assert_eq!(out.target, RevisionTarget::Model);
    }
}
