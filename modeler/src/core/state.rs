//! The shared record every stage reads and updates.

use serde::{Deserialize, Serialize};

use crate::core::types::{
    CritiqueOutput, ExecutionReport, Failure, MathModel, ReflectionOutput, RunStatus, Stage,
    ValidationReport,
};

/// Persisted pipeline state (`.modeler/runs/<run-id>/state.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: String,
    pub problem: String,
    /// Next stage to run. Meaningless once `status` is not `Running`.
    pub stage: Stage,
    pub status: RunStatus,
    pub formulation: Option<MathModel>,
    pub code: Option<String>,
    pub validation: Option<ValidationReport>,
    pub critique: Option<CritiqueOutput>,
    pub execution: Option<ExecutionReport>,
    pub reflection: Option<ReflectionOutput>,
    /// Global retry counter shared by every failure kind. Never decreases.
    pub retry_count: u32,
    pub last_failure: Option<Failure>,
    pub failures: Vec<Failure>,
    pub coherent: bool,
    pub steps_taken: u32,
}

impl PipelineState {
    pub fn new(run_id: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            problem: problem.into(),
            stage: Stage::Formulate,
            status: RunStatus::Running,
            formulation: None,
            code: None,
            validation: None,
            critique: None,
            execution: None,
            reflection: None,
            retry_count: 0,
            last_failure: None,
            failures: Vec::new(),
            coherent: false,
            steps_taken: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// Install a new formulation; everything derived from the old one is stale.
    pub fn set_formulation(&mut self, model: MathModel) {
        self.formulation = Some(model);
        self.code = None;
        self.clear_code_results();
    }

    /// Install new code; every check of the old code is stale.
    pub fn set_code(&mut self, code: String) {
        self.code = Some(code);
        self.clear_code_results();
    }

    pub fn set_execution(&mut self, report: ExecutionReport) {
        self.execution = Some(report);
        self.reflection = None;
        self.coherent = false;
    }

    fn clear_code_results(&mut self) {
        self.validation = None;
        self.critique = None;
        self.execution = None;
        self.reflection = None;
        self.coherent = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ValidationReport, ValidationVerdict};
    use crate::test_support::sample_model;

    #[test]
    fn new_state_starts_at_formulate() {
        let state = PipelineState::new("run-1", "problem");
        assert_eq!(state.stage, Stage::Formulate);
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.retry_count, 0);
        assert!(!state.is_finished());
    }

    #[test]
    fn new_formulation_clears_downstream_results() {
        let mut state = PipelineState::new("run-1", "problem");
        state.set_code("print(1)".to_string());
        state.validation = Some(ValidationReport {
            verdict: ValidationVerdict::Valid,
            findings: Vec::new(),
        });
        state.coherent = true;

        state.set_formulation(sample_model());

        assert!(state.formulation.is_some());
        assert!(state.code.is_none());
        assert!(state.validation.is_none());
        assert!(!state.coherent);
    }

    #[test]
    fn new_code_keeps_formulation() {
        let mut state = PipelineState::new("run-1", "problem");
        state.set_formulation(sample_model());
        state.set_code("print(1)".to_string());
        assert!(state.formulation.is_some());
        assert_eq!(state.code.as_deref(), Some("print(1)"));
    }
}
