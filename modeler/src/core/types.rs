//! Shared deterministic types for the pipeline core.
//!
//! Every verdict that drives routing is a closed enum deserialized from
//! schema-constrained agent output. Free-form text fields (`summary`,
//! `issues`, `reasoning`) are carried for prompts and logs only and never
//! inspected by the gates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A pipeline stage. `Save` and `Abort` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Formulate,
    Generate,
    Validate,
    Critique,
    Execute,
    Reflect,
    Save,
    Abort,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Formulate => "formulate",
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Critique => "critique",
            Self::Execute => "execute",
            Self::Reflect => "reflect",
            Self::Save => "save",
            Self::Abort => "abort",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Save | Self::Abort)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Saved,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Saved => "saved",
            Self::Aborted => "aborted",
        }
    }
}

/// Which upstream artifact a reviewer blames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionTarget {
    Model,
    Code,
}

impl RevisionTarget {
    /// Stage that regenerates the blamed artifact.
    pub fn stage(self) -> Stage {
        match self {
            Self::Model => Stage::Formulate,
            Self::Code => Stage::Generate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveSense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub sense: ObjectiveSense,
    pub expression: String,
}

/// Five-element mathematical formulation produced by the formulation agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathModel {
    pub summary: String,
    pub sets: Vec<String>,
    pub parameters: Vec<String>,
    pub decision_variables: Vec<String>,
    pub objective: Objective,
    pub constraints: Vec<String>,
}

impl MathModel {
    /// Render the formulation as markdown for prompts and saved artifacts.
    pub fn to_markdown(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&format!("{}\n", self.summary.trim()));
        push_list(&mut buf, "Sets", &self.sets);
        push_list(&mut buf, "Parameters", &self.parameters);
        push_list(&mut buf, "Decision variables", &self.decision_variables);
        let sense = match self.objective.sense {
            ObjectiveSense::Minimize => "minimize",
            ObjectiveSense::Maximize => "maximize",
        };
        buf.push_str(&format!(
            "\n## Objective\n\n{sense} {}\n",
            self.objective.expression.trim()
        ));
        push_list(&mut buf, "Constraints", &self.constraints);
        buf
    }
}

fn push_list(buf: &mut String, title: &str, items: &[String]) {
    buf.push_str(&format!("\n## {title}\n\n"));
    if items.is_empty() {
        buf.push_str("(none)\n");
        return;
    }
    for item in items {
        buf.push_str(&format!("- {}\n", item.trim()));
    }
}

/// Output of the code agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    Valid,
    Invalid,
}

/// Locally produced verdict of the static and syntax checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub verdict: ValidationVerdict,
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueVerdict {
    Approved,
    Rejected,
}

/// Output of the critic agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueOutput {
    pub verdict: CritiqueVerdict,
    pub target: RevisionTarget,
    pub issues: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionVerdict {
    Coherent,
    Incoherent,
}

/// Output of the reflection agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionOutput {
    pub verdict: ReflectionVerdict,
    pub target: RevisionTarget,
    pub reasoning: String,
}

/// Solver status as printed by generated code (OR-Tools naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolverStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unbounded,
    Abnormal,
    ModelInvalid,
    NotSolved,
}

impl SolverStatus {
    /// True when the solver produced a usable assignment.
    pub fn has_solution(self) -> bool {
        matches!(self, Self::Optimal | Self::Feasible)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimal => "OPTIMAL",
            Self::Feasible => "FEASIBLE",
            Self::Infeasible => "INFEASIBLE",
            Self::Unbounded => "UNBOUNDED",
            Self::Abnormal => "ABNORMAL",
            Self::ModelInvalid => "MODEL_INVALID",
            Self::NotSolved => "NOT_SOLVED",
        }
    }
}

/// Machine-readable line the generated script prints last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverReport {
    pub status: SolverStatus,
    #[serde(default)]
    pub objective: Option<f64>,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

/// Classified result of running generated code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Solved,
    NoSolution { status: SolverStatus },
    Crashed { exit_code: Option<i32> },
    TimedOut,
    MissingReport,
}

/// Record of a sandboxed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub report: Option<SolverReport>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationError,
    CritiqueRejected,
    ExecutionError,
    NoSolution,
    Incoherent,
    AgentError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::CritiqueRejected => "critique_rejected",
            Self::ExecutionError => "execution_error",
            Self::NoSolution => "no_solution",
            Self::Incoherent => "incoherent",
            Self::AgentError => "agent_error",
        }
    }
}

/// A failed stage and where the pipeline should go to repair it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub retry_stage: Stage,
    pub detail: String,
}

impl Failure {
    pub fn new(
        stage: Stage,
        kind: FailureKind,
        retry_stage: Stage,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            kind,
            retry_stage,
            detail: detail.into(),
        }
    }
}

/// Result of running a single stage, before gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Passed,
    Failed(Failure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_status_uses_ortools_names() {
        let status: SolverStatus = serde_json::from_str("\"MODEL_INVALID\"").expect("parse");
        assert_eq!(status, SolverStatus::ModelInvalid);
        assert!(SolverStatus::Feasible.has_solution());
        assert!(!SolverStatus::Infeasible.has_solution());
    }

    #[test]
    fn revision_target_maps_to_regenerating_stage() {
        assert_eq!(RevisionTarget::Model.stage(), Stage::Formulate);
        assert_eq!(RevisionTarget::Code.stage(), Stage::Generate);
    }

    #[test]
    fn critique_rejects_unknown_verdicts() {
        let raw = r#"{"verdict":"OK","target":"code","issues":[],"summary":"OK"}"#;
        assert!(serde_json::from_str::<CritiqueOutput>(raw).is_err());
    }

    #[test]
    fn math_model_markdown_lists_every_element() {
        let model = MathModel {
            summary: "Diet problem".to_string(),
            sets: vec!["F: foods".to_string()],
            parameters: vec!["c_f: cost".to_string()],
            decision_variables: vec!["x_f >= 0".to_string()],
            objective: Objective {
                sense: ObjectiveSense::Minimize,
                expression: "sum_f c_f x_f".to_string(),
            },
            constraints: Vec::new(),
        };
        let md = model.to_markdown();
        assert!(md.contains("## Sets"));
        assert!(md.contains("- x_f >= 0"));
        assert!(md.contains("minimize sum_f c_f x_f"));
        assert!(md.contains("## Constraints\n\n(none)"));
    }
}
