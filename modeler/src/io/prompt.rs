//! Prompt packs for the four agents.
//!
//! Templates mark each section with `<!-- section:KEY required|droppable -->`.
//! After rendering, sections are measured against a byte budget and droppable
//! ones are removed in a fixed order before the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::state::PipelineState;
use crate::core::types::{ExecutionReport, FailureKind};

const FORMULATE_TEMPLATE: &str = include_str!("prompts/formulate.md");
const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const CRITIQUE_TEMPLATE: &str = include_str!("prompts/critique.md");
const REFLECT_TEMPLATE: &str = include_str!("prompts/reflect.md");

/// Sections removed first when a prompt is over budget.
const DROP_ORDER: [&str; 4] = ["history", "previous", "code", "failure"];

/// Solver stdout shown to the reflection agent.
const STDOUT_TAIL_BYTES: usize = 4_000;
const HISTORY_ENTRIES: usize = 10;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section regex is valid")
});

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("formulate", FORMULATE_TEMPLATE),
            ("generate", GENERATE_TEMPLATE),
            ("critique", CRITIQUE_TEMPLATE),
            ("reflect", REFLECT_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("bundled prompt templates are valid");
        }
        Self { env }
    }

    fn render(&self, name: &str, input: &PromptInputs) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("load template {name}"))?;
        template
            .render(context! {
                problem => input.problem.trim(),
                formulation => input.formulation.as_deref().map(str::trim),
                code => input.code.as_deref().map(str::trim_end),
                previous => input.previous.as_deref().map(str::trim_end).filter(|s| !s.is_empty()),
                execution => input.execution.as_deref().map(str::trim),
                failure => input.failure.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                history => input.history.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            })
            .with_context(|| format!("render template {name}"))
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let other_len = total - last.content.len();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    let mut cut = allowed.saturating_sub(12);
    while cut > 0 && !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    last.content.push_str("\n[truncated]");
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn join_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Data a prompt may draw from, taken from the current pipeline state.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub problem: String,
    /// Current formulation rendered as markdown.
    pub formulation: Option<String>,
    pub code: Option<String>,
    /// The artifact being replaced on a retry (old formulation or old code).
    pub previous: Option<String>,
    /// Solver result rendered for reflection.
    pub execution: Option<String>,
    /// Why the pipeline came back to this stage.
    pub failure: Option<String>,
    /// Older failures, newest last.
    pub history: Option<String>,
}

/// Agent a prompt is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Formulate,
    Generate,
    Critique,
    Reflect,
}

impl PromptKind {
    fn template(self) -> &'static str {
        match self {
            Self::Formulate => "formulate",
            Self::Generate => "generate",
            Self::Critique => "critique",
            Self::Reflect => "reflect",
        }
    }
}

impl PromptInputs {
    /// Collect what `kind` needs from `state`.
    ///
    /// Runner-side agent errors are never shown to agents.
    pub fn from_state(state: &PipelineState, kind: PromptKind) -> Self {
        let formulation = state.formulation.as_ref().map(|m| m.to_markdown());
        let previous = match kind {
            PromptKind::Formulate => formulation.clone(),
            PromptKind::Generate => state.code.clone(),
            PromptKind::Critique | PromptKind::Reflect => None,
        };
        // The newest agent-visible failure sent the run here, even when
        // agent errors on this stage came after it.
        let sent_back = state
            .failures
            .iter()
            .rposition(|f| f.kind != FailureKind::AgentError)
            .filter(|&i| state.failures[i].retry_stage == state.stage);
        let failure = sent_back.map(|i| {
            let f = &state.failures[i];
            format!("{} at {}:\n{}", f.kind.as_str(), f.stage, f.detail)
        });
        let older: Vec<String> = state
            .failures
            .iter()
            .enumerate()
            .rev()
            .filter(|&(i, f)| Some(i) != sent_back && f.kind != FailureKind::AgentError)
            .take(HISTORY_ENTRIES)
            .map(|(_, f)| {
                let first_line = f.detail.lines().next().unwrap_or_default();
                format!("- {} at {}: {}", f.kind.as_str(), f.stage, first_line)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Self {
            problem: state.problem.clone(),
            formulation: if kind == PromptKind::Formulate {
                None
            } else {
                formulation
            },
            code: match kind {
                PromptKind::Critique | PromptKind::Reflect => state.code.clone(),
                PromptKind::Formulate | PromptKind::Generate => None,
            },
            previous,
            execution: (kind == PromptKind::Reflect)
                .then(|| state.execution.as_ref().map(render_execution))
                .flatten(),
            failure,
            history: (!older.is_empty()).then(|| older.join("\n")),
        }
    }
}

fn render_execution(exec: &ExecutionReport) -> String {
    let mut buf = String::new();
    match &exec.report {
        Some(report) => {
            buf.push_str(&format!("status: {}\n", report.status.as_str()));
            match report.objective {
                Some(value) => buf.push_str(&format!("objective: {value}\n")),
                None => buf.push_str("objective: (none)\n"),
            }
            let vars = serde_json::to_string_pretty(&report.variables)
                .unwrap_or_else(|_| "{}".to_string());
            buf.push_str(&format!("variables:\n{vars}\n"));
        }
        None => buf.push_str("status: (no solver report)\n"),
    }
    let stdout = exec.stdout.trim();
    if !stdout.is_empty() {
        buf.push_str("\nstdout:\n");
        buf.push_str(&tail(stdout, STDOUT_TAIL_BYTES));
        buf.push('\n');
    }
    buf
}

/// Last `limit` bytes of `text`, cut on a char boundary.
pub fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[{} bytes omitted]\n{}", start, &text[start..])
}

/// Builds prompt packs within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, kind: PromptKind, input: &PromptInputs) -> Result<PromptPack> {
        let rendered = PromptEngine::new().render(kind.template(), input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            content: join_sections(&sections),
        })
    }
}

/// A rendered prompt ready to send to an agent.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Failure, Stage};
    use crate::test_support::{sample_execution, sample_model};

    fn state_with_code() -> PipelineState {
        let mut state = PipelineState::new("run-1", "Maximize profit of chairs and tables.");
        state.set_formulation(sample_model());
        state.set_code("from ortools.linear_solver import pywraplp\n".to_string());
        state
    }

    #[test]
    fn critique_prompt_orders_sections() {
        let state = state_with_code();
        let input = PromptInputs::from_state(&state, PromptKind::Critique);
        let content = PromptBuilder::new(40_000)
            .build(PromptKind::Critique, &input)
            .expect("build")
            .render();

        let contract = content.find("### Critique Contract").expect("contract");
        let problem = content.find("### Problem").expect("problem");
        let formulation = content.find("### Formulation").expect("formulation");
        let code = content.find("### Code").expect("code");
        assert!(contract < problem && problem < formulation && formulation < code);
        assert!(content.contains("<contract>") && content.contains("</contract>"));
        assert!(!content.contains("section:"), "markers are stripped");
    }

    #[test]
    fn generate_retry_shows_previous_code_and_failure() {
        let mut state = state_with_code();
        state.stage = Stage::Generate;
        let failure = Failure::new(
            Stage::Validate,
            crate::core::types::FailureKind::ValidationError,
            Stage::Generate,
            "code does not import ortools",
        );
        state.failures.push(failure.clone());
        state.last_failure = Some(failure);

        let input = PromptInputs::from_state(&state, PromptKind::Generate);
        let content = PromptBuilder::new(40_000)
            .build(PromptKind::Generate, &input)
            .expect("build")
            .render();
        assert!(content.contains("### Previous Code"));
        assert!(content.contains("validation_error at validate"));
        assert!(!content.contains("### Earlier Failures"));
    }

    #[test]
    fn agent_errors_are_not_shown_to_agents() {
        let mut state = PipelineState::new("run-1", "problem");
        let failure = Failure::new(
            Stage::Formulate,
            crate::core::types::FailureKind::AgentError,
            Stage::Formulate,
            "codex exec timed out",
        );
        state.failures.push(failure.clone());
        state.last_failure = Some(failure);
        let input = PromptInputs::from_state(&state, PromptKind::Formulate);
        assert!(input.failure.is_none());
        assert!(input.history.is_none());
    }

    #[test]
    fn agent_error_after_a_failure_keeps_the_sent_back_reason() {
        let mut state = state_with_code();
        state.stage = Stage::Generate;
        state.failures.push(Failure::new(
            Stage::Validate,
            crate::core::types::FailureKind::ValidationError,
            Stage::Generate,
            "code does not import ortools\nline 2: forbidden call",
        ));
        let agent_error = Failure::new(
            Stage::Generate,
            crate::core::types::FailureKind::AgentError,
            Stage::Generate,
            "codex exec timed out",
        );
        state.failures.push(agent_error.clone());
        state.last_failure = Some(agent_error);

        let input = PromptInputs::from_state(&state, PromptKind::Generate);
        let failure = input.failure.as_deref().expect("sent-back reason");
        assert!(failure.starts_with("validation_error at validate"));
        assert!(failure.contains("line 2: forbidden call"));
        assert!(input.history.is_none());
        let content = PromptBuilder::new(40_000)
            .build(PromptKind::Generate, &input)
            .expect("build")
            .render();
        assert!(!content.contains("timed out"));
    }

    #[test]
    fn reflect_prompt_includes_solver_result() {
        let mut state = state_with_code();
        state.set_execution(sample_execution());
        let input = PromptInputs::from_state(&state, PromptKind::Reflect);
        let content = PromptBuilder::new(40_000)
            .build(PromptKind::Reflect, &input)
            .expect("build")
            .render();
        assert!(content.contains("status: OPTIMAL"));
        assert!(content.contains("objective: 42"));
    }

    #[test]
    fn budget_drops_droppable_sections_first() {
        let mut state = state_with_code();
        state.set_execution(sample_execution());
        state.code = Some("x = 1\n".repeat(400));
        for i in 0..5 {
            state.failures.push(Failure::new(
                Stage::Reflect,
                crate::core::types::FailureKind::Incoherent,
                Stage::Generate,
                format!("objective too large {i} {}", "!".repeat(100)),
            ));
        }
        let input = PromptInputs::from_state(&state, PromptKind::Reflect);
        let content = PromptBuilder::new(1_500)
            .build(PromptKind::Reflect, &input)
            .expect("build")
            .render();
        assert!(!content.contains("### Earlier Failures"));
        assert!(!content.contains("### Code"));
        assert!(content.contains("### Reflection Contract"));
        assert!(content.contains("### Solver Result"));
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 10), "abcdef");
        assert_eq!(tail("abcdef", 2), "[4 bytes omitted]\nef");
    }
}
