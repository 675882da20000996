//! Scripted fakes and fixtures for tests (enabled by the `test-support` feature).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::state::PipelineState;
use crate::core::types::{
    ExecutionOutcome, ExecutionReport, MathModel, Objective, ObjectiveSense, SolverReport,
    SolverStatus,
};
use crate::io::llm::{AgentRequest, LlmBackend};
use crate::io::python::{ExecRequest, PythonRunner, ScriptRun, SyntaxCheck};
use crate::io::run_store::{load_run, write_state};
use crate::io::workspace::{WorkspacePaths, init_workspace};
use crate::start::start_run;

/// A small script that passes the static checks.
pub const GOOD_CODE: &str = "from ortools.linear_solver import pywraplp\nimport json\n\nsolver = pywraplp.Solver.CreateSolver('GLOP')\nchairs = solver.NumVar(0, solver.infinity(), 'chairs')\nsolver.Maximize(7 * chairs)\nsolver.Add(chairs <= 6)\nstatus = solver.Solve()\nprint(json.dumps({'status': 'OPTIMAL', 'objective': solver.Objective().Value(), 'variables': {'chairs': chairs.solution_value()}}))\n";

pub fn sample_model() -> MathModel {
    MathModel {
        summary: "Product mix LP".to_string(),
        sets: vec!["P = {chairs, tables}".to_string()],
        parameters: vec!["profit_p".to_string(), "hours_p".to_string()],
        decision_variables: vec!["units_chairs >= 0".to_string(), "units_tables >= 0".to_string()],
        objective: Objective {
            sense: ObjectiveSense::Maximize,
            expression: "sum_p profit_p * units_p".to_string(),
        },
        constraints: vec!["sum_p hours_p * units_p <= 40".to_string()],
    }
}

pub fn sample_model_json() -> Value {
    serde_json::to_value(sample_model()).unwrap_or(Value::Null)
}

pub fn code_reply(code: &str) -> Value {
    json!({ "code": code, "summary": "solve with GLOP" })
}

pub fn approve() -> Value {
    json!({ "verdict": "approved", "target": "code", "issues": [], "summary": "looks right" })
}

/// Critique rejection blaming `target` (`"model"` or `"code"`).
pub fn reject(target: &str) -> Value {
    json!({
        "verdict": "rejected",
        "target": target,
        "issues": ["constraint on hours is missing"],
        "summary": "incomplete"
    })
}

pub fn coherent() -> Value {
    json!({ "verdict": "coherent", "target": "code", "reasoning": "values respect limits" })
}

pub fn incoherent(target: &str) -> Value {
    json!({ "verdict": "incoherent", "target": target, "reasoning": "objective is negative" })
}

pub fn solved_run(status: SolverStatus, objective: Option<f64>) -> ScriptRun {
    let report = json!({
        "status": status.as_str(),
        "objective": objective,
        "variables": { "units_chairs": 6 }
    });
    ScriptRun {
        success: true,
        exit_code: Some(0),
        timed_out: false,
        stdout: format!("solving\n{report}\n"),
        stderr: String::new(),
        duration_ms: 12,
    }
}

pub fn sample_execution() -> ExecutionReport {
    ExecutionReport {
        outcome: ExecutionOutcome::Solved,
        report: Some(SolverReport {
            status: SolverStatus::Optimal,
            objective: Some(42.0),
            variables: serde_json::Map::from_iter([("units_chairs".to_string(), json!(6))]),
        }),
        exit_code: Some(0),
        stdout: "solving\n".to_string(),
        stderr: String::new(),
        duration_ms: 12,
    }
}

/// One scripted answer of [`ScriptedBackend`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Written to the request's output path.
    Json(Value),
    /// Returned as the backend error.
    Fail(String),
}

/// LLM backend that replays answers in order and records every request.
pub struct ScriptedBackend {
    replies: RefCell<VecDeque<ScriptedReply>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl LlmBackend for ScriptedBackend {
    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted backend has no reply left"))?;
        match reply {
            ScriptedReply::Json(value) => {
                if let Some(parent) = request.output_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut buf = serde_json::to_string_pretty(&value)?;
                buf.push('\n');
                fs::write(&request.output_path, buf)?;
                Ok(())
            }
            ScriptedReply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Python runner that never spawns anything.
///
/// Syntax checks pass unless errors were scripted. Executions replay scripted
/// runs and fall back to an `OPTIMAL` solve with objective 42.
pub struct ScriptedPython {
    syntax_errors: Vec<String>,
    runs: RefCell<VecDeque<ScriptRun>>,
    executed: RefCell<Vec<ExecRequest>>,
}

impl ScriptedPython {
    pub fn new() -> Self {
        Self {
            syntax_errors: Vec::new(),
            runs: RefCell::new(VecDeque::new()),
            executed: RefCell::new(Vec::new()),
        }
    }

    pub fn with_syntax_errors(mut self, errors: Vec<String>) -> Self {
        self.syntax_errors = errors;
        self
    }

    pub fn with_runs(self, runs: Vec<ScriptRun>) -> Self {
        *self.runs.borrow_mut() = runs.into();
        self
    }

    pub fn executed(&self) -> Vec<ExecRequest> {
        self.executed.borrow().clone()
    }
}

impl Default for ScriptedPython {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonRunner for ScriptedPython {
    fn check_syntax(&self, script_path: &Path, _timeout: Duration) -> Result<SyntaxCheck> {
        if !script_path.exists() {
            return Err(anyhow!("missing script {}", script_path.display()));
        }
        Ok(SyntaxCheck {
            errors: self.syntax_errors.clone(),
        })
    }

    fn execute(&self, request: &ExecRequest) -> Result<ScriptRun> {
        self.executed.borrow_mut().push(request.clone());
        Ok(self
            .runs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| solved_run(SolverStatus::Optimal, Some(42.0))))
    }
}

/// An initialized workspace in a temp directory.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        init_workspace(temp.path(), false)?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> WorkspacePaths {
        WorkspacePaths::new(self.root())
    }

    pub fn start(&self, problem: &str) -> Result<String> {
        Ok(start_run(self.root(), problem)?.run_id)
    }

    pub fn state(&self, run_id: &str) -> Result<PipelineState> {
        load_run(&self.paths(), run_id)
    }

    /// Load, modify, and write back the state of a run.
    pub fn update_state(&self, run_id: &str, f: impl FnOnce(&mut PipelineState)) -> Result<()> {
        let mut state = self.state(run_id)?;
        f(&mut state);
        write_state(&self.paths().run(run_id).state_path, &state)
    }
}
