//! Orchestration for a single `modeler step`: run the next stage of one run.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::agents::coder::CoderAgent;
use crate::agents::critic::CriticAgent;
use crate::agents::formulation::FormulationAgent;
use crate::agents::reflection::ReflectionAgent;
use crate::agents::{AgentCall, AgentCallError, AgentSettings};
use crate::core::budget::remaining_budget;
use crate::core::gates::{Route, advance};
use crate::core::solution::{classify_execution, parse_solver_report};
use crate::core::state::PipelineState;
use crate::core::static_checks::{extract_code, static_findings};
use crate::core::types::{
    CritiqueVerdict, ExecutionOutcome, ExecutionReport, Failure, FailureKind, ReflectionVerdict,
    RunStatus, Stage, StageResult, ValidationReport, ValidationVerdict,
};
use crate::io::artifacts::{save_artifacts, write_abort};
use crate::io::config::{PipelineConfig, load_config};
use crate::io::llm::LlmBackend;
use crate::io::prompt::tail;
use crate::io::python::{ExecRequest, PythonRunner};
use crate::io::run_store::{load_run, write_state};
use crate::io::step_log::{
    StepMeta, StepPaths, StepRoute, write_meta, write_output, write_runner_error,
};
use crate::io::workspace::{RunPaths, WorkspacePaths, require_initialized};

/// Stderr kept in an execution failure shown to the code agent.
const STDERR_TAIL_BYTES: usize = 3_000;

/// Per-invocation overrides on top of `.modeler/config.toml`.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub max_retries: Option<u32>,
    /// Wall-clock deadline shared by every stage of one invocation.
    pub deadline: Option<Instant>,
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub run_id: String,
    /// 1-based step number within the run.
    pub step: u32,
    pub stage: Stage,
    pub route: Route,
    pub status: RunStatus,
    pub retry_count: u32,
    pub failure: Option<Failure>,
}

/// The run already reached `Saved` or `Aborted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFinishedError {
    pub run_id: String,
    pub status: RunStatus,
}

impl fmt::Display for RunFinishedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run '{}' is already finished ({})",
            self.run_id,
            self.status.as_str()
        )
    }
}

impl std::error::Error for RunFinishedError {}

/// The run executed `max_steps` stages without finishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLimitExceededError {
    pub run_id: String,
    pub steps_taken: u32,
    pub max_steps: u32,
}

impl fmt::Display for StepLimitExceededError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run '{}' reached max_steps ({}/{})",
            self.run_id, self.steps_taken, self.max_steps
        )
    }
}

impl std::error::Error for StepLimitExceededError {}

/// Effective config for `root` after applying `options`.
pub fn effective_config(root: &Path, options: &StepOptions) -> Result<PipelineConfig> {
    let paths = WorkspacePaths::new(root);
    let mut cfg = load_config(&paths.config_path)?;
    if let Some(max_retries) = options.max_retries {
        cfg.max_retries = max_retries;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Run the next stage of `run_id`, gate its result, and persist everything.
///
/// Agent failures (process errors, schema violations) become `AgentError`
/// failures that consume the retry budget. Failures of the runner itself
/// (filesystem, missing interpreter, deadline) are logged to
/// `runner_error.log` and returned without touching the state.
#[instrument(skip_all, fields(run_id = %run_id))]
pub fn run_stage<B: LlmBackend + ?Sized, P: PythonRunner + ?Sized>(
    root: &Path,
    run_id: &str,
    backend: &B,
    python: &P,
    options: &StepOptions,
) -> Result<StepOutcome> {
    let started = Instant::now();
    let paths = WorkspacePaths::new(root);
    require_initialized(&paths)?;
    let cfg = effective_config(root, options)?;
    let deadline = options
        .deadline
        .unwrap_or_else(|| started + cfg.run_timeout());

    let mut state = load_run(&paths, run_id)?;
    if state.is_finished() {
        return Err(RunFinishedError {
            run_id: run_id.to_string(),
            status: state.status,
        }
        .into());
    }
    if state.steps_taken >= cfg.max_steps {
        return Err(StepLimitExceededError {
            run_id: run_id.to_string(),
            steps_taken: state.steps_taken,
            max_steps: cfg.max_steps,
        }
        .into());
    }

    let run = paths.run(run_id);
    let stage = state.stage;
    state.steps_taken += 1;
    let step_paths = StepPaths::new(&run.steps_dir, state.steps_taken, stage);
    step_paths.create()?;
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    info!(
        stage = %stage,
        step = state.steps_taken,
        retry_count = state.retry_count,
        "running stage"
    );

    let ctx = StageContext {
        root,
        run: &run,
        step: &step_paths,
        cfg: &cfg,
        schemas_dir: &paths.schemas_dir,
        deadline,
    };
    let result = match execute_stage(&ctx, &mut state, backend, python) {
        Ok(result) => result,
        Err(err) => {
            write_runner_error(&step_paths, &err)?;
            warn!(stage = %stage, err = %format!("{err:#}"), "stage aborted by runner error");
            return Err(err.context(format!("{stage} stage of run {run_id}")));
        }
    };

    let failure = match &result {
        StageResult::Failed(failure) => Some(failure.clone()),
        StageResult::Passed => None,
    };
    let route = advance(&mut state, result, cfg.retry_budget());
    write_state(&run.state_path, &state)?;

    let (step_route, next_stage) = match route {
        Route::Next(next) => (StepRoute::Next, Some(next)),
        Route::Retry(next) => (StepRoute::Retry, Some(next)),
        Route::Abort => (StepRoute::Abort, Some(Stage::Abort)),
        Route::Finished(_) => (StepRoute::Finished, None),
    };
    write_meta(
        &step_paths,
        &StepMeta {
            run_id: run_id.to_string(),
            step: state.steps_taken,
            stage,
            route: step_route,
            next_stage,
            status: state.status,
            retry_count: state.retry_count,
            failure: failure.clone(),
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
    )?;

    info!(stage = %stage, ?route, retry_count = state.retry_count, "stage finished");
    Ok(StepOutcome {
        run_id: run_id.to_string(),
        step: state.steps_taken,
        stage,
        route,
        status: state.status,
        retry_count: state.retry_count,
        failure,
    })
}

struct StageContext<'a> {
    root: &'a Path,
    run: &'a RunPaths,
    step: &'a StepPaths,
    cfg: &'a PipelineConfig,
    schemas_dir: &'a Path,
    deadline: Instant,
}

impl StageContext<'_> {
    fn agent_call(&self) -> AgentCall<'_> {
        AgentCall {
            workdir: self.root,
            step: self.step,
            deadline: self.deadline,
        }
    }

    fn agent_settings(&self) -> AgentSettings {
        AgentSettings::from(&self.cfg.agent)
    }

    fn sandbox_timeout(&self) -> Result<Duration> {
        Ok(remaining_budget(self.deadline)?.min(self.cfg.sandbox_timeout()))
    }
}

fn execute_stage<B: LlmBackend + ?Sized, P: PythonRunner + ?Sized>(
    ctx: &StageContext<'_>,
    state: &mut PipelineState,
    backend: &B,
    python: &P,
) -> Result<StageResult> {
    // Out of wall-clock time is a runner condition, not an agent failure.
    remaining_budget(ctx.deadline)?;

    match state.stage {
        Stage::Formulate => {
            let agent = FormulationAgent::new(ctx.schemas_dir, ctx.agent_settings());
            Ok(match agent.run(backend, state, ctx.agent_call()) {
                Ok(model) => {
                    state.set_formulation(model);
                    StageResult::Passed
                }
                Err(err) => agent_failure(ctx, Stage::Formulate, err)?,
            })
        }
        Stage::Generate => {
            let agent = CoderAgent::new(ctx.schemas_dir, ctx.agent_settings());
            Ok(match agent.run(backend, state, ctx.agent_call()) {
                Ok(generated) => {
                    let code = extract_code(&generated.code);
                    write_script(ctx.run, &code)?;
                    state.set_code(code);
                    StageResult::Passed
                }
                Err(err) => agent_failure(ctx, Stage::Generate, err)?,
            })
        }
        Stage::Validate => validate(ctx, state, python),
        Stage::Critique => {
            let agent = CriticAgent::new(ctx.schemas_dir, ctx.agent_settings());
            Ok(match agent.run(backend, state, ctx.agent_call()) {
                Ok(critique) => {
                    let result = match critique.verdict {
                        CritiqueVerdict::Approved => StageResult::Passed,
                        CritiqueVerdict::Rejected => StageResult::Failed(Failure::new(
                            Stage::Critique,
                            FailureKind::CritiqueRejected,
                            critique.target.stage(),
                            render_issues(&critique.summary, &critique.issues),
                        )),
                    };
                    state.critique = Some(critique);
                    result
                }
                Err(err) => agent_failure(ctx, Stage::Critique, err)?,
            })
        }
        Stage::Execute => execute(ctx, state, python),
        Stage::Reflect => {
            let agent = ReflectionAgent::new(ctx.schemas_dir, ctx.agent_settings());
            Ok(match agent.run(backend, state, ctx.agent_call()) {
                Ok(reflection) => {
                    let result = match reflection.verdict {
                        ReflectionVerdict::Coherent => StageResult::Passed,
                        ReflectionVerdict::Incoherent => StageResult::Failed(Failure::new(
                            Stage::Reflect,
                            FailureKind::Incoherent,
                            reflection.target.stage(),
                            reflection.reasoning.clone(),
                        )),
                    };
                    state.reflection = Some(reflection);
                    result
                }
                Err(err) => agent_failure(ctx, Stage::Reflect, err)?,
            })
        }
        Stage::Save => {
            // `advance` sets `coherent` when reflection passes; save re-checks it.
            let written = save_artifacts(&ctx.run.artifacts_dir, state)?;
            write_output(ctx.step, &written)?;
            Ok(StageResult::Passed)
        }
        Stage::Abort => {
            let path = write_abort(&ctx.run.artifacts_dir, state)?;
            write_output(ctx.step, &[path])?;
            Ok(StageResult::Passed)
        }
    }
}

/// Log an agent error under the step and turn it into a retryable failure.
/// Runner errors from preparing the call pass through untouched.
fn agent_failure(ctx: &StageContext<'_>, stage: Stage, err: anyhow::Error) -> Result<StageResult> {
    if !err.is::<AgentCallError>() {
        return Err(err);
    }
    warn!(stage = %stage, err = %format!("{err:#}"), "agent failed");
    write_runner_error(ctx.step, &err)?;
    Ok(StageResult::Failed(Failure::new(
        stage,
        FailureKind::AgentError,
        stage,
        format!("{err:#}"),
    )))
}

fn validate<P: PythonRunner + ?Sized>(
    ctx: &StageContext<'_>,
    state: &mut PipelineState,
    python: &P,
) -> Result<StageResult> {
    let code = state.code.clone().unwrap_or_default();
    let mut findings = static_findings(&code);
    if findings.is_empty() {
        write_script(ctx.run, &code)?;
        let check = python
            .check_syntax(&ctx.run.script_path, ctx.sandbox_timeout()?)
            .context("syntax check")?;
        findings.extend(check.errors);
    }

    let verdict = if findings.is_empty() {
        ValidationVerdict::Valid
    } else {
        ValidationVerdict::Invalid
    };
    let report = ValidationReport { verdict, findings };
    write_output(ctx.step, &report)?;
    let result = match report.verdict {
        ValidationVerdict::Valid => StageResult::Passed,
        ValidationVerdict::Invalid => StageResult::Failed(Failure::new(
            Stage::Validate,
            FailureKind::ValidationError,
            Stage::Generate,
            report.findings.join("\n"),
        )),
    };
    state.validation = Some(report);
    Ok(result)
}

fn execute<P: PythonRunner + ?Sized>(
    ctx: &StageContext<'_>,
    state: &mut PipelineState,
    python: &P,
) -> Result<StageResult> {
    let code = state
        .code
        .clone()
        .ok_or_else(|| anyhow!("execute stage reached without code"))?;
    write_script(ctx.run, &code)?;
    let timeout = ctx.sandbox_timeout()?;
    let run = python
        .execute(&ExecRequest {
            script_path: ctx.run.script_path.clone(),
            sandbox_dir: ctx.run.sandbox_dir.clone(),
            timeout,
            output_limit_bytes: ctx.cfg.sandbox.output_limit_bytes,
            log_path: ctx.step.execute_log_path.clone(),
        })
        .context("execute generated code")?;

    let report = parse_solver_report(&run.stdout);
    let outcome = classify_execution(run.success, run.exit_code, run.timed_out, report.as_ref());
    let result = match &outcome {
        ExecutionOutcome::Solved => StageResult::Passed,
        ExecutionOutcome::NoSolution { status } => StageResult::Failed(Failure::new(
            Stage::Execute,
            FailureKind::NoSolution,
            Stage::Formulate,
            format!("solver finished with status {}", status.as_str()),
        )),
        ExecutionOutcome::Crashed { exit_code } => {
            let code = exit_code.map_or_else(|| "a signal".to_string(), |c| c.to_string());
            StageResult::Failed(Failure::new(
                Stage::Execute,
                FailureKind::ExecutionError,
                Stage::Generate,
                format!(
                    "script exited with {code}\n{}",
                    tail(run.stderr.trim(), STDERR_TAIL_BYTES)
                ),
            ))
        }
        ExecutionOutcome::TimedOut => StageResult::Failed(Failure::new(
            Stage::Execute,
            FailureKind::ExecutionError,
            Stage::Generate,
            format!("script timed out after {}s", timeout.as_secs()),
        )),
        ExecutionOutcome::MissingReport => StageResult::Failed(Failure::new(
            Stage::Execute,
            FailureKind::ExecutionError,
            Stage::Generate,
            "script printed no JSON solver report line".to_string(),
        )),
    };

    let exec = ExecutionReport {
        outcome,
        report,
        exit_code: run.exit_code,
        stdout: run.stdout,
        stderr: run.stderr,
        duration_ms: run.duration_ms,
    };
    write_output(ctx.step, &exec)?;
    state.set_execution(exec);
    Ok(result)
}

fn write_script(run: &RunPaths, code: &str) -> Result<()> {
    fs::create_dir_all(&run.sandbox_dir)
        .with_context(|| format!("create {}", run.sandbox_dir.display()))?;
    fs::write(&run.script_path, code)
        .with_context(|| format!("write {}", run.script_path.display()))
}

fn render_issues(summary: &str, issues: &[String]) -> String {
    let mut buf = summary.trim().to_string();
    for issue in issues {
        buf.push_str(&format!("\n- {}", issue.trim()));
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SolverStatus;
    use crate::io::run_store::load_state;
    use crate::test_support::{
        GOOD_CODE, ScriptedBackend, ScriptedPython, ScriptedReply, TestWorkspace, approve,
        code_reply, reject, sample_model_json, solved_run,
    };

    fn step(
        ws: &TestWorkspace,
        run_id: &str,
        backend: &ScriptedBackend,
        python: &ScriptedPython,
    ) -> StepOutcome {
        run_stage(ws.root(), run_id, backend, python, &StepOptions::default()).expect("step")
    }

    #[test]
    fn formulate_then_generate_write_state_and_script() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("Maximize profit.").expect("start");
        let backend = ScriptedBackend::new(vec![
            ScriptedReply::Json(sample_model_json()),
            ScriptedReply::Json(code_reply(&format!("```python\n{GOOD_CODE}```"))),
        ]);
        let python = ScriptedPython::new();

        let first = step(&ws, &run_id, &backend, &python);
        assert_eq!(first.stage, Stage::Formulate);
        assert_eq!(first.route, Route::Next(Stage::Generate));

        let second = step(&ws, &run_id, &backend, &python);
        assert_eq!(second.step, 2);
        let run = ws.paths().run(&run_id);
        assert_eq!(fs::read_to_string(&run.script_path).expect("script"), GOOD_CODE);
        let state = load_state(&run.state_path).expect("state");
        assert_eq!(state.stage, Stage::Validate);
        assert!(run.steps_dir.join("002-generate/meta.json").exists());
        assert!(run.steps_dir.join("002-generate/prompt.md").exists());
    }

    #[test]
    fn invalid_code_routes_back_to_generate() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| {
            state.set_code("print('no solver')\n".to_string());
            state.stage = Stage::Validate;
        })
        .expect("update");

        let out = step(&ws, &run_id, &ScriptedBackend::new(Vec::new()), &ScriptedPython::new());

        assert_eq!(out.route, Route::Retry(Stage::Generate));
        assert_eq!(out.retry_count, 1);
        let failure = out.failure.expect("failure");
        assert_eq!(failure.kind, FailureKind::ValidationError);
        assert!(failure.detail.contains("ortools"));
    }

    #[test]
    fn syntax_errors_fail_validation() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| {
            state.set_code(GOOD_CODE.to_string());
            state.stage = Stage::Validate;
        })
        .expect("update");
        let python =
            ScriptedPython::new().with_syntax_errors(vec!["line 3: invalid syntax".to_string()]);

        let out = step(&ws, &run_id, &ScriptedBackend::new(Vec::new()), &python);
        assert_eq!(out.failure.map(|f| f.detail), Some("line 3: invalid syntax".to_string()));
    }

    #[test]
    fn critique_rejection_follows_target() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| {
            state.set_code(GOOD_CODE.to_string());
            state.stage = Stage::Critique;
        })
        .expect("update");

        let backend = ScriptedBackend::new(vec![ScriptedReply::Json(reject("model"))]);
        let out = step(&ws, &run_id, &backend, &ScriptedPython::new());
        assert_eq!(out.route, Route::Retry(Stage::Formulate));
        assert_eq!(out.failure.map(|f| f.kind), Some(FailureKind::CritiqueRejected));
    }

    #[test]
    fn approval_with_listed_issues_still_passes() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| {
            state.set_code(GOOD_CODE.to_string());
            state.stage = Stage::Critique;
        })
        .expect("update");
        let backend = ScriptedBackend::new(vec![ScriptedReply::Json(serde_json::json!({
            "verdict": "approved",
            "target": "code",
            "issues": ["minor: rename x", "constraint on hours is missing"],
            "summary": "rejected style, but correct"
        }))]);

        let out = step(&ws, &run_id, &backend, &ScriptedPython::new());

        assert_eq!(out.route, Route::Next(Stage::Execute));
        assert_eq!(out.retry_count, 0);
        assert_eq!(out.failure, None);
    }

    #[test]
    fn infeasible_solution_routes_to_formulate() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| {
            state.set_code(GOOD_CODE.to_string());
            state.stage = Stage::Execute;
        })
        .expect("update");
        let python =
            ScriptedPython::new().with_runs(vec![solved_run(SolverStatus::Infeasible, None)]);

        let out = step(&ws, &run_id, &ScriptedBackend::new(Vec::new()), &python);
        assert_eq!(out.route, Route::Retry(Stage::Formulate));
        let state = ws.state(&run_id).expect("state");
        let exec = state.execution.expect("execution");
        assert_eq!(
            exec.outcome,
            ExecutionOutcome::NoSolution {
                status: SolverStatus::Infeasible
            }
        );
    }

    #[test]
    fn crashed_script_routes_to_generate_with_stderr() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| {
            state.set_code(GOOD_CODE.to_string());
            state.stage = Stage::Execute;
        })
        .expect("update");
        let python = ScriptedPython::new().with_runs(vec![crate::io::python::ScriptRun {
            success: false,
            exit_code: Some(1),
            timed_out: false,
            stdout: String::new(),
            stderr: "NameError: name 'x' is not defined".to_string(),
            duration_ms: 3,
        }]);

        let out = step(&ws, &run_id, &ScriptedBackend::new(Vec::new()), &python);
        let failure = out.failure.expect("failure");
        assert_eq!(failure.kind, FailureKind::ExecutionError);
        assert_eq!(failure.retry_stage, Stage::Generate);
        assert!(failure.detail.contains("NameError"));
    }

    #[test]
    fn agent_errors_consume_budget_and_stay_on_stage() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        let backend = ScriptedBackend::new(vec![ScriptedReply::Fail("agent crashed".to_string())]);

        let out = step(&ws, &run_id, &backend, &ScriptedPython::new());

        assert_eq!(out.route, Route::Retry(Stage::Formulate));
        assert_eq!(out.retry_count, 1);
        let log = ws.paths().run(&run_id).steps_dir.join("001-formulate/runner_error.log");
        assert!(fs::read_to_string(log).expect("log").contains("agent crashed"));
    }

    #[test]
    fn unwritable_schema_dir_is_a_runner_error() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        let schemas_dir = ws.paths().schemas_dir;
        fs::remove_dir_all(&schemas_dir).expect("remove schemas");
        fs::write(&schemas_dir, "not a directory").expect("block schemas");
        let before = ws.state(&run_id).expect("state");
        let backend = ScriptedBackend::new(vec![ScriptedReply::Json(sample_model_json())]);

        let err = run_stage(
            ws.root(),
            &run_id,
            &backend,
            &ScriptedPython::new(),
            &StepOptions::default(),
        )
        .unwrap_err();

        assert!(err.downcast_ref::<AgentCallError>().is_none(), "{err:#}");
        assert!(format!("{err:#}").contains("schema"), "{err:#}");
        assert_eq!(backend.remaining(), 1);
        let after = ws.state(&run_id).expect("state");
        assert_eq!(after, before);
        assert_eq!(after.retry_count, 0);
        assert!(after.failures.is_empty());
    }

    #[test]
    fn finished_runs_refuse_more_steps() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| state.status = RunStatus::Aborted)
            .expect("update");
        let err = run_stage(
            ws.root(),
            &run_id,
            &ScriptedBackend::new(Vec::new()),
            &ScriptedPython::new(),
            &StepOptions::default(),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<RunFinishedError>().is_some());
    }

    #[test]
    fn step_limit_is_a_typed_error() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        ws.update_state(&run_id, |state| state.steps_taken = 60).expect("update");
        let err = run_stage(
            ws.root(),
            &run_id,
            &ScriptedBackend::new(vec![ScriptedReply::Json(approve())]),
            &ScriptedPython::new(),
            &StepOptions::default(),
        )
        .unwrap_err();
        let limit = err.downcast_ref::<StepLimitExceededError>().expect("typed");
        assert_eq!(limit.max_steps, 60);
    }

    #[test]
    fn expired_deadline_leaves_state_untouched() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        let before = ws.state(&run_id).expect("state");
        let err = run_stage(
            ws.root(),
            &run_id,
            &ScriptedBackend::new(vec![ScriptedReply::Json(sample_model_json())]),
            &ScriptedPython::new(),
            &StepOptions {
                max_retries: None,
                deadline: Some(Instant::now() - Duration::from_millis(1)),
            },
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("timed out"));
        assert_eq!(ws.state(&run_id).expect("state"), before);
    }
}
