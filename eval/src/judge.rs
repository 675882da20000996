//! Check execution and outcome recording.
//!
//! Runs verification checks after the pipeline stops and records detailed
//! outcomes including command output.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use modeler::core::state::PipelineState;
use modeler::core::types::{RunStatus, SolverStatus};
use modeler::io::process::{Keep, RunLimits, run_command};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::case::Check;

/// Limits for command execution in checks.
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    /// Maximum time before killing the command.
    pub timeout: Duration,
    /// Maximum bytes to capture from stdout/stderr.
    pub output_limit_bytes: usize,
}

impl CommandLimits {
    /// Default limits: 120s timeout, 50KB output.
    pub fn default_limits() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            output_limit_bytes: 50_000,
        }
    }
}

/// What the checks look at: the final state (if the run got that far) and
/// the run's artifacts directory.
#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub state: Option<&'a PipelineState>,
    pub artifacts_dir: Option<&'a Path>,
}

/// Collected check outcomes for a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }
}

/// Result of running a single check.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    RunSaved {
        passed: bool,
        status: Option<RunStatus>,
    },
    SolverStatus {
        expected: SolverStatus,
        actual: Option<SolverStatus>,
        passed: bool,
    },
    ObjectiveWithin {
        expected: f64,
        tolerance: f64,
        actual: Option<f64>,
        passed: bool,
    },
    ArtifactExists {
        path: String,
        passed: bool,
    },
    CommandSucceeds {
        cmd: Vec<String>,
        passed: bool,
        exit_code: Option<i32>,
        timed_out: bool,
        stdout: String,
        stderr: String,
        stdout_truncated: bool,
        stderr_truncated: bool,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::RunSaved { passed, .. }
            | CheckOutcome::SolverStatus { passed, .. }
            | CheckOutcome::ObjectiveWithin { passed, .. }
            | CheckOutcome::ArtifactExists { passed, .. }
            | CheckOutcome::CommandSucceeds { passed, .. } => *passed,
        }
    }

    /// Stable label used to aggregate pass rates across runs.
    pub fn label(&self) -> String {
        match self {
            CheckOutcome::RunSaved { .. } => "run_saved".to_string(),
            CheckOutcome::SolverStatus { expected, .. } => {
                format!("solver_status({})", expected.as_str())
            }
            CheckOutcome::ObjectiveWithin {
                expected,
                tolerance,
                ..
            } => format!("objective_within({expected}±{tolerance})"),
            CheckOutcome::ArtifactExists { path, .. } => format!("artifact_exists({path})"),
            CheckOutcome::CommandSucceeds { cmd, .. } => {
                format!("command_succeeds({})", cmd.join(" "))
            }
        }
    }
}

/// Run all checks and collect outcomes.
#[instrument(skip_all, fields(check_count = checks.len()))]
pub fn run_checks(
    checks: &[Check],
    input: JudgeInput<'_>,
    limits: CommandLimits,
) -> Result<Judgment> {
    let report = input
        .state
        .and_then(|state| state.execution.as_ref())
        .and_then(|exec| exec.report.as_ref());

    let mut outcomes = Vec::with_capacity(checks.len());
    for check in checks {
        let outcome = match check {
            Check::RunSaved => {
                let status = input.state.map(|state| state.status);
                CheckOutcome::RunSaved {
                    passed: status == Some(RunStatus::Saved),
                    status,
                }
            }
            Check::SolverStatus { status } => {
                let actual = report.map(|r| r.status);
                CheckOutcome::SolverStatus {
                    expected: *status,
                    actual,
                    passed: actual == Some(*status),
                }
            }
            Check::ObjectiveWithin {
                expected,
                tolerance,
            } => {
                let actual = report.and_then(|r| r.objective);
                CheckOutcome::ObjectiveWithin {
                    expected: *expected,
                    tolerance: *tolerance,
                    actual,
                    passed: actual.is_some_and(|value| (value - expected).abs() <= *tolerance),
                }
            }
            Check::ArtifactExists { path } => CheckOutcome::ArtifactExists {
                path: path.display().to_string(),
                passed: input.artifacts_dir.is_some_and(|dir| dir.join(path).exists()),
            },
            Check::CommandSucceeds { cmd } => match input.artifacts_dir.filter(|d| d.is_dir()) {
                Some(dir) => {
                    let outcome = run_command_check(cmd, dir, limits)?;
                    if let CheckOutcome::CommandSucceeds { timed_out: true, .. } = &outcome {
                        warn!(check = "command_succeeds", cmd = ?cmd, "check timed out");
                    }
                    outcome
                }
                None => CheckOutcome::CommandSucceeds {
                    cmd: cmd.clone(),
                    passed: false,
                    exit_code: None,
                    timed_out: false,
                    stdout: String::new(),
                    stderr: "no artifacts directory".to_string(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                },
            },
        };
        debug!(check = %outcome.label(), passed = outcome.passed(), "check result");
        outcomes.push(outcome);
    }
    Ok(Judgment { checks: outcomes })
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn run_command_check(cmd: &[String], dir: &Path, limits: CommandLimits) -> Result<CheckOutcome> {
    let Some((program, args)) = cmd.split_first() else {
        bail!("command_succeeds cmd must be non-empty");
    };
    let mut command = Command::new(program);
    command.args(args).current_dir(dir);

    let output = run_command(
        command,
        None,
        RunLimits {
            timeout: limits.timeout,
            output_limit_bytes: limits.output_limit_bytes,
            keep: Keep::Head,
            stream_path: None,
        },
    )
    .with_context(|| format!("run check command {cmd:?}"))?;

    Ok(CheckOutcome::CommandSucceeds {
        cmd: cmd.to_vec(),
        passed: output.succeeded(),
        exit_code: output.status.code(),
        timed_out: output.timed_out,
        stdout: output.stdout_lossy(),
        stderr: output.stderr_lossy(),
        stdout_truncated: output.stdout_truncated > 0,
        stderr_truncated: output.stderr_truncated > 0,
    })
}
