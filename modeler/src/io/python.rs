//! Syntax checks and sandboxed execution of generated solver code.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, Keep, RunLimits, run_command};

/// One execution of a script inside a sandbox directory.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub script_path: PathBuf,
    /// Working directory; created if missing.
    pub sandbox_dir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Combined stdout/stderr of the run.
    pub log_path: PathBuf,
}

/// Raw result of a script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Result of a syntax check; `errors` is empty when the file compiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxCheck {
    pub errors: Vec<String>,
}

impl SyntaxCheck {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Abstraction over the Python toolchain so tests do not need an interpreter.
pub trait PythonRunner {
    fn check_syntax(&self, script_path: &Path, timeout: Duration) -> Result<SyntaxCheck>;
    fn execute(&self, request: &ExecRequest) -> Result<ScriptRun>;
}

/// Runs the configured interpreter as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessPython {
    /// Argv prefix, e.g. `["python3"]` or `["uv", "run", "python"]`.
    pub interpreter: Vec<String>,
}

impl SubprocessPython {
    pub fn new(interpreter: Vec<String>) -> Result<Self> {
        if interpreter.is_empty() {
            return Err(anyhow!("interpreter must not be empty"));
        }
        Ok(Self { interpreter })
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter[0]);
        cmd.args(&self.interpreter[1..])
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONUNBUFFERED", "1");
        cmd
    }
}

impl PythonRunner for SubprocessPython {
    #[instrument(skip_all, fields(script = %script_path.display()))]
    fn check_syntax(&self, script_path: &Path, timeout: Duration) -> Result<SyntaxCheck> {
        let mut cmd = self.base_command();
        cmd.arg("-m").arg("py_compile").arg(script_path);
        let output = run_command(
            cmd,
            None,
            RunLimits {
                timeout,
                output_limit_bytes: 20_000,
                keep: Keep::Head,
                stream_path: None,
            },
        )
        .context("run py_compile")?;
        if output.succeeded() {
            debug!("syntax ok");
            return Ok(SyntaxCheck { errors: Vec::new() });
        }
        let mut detail = output.stderr_lossy().trim().to_string();
        if output.timed_out {
            detail = "syntax check timed out".to_string();
        } else if detail.is_empty() {
            detail = format!("py_compile exited with {:?}", output.status.code());
        }
        Ok(SyntaxCheck {
            errors: vec![detail],
        })
    }

    #[instrument(
        skip_all,
        fields(script = %request.script_path.display(), timeout_secs = request.timeout.as_secs())
    )]
    fn execute(&self, request: &ExecRequest) -> Result<ScriptRun> {
        fs::create_dir_all(&request.sandbox_dir)
            .with_context(|| format!("create sandbox {}", request.sandbox_dir.display()))?;
        let script = fs::canonicalize(&request.script_path)
            .with_context(|| format!("resolve {}", request.script_path.display()))?;
        let mut cmd = self.base_command();
        cmd.arg(&script).current_dir(&request.sandbox_dir);

        let output = run_command(
            cmd,
            None,
            RunLimits {
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
                // The solver report is the last line.
                keep: Keep::Tail,
                stream_path: None,
            },
        )
        .context("run generated code")?;

        write_run_log(&request.log_path, &output, request.output_limit_bytes)?;
        Ok(script_run(&output))
    }
}

fn script_run(output: &CommandOutput) -> ScriptRun {
    ScriptRun {
        success: output.succeeded(),
        exit_code: output.status.code(),
        timed_out: output.timed_out,
        stdout: output.stdout_lossy(),
        stderr: output.stderr_lossy(),
        duration_ms: u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

fn write_run_log(path: &Path, output: &CommandOutput, limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, output.render_log("sandbox", limit))
        .with_context(|| format!("write sandbox log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::solution::parse_solver_report;
    use crate::core::types::SolverStatus;

    // `sh` stands in for the interpreter: `sh script` runs it, and
    // `sh -m py_compile x` fails since there is no `py_compile` script.
    fn sh() -> SubprocessPython {
        SubprocessPython::new(vec!["sh".to_string()]).expect("runner")
    }

    #[test]
    fn empty_interpreter_is_rejected() {
        assert!(SubprocessPython::new(Vec::new()).is_err());
    }

    #[test]
    fn execute_runs_in_sandbox_and_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("model.sh");
        fs::write(&script, "pwd\necho '{\"status\": \"OPTIMAL\"}'\n").expect("script");
        let sandbox = temp.path().join("sandbox");
        let run = sh()
            .execute(&ExecRequest {
                script_path: script,
                sandbox_dir: sandbox.clone(),
                timeout: Duration::from_secs(5),
                output_limit_bytes: 10_000,
                log_path: temp.path().join("logs/execute.log"),
            })
            .expect("execute");
        assert!(run.success);
        assert!(run.stdout.contains("sandbox"));
        assert!(run.stdout.contains("OPTIMAL"));
        assert!(temp.path().join("logs/execute.log").exists());
    }

    #[test]
    fn verbose_script_keeps_its_final_report_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("verbose.sh");
        fs::write(
            &script,
            "i=0\nwhile [ $i -lt 20000 ]; do echo \"x_$i = 1\"; i=$((i+1)); done\n\
             echo '{\"status\": \"OPTIMAL\", \"objective\": 1.0, \"variables\": {}}'\n",
        )
        .expect("script");
        let run = sh()
            .execute(&ExecRequest {
                script_path: script,
                sandbox_dir: temp.path().join("sandbox"),
                timeout: Duration::from_secs(30),
                output_limit_bytes: 100_000,
                log_path: temp.path().join("execute.log"),
            })
            .expect("execute");

        assert!(run.success);
        assert_eq!(run.stdout.len(), 100_000);
        let report = parse_solver_report(&run.stdout).expect("report survives truncation");
        assert_eq!(report.status, SolverStatus::Optimal);
        assert_eq!(report.objective, Some(1.0));
    }

    #[test]
    fn execute_reports_timeouts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("slow.sh");
        fs::write(&script, "sleep 5\n").expect("script");
        let run = sh()
            .execute(&ExecRequest {
                script_path: script,
                sandbox_dir: temp.path().join("sandbox"),
                timeout: Duration::from_millis(100),
                output_limit_bytes: 1000,
                log_path: temp.path().join("execute.log"),
            })
            .expect("execute");
        assert!(run.timed_out);
        assert!(!run.success);
    }

    #[test]
    fn failed_syntax_check_carries_detail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("model.py");
        fs::write(&script, "print(1)\n").expect("script");
        let check = sh()
            .check_syntax(&script, Duration::from_secs(5))
            .expect("check");
        assert!(!check.is_ok());
        assert_eq!(check.errors.len(), 1);
    }
}
