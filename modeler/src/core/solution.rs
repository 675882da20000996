//! Interpretation of a finished sandbox execution.
//!
//! Generated scripts must print a single-line JSON solver report as their last
//! JSON line, e.g. `{"status": "OPTIMAL", "objective": 42.0, "variables": {...}}`.
//! Everything else on stdout is treated as human-readable noise.

use crate::core::types::{ExecutionOutcome, SolverReport};

/// Find the last stdout line that parses as a [`SolverReport`].
pub fn parse_solver_report(stdout: &str) -> Option<SolverReport> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .find_map(|line| serde_json::from_str::<SolverReport>(line).ok())
}

/// Classify an execution from its exit status and parsed report.
pub fn classify_execution(
    exit_ok: bool,
    exit_code: Option<i32>,
    timed_out: bool,
    report: Option<&SolverReport>,
) -> ExecutionOutcome {
    if timed_out {
        return ExecutionOutcome::TimedOut;
    }
    if !exit_ok {
        return ExecutionOutcome::Crashed { exit_code };
    }
    match report {
        None => ExecutionOutcome::MissingReport,
        Some(report) if report.status.has_solution() => ExecutionOutcome::Solved,
        Some(report) => ExecutionOutcome::NoSolution {
            status: report.status,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SolverStatus;

    #[test]
    fn parses_last_report_line() {
        let stdout = "Solving...\n{\"status\": \"INFEASIBLE\"}\nx = 3\n{\"status\": \"OPTIMAL\", \"objective\": 12.5, \"variables\": {\"x\": 3}}\n";
        let report = parse_solver_report(stdout).expect("report");
        assert_eq!(report.status, SolverStatus::Optimal);
        assert_eq!(report.objective, Some(12.5));
        assert_eq!(report.variables.get("x"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn ignores_unrelated_json_lines() {
        let stdout = "{\"note\": \"OK\"}\n";
        assert!(parse_solver_report(stdout).is_none());
    }

    #[test]
    fn report_without_objective_still_parses() {
        let report = parse_solver_report("{\"status\": \"UNBOUNDED\"}").expect("report");
        assert_eq!(report.objective, None);
        assert!(report.variables.is_empty());
    }

    #[test]
    fn classification_prefers_timeout_then_crash() {
        let report = SolverReport {
            status: SolverStatus::Optimal,
            objective: Some(1.0),
            variables: serde_json::Map::new(),
        };
        assert_eq!(
            classify_execution(false, None, true, Some(&report)),
            ExecutionOutcome::TimedOut
        );
        assert_eq!(
            classify_execution(false, Some(1), false, Some(&report)),
            ExecutionOutcome::Crashed { exit_code: Some(1) }
        );
        assert_eq!(
            classify_execution(true, Some(0), false, Some(&report)),
            ExecutionOutcome::Solved
        );
    }

    #[test]
    fn missing_or_unsolved_reports_are_not_solved() {
        assert_eq!(
            classify_execution(true, Some(0), false, None),
            ExecutionOutcome::MissingReport
        );
        let infeasible = SolverReport {
            status: SolverStatus::Infeasible,
            objective: None,
            variables: serde_json::Map::new(),
        };
        assert_eq!(
            classify_execution(true, Some(0), false, Some(&infeasible)),
            ExecutionOutcome::NoSolution {
                status: SolverStatus::Infeasible
            }
        );
    }
}
