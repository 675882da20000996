//! Subcommand bodies for the `eval` binary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::case::{CaseFile, discover_cases};
use crate::outcome::Outcome;
use crate::report::{ReportSummary, aggregate};
use crate::run::run_case;

/// `eval/` layout under the repository root.
#[derive(Debug, Clone)]
pub struct EvalDirs {
    pub cases: PathBuf,
    pub workspaces: PathBuf,
    pub results: PathBuf,
}

impl EvalDirs {
    pub fn new(repo_root: &Path) -> Self {
        let eval = repo_root.join("eval");
        Self {
            cases: eval.join("cases"),
            workspaces: eval.join("workspaces"),
            results: eval.join("results"),
        }
    }

    fn case_path(&self, case_id: &str) -> PathBuf {
        self.cases.join(format!("{case_id}.toml"))
    }
}

pub fn list_cases(repo_root: &Path) -> Result<()> {
    for case in discover_cases(&EvalDirs::new(repo_root).cases)? {
        println!("{}", case_line(&case));
    }
    Ok(())
}

/// Run a case `runs` times, optionally overriding its retry budget.
pub fn run_case_by_id(
    repo_root: &Path,
    case_id: &str,
    runs: u32,
    max_retries: Option<u32>,
) -> Result<()> {
    let case_path = EvalDirs::new(repo_root).case_path(case_id);
    if !case_path.exists() {
        bail!("case '{case_id}' not found at {}", case_path.display());
    }
    let mut case = CaseFile::load(&case_path).context("load case")?;
    if let Some(max_retries) = max_retries {
        case.config.max_retries = Some(max_retries);
    }
    info!(case_id, runs, ?max_retries, "starting runs");

    let mut tally: BTreeMap<Outcome, u32> = BTreeMap::new();
    for run_num in 1..=runs {
        debug!(case_id, run_num, "starting run");
        let run = run_case(repo_root, &case_path, &case).context("run case")?;
        println!(
            "run {run_num}/{runs}: {} {} {}",
            run.eval_run_id,
            run.outcome.as_str(),
            run.results_dir.display()
        );
        *tally.entry(run.outcome).or_default() += 1;
    }
    println!("{}", tally_line(case_id, &tally));
    Ok(())
}

pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let (summary, warnings) = aggregate(&EvalDirs::new(repo_root).results.join(case_id))?;
    for line in report_lines(case_id, &summary) {
        println!("{line}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Remove `<case>_*` workspaces and the case's results.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let dirs = EvalDirs::new(repo_root);
    let prefix = format!("{case_id}_");
    let mut removed = 0usize;

    if dirs.workspaces.exists() {
        for entry in fs::read_dir(&dirs.workspaces)
            .with_context(|| format!("read {}", dirs.workspaces.display()))?
        {
            let entry = entry.context("read entry")?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_dir_all(entry.path())
                    .with_context(|| format!("remove {}", entry.path().display()))?;
                removed += 1;
            }
        }
    }

    let case_results = dirs.results.join(case_id);
    let had_results = case_results.exists();
    if had_results {
        fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }

    println!("clean {case_id}: {removed} workspaces, results removed: {had_results}");
    Ok(())
}

fn case_line(case: &CaseFile) -> String {
    let headline = case.case.problem.lines().map(str::trim).find(|line| !line.is_empty());
    format!(
        "{:<24} {} checks  {}",
        case.case.id,
        case.checks.len(),
        headline.unwrap_or("")
    )
}

fn tally_line(case_id: &str, tally: &BTreeMap<Outcome, u32>) -> String {
    let parts = tally
        .iter()
        .map(|(outcome, count)| format!("{}={count}", outcome.as_str()))
        .collect::<Vec<_>>();
    format!("{case_id}: {}", parts.join(" "))
}

fn report_lines(case_id: &str, summary: &ReportSummary) -> Vec<String> {
    let mut lines = vec![
        format!("{case_id}: {} runs", summary.runs),
        format!(
            "  success={} fail={} aborted={} error={}",
            summary.success, summary.fail, summary.aborted, summary.error
        ),
    ];
    if let Some(avg) = summary.avg_duration_secs {
        lines.push(format!("  avg duration: {avg:.2}s"));
    }
    if let Some(avg) = summary.avg_retries {
        lines.push(format!("  avg retries: {avg:.2}"));
    }
    for (label, (passed, total)) in &summary.check_pass_rates {
        lines.push(format!("  {label}: {passed}/{total}"));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn case_line_shows_first_problem_line() {
        let case = CaseFile::parse_str(
            "[case]\nid = \"mix\"\nproblem = \"\"\"\n\nMaximize profit.\nMore detail.\n\"\"\"\n\n[[checks]]\ntype = \"run_saved\"\n",
        )
        .expect("parse");
        let line = case_line(&case);
        assert!(line.starts_with("mix "));
        assert!(line.contains("1 checks"));
        assert!(line.ends_with("Maximize profit."));
    }

    #[test]
    fn tally_and_report_lines() {
        let mut tally = BTreeMap::new();
        tally.insert(Outcome::Success, 2);
        tally.insert(Outcome::Aborted, 1);
        assert_eq!(tally_line("mix", &tally), "mix: success=2 aborted=1");

        let mut summary = ReportSummary {
            runs: 3,
            success: 2,
            aborted: 1,
            avg_retries: Some(1.5),
            ..ReportSummary::default()
        };
        summary.check_pass_rates.insert("run_saved".to_string(), (2, 3));
        let lines = report_lines("mix", &summary);
        assert_eq!(lines[0], "mix: 3 runs");
        assert!(lines.contains(&"  avg retries: 1.50".to_string()));
        assert!(lines.contains(&"  run_saved: 2/3".to_string()));
        assert!(!lines.iter().any(|line| line.contains("duration")));
    }

    #[test]
    fn clean_removes_only_matching_workspaces() {
        let temp = tempdir().expect("tempdir");
        let dirs = EvalDirs::new(temp.path());
        fs::create_dir_all(dirs.workspaces.join("mix_20260101_000000_abc123")).expect("ws");
        fs::create_dir_all(dirs.workspaces.join("mixed_20260101_000000_abc123")).expect("ws");
        fs::create_dir_all(dirs.results.join("mix/eval-1")).expect("results");

        clean_case(temp.path(), "mix").expect("clean");

        assert!(!dirs.workspaces.join("mix_20260101_000000_abc123").exists());
        assert!(dirs.workspaces.join("mixed_20260101_000000_abc123").exists());
        assert!(!dirs.results.join("mix").exists());
    }

    #[test]
    fn run_unknown_case_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let err = run_case_by_id(temp.path(), "nope", 1, None).unwrap_err();
        assert!(err.to_string().contains("case 'nope' not found"));
    }
}
