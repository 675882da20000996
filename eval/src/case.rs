//! Case file parsing and validation.
//!
//! Cases are TOML files holding one problem statement and the checks a solved
//! run must pass. See `eval/cases/` for examples.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use modeler::core::types::SolverStatus;
use serde::Deserialize;

/// A parsed case file containing the problem, config, and checks.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Problem statement handed to `start_run`.
    pub problem: String,
}

/// Pipeline configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub max_retries: Option<u32>,
    pub max_steps: Option<u32>,
    pub run_timeout_secs: Option<u64>,
}

/// Verification check to run after the pipeline stops.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The run ended in `saved`.
    RunSaved,
    /// The solver report carries this status.
    SolverStatus { status: SolverStatus },
    /// The reported objective is within `tolerance` of `expected`.
    ObjectiveWithin { expected: f64, tolerance: f64 },
    /// A file exists in the run's artifacts directory.
    ArtifactExists { path: PathBuf },
    /// A command exits successfully inside the artifacts directory.
    CommandSucceeds { cmd: Vec<String> },
}

impl CaseFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load case {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.problem.trim().is_empty() {
            bail!("case.problem must be non-empty");
        }
        if self.config.max_retries == Some(0) {
            bail!("config.max_retries must be > 0");
        }
        if self.config.max_steps == Some(0) {
            bail!("config.max_steps must be > 0");
        }
        if self.config.run_timeout_secs == Some(0) {
            bail!("config.run_timeout_secs must be > 0");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("checks[{index}] invalid"))?;
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self) -> Result<()> {
        match self {
            Check::RunSaved | Check::SolverStatus { .. } => {}
            Check::ObjectiveWithin {
                expected,
                tolerance,
            } => {
                if !expected.is_finite() {
                    bail!("objective_within.expected must be finite");
                }
                if !tolerance.is_finite() || *tolerance < 0.0 {
                    bail!("objective_within.tolerance must be a finite number >= 0");
                }
            }
            Check::ArtifactExists { path } => {
                if path.as_os_str().is_empty() {
                    bail!("artifact_exists.path must be non-empty");
                }
                if path
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
                {
                    bail!("artifact_exists.path must stay inside the artifacts directory");
                }
            }
            Check::CommandSucceeds { cmd } => {
                if cmd.is_empty() || cmd[0].trim().is_empty() {
                    bail!("command_succeeds.cmd must be a non-empty array");
                }
            }
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
