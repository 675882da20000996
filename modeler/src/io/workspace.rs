//! `.modeler/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{PipelineConfig, write_config};

const GITIGNORE: &str = "runs/\nschemas/\n";

/// Canonical paths within `.modeler/` for a project root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub modeler_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    /// Agent output schemas, rewritten before every agent call.
    pub schemas_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let modeler_dir = root.join(".modeler");
        Self {
            root: root.clone(),
            config_path: modeler_dir.join("config.toml"),
            gitignore_path: modeler_dir.join(".gitignore"),
            schemas_dir: modeler_dir.join("schemas"),
            runs_dir: modeler_dir.join("runs"),
            modeler_dir,
        }
    }

    pub fn run(&self, run_id: &str) -> RunPaths {
        RunPaths::new(&self.runs_dir, run_id)
    }

    pub fn is_initialized(&self) -> bool {
        self.modeler_dir.is_dir()
    }
}

/// Paths for one run under `.modeler/runs/<run-id>/`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub problem_path: PathBuf,
    pub state_path: PathBuf,
    pub steps_dir: PathBuf,
    /// Working directory for generated code; the script is `sandbox/model.py`.
    pub sandbox_dir: PathBuf,
    pub script_path: PathBuf,
    pub artifacts_dir: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        let sandbox_dir = dir.join("sandbox");
        Self {
            problem_path: dir.join("problem.md"),
            state_path: dir.join("state.json"),
            steps_dir: dir.join("steps"),
            script_path: sandbox_dir.join("model.py"),
            sandbox_dir,
            artifacts_dir: dir.join("artifacts"),
            dir,
        }
    }
}

/// Create `.modeler/` scaffolding in `root`.
///
/// Fails if `.modeler/` already exists unless `force` is set; `force` rewrites
/// the config and leaves existing runs alone.
pub fn init_workspace(root: &Path, force: bool) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.modeler_dir.exists() && !paths.modeler_dir.is_dir() {
        return Err(anyhow!("modeler init: .modeler exists but is not a directory"));
    }
    if paths.modeler_dir.exists() && !force {
        return Err(anyhow!(
            "modeler init: .modeler already exists (use --force to overwrite)"
        ));
    }

    for dir in [&paths.modeler_dir, &paths.schemas_dir, &paths.runs_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    fs::write(&paths.gitignore_path, GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &PipelineConfig::default())?;

    info!(root = %root.display(), "workspace initialized");
    Ok(paths)
}

/// Fail with a hint unless `init` has run.
pub fn require_initialized(paths: &WorkspacePaths) -> Result<()> {
    if !paths.is_initialized() {
        return Err(anyhow!(
            "missing {} (run `modeler init` first)",
            paths.modeler_dir.display()
        ));
    }
    Ok(())
}
