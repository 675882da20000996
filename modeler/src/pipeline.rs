//! Running a pipeline to completion for `modeler solve` and `modeler resume`.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tracing::info;

use crate::core::types::RunStatus;
use crate::exit_codes;
use crate::io::llm::LlmBackend;
use crate::io::python::PythonRunner;
use crate::io::run_store::load_run;
use crate::io::workspace::WorkspacePaths;
use crate::step::{StepLimitExceededError, StepOptions, StepOutcome, effective_config, run_stage};

/// Why `run_pipeline` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStop {
    Saved,
    Aborted,
    /// The run executed `max_steps` stages and is still running.
    StepLimit { steps_taken: u32, max_steps: u32 },
}

impl PipelineStop {
    /// Exit code reported by `modeler solve` and `modeler resume`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Saved => exit_codes::OK,
            Self::Aborted => exit_codes::ABORTED,
            Self::StepLimit { .. } => exit_codes::STEP_LIMIT,
        }
    }
}

/// Summary of a pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub steps_executed: u32,
    pub retry_count: u32,
    pub stop: PipelineStop,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub max_retries: Option<u32>,
}

/// Run stages of `run_id` until it is saved, aborted, or hits `max_steps`.
///
/// State is reloaded from disk before every stage, so an interrupted
/// invocation can be continued with another call. Any other error (runner
/// I/O, deadline, missing interpreter) stops the loop immediately.
pub fn run_pipeline<B, P, F>(
    root: &Path,
    run_id: &str,
    backend: &B,
    python: &P,
    options: &PipelineOptions,
    mut on_step: F,
) -> Result<PipelineOutcome>
where
    B: LlmBackend + ?Sized,
    P: PythonRunner + ?Sized,
    F: FnMut(&StepOutcome),
{
    let paths = WorkspacePaths::new(root);
    let mut step_options = StepOptions {
        max_retries: options.max_retries,
        deadline: None,
    };
    let cfg = effective_config(root, &step_options)?;
    step_options.deadline = Some(Instant::now() + cfg.run_timeout());

    let mut steps_executed = 0u32;
    loop {
        let state = load_run(&paths, run_id)?;
        let stop = match state.status {
            RunStatus::Saved => Some(PipelineStop::Saved),
            RunStatus::Aborted => Some(PipelineStop::Aborted),
            RunStatus::Running => None,
        };
        if let Some(stop) = stop {
            info!(run_id, ?stop, steps_executed, "pipeline finished");
            return Ok(PipelineOutcome {
                run_id: run_id.to_string(),
                steps_executed,
                retry_count: state.retry_count,
                stop,
            });
        }

        match run_stage(root, run_id, backend, python, &step_options) {
            Ok(step) => {
                steps_executed += 1;
                on_step(&step);
            }
            Err(err) => {
                if let Some(limit) = err.downcast_ref::<StepLimitExceededError>() {
                    return Ok(PipelineOutcome {
                        run_id: run_id.to_string(),
                        steps_executed,
                        retry_count: state.retry_count,
                        stop: PipelineStop::StepLimit {
                            steps_taken: limit.steps_taken,
                            max_steps: limit.max_steps,
                        },
                    });
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FailureKind, Stage};
    use crate::io::artifacts::{MODEL_PY, OUTCOME_JSON, load_outcome};
    use crate::io::config::{PipelineConfig, write_config};
    use crate::test_support::{
        GOOD_CODE, ScriptedBackend, ScriptedPython, ScriptedReply, TestWorkspace, approve,
        code_reply, coherent, incoherent, reject, sample_model_json,
    };

    fn happy_replies() -> Vec<ScriptedReply> {
        vec![
            ScriptedReply::Json(sample_model_json()),
            ScriptedReply::Json(code_reply(GOOD_CODE)),
            ScriptedReply::Json(approve()),
            ScriptedReply::Json(coherent()),
        ]
    }

    #[test]
    fn happy_path_saves_artifacts() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("Maximize profit.").expect("start");
        let backend = ScriptedBackend::new(happy_replies());
        let mut stages = Vec::new();

        let out = run_pipeline(
            ws.root(),
            &run_id,
            &backend,
            &ScriptedPython::new(),
            &PipelineOptions::default(),
            |step| stages.push(step.stage),
        )
        .expect("pipeline");

        assert_eq!(out.stop, PipelineStop::Saved);
        assert_eq!(out.retry_count, 0);
        assert_eq!(
            stages,
            vec![
                Stage::Formulate,
                Stage::Generate,
                Stage::Validate,
                Stage::Critique,
                Stage::Execute,
                Stage::Reflect,
                Stage::Save,
            ]
        );
        let artifacts = ws.paths().run(&run_id).artifacts_dir;
        assert!(artifacts.join(MODEL_PY).exists());
        assert!(artifacts.join(OUTCOME_JSON).exists());
        assert_eq!(backend.remaining(), 0);
    }

    #[test]
    fn repeated_rejections_abort_after_budget() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        let mut replies = vec![
            ScriptedReply::Json(sample_model_json()),
            ScriptedReply::Json(code_reply(GOOD_CODE)),
        ];
        // Four retries are allowed; the fifth rejection aborts.
        for _ in 0..4 {
            replies.push(ScriptedReply::Json(reject("code")));
            replies.push(ScriptedReply::Json(code_reply(GOOD_CODE)));
        }
        replies.push(ScriptedReply::Json(reject("code")));
        let backend = ScriptedBackend::new(replies);

        let out = run_pipeline(
            ws.root(),
            &run_id,
            &backend,
            &ScriptedPython::new(),
            &PipelineOptions::default(),
            |_| {},
        )
        .expect("pipeline");

        assert_eq!(out.stop, PipelineStop::Aborted);
        assert_eq!(out.retry_count, 4);
        let outcome = load_outcome(&ws.paths().run(&run_id).artifacts_dir)
            .expect("load")
            .expect("outcome");
        assert_eq!(outcome.failures.len(), 5);
        assert!(
            outcome
                .failures
                .iter()
                .all(|f| f.kind == FailureKind::CritiqueRejected)
        );
        assert_eq!(backend.remaining(), 0);
    }

    #[test]
    fn max_retries_override_of_one_aborts_on_first_failure() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        let backend = ScriptedBackend::new(vec![
            ScriptedReply::Json(sample_model_json()),
            ScriptedReply::Json(code_reply(GOOD_CODE)),
            ScriptedReply::Json(approve()),
            ScriptedReply::Json(incoherent("model")),
        ]);

        let out = run_pipeline(
            ws.root(),
            &run_id,
            &backend,
            &ScriptedPython::new(),
            &PipelineOptions {
                max_retries: Some(1),
            },
            |_| {},
        )
        .expect("pipeline");

        assert_eq!(out.stop, PipelineStop::Aborted);
        assert_eq!(out.retry_count, 0);
    }

    #[test]
    fn step_limit_stops_a_running_pipeline() {
        let ws = TestWorkspace::new().expect("workspace");
        write_config(
            &ws.paths().config_path,
            &PipelineConfig {
                max_steps: 2,
                ..PipelineConfig::default()
            },
        )
        .expect("config");
        let run_id = ws.start("p").expect("start");
        let backend = ScriptedBackend::new(happy_replies());

        let out = run_pipeline(
            ws.root(),
            &run_id,
            &backend,
            &ScriptedPython::new(),
            &PipelineOptions::default(),
            |_| {},
        )
        .expect("pipeline");

        assert_eq!(
            out.stop,
            PipelineStop::StepLimit {
                steps_taken: 2,
                max_steps: 2
            }
        );
        assert_eq!(out.steps_executed, 2);
    }

    #[test]
    fn finished_run_returns_immediately() {
        let ws = TestWorkspace::new().expect("workspace");
        let run_id = ws.start("p").expect("start");
        let backend = ScriptedBackend::new(happy_replies());
        let python = ScriptedPython::new();
        run_pipeline(ws.root(), &run_id, &backend, &python, &PipelineOptions::default(), |_| {})
            .expect("first");

        let again = run_pipeline(
            ws.root(),
            &run_id,
            &ScriptedBackend::new(Vec::new()),
            &python,
            &PipelineOptions::default(),
            |_| {},
        )
        .expect("second");
        assert_eq!(again.stop, PipelineStop::Saved);
        assert_eq!(again.steps_executed, 0);
    }
}
