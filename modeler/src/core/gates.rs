//! Routing between stages.
//!
//! Gates are pure: given the state and the typed result of the stage that just
//! ran, they pick the next stage and update the retry bookkeeping. They never
//! look at free-form agent text.

use crate::core::budget::RetryBudget;
use crate::core::state::PipelineState;
use crate::core::types::{Failure, RunStatus, Stage, StageResult};

/// Where the pipeline goes after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Forward edge after a successful stage.
    Next(Stage),
    /// Backward edge; the retry counter was bumped.
    Retry(Stage),
    /// Retry budget exhausted; the abort stage runs next.
    Abort,
    /// A terminal stage ran; the run is over.
    Finished(RunStatus),
}

/// Forward edge taken when `stage` succeeds.
pub fn success_edge(stage: Stage) -> Option<Stage> {
    match stage {
        Stage::Formulate => Some(Stage::Generate),
        Stage::Generate => Some(Stage::Validate),
        Stage::Validate => Some(Stage::Critique),
        Stage::Critique => Some(Stage::Execute),
        Stage::Execute => Some(Stage::Reflect),
        Stage::Reflect => Some(Stage::Save),
        Stage::Save | Stage::Abort => None,
    }
}

/// Decide where a failure leads without mutating anything.
pub fn route_failure(failure: &Failure, retry_count: u32, budget: RetryBudget) -> Route {
    if budget.exhausted(retry_count) {
        return Route::Abort;
    }
    Route::Retry(failure.retry_stage)
}

/// Apply the result of `state.stage` to the state and return the route taken.
pub fn advance(state: &mut PipelineState, result: StageResult, budget: RetryBudget) -> Route {
    let current = state.stage;
    match result {
        StageResult::Passed => match current {
            Stage::Save => finish(state, RunStatus::Saved),
            Stage::Abort => finish(state, RunStatus::Aborted),
            _ => {
                // Every non-terminal stage has a forward edge.
                let next = success_edge(current).unwrap_or(Stage::Save);
                if current == Stage::Reflect {
                    state.coherent = true;
                }
                state.stage = next;
                Route::Next(next)
            }
        },
        StageResult::Failed(failure) => {
            let route = route_failure(&failure, state.retry_count, budget);
            state.last_failure = Some(failure.clone());
            state.failures.push(failure);
            match route {
                Route::Retry(stage) => {
                    state.retry_count += 1;
                    state.stage = stage;
                }
                Route::Abort => state.stage = Stage::Abort,
                Route::Next(_) | Route::Finished(_) => {}
            }
            route
        }
    }
}

fn finish(state: &mut PipelineState, status: RunStatus) -> Route {
    state.status = status;
    Route::Finished(status)
}
