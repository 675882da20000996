//! Retry-bounded pipeline that turns an optimization problem statement into a
//! solved OR-Tools model.
//!
//! A run walks formulate → generate → validate → critique → execute →
//! reflect → save, with backward edges on failure and one global retry
//! budget. When the budget is spent, the run goes to abort.
//!
//! - **[`core`]**: pure state, typed verdicts, and routing. No I/O.
//! - **[`io`]**: filesystem layout, child processes, the LLM backend.
//! - **[`agents`]**: the four schema-constrained LLM calls.
//!
//! [`step`] runs one stage; [`pipeline`] runs stages until the run finishes.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod start;
pub mod status;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
