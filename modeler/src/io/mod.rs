//! Side-effecting helpers: filesystem layout, child processes, agents.

pub mod artifacts;
pub mod config;
pub mod fsutil;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod python;
pub mod run_store;
pub mod step_log;
pub mod workspace;
