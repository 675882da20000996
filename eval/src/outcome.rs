use modeler::exit_codes;
use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Aborted,
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Fail => "fail",
            Outcome::Aborted => "aborted",
            Outcome::Error => "error",
        }
    }
}

/// Classify a run from the exit code `modeler solve` would have returned.
pub fn classify_outcome(exit_code: Option<i32>, judgment: &Judgment) -> Outcome {
    match exit_code {
        Some(exit_codes::OK) => {
            if judgment.all_passed() {
                Outcome::Success
            } else {
                Outcome::Fail
            }
        }
        Some(exit_codes::ABORTED) => Outcome::Aborted,
        Some(_) | None => Outcome::Error,
    }
}
