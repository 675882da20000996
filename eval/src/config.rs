//! Applies case-specific overrides to the default pipeline configuration.

use anyhow::Result;
use modeler::io::config::PipelineConfig;

use crate::case::CaseConfig;

pub fn apply_case_config(
    mut base: PipelineConfig,
    overrides: &CaseConfig,
) -> Result<PipelineConfig> {
    if let Some(max_retries) = overrides.max_retries {
        base.max_retries = max_retries;
    }
    if let Some(max_steps) = overrides.max_steps {
        base.max_steps = max_steps;
    }
    if let Some(run_timeout_secs) = overrides.run_timeout_secs {
        base.run_timeout_secs = run_timeout_secs;
    }
    base.validate()?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_defaults_without_overrides() {
        let base = PipelineConfig::default();
        let merged = apply_case_config(base.clone(), &CaseConfig::default()).expect("merge");
        assert_eq!(merged, base);
    }

    #[test]
    fn applies_retry_and_step_overrides() {
        let overrides = CaseConfig {
            max_retries: Some(2),
            max_steps: Some(20),
            run_timeout_secs: None,
        };
        let merged = apply_case_config(PipelineConfig::default(), &overrides).expect("merge");
        assert_eq!(merged.max_retries, 2);
        assert_eq!(merged.max_steps, 20);
        assert_eq!(merged.run_timeout_secs, PipelineConfig::default().run_timeout_secs);
    }
}
