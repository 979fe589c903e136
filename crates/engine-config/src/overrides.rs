use crate::{
    config::{TransferConfig, split_count_problem},
    error::ConfigError,
};
use engine_core::job::{TransferJob, TransferMode, TransferSettings};
use model::core::identifiers::RunId;

/// Per-run switches given on the command line.
#[derive(Debug, Clone, Default)]
pub struct JobOverrides {
    pub drop_target: bool,
    pub incremental: bool,
    pub date_column: Option<String>,
    pub enable_splitting: bool,
    pub disable_splitting: bool,
    pub splits: Option<u32>,
}

impl TransferConfig {
    /// Builds the job and settings for one run.
    pub fn build_job(
        &self,
        overrides: &JobOverrides,
    ) -> Result<(TransferJob, TransferSettings), ConfigError> {
        let mut problems = Vec::new();

        if overrides.enable_splitting && overrides.disable_splitting {
            problems.push(
                "--enable-splitting and --disable-splitting cannot be used together".to_string(),
            );
        }

        let watermark_column = overrides
            .date_column
            .clone()
            .or_else(|| self.watermark_column.clone());
        if overrides.incremental && watermark_column.is_none() {
            problems.push(
                "--incremental requires --date-column or WATERMARK_COLUMN".to_string(),
            );
        }

        let requested_split_count = overrides.splits.unwrap_or(self.split_count);
        if let Some(problem) = split_count_problem(&self.source_table, requested_split_count) {
            problems.push(problem);
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }

        let splitting_enabled = if overrides.enable_splitting {
            true
        } else if overrides.disable_splitting {
            false
        } else {
            self.splitting_enabled
        };

        let mode = if overrides.incremental {
            TransferMode::Incremental
        } else {
            TransferMode::Full
        };

        let job = TransferJob {
            run_id: RunId::generate(),
            source_table: self.source_table.clone(),
            target_table: self.target_table.clone(),
            mode,
            watermark_column: watermark_column.filter(|_| mode == TransferMode::Incremental),
            watermark_value: self
                .watermark_value
                .clone()
                .filter(|_| mode == TransferMode::Incremental),
            splitting_enabled,
            requested_split_count,
            drop_target: overrides.drop_target,
            truncate_target: self.truncate_target,
        };

        let settings = TransferSettings {
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            internal_schema: self.internal_schema.clone(),
            retry: self.retry.clone(),
            progress_interval: self.progress_interval,
        };

        Ok((job, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvManager;

    fn config() -> TransferConfig {
        let env = EnvManager::from_vars([
            ("SOURCE_TABLE".to_string(), "orders".to_string()),
            ("WATERMARK_VALUE".to_string(), "2024-01-01".to_string()),
        ]);
        TransferConfig::from_env(&env).unwrap()
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        let overrides = JobOverrides {
            enable_splitting: true,
            disable_splitting: true,
            incremental: true,
            ..Default::default()
        };

        let Err(ConfigError::Invalid(problems)) = config().build_job(&overrides) else {
            panic!("expected conflicting flags to be rejected");
        };
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn command_line_wins_over_environment() {
        let overrides = JobOverrides {
            incremental: true,
            date_column: Some("updated_at".into()),
            enable_splitting: true,
            splits: Some(4),
            ..Default::default()
        };

        let (job, settings) = config().build_job(&overrides).unwrap();
        assert_eq!(job.mode, TransferMode::Incremental);
        assert_eq!(job.watermark_column.as_deref(), Some("updated_at"));
        assert_eq!(job.watermark_value.as_deref(), Some("2024-01-01"));
        assert_eq!(job.effective_split_count(), 4);
        assert_eq!(settings.batch_size, 10_000);
    }

    #[test]
    fn full_runs_ignore_watermarks() {
        let (job, _) = config().build_job(&JobOverrides::default()).unwrap();
        assert_eq!(job.mode, TransferMode::Full);
        assert!(job.watermark_value.is_none());
        assert_eq!(job.effective_split_count(), 1);
    }
}
