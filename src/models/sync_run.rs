//! Sync job bookkeeping models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// What triggered a sync job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    /// Operator request
    #[default]
    Manual,
    /// Periodic scheduler
    Cron,
    /// Triggered by another sync
    Cascade,
    /// Follow-up of a partially failed job
    Retry,
}

impl std::fmt::Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSource::Manual => write!(f, "manual"),
            JobSource::Cron => write!(f, "cron"),
            JobSource::Cascade => write!(f, "cascade"),
            JobSource::Retry => write!(f, "retry"),
        }
    }
}

impl std::str::FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(JobSource::Manual),
            "cron" => Ok(JobSource::Cron),
            "cascade" => Ok(JobSource::Cascade),
            "retry" => Ok(JobSource::Retry),
            _ => Err(format!("Invalid job source: {}", s)),
        }
    }
}

/// History row of one executed sync job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Row id, assigned on insert
    pub id: Option<i64>,
    /// Correlation id of the run
    pub workflow_id: String,
    /// Trigger of the job
    pub source: JobSource,
    /// Retry generation of the job
    pub retry_count: u32,
    /// Entities processed
    pub total: usize,
    /// Entities synced
    pub succeeded: usize,
    /// Entities that failed
    pub failed: usize,
    /// Failed entity ids
    pub failed_ids: Vec<EntityId>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_source_display_and_parse() {
        for source in [
            JobSource::Manual,
            JobSource::Cron,
            JobSource::Cascade,
            JobSource::Retry,
        ] {
            assert_eq!(source.to_string().parse::<JobSource>().unwrap(), source);
        }
        assert!("nightly".parse::<JobSource>().is_err());
    }

    #[test]
    fn test_job_source_serde() {
        assert_eq!(serde_json::to_string(&JobSource::Cron).unwrap(), "\"cron\"");
        assert_eq!(
            serde_json::from_str::<JobSource>("\"retry\"").unwrap(),
            JobSource::Retry
        );
    }
}
