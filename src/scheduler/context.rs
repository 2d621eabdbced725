//! Per-run scheduling context
//!
//! Built once at the start of a run from validated configuration and shared
//! read-only (behind an `Arc`) by every stage and worker task.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use super::exclusion::{ExclusionEvaluator, ExclusionRules};
use crate::config::{Config, FollowupConfig, LoadBalancingConfig, OrganizationConfig};
use crate::models::EmailSchedule;

#[derive(Debug, Clone)]
pub struct SchedulingContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub today: NaiveDate,
    pub send_time: NaiveTime,
    pub organization: OrganizationConfig,
    pub load_balancing: LoadBalancingConfig,
    pub followup: FollowupConfig,
    pub exclusions: ExclusionEvaluator,
}

impl SchedulingContext {
    /// Validate `config` and freeze it for a run on `today`
    ///
    /// `total_contacts` replaces the configured contact base size when the
    /// configuration leaves it at zero.
    pub fn new(config: &Config, today: NaiveDate, total_contacts: usize) -> SchedulerResult<Self> {
        config.validate()?;

        let mut load_balancing = config.load_balancing.clone();
        if load_balancing.total_contacts == 0 {
            load_balancing.total_contacts = total_contacts;
        }

        let exclusions = ExclusionEvaluator::new(ExclusionRules::new(config.state_rules.clone()))
            .with_aep_exemption(config.organization.aep_ignores_exclusions);

        Ok(Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            today,
            send_time: config.organization.send_time()?,
            organization: config.organization.clone(),
            load_balancing,
            followup: config.followup.clone(),
            exclusions,
        })
    }

    /// Replace the generated run id (reproducible runs and tests)
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

/// Schedules and per-item errors produced by one generation pass
#[derive(Debug, Default)]
pub struct GenerationBatch {
    pub schedules: Vec<EmailSchedule>,
    pub errors: Vec<SchedulerError>,
}

impl GenerationBatch {
    pub fn merge(mut self, other: GenerationBatch) -> Self {
        self.schedules.extend(other.schedules);
        self.errors.extend(other.errors);
        self
    }

    pub fn failed(error: SchedulerError) -> Self {
        Self {
            schedules: Vec::new(),
            errors: vec![error],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fills_contact_total() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let ctx = SchedulingContext::new(&Config::default(), today, 1000).unwrap();

        assert_eq!(ctx.load_balancing.total_contacts, 1000);
        assert_eq!(ctx.load_balancing.daily_cap(), 70);
        assert!(!ctx.run_id.is_empty());
        assert_eq!(ctx.send_time, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    }

    #[test]
    fn test_context_rejects_invalid_config() {
        let mut config = Config::default();
        config.load_balancing.catch_up_spread_days = 0;
        let today = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();

        let err = SchedulingContext::new(&config, today, 10).unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigurationError { .. }));
    }
}
