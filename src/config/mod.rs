//! Configuration management for the email scheduler
//!
//! Configuration is loaded from a TOML file or from `SCHEDULER_*` environment
//! variables, then validated once before a run. Every section has defaults,
//! so a partial file only needs the values it changes.

use anyhow::Result;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::scheduler::error::{SchedulerError, SchedulerResult};
use crate::scheduler::exclusion::{default_state_rules, StateRule};
use crate::storage::zip::{default_zip_prefixes, ZipPrefixRange};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Organization scheduling policy
    pub organization: OrganizationConfig,

    /// Daily volume smoothing and capping
    pub load_balancing: LoadBalancingConfig,

    /// Follow-up generation
    pub followup: FollowupConfig,

    /// Which contacts a run loads
    pub contacts: ContactWindowConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// State compliance windows
    #[serde(default = "default_state_rules")]
    pub state_rules: Vec<StateRule>,

    /// ZIP prefix to state table
    #[serde(default = "default_zip_prefixes")]
    pub zip_prefixes: Vec<ZipPrefixRange>,
}

/// Organization-level policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    /// Send time of day for every schedule (HH:MM or HH:MM:SS)
    pub send_time: String,

    pub birthday_days_before: i64,

    pub effective_date_days_before: i64,

    /// Months a policy must be in force before its first anniversary email
    pub min_months_before_first_email: i64,

    pub aep_month: u32,

    pub aep_day: u32,

    /// Send AEP emails even inside exclusion windows
    pub aep_ignores_exclusions: bool,

    /// Never email contacts that failed underwriting (except AEP campaigns)
    pub exclude_failed_underwriting_global: bool,

    /// Allow untargeted campaigns to reach contacts without a state
    pub send_without_location_for_universal: bool,

    /// Maximum sends per contact within `period_days`
    pub max_emails_per_period: usize,

    pub period_days: i64,
}

/// Load balancing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    /// Fraction of the contact base that may be emailed on one day
    pub daily_send_percentage_cap: f64,

    pub ed_daily_soft_limit: usize,

    pub ed_smoothing_window_days: i64,

    pub catch_up_spread_days: i64,

    /// Multiple of the daily cap a day may reach before being trimmed
    pub overage_threshold: f64,

    /// Contact base size; filled from storage at run start when zero
    pub total_contacts: usize,

    /// Contacts per parallel generation batch
    pub batch_size: usize,
}

/// Follow-up generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowupConfig {
    pub enabled: bool,

    pub lookback_days: i64,

    pub delay_days: i64,

    /// Health-answer keys that count as a reported medical condition
    pub medical_condition_flags: Vec<String>,
}

/// Contact selection window; loads every contact when `lookahead_days` is unset
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ContactWindowConfig {
    pub lookahead_days: Option<i64>,

    pub lookback_days: i64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

// ============================================================================
// Defaults
// ============================================================================

impl Default for Config {
    fn default() -> Self {
        Self {
            organization: OrganizationConfig::default(),
            load_balancing: LoadBalancingConfig::default(),
            followup: FollowupConfig::default(),
            contacts: ContactWindowConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            state_rules: default_state_rules(),
            zip_prefixes: default_zip_prefixes(),
        }
    }
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            send_time: String::from("08:30:00"),
            birthday_days_before: 14,
            effective_date_days_before: 30,
            min_months_before_first_email: 1,
            aep_month: 9,
            aep_day: 15,
            aep_ignores_exclusions: false,
            exclude_failed_underwriting_global: false,
            send_without_location_for_universal: true,
            max_emails_per_period: 5,
            period_days: 30,
        }
    }
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            daily_send_percentage_cap: 0.07,
            ed_daily_soft_limit: 15,
            ed_smoothing_window_days: 5,
            catch_up_spread_days: 7,
            overage_threshold: 1.2,
            total_contacts: 0,
            batch_size: 10_000,
        }
    }
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_days: 35,
            delay_days: 2,
            medical_condition_flags: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/scheduler.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SCHEDULER_SQLITE_PATH") {
            config.database.sqlite_path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("SCHEDULER_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("SCHEDULER_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Ok(send_time) = std::env::var("SCHEDULER_SEND_TIME") {
            config.organization.send_time = send_time;
        }
        if let Some(flag) = env_parse("SCHEDULER_AEP_IGNORES_EXCLUSIONS") {
            config.organization.aep_ignores_exclusions = flag;
        }
        if let Some(flag) = env_parse("SCHEDULER_EXCLUDE_FAILED_UNDERWRITING") {
            config.organization.exclude_failed_underwriting_global = flag;
        }
        if let Some(pct) = env_parse("SCHEDULER_DAILY_CAP_PCT") {
            config.load_balancing.daily_send_percentage_cap = pct;
        }
        if let Some(batch_size) = env_parse("SCHEDULER_BATCH_SIZE") {
            config.load_balancing.batch_size = batch_size;
        }
        if let Some(lookahead) = env_parse("SCHEDULER_LOOKAHEAD_DAYS") {
            config.contacts.lookahead_days = Some(lookahead);
        }

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment, then validate
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<Self>(&content)?
            }
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> SchedulerResult<()> {
        self.organization.validate()?;
        self.load_balancing.validate()?;

        if self.followup.lookback_days < 0 || self.followup.delay_days < 0 {
            return Err(SchedulerError::configuration(
                "followup",
                "lookback_days and delay_days must not be negative",
            ));
        }

        if let Some(rule) = self
            .state_rules
            .iter()
            .find(|r| r.before_days < 0 || r.after_days < 0 || r.state.trim().is_empty())
        {
            return Err(SchedulerError::configuration(
                "state_rules",
                format!("invalid rule for state '{}'", rule.state),
            ));
        }

        Ok(())
    }
}

impl OrganizationConfig {
    /// Parsed send time
    pub fn send_time(&self) -> SchedulerResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.send_time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&self.send_time, "%H:%M"))
            .map_err(|e| SchedulerError::configuration("organization.send_time", e.to_string()))
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        self.send_time()?;

        if !(1..=12).contains(&self.aep_month) || !(1..=28).contains(&self.aep_day) {
            return Err(SchedulerError::configuration(
                "organization.aep_month",
                format!("invalid AEP date {}/{}", self.aep_month, self.aep_day),
            ));
        }

        if self.max_emails_per_period == 0 || self.period_days <= 0 {
            return Err(SchedulerError::configuration(
                "organization.max_emails_per_period",
                "frequency limit and period must be positive",
            ));
        }

        if self.birthday_days_before < 0 || self.effective_date_days_before < 0 {
            return Err(SchedulerError::configuration(
                "organization.birthday_days_before",
                "days before must not be negative",
            ));
        }

        Ok(())
    }
}

impl LoadBalancingConfig {
    pub fn validate(&self) -> SchedulerResult<()> {
        if !(self.daily_send_percentage_cap > 0.0 && self.daily_send_percentage_cap <= 1.0) {
            return Err(SchedulerError::configuration(
                "load_balancing.daily_send_percentage_cap",
                "must be in (0, 1]",
            ));
        }

        if self.overage_threshold <= 1.0 {
            return Err(SchedulerError::configuration(
                "load_balancing.overage_threshold",
                "must be greater than 1.0",
            ));
        }

        if self.ed_smoothing_window_days <= 0 || self.catch_up_spread_days <= 0 {
            return Err(SchedulerError::configuration(
                "load_balancing.catch_up_spread_days",
                "smoothing and catch-up windows must be positive",
            ));
        }

        if self.batch_size == 0 {
            return Err(SchedulerError::configuration(
                "load_balancing.batch_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Maximum sends per day: `max(1, floor(total_contacts * pct))`
    #[must_use]
    pub fn daily_cap(&self) -> usize {
        // products such as 100 * 0.29 land just below the integer
        let raw = self.total_contacts as f64 * self.daily_send_percentage_cap;
        ((raw + 1e-9).floor() as usize).max(1)
    }

    /// Per-day effective-date count above which smoothing kicks in
    #[must_use]
    pub fn ed_threshold(&self) -> usize {
        let from_cap = (self.daily_cap() as f64 * 0.3).floor() as usize;
        self.ed_daily_soft_limit.min(from_cap)
    }

    /// Day count above which the cap pass trims a day
    #[must_use]
    pub fn overage_limit(&self) -> f64 {
        self.daily_cap() as f64 * self.overage_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.state_rules.len(), 13);
    }

    #[test]
    fn test_daily_cap() {
        let config = LoadBalancingConfig {
            total_contacts: 1000,
            ..Default::default()
        };
        assert_eq!(config.daily_cap(), 70);
        assert_eq!(config.ed_threshold(), 15);

        let tiny = LoadBalancingConfig {
            total_contacts: 3,
            ..Default::default()
        };
        assert_eq!(tiny.daily_cap(), 1);
    }

    #[test]
    fn test_daily_cap_survives_float_rounding() {
        let config = LoadBalancingConfig {
            total_contacts: 100,
            daily_send_percentage_cap: 0.29,
            ..Default::default()
        };
        assert_eq!(config.daily_cap(), 29);
    }

    #[test]
    fn test_invalid_overage_threshold() {
        let mut config = Config::default();
        config.load_balancing.overage_threshold = 1.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SchedulerError::ConfigurationError { .. }));
    }

    #[test]
    fn test_invalid_cap_percentage() {
        let mut config = Config::default();
        config.load_balancing.daily_send_percentage_cap = 0.0;
        assert!(config.validate().is_err());
        config.load_balancing.daily_send_percentage_cap = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_send_time_formats() {
        let mut org = OrganizationConfig::default();
        assert_eq!(org.send_time().unwrap(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        org.send_time = "09:15".to_string();
        assert_eq!(org.send_time().unwrap(), NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        org.send_time = "noon".to_string();
        assert!(org.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [organization]
            aep_ignores_exclusions = true

            [[state_rules]]
            state = "TX"
            kind = "birthday"
            before_days = 30
            after_days = 10
            "#,
        )
        .unwrap();

        assert!(config.organization.aep_ignores_exclusions);
        assert_eq!(config.organization.birthday_days_before, 14);
        assert_eq!(config.load_balancing.catch_up_spread_days, 7);
        assert_eq!(config.state_rules.len(), 1);
        assert!(!config.zip_prefixes.is_empty());
    }
}
