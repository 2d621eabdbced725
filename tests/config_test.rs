//! Configuration loading tests

use email_scheduler::config::Config;
use email_scheduler::error::{Error, ErrorCategory};
use email_scheduler::scheduler::RuleKind;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
        [organization]
        send_time = "09:00"
        birthday_days_before = 21
        max_emails_per_period = 3

        [load_balancing]
        daily_send_percentage_cap = 0.05
        total_contacts = 2000

        [followup]
        medical_condition_flags = ["has_medical_conditions"]

        [database]
        sqlite_path = "/tmp/scheduler-test.db"

        [[state_rules]]
        state = "ny"
        kind = "year_round"
        before_days = 0
        after_days = 0
        "#,
    );

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.organization.birthday_days_before, 21);
    assert_eq!(config.organization.max_emails_per_period, 3);
    assert_eq!(config.load_balancing.daily_cap(), 100);
    assert_eq!(config.followup.medical_condition_flags, vec!["has_medical_conditions"]);
    assert_eq!(config.state_rules.len(), 1);
    assert_eq!(config.state_rules[0].kind, RuleKind::YearRound);
    // untouched sections keep defaults
    assert_eq!(config.load_balancing.catch_up_spread_days, 7);
    assert!(config.followup.enabled);
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_config(
        r#"
        [load_balancing]
        overage_threshold = 0.9
        "#,
    );

    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::Scheduler(_)));
    assert_eq!(err.category(), ErrorCategory::Config);
}

#[test]
fn test_malformed_toml() {
    let file = write_config("[organization\nsend_time = ");
    let err = Config::load(Some(file.path())).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Parsing);
}

#[test]
fn test_missing_file() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/scheduler.toml"))).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(err.is_recoverable());
}

#[test]
fn test_default_round_trips_through_toml() {
    let config = Config::default();
    let text = toml::to_string(&config).unwrap();
    let parsed: Config = toml::from_str(&text).unwrap();

    assert_eq!(parsed.state_rules, config.state_rules);
    assert_eq!(parsed.zip_prefixes.len(), config.zip_prefixes.len());
    assert!(parsed.validate().is_ok());
}
