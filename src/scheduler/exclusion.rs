//! State compliance exclusion windows
//!
//! Several states forbid marketing email around a policyholder's birthday or
//! policy anniversary; a few forbid it year-round. Rules are configuration
//! data keyed by state and anchor type, loaded once per run.
//!
//! Windows are widened on the "before" side by [`PRE_WINDOW_BUFFER_DAYS`] so
//! that sends generated ahead of time never land inside the official window.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::calendar::{add_days, anniversary_in_year, month_start};
use crate::models::{AnniversaryKind, Contact, EmailType};

/// Extra days blocked before every anchored window
pub const PRE_WINDOW_BUFFER_DAYS: i64 = 60;

/// Chained windows followed when looking for a resume date
const MAX_RESUME_HOPS: usize = 4;

// ============================================================================
// Rules
// ============================================================================

/// What a state rule is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Birthday,
    EffectiveDate,
    YearRound,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Birthday => "birthday",
            Self::EffectiveDate => "effective_date",
            Self::YearRound => "year_round",
        }
    }
}

/// One state's compliance window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRule {
    pub state: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub before_days: i64,
    #[serde(default)]
    pub after_days: i64,
    /// Anchor to the first of the anniversary month instead of the exact day
    #[serde(default)]
    pub use_month_start: bool,
}

impl StateRule {
    pub fn birthday(state: &str, before_days: i64, after_days: i64) -> Self {
        Self {
            state: state.to_string(),
            kind: RuleKind::Birthday,
            before_days,
            after_days,
            use_month_start: false,
        }
    }

    pub fn effective_date(state: &str, before_days: i64, after_days: i64) -> Self {
        Self {
            state: state.to_string(),
            kind: RuleKind::EffectiveDate,
            before_days,
            after_days,
            use_month_start: false,
        }
    }

    pub fn year_round(state: &str) -> Self {
        Self {
            state: state.to_string(),
            kind: RuleKind::YearRound,
            before_days: 0,
            after_days: 0,
            use_month_start: false,
        }
    }

    pub fn with_month_start(mut self) -> Self {
        self.use_month_start = true;
        self
    }
}

/// Production rule table used when configuration provides none
pub fn default_state_rules() -> Vec<StateRule> {
    vec![
        StateRule::birthday("CA", 30, 60),
        StateRule::birthday("ID", 0, 63),
        StateRule::birthday("KY", 0, 60),
        StateRule::birthday("MD", 0, 30),
        StateRule::birthday("NV", 0, 60).with_month_start(),
        StateRule::birthday("OK", 0, 60),
        StateRule::birthday("OR", 0, 31),
        StateRule::birthday("VA", 0, 30),
        StateRule::effective_date("MO", 30, 33),
        StateRule::year_round("CT"),
        StateRule::year_round("MA"),
        StateRule::year_round("NY"),
        StateRule::year_round("WA"),
    ]
}

/// Read-only lookup of rules by state
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    by_state: HashMap<String, Vec<StateRule>>,
}

impl ExclusionRules {
    pub fn new(rules: impl IntoIterator<Item = StateRule>) -> Self {
        let by_state = rules.into_iter().fold(HashMap::new(), |mut acc, rule| {
            acc.entry(rule.state.trim().to_ascii_uppercase())
                .or_insert_with(Vec::new)
                .push(rule);
            acc
        });
        Self { by_state }
    }

    pub fn rules_for(&self, state: &str) -> &[StateRule] {
        self.by_state
            .get(&state.trim().to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rule for a state and anchor type
    pub fn rule(&self, state: &str, kind: RuleKind) -> Option<&StateRule> {
        self.rules_for(state).iter().find(|r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.by_state.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_state.is_empty()
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Outcome of an exclusion check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionCheck {
    NotExcluded,
    Excluded {
        reason: String,
        window_end: NaiveDate,
    },
}

impl ExclusionCheck {
    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Excluded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Excluded { reason, .. } => Some(reason),
            Self::NotExcluded => None,
        }
    }

    pub fn window_end(&self) -> Option<NaiveDate> {
        match self {
            Self::Excluded { window_end, .. } => Some(*window_end),
            Self::NotExcluded => None,
        }
    }
}

/// Decides whether a contact may be emailed on a date
#[derive(Debug, Clone)]
pub struct ExclusionEvaluator {
    rules: ExclusionRules,
    aep_ignores_exclusions: bool,
}

impl ExclusionEvaluator {
    pub fn new(rules: ExclusionRules) -> Self {
        Self {
            rules,
            aep_ignores_exclusions: false,
        }
    }

    /// Let AEP emails through active windows (organization policy)
    pub fn with_aep_exemption(mut self, exempt: bool) -> Self {
        self.aep_ignores_exclusions = exempt;
        self
    }

    pub fn rules(&self) -> &ExclusionRules {
        &self.rules
    }

    /// Check `date` against every rule of the contact's state
    ///
    /// Anchored windows are evaluated for the anniversary in the candidate
    /// year and both adjacent years, so windows straddling Jan 1 are caught.
    /// When several windows match, the one ending last is reported.
    pub fn check_exclusion_window(&self, contact: &Contact, date: NaiveDate) -> ExclusionCheck {
        let Some(state) = contact.state_code() else {
            return ExclusionCheck::NotExcluded;
        };

        let matches = self
            .rules
            .rules_for(state)
            .iter()
            .filter_map(|rule| Self::match_rule(rule, state, contact, date));

        matches
            .max_by_key(|(_, end)| *end)
            .map(|(reason, window_end)| ExclusionCheck::Excluded { reason, window_end })
            .unwrap_or(ExclusionCheck::NotExcluded)
    }

    fn match_rule(
        rule: &StateRule,
        state: &str,
        contact: &Contact,
        date: NaiveDate,
    ) -> Option<(String, NaiveDate)> {
        let anchor = match rule.kind {
            RuleKind::YearRound => {
                let end = NaiveDate::from_ymd_opt(date.year(), 12, 31)?;
                return Some((format!("Year-round exclusion for {state}"), end));
            }
            RuleKind::Birthday => contact.birth_date?,
            RuleKind::EffectiveDate => contact.effective_date?,
        };

        [date.year() - 1, date.year(), date.year() + 1]
            .into_iter()
            .find_map(|year| {
                let occurrence = anniversary_in_year(anchor, year);
                let center = if rule.use_month_start {
                    month_start(occurrence)
                } else {
                    occurrence
                };
                let start = add_days(center, -(rule.before_days + PRE_WINDOW_BUFFER_DAYS));
                let end = add_days(center, rule.after_days);
                (start <= date && date <= end).then(|| {
                    (
                        format!(
                            "{} exclusion window for {} ({} to {})",
                            rule.kind.as_str(),
                            state,
                            start,
                            end
                        ),
                        end,
                    )
                })
            })
    }

    /// Exclusion check with email-type exemptions applied
    pub fn exclusion_for_email(
        &self,
        contact: &Contact,
        email_type: &EmailType,
        date: NaiveDate,
    ) -> ExclusionCheck {
        let exempt = match email_type {
            EmailType::Anniversary {
                kind: AnniversaryKind::Aep,
            } => self.aep_ignores_exclusions,
            EmailType::Campaign {
                respect_exclusions, ..
            } => !respect_exclusions,
            _ => false,
        };
        if exempt {
            return ExclusionCheck::NotExcluded;
        }
        self.check_exclusion_window(contact, date)
    }

    pub fn should_skip_email(&self, contact: &Contact, email_type: &EmailType, date: NaiveDate) -> bool {
        self.exclusion_for_email(contact, email_type, date).is_excluded()
    }

    /// First eligible date after the window active on `today`, if any
    pub fn post_window_date(&self, contact: &Contact, today: NaiveDate) -> Option<NaiveDate> {
        let window_end = self.check_exclusion_window(contact, today).window_end()?;
        self.resume_date_after(contact, window_end)
    }

    /// First non-excluded day after `window_end`, following chained windows
    ///
    /// `None` when the contact never leaves exclusion (year-round states).
    pub fn resume_date_after(&self, contact: &Contact, window_end: NaiveDate) -> Option<NaiveDate> {
        let mut candidate = add_days(window_end, 1);
        for _ in 0..MAX_RESUME_HOPS {
            match self.check_exclusion_window(contact, candidate) {
                ExclusionCheck::NotExcluded => return Some(candidate),
                ExclusionCheck::Excluded { window_end, .. } => {
                    candidate = add_days(window_end, 1);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CampaignTypeConfig;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn evaluator(rules: Vec<StateRule>) -> ExclusionEvaluator {
        ExclusionEvaluator::new(ExclusionRules::new(rules))
    }

    fn birthday_contact(state: &str, birthday: NaiveDate) -> Contact {
        Contact::new(1, "a@example.com")
            .with_state(state)
            .with_birth_date(birthday)
    }

    #[test]
    fn test_buffered_pre_window_is_excluded() {
        let eval = evaluator(vec![StateRule::birthday("TX", 30, 10)]);
        let contact = birthday_contact("TX", date(2024, 6, 15));

        assert!(eval
            .check_exclusion_window(&contact, date(2024, 5, 20))
            .is_excluded());
        assert!(!eval
            .check_exclusion_window(&contact, date(2024, 7, 1))
            .is_excluded());
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let eval = evaluator(vec![StateRule::birthday("TX", 30, 10)]);
        let contact = birthday_contact("TX", date(1980, 6, 15));

        // 2024-06-15 - 90 days = 2024-03-17, + 10 days = 2024-06-25
        assert!(eval.check_exclusion_window(&contact, date(2024, 3, 17)).is_excluded());
        assert!(!eval.check_exclusion_window(&contact, date(2024, 3, 16)).is_excluded());
        let check = eval.check_exclusion_window(&contact, date(2024, 6, 25));
        assert_eq!(check.window_end(), Some(date(2024, 6, 25)));
        assert!(!eval.check_exclusion_window(&contact, date(2024, 6, 26)).is_excluded());
    }

    #[test]
    fn test_window_across_new_year() {
        let eval = evaluator(vec![StateRule::birthday("CA", 30, 60)]);
        let contact = birthday_contact("CA", date(1970, 1, 10));

        // Window around 2025-01-10 starts 2024-10-12
        let check = eval.check_exclusion_window(&contact, date(2024, 12, 1));
        assert!(check.is_excluded());
        assert_eq!(check.window_end(), Some(date(2025, 3, 11)));

        // After-side tail of the previous year's anniversary
        assert!(eval.check_exclusion_window(&contact, date(2025, 2, 20)).is_excluded());
    }

    #[test]
    fn test_month_start_anchor() {
        let eval = evaluator(vec![StateRule::birthday("NV", 0, 60).with_month_start()]);
        let contact = birthday_contact("NV", date(1960, 8, 25));

        // Anchored to 2024-08-01: window 2024-06-02 .. 2024-09-30
        assert!(eval.check_exclusion_window(&contact, date(2024, 6, 2)).is_excluded());
        assert!(!eval.check_exclusion_window(&contact, date(2024, 6, 1)).is_excluded());
        assert!(!eval.check_exclusion_window(&contact, date(2024, 10, 1)).is_excluded());
    }

    #[test]
    fn test_effective_date_rule() {
        let eval = evaluator(vec![StateRule::effective_date("MO", 30, 33)]);
        let contact = Contact::new(1, "a@example.com")
            .with_state("MO")
            .with_effective_date(date(2019, 4, 1));

        assert!(eval.check_exclusion_window(&contact, date(2024, 3, 1)).is_excluded());
        assert!(!eval.check_exclusion_window(&contact, date(2024, 6, 1)).is_excluded());
    }

    #[test]
    fn test_year_round_has_no_resume_date() {
        let eval = evaluator(default_state_rules());
        let contact = Contact::new(1, "a@example.com").with_state("NY");

        assert!(eval.check_exclusion_window(&contact, date(2024, 2, 2)).is_excluded());
        assert_eq!(eval.post_window_date(&contact, date(2024, 2, 2)), None);
    }

    #[test]
    fn test_no_state_or_no_rule_is_not_excluded() {
        let eval = evaluator(default_state_rules());
        let no_state = Contact::new(1, "a@example.com").with_birth_date(date(1970, 1, 1));
        let texas = birthday_contact("TX", date(1970, 1, 1));

        assert!(!eval.check_exclusion_window(&no_state, date(2024, 1, 1)).is_excluded());
        assert!(!eval.check_exclusion_window(&texas, date(2024, 1, 1)).is_excluded());
    }

    #[test]
    fn test_post_window_date() {
        let eval = evaluator(vec![StateRule::birthday("TX", 30, 10)]);
        let contact = birthday_contact("TX", date(1975, 6, 15));

        assert_eq!(
            eval.post_window_date(&contact, date(2024, 6, 1)),
            Some(date(2024, 6, 26))
        );
        assert_eq!(eval.post_window_date(&contact, date(2024, 8, 1)), None);
    }

    #[test]
    fn test_aep_exemption_is_configuration_driven() {
        let contact = Contact::new(1, "a@example.com").with_state("WA");
        let aep = EmailType::anniversary(AnniversaryKind::Aep);
        let day = date(2024, 9, 15);

        let strict = evaluator(default_state_rules());
        assert!(strict.should_skip_email(&contact, &aep, day));

        let lenient = evaluator(default_state_rules()).with_aep_exemption(true);
        assert!(!lenient.should_skip_email(&contact, &aep, day));
        assert!(lenient.should_skip_email(
            &contact,
            &EmailType::anniversary(AnniversaryKind::Birthday),
            day
        ));
    }

    #[test]
    fn test_campaign_without_exclusions_is_never_skipped() {
        let contact = Contact::new(1, "a@example.com").with_state("CT");
        let mut config = CampaignTypeConfig::new("initial_blast", 10);
        config.respect_exclusion_windows = false;

        let eval = evaluator(default_state_rules());
        assert!(!eval.should_skip_email(&contact, &config.email_type(1), date(2024, 5, 5)));
    }

    #[test]
    fn test_rule_lookup_is_case_insensitive() {
        let rules = ExclusionRules::new(default_state_rules());
        assert_eq!(rules.len(), 13);
        assert!(rules.rule("ca", RuleKind::Birthday).is_some());
        assert!(rules.rule("CA", RuleKind::EffectiveDate).is_none());
    }
}
