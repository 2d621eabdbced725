//! Anniversary schedule generation
//!
//! Produces the yearly recurring emails for one contact: birthday, policy
//! effective date, annual enrollment period (AEP) and, when a compliance
//! window blocks any of those, a single post-window catch-up email.
//!
//! Generation is a pure function of the contact and the run context, so
//! contact batches can be processed on any thread in any order.

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use super::calendar::{add_days, months_since, next_anniversary};
use super::context::SchedulingContext;
use super::exclusion::ExclusionCheck;
use crate::models::{AnniversaryKind, Contact, EmailSchedule, EmailType};

pub struct AnniversaryGenerator<'a> {
    ctx: &'a SchedulingContext,
}

impl<'a> AnniversaryGenerator<'a> {
    pub fn new(ctx: &'a SchedulingContext) -> Self {
        Self { ctx }
    }

    /// All anniversary schedules for one contact
    pub fn generate(&self, contact: &Contact) -> Vec<EmailSchedule> {
        let org = &self.ctx.organization;
        let today = self.ctx.today;

        if org.exclude_failed_underwriting_global && contact.failed_underwriting {
            debug!(contact_id = contact.id, "Failed underwriting, no anniversary emails");
            return Vec::new();
        }

        let mut schedules = Vec::with_capacity(4);
        let mut blocked_until: Option<NaiveDate> = None;

        if let Some(birthday) = contact.birth_date {
            let event = next_anniversary(today, birthday);
            let date = add_days(event, -org.birthday_days_before);
            let (schedule, window_end) =
                self.checked(contact, AnniversaryKind::Birthday, date, event.year());
            schedules.push(schedule);
            blocked_until = blocked_until.max(window_end);
        }

        if let Some(effective) = contact.effective_date {
            if months_since(effective, today) >= org.min_months_before_first_email {
                let event = next_anniversary(today, effective);
                let date = add_days(event, -org.effective_date_days_before);
                let (schedule, window_end) =
                    self.checked(contact, AnniversaryKind::EffectiveDate, date, event.year());
                schedules.push(schedule);
                blocked_until = blocked_until.max(window_end);
            } else {
                debug!(
                    contact_id = contact.id,
                    %effective,
                    "Policy too recent for an effective date email"
                );
            }
        }

        if today.month() == org.aep_month {
            if let Some(date) = NaiveDate::from_ymd_opt(today.year(), org.aep_month, org.aep_day) {
                let (schedule, window_end) =
                    self.checked(contact, AnniversaryKind::Aep, date, today.year());
                schedules.push(schedule);
                blocked_until = blocked_until.max(window_end);
            }
        }

        let post_window = self
            .ctx
            .exclusions
            .post_window_date(contact, today)
            .or_else(|| {
                blocked_until.and_then(|end| self.ctx.exclusions.resume_date_after(contact, end))
            });

        if let Some(date) = post_window {
            schedules.push(
                self.schedule(contact, AnniversaryKind::PostWindow, date)
                    .with_event_year(date.year()),
            );
        }

        schedules
    }

    /// Generate for a slice of contacts, preserving input order
    pub fn generate_batch(&self, contacts: &[Contact]) -> Vec<EmailSchedule> {
        contacts.iter().flat_map(|c| self.generate(c)).collect()
    }

    fn schedule(&self, contact: &Contact, kind: AnniversaryKind, date: NaiveDate) -> EmailSchedule {
        EmailSchedule::new(
            contact.id,
            EmailType::anniversary(kind),
            date,
            self.ctx.send_time,
            self.ctx.run_id.as_str(),
        )
    }

    /// Build a schedule and apply the exclusion check; returns the blocking window end
    fn checked(
        &self,
        contact: &Contact,
        kind: AnniversaryKind,
        date: NaiveDate,
        event_year: i32,
    ) -> (EmailSchedule, Option<NaiveDate>) {
        let schedule = self.schedule(contact, kind, date).with_event_year(event_year);
        match self
            .ctx
            .exclusions
            .exclusion_for_email(contact, &schedule.email_type, date)
        {
            ExclusionCheck::NotExcluded => (schedule, None),
            ExclusionCheck::Excluded { reason, window_end } => {
                debug!(contact_id = contact.id, email_type = kind.as_str(), %reason, "Excluded");
                (schedule.skip(reason), Some(window_end))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::ScheduleStatus;
    use crate::scheduler::exclusion::StateRule;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn context(config: &Config, today: NaiveDate) -> SchedulingContext {
        SchedulingContext::new(config, today, 1000)
            .unwrap()
            .with_run_id("run-test")
    }

    fn find(schedules: &[EmailSchedule], kind: AnniversaryKind) -> Option<&EmailSchedule> {
        schedules
            .iter()
            .find(|s| s.email_type == EmailType::anniversary(kind))
    }

    #[test]
    fn test_birthday_scenario() {
        let ctx = context(&Config::default(), date(2024, 6, 5));
        let contact = Contact::new(1, "a@example.com").with_birth_date(date(1990, 6, 15));

        let schedules = AnniversaryGenerator::new(&ctx).generate(&contact);
        let birthday = find(&schedules, AnniversaryKind::Birthday).unwrap();

        assert_eq!(birthday.scheduled_date, date(2024, 6, 1));
        assert_eq!(birthday.status, ScheduleStatus::PreScheduled);
        assert_eq!(birthday.priority, 10);
        assert_eq!(birthday.event_year, Some(2024));
        assert_eq!(birthday.run_id, "run-test");
        assert!(find(&schedules, AnniversaryKind::PostWindow).is_none());
    }

    #[test]
    fn test_failed_underwriting_global_exclusion() {
        let mut config = Config::default();
        config.organization.exclude_failed_underwriting_global = true;
        let ctx = context(&config, date(2024, 9, 5));
        let contact = Contact::new(1, "a@example.com")
            .with_birth_date(date(1990, 6, 15))
            .with_failed_underwriting(true);

        assert!(AnniversaryGenerator::new(&ctx).generate(&contact).is_empty());
    }

    #[test]
    fn test_effective_date_requires_minimum_tenure() {
        let mut config = Config::default();
        config.organization.min_months_before_first_email = 11;
        let ctx = context(&config, date(2024, 6, 5));

        let fresh = Contact::new(1, "a@example.com").with_effective_date(date(2024, 1, 10));
        let seasoned = Contact::new(2, "b@example.com").with_effective_date(date(2020, 8, 1));

        let generator = AnniversaryGenerator::new(&ctx);
        assert!(find(&generator.generate(&fresh), AnniversaryKind::EffectiveDate).is_none());

        let schedules = generator.generate(&seasoned);
        let ed = find(&schedules, AnniversaryKind::EffectiveDate).unwrap();
        assert_eq!(ed.scheduled_date, date(2024, 7, 2));
        assert_eq!(ed.priority, 20);
    }

    #[test]
    fn test_aep_only_in_aep_month() {
        let config = Config::default();
        let contact = Contact::new(1, "a@example.com");

        let september = context(&config, date(2024, 9, 2));
        let schedules = AnniversaryGenerator::new(&september).generate(&contact);
        let aep = find(&schedules, AnniversaryKind::Aep).unwrap();
        assert_eq!(aep.scheduled_date, date(2024, 9, 15));

        let october = context(&config, date(2024, 10, 2));
        assert!(AnniversaryGenerator::new(&october).generate(&contact).is_empty());
    }

    #[test]
    fn test_excluded_birthday_gets_post_window() {
        let mut config = Config::default();
        config.state_rules = vec![StateRule::birthday("TX", 30, 10)];
        let ctx = context(&config, date(2024, 3, 1));
        let contact = Contact::new(1, "a@example.com")
            .with_state("TX")
            .with_birth_date(date(1980, 6, 15));

        let schedules = AnniversaryGenerator::new(&ctx).generate(&contact);

        let birthday = find(&schedules, AnniversaryKind::Birthday).unwrap();
        assert!(birthday.status.is_skipped());
        assert!(birthday
            .status
            .skip_reason()
            .unwrap()
            .contains("birthday exclusion window for TX"));

        let post = find(&schedules, AnniversaryKind::PostWindow).unwrap();
        assert_eq!(post.scheduled_date, date(2024, 6, 26));
        assert!(post.is_pre_scheduled());
        assert_eq!(post.priority, 40);
    }

    #[test]
    fn test_year_round_state_has_no_post_window() {
        let ctx = context(&Config::default(), date(2024, 3, 1));
        let contact = Contact::new(1, "a@example.com")
            .with_state("NY")
            .with_birth_date(date(1980, 6, 15));

        let schedules = AnniversaryGenerator::new(&ctx).generate(&contact);
        assert_eq!(schedules.len(), 1);
        assert!(schedules[0].status.is_skipped());
    }

    #[test]
    fn test_batch_preserves_order() {
        let ctx = context(&Config::default(), date(2024, 6, 5));
        let contacts = vec![
            Contact::new(2, "b@example.com").with_birth_date(date(1970, 1, 1)),
            Contact::new(1, "a@example.com").with_birth_date(date(1970, 2, 1)),
        ];

        let schedules = AnniversaryGenerator::new(&ctx).generate_batch(&contacts);
        let ids: Vec<i64> = schedules.iter().map(|s| s.contact_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
