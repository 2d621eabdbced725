//! Behavior-driven follow-up generation
//!
//! Looks back over recently sent anniversary and campaign emails and plans
//! one follow-up per contact, choosing the tier from what the contact did
//! after the send: answered health questions, clicked, or nothing.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::calendar::add_days;
use super::context::{GenerationBatch, SchedulingContext};
use super::error::{SchedulerError, SchedulerResult};
use super::exclusion::ExclusionCheck;
use crate::models::{
    CampaignInstance, ContactInteractions, EmailSchedule, EmailType, FollowupKind, SentEmail,
};
use crate::storage::repository::ScheduleRepository;
use crate::storage::zip::ZipResolver;

/// Pick the follow-up tier for observed engagement
///
/// Health answers containing one of `medical_condition_flags` rank highest,
/// then any health answers, then clicks.
pub fn classify(interactions: &ContactInteractions, medical_condition_flags: &[String]) -> FollowupKind {
    if interactions.has_health_answers {
        let has_condition = interactions
            .answer_flags
            .iter()
            .any(|flag| medical_condition_flags.iter().any(|m| m.eq_ignore_ascii_case(flag)));
        if has_condition {
            FollowupKind::HqWithYes
        } else {
            FollowupKind::HqNoYes
        }
    } else if interactions.has_clicks {
        FollowupKind::ClickedNoHq
    } else {
        FollowupKind::Cold
    }
}

pub struct FollowupGenerator<'a> {
    ctx: &'a SchedulingContext,
    repo: &'a dyn ScheduleRepository,
    zip: Option<&'a dyn ZipResolver>,
}

impl<'a> FollowupGenerator<'a> {
    pub fn new(ctx: &'a SchedulingContext, repo: &'a dyn ScheduleRepository) -> Self {
        Self {
            ctx,
            repo,
            zip: None,
        }
    }

    pub fn with_zip_resolver(mut self, zip: &'a dyn ZipResolver) -> Self {
        self.zip = Some(zip);
        self
    }

    pub fn generate(&self) -> GenerationBatch {
        let settings = &self.ctx.followup;
        if !settings.enabled {
            return GenerationBatch::default();
        }

        let today = self.ctx.today;
        let lookback_start = add_days(today, -settings.lookback_days);

        let sent = match self.repo.get_sent_emails_for_followup(today, settings.lookback_days) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "Failed to load sent emails for follow-ups");
                return GenerationBatch::failed(SchedulerError::database(
                    "get_sent_emails_for_followup",
                    format!("{e:#}"),
                ));
            }
        };

        let already = match self.repo.get_contacts_with_followups(lookback_start) {
            Ok(ids) => ids,
            Err(e) => {
                return GenerationBatch::failed(SchedulerError::database(
                    "get_contacts_with_followups",
                    format!("{e:#}"),
                ))
            }
        };

        let mut batch = GenerationBatch::default();
        let mut instances: HashMap<i64, Option<CampaignInstance>> = HashMap::new();
        let mut followups_enabled: HashMap<String, bool> = HashMap::new();

        // Most recent qualifying email per contact
        let mut latest: BTreeMap<i64, SentEmail> = BTreeMap::new();
        for email in sent {
            if already.contains(&email.contact_id) {
                continue;
            }
            match self.qualifies(&email, &mut instances, &mut followups_enabled) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    batch.errors.push(e);
                    continue;
                }
            }
            let newer = latest.get(&email.contact_id).map_or(true, |current| {
                (email.sent_date, email.email_id) > (current.sent_date, current.email_id)
            });
            if newer {
                latest.insert(email.contact_id, email);
            }
        }

        for email in latest.values() {
            let instance = email
                .campaign_instance_id
                .and_then(|id| instances.get(&id).cloned().flatten());
            match self.followup_for(email, instance.as_ref()) {
                Ok(Some(schedule)) => batch.schedules.push(schedule),
                Ok(None) => {}
                Err(e) => batch.errors.push(e),
            }
        }

        info!(
            candidates = latest.len(),
            skipped_existing = already.len(),
            schedules = batch.schedules.len(),
            errors = batch.errors.len(),
            "Follow-up schedules generated"
        );
        batch
    }

    /// Anniversary emails always qualify; campaign emails need `enable_followups`
    fn qualifies(
        &self,
        email: &SentEmail,
        instances: &mut HashMap<i64, Option<CampaignInstance>>,
        followups_enabled: &mut HashMap<String, bool>,
    ) -> SchedulerResult<bool> {
        if let Some(email_type) = EmailType::parse_simple(&email.email_type) {
            return Ok(email_type.is_anniversary());
        }
        let Some(instance_id) = email.campaign_instance_id else {
            return Ok(false);
        };

        if !instances.contains_key(&instance_id) {
            let instance = self
                .repo
                .get_campaign_instance(instance_id)
                .map_err(|e| SchedulerError::database("get_campaign_instance", format!("{e:#}")))?;
            instances.insert(instance_id, instance);
        }
        let Some(Some(instance)) = instances.get(&instance_id) else {
            return Ok(false);
        };

        if let Some(enabled) = followups_enabled.get(&instance.campaign_type) {
            return Ok(*enabled);
        }
        let enabled = self
            .repo
            .get_campaign_type_config(&instance.campaign_type)
            .map_err(|e| SchedulerError::database("get_campaign_type_config", format!("{e:#}")))?
            .is_some_and(|config| config.enable_followups);
        followups_enabled.insert(instance.campaign_type.clone(), enabled);
        Ok(enabled)
    }

    fn followup_for(
        &self,
        email: &SentEmail,
        instance: Option<&CampaignInstance>,
    ) -> SchedulerResult<Option<EmailSchedule>> {
        let Some(mut contact) = self
            .repo
            .get_contact(email.contact_id)
            .map_err(|e| SchedulerError::database("get_contact", format!("{e:#}")))?
        else {
            debug!(contact_id = email.contact_id, "Sent email for unknown contact");
            return Ok(None);
        };
        if contact.state_code().is_none() {
            if let (Some(zip), Some(resolver)) = (contact.zip_code.clone(), self.zip) {
                contact.state = resolver.state_for_zip(&zip);
            }
        }

        let interactions = self
            .repo
            .get_contact_interactions(email.contact_id, email.sent_date)
            .map_err(|e| SchedulerError::database("get_contact_interactions", format!("{e:#}")))?;
        let kind = classify(&interactions, &self.ctx.followup.medical_condition_flags);

        let date = self.followup_date(email.sent_date);
        let (email_template, sms_template) = instance
            .map(|i| i.followup_template(kind))
            .unwrap_or((None, None));

        let mut schedule = EmailSchedule::new(
            contact.id,
            EmailType::followup(kind),
            date,
            self.ctx.send_time,
            self.ctx.run_id.as_str(),
        )
        .with_templates(email_template, sms_template);
        schedule.campaign_instance_id = email.campaign_instance_id;

        let schedule = match self
            .ctx
            .exclusions
            .exclusion_for_email(&contact, &schedule.email_type, date)
        {
            ExclusionCheck::NotExcluded => schedule,
            ExclusionCheck::Excluded { reason, .. } => schedule.skip(reason),
        };

        debug!(
            contact_id = contact.id,
            followup = kind.as_str(),
            date = %schedule.scheduled_date,
            status = schedule.status.as_str(),
            "Follow-up planned"
        );
        Ok(Some(schedule))
    }

    /// Sent date plus the delay, never earlier than tomorrow
    fn followup_date(&self, sent_date: NaiveDate) -> NaiveDate {
        let target = add_days(sent_date, self.ctx.followup.delay_days);
        if target <= self.ctx.today {
            add_days(self.ctx.today, 1)
        } else {
            target
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{CampaignTypeConfig, Contact};
    use crate::storage::repository::MockScheduleRepository;
    use chrono::NaiveTime;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn context(config: &Config) -> SchedulingContext {
        SchedulingContext::new(config, date(2024, 6, 10), 1000)
            .unwrap()
            .with_run_id("run-test")
    }

    fn sent(email_id: i64, contact_id: i64, email_type: &str, day: NaiveDate) -> SentEmail {
        SentEmail {
            email_id,
            contact_id,
            email_type: email_type.to_string(),
            sent_date: day,
            campaign_instance_id: None,
        }
    }

    fn seeded_repo() -> MockScheduleRepository {
        let repo = MockScheduleRepository::new();
        repo.upsert_contacts(&(1..=4).map(|id| Contact::new(id, format!("c{id}@example.com"))).collect::<Vec<_>>())
            .unwrap();
        repo
    }

    #[test]
    fn test_classify_tiers() {
        let flags = vec!["has_medical_conditions".to_string()];
        let cold = ContactInteractions::default();
        let clicked = ContactInteractions {
            has_clicks: true,
            ..Default::default()
        };
        let answered = ContactInteractions {
            has_clicks: true,
            has_health_answers: true,
            answer_flags: vec!["smoker".to_string()],
        };
        let condition = ContactInteractions {
            has_health_answers: true,
            answer_flags: vec!["has_medical_conditions".to_string()],
            ..Default::default()
        };

        assert_eq!(classify(&cold, &flags), FollowupKind::Cold);
        assert_eq!(classify(&clicked, &flags), FollowupKind::ClickedNoHq);
        assert_eq!(classify(&answered, &flags), FollowupKind::HqNoYes);
        assert_eq!(classify(&condition, &flags), FollowupKind::HqWithYes);
        assert_eq!(classify(&condition, &[]), FollowupKind::HqNoYes);
    }

    #[test]
    fn test_followup_tiers_and_dates() {
        let repo = seeded_repo();
        repo.record_sent_email(&sent(1, 1, "birthday", date(2024, 6, 9))).unwrap();
        repo.record_sent_email(&sent(2, 2, "effective_date", date(2024, 6, 1))).unwrap();
        repo.record_click(2, date(2024, 6, 2)).unwrap();

        let ctx = context(&Config::default());
        let batch = FollowupGenerator::new(&ctx, &repo).generate();

        assert!(batch.errors.is_empty());
        assert_eq!(batch.schedules.len(), 2);

        let first = &batch.schedules[0];
        assert_eq!(first.contact_id, 1);
        assert_eq!(first.email_type, EmailType::followup(FollowupKind::Cold));
        assert_eq!(first.scheduled_date, date(2024, 6, 11));
        assert_eq!(first.priority, 4);

        let second = &batch.schedules[1];
        assert_eq!(second.email_type, EmailType::followup(FollowupKind::ClickedNoHq));
        // 2024-06-03 is already past, so tomorrow
        assert_eq!(second.scheduled_date, date(2024, 6, 11));
        assert_eq!(second.template_id.as_deref(), Some("followup_clicked_template"));
    }

    #[test]
    fn test_one_followup_per_contact() {
        let repo = seeded_repo();
        repo.record_sent_email(&sent(1, 1, "birthday", date(2024, 5, 20))).unwrap();
        repo.record_sent_email(&sent(2, 1, "aep", date(2024, 6, 9))).unwrap();

        let ctx = context(&Config::default());
        let batch = FollowupGenerator::new(&ctx, &repo).generate();

        assert_eq!(batch.schedules.len(), 1);
        assert_eq!(batch.schedules[0].scheduled_date, date(2024, 6, 11));
    }

    #[test]
    fn test_existing_followup_is_not_duplicated() {
        let repo = seeded_repo();
        repo.record_sent_email(&sent(1, 1, "birthday", date(2024, 6, 9))).unwrap();
        repo.persist_schedules(&[EmailSchedule::new(
            1,
            EmailType::followup(FollowupKind::Cold),
            date(2024, 6, 11),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            "earlier-run",
        )])
        .unwrap();

        let ctx = context(&Config::default());
        assert!(FollowupGenerator::new(&ctx, &repo).generate().schedules.is_empty());
    }

    #[test]
    fn test_campaign_followups_respect_type_flag() {
        let repo = seeded_repo();
        let mut quiet = CampaignTypeConfig::new("initial_blast", 10);
        quiet.enable_followups = false;
        let loud = CampaignTypeConfig::new("rate_increase", 1);
        repo.upsert_campaign_type(&quiet).unwrap();
        repo.upsert_campaign_type(&loud).unwrap();
        let quiet_id = repo
            .upsert_campaign_instance(&CampaignInstance {
                campaign_type: "initial_blast".to_string(),
                instance_name: "blast".to_string(),
                ..Default::default()
            })
            .unwrap();
        let loud_id = repo
            .upsert_campaign_instance(&CampaignInstance {
                campaign_type: "rate_increase".to_string(),
                instance_name: "q2".to_string(),
                metadata: Some(serde_json::json!({
                    "followup_templates": {"followup_1_cold": {"email": "ri_cold", "sms": "ri_cold_sms"}}
                })),
                ..Default::default()
            })
            .unwrap();

        let mut a = sent(1, 1, "campaign_initial_blast", date(2024, 6, 9));
        a.campaign_instance_id = Some(quiet_id);
        let mut b = sent(2, 2, "campaign_rate_increase", date(2024, 6, 9));
        b.campaign_instance_id = Some(loud_id);
        repo.record_sent_email(&a).unwrap();
        repo.record_sent_email(&b).unwrap();

        let ctx = context(&Config::default());
        let batch = FollowupGenerator::new(&ctx, &repo).generate();

        assert_eq!(batch.schedules.len(), 1);
        let s = &batch.schedules[0];
        assert_eq!(s.contact_id, 2);
        assert_eq!(s.template_id.as_deref(), Some("ri_cold"));
        assert_eq!(s.sms_template_id.as_deref(), Some("ri_cold_sms"));
        assert_eq!(s.campaign_instance_id, Some(loud_id));
        assert!(!s.email_type.is_campaign());
    }

    #[test]
    fn test_followup_in_exclusion_window_is_skipped() {
        let repo = MockScheduleRepository::new();
        repo.upsert_contacts(&[Contact::new(1, "a@example.com").with_state("WA")])
            .unwrap();
        repo.record_sent_email(&sent(1, 1, "birthday", date(2024, 6, 9))).unwrap();

        let ctx = context(&Config::default());
        let batch = FollowupGenerator::new(&ctx, &repo).generate();
        assert!(batch.schedules[0].status.is_skipped());
    }

    #[test]
    fn test_disabled_followups() {
        let repo = seeded_repo();
        repo.record_sent_email(&sent(1, 1, "birthday", date(2024, 6, 9))).unwrap();
        let mut config = Config::default();
        config.followup.enabled = false;

        let ctx = context(&config);
        assert!(FollowupGenerator::new(&ctx, &repo).generate().schedules.is_empty());
    }
}
