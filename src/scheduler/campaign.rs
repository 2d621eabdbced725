//! Campaign schedule generation
//!
//! Each active campaign instance reaches either every contact (campaign
//! types with `target_all_contacts`) or the contacts enrolled in it. Contacts
//! that fail validation are reported as errors and left out; everything else
//! yields exactly one schedule per (contact, instance, trigger).

use std::cell::OnceCell;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::calendar::{add_days, spread_date};
use super::context::{GenerationBatch, SchedulingContext};
use super::error::{SchedulerError, SchedulerResult};
use super::exclusion::ExclusionCheck;
use crate::models::{CampaignInstance, CampaignTypeConfig, Contact, EmailSchedule};
use crate::storage::repository::ScheduleRepository;
use crate::storage::zip::ZipResolver;

/// Campaign type exempt from the organization-wide underwriting exclusion
pub const AEP_CAMPAIGN_TYPE: &str = "aep";

pub struct CampaignGenerator<'a> {
    ctx: &'a SchedulingContext,
    repo: &'a dyn ScheduleRepository,
    zip: Option<&'a dyn ZipResolver>,
    windowed: bool,
    everyone: OnceCell<Vec<Contact>>,
}

impl<'a> CampaignGenerator<'a> {
    pub fn new(ctx: &'a SchedulingContext, repo: &'a dyn ScheduleRepository) -> Self {
        Self {
            ctx,
            repo,
            zip: None,
            windowed: false,
            everyone: OnceCell::new(),
        }
    }

    /// The run's contact set is a window, so all-contact campaigns load
    /// the full contact table instead of using it
    pub fn with_windowed_contacts(mut self, windowed: bool) -> Self {
        self.windowed = windowed;
        self
    }

    /// Resolve missing states of contacts this generator loads itself
    pub fn with_zip_resolver(mut self, zip: &'a dyn ZipResolver) -> Self {
        self.zip = Some(zip);
        self
    }

    /// Generate schedules for every instance active today
    ///
    /// `contacts` is the run's contact set, used by all-contact campaigns
    /// unless the run is windowed.
    pub fn generate(&self, contacts: &[Contact]) -> GenerationBatch {
        let instances = match self.repo.get_active_campaign_instances(self.ctx.today) {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Failed to load active campaign instances");
                return GenerationBatch::failed(SchedulerError::database(
                    "get_active_campaign_instances",
                    format!("{e:#}"),
                ));
            }
        };

        let batch = instances
            .iter()
            .map(|instance| self.generate_instance(instance, contacts))
            .fold(GenerationBatch::default(), GenerationBatch::merge);

        info!(
            instances = instances.len(),
            schedules = batch.schedules.len(),
            errors = batch.errors.len(),
            "Campaign schedules generated"
        );
        batch
    }

    /// Generate schedules for one instance
    pub fn generate_instance(&self, instance: &CampaignInstance, contacts: &[Contact]) -> GenerationBatch {
        let config = match self.repo.get_campaign_type_config(&instance.campaign_type) {
            Ok(Some(config)) => config,
            Ok(None) => {
                warn!(
                    instance_id = instance.id,
                    campaign_type = %instance.campaign_type,
                    "Unknown campaign type"
                );
                return GenerationBatch::failed(SchedulerError::database(
                    "get_campaign_type_config",
                    format!(
                        "no campaign type '{}' for instance {}",
                        instance.campaign_type, instance.id
                    ),
                ));
            }
            Err(e) => {
                return GenerationBatch::failed(SchedulerError::database(
                    "get_campaign_type_config",
                    format!("{e:#}"),
                ))
            }
        };

        let eligible: Vec<(Contact, Option<NaiveDate>, bool)> = if config.target_all_contacts {
            match self.audience(contacts) {
                Ok(audience) => audience.iter().map(|c| (c.clone(), None, false)).collect(),
                Err(e) => return GenerationBatch::failed(e),
            }
        } else {
            match self.repo.get_contacts_for_campaign(instance.id) {
                Ok(enrolled) => enrolled
                    .into_iter()
                    .map(|e| (self.with_state(e.contact), e.trigger_date, true))
                    .collect(),
                Err(e) => {
                    return GenerationBatch::failed(SchedulerError::database(
                        "get_contacts_for_campaign",
                        format!("{e:#}"),
                    ))
                }
            }
        };

        let batch = eligible
            .iter()
            .fold(GenerationBatch::default(), |mut acc, (contact, trigger, enrolled)| {
                match self.schedule_for(instance, &config, contact, *trigger, *enrolled) {
                    Ok(Some(schedule)) => acc.schedules.push(schedule),
                    Ok(None) => {}
                    Err(e) => {
                        debug!(contact_id = contact.id, instance_id = instance.id, error = %e, "Contact rejected");
                        acc.errors.push(e);
                    }
                }
                acc
            });

        debug!(
            instance_id = instance.id,
            campaign_type = %config.name,
            eligible = eligible.len(),
            schedules = batch.schedules.len(),
            "Campaign instance processed"
        );
        batch
    }

    /// Contacts reached by an all-contact campaign, loaded at most once
    fn audience<'c>(&'c self, run_contacts: &'c [Contact]) -> SchedulerResult<&'c [Contact]> {
        if !self.windowed {
            return Ok(run_contacts);
        }
        if let Some(everyone) = self.everyone.get() {
            return Ok(everyone.as_slice());
        }
        let everyone: Vec<Contact> = self
            .repo
            .get_all_contacts()
            .map_err(|e| SchedulerError::database("get_all_contacts", format!("{e:#}")))?
            .into_iter()
            .map(|contact| self.with_state(contact))
            .collect();
        debug!(contacts = everyone.len(), "Loaded full contact set for all-contact campaigns");
        Ok(self.everyone.get_or_init(|| everyone).as_slice())
    }

    fn with_state(&self, mut contact: Contact) -> Contact {
        if contact.state_code().is_none() {
            if let (Some(zip), Some(resolver)) = (contact.zip_code.as_deref(), self.zip) {
                contact.state = resolver.state_for_zip(zip);
            }
        }
        contact
    }

    fn schedule_for(
        &self,
        instance: &CampaignInstance,
        config: &CampaignTypeConfig,
        contact: &Contact,
        trigger: Option<NaiveDate>,
        enrolled: bool,
    ) -> SchedulerResult<Option<EmailSchedule>> {
        if contact.email.trim().is_empty() {
            return Err(SchedulerError::invalid_contact(contact.id, "missing email address"));
        }

        if instance.has_targeting() {
            if !contact.has_location() {
                return Err(SchedulerError::invalid_contact(
                    contact.id,
                    format!("no resolvable state for targeted campaign instance {}", instance.id),
                ));
            }
            if !instance.targets(contact) {
                if !enrolled {
                    return Ok(None);
                }
                return Err(SchedulerError::invalid_contact(
                    contact.id,
                    format!("outside the targeting of campaign instance {}", instance.id),
                ));
            }
        } else if !contact.has_location() && !self.ctx.organization.send_without_location_for_universal
        {
            return Err(SchedulerError::invalid_contact(
                contact.id,
                "no location data and universal sends require one",
            ));
        }

        let email_type = config.email_type(instance.id);

        if let Some(reason) = self.underwriting_exclusion(config, contact) {
            let schedule = EmailSchedule::new(
                contact.id,
                email_type,
                self.ctx.today,
                self.ctx.send_time,
                self.ctx.run_id.as_str(),
            )
            .with_templates(instance.email_template.clone(), instance.sms_template.clone());
            return Ok(Some(schedule.skip(reason)));
        }

        let date = self.send_date(instance, config, contact, trigger);
        let schedule = EmailSchedule::new(
            contact.id,
            email_type,
            date,
            self.ctx.send_time,
            self.ctx.run_id.as_str(),
        )
        .with_templates(instance.email_template.clone(), instance.sms_template.clone());

        let schedule = match self
            .ctx
            .exclusions
            .exclusion_for_email(contact, &schedule.email_type, date)
        {
            ExclusionCheck::NotExcluded => schedule,
            ExclusionCheck::Excluded { reason, .. } => schedule.skip(reason),
        };
        Ok(Some(schedule))
    }

    /// Failed-underwriting exclusion, organization policy first
    fn underwriting_exclusion(&self, config: &CampaignTypeConfig, contact: &Contact) -> Option<String> {
        if !contact.failed_underwriting {
            return None;
        }
        if self.ctx.organization.exclude_failed_underwriting_global && config.name != AEP_CAMPAIGN_TYPE
        {
            return Some("Failed underwriting - global exclusion".to_string());
        }
        if config.skip_failed_underwriting {
            return Some(format!("Failed underwriting - excluded from {} campaign", config.name));
        }
        None
    }

    fn send_date(
        &self,
        instance: &CampaignInstance,
        config: &CampaignTypeConfig,
        contact: &Contact,
        trigger: Option<NaiveDate>,
    ) -> NaiveDate {
        if config.spread_evenly {
            if let (Some(start), Some(end)) = (instance.spread_start_date, instance.spread_end_date) {
                return spread_date(contact.id, start, end);
            }
        }
        add_days(trigger.unwrap_or(self.ctx.today), config.days_before_event)
    }
}
