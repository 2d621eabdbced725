//! Common test utilities

use chrono::{Datelike, Duration, NaiveDate};
use email_scheduler::models::{CampaignInstance, CampaignTypeConfig, Contact, ContactCampaign};
use email_scheduler::storage::ScheduleRepository;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// States cycled through the test population; `None` leaves only a ZIP code
const STATES: [Option<&str>; 9] = [
    Some("TX"),
    Some("CA"),
    Some("NY"),
    Some("MO"),
    Some("NV"),
    Some("AZ"),
    Some("FL"),
    Some("OR"),
    None,
];

/// Deterministic contact population with spread-out anniversaries
pub fn contact_population(count: i64) -> Vec<Contact> {
    (1..=count)
        .map(|id| {
            let mut contact = Contact::new(id, format!("contact{id}@example.com"))
                .with_zip("90210")
                .with_birth_date(date(
                    1950 + (id % 40) as i32,
                    1 + (id % 12) as u32,
                    1 + (id % 28) as u32,
                ))
                .with_effective_date(date(
                    2015 + (id % 8) as i32,
                    1 + ((id * 7) % 12) as u32,
                    1 + ((id * 3) % 28) as u32,
                ))
                .with_carrier(if id % 2 == 0 { "Aetna" } else { "Humana" });
            if let Some(state) = STATES[(id as usize) % STATES.len()] {
                contact = contact.with_state(state);
            }
            contact
        })
        .collect()
}

/// Two enrollment campaigns and one all-contact campaign, active on `today`
#[allow(dead_code)]
pub fn seed_campaigns(repo: &dyn ScheduleRepository, today: NaiveDate, enrolled: &[i64]) -> (i64, i64) {
    repo.upsert_campaign_type(&CampaignTypeConfig {
        days_before_event: 14,
        ..CampaignTypeConfig::new("rate_increase", 1)
    })
    .unwrap();
    repo.upsert_campaign_type(&CampaignTypeConfig {
        target_all_contacts: true,
        spread_evenly: true,
        respect_exclusion_windows: false,
        enable_followups: false,
        ..CampaignTypeConfig::new("initial_blast", 10)
    })
    .unwrap();

    let rate_id = repo
        .upsert_campaign_instance(&CampaignInstance {
            campaign_type: "rate_increase".to_string(),
            instance_name: "rate_increase_test".to_string(),
            email_template: Some("rate_increase_template".to_string()),
            active_start_date: Some(today),
            active_end_date: Some(date(2030, 1, 1)),
            ..Default::default()
        })
        .unwrap();
    let blast_id = repo
        .upsert_campaign_instance(&CampaignInstance {
            campaign_type: "initial_blast".to_string(),
            instance_name: "blast_test".to_string(),
            active_start_date: Some(today),
            active_end_date: Some(date(2030, 1, 1)),
            spread_start_date: Some(today),
            spread_end_date: Some(date(today.year(), 12, 31)),
            ..Default::default()
        })
        .unwrap();

    for contact_id in enrolled {
        repo.enroll_contact(&ContactCampaign {
            contact_id: *contact_id,
            campaign_instance_id: rate_id,
            trigger_date: Some(today + Duration::days(30)),
            status: "pending".to_string(),
        })
        .unwrap();
    }
    (rate_id, blast_id)
}
