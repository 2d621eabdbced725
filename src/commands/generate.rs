use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use email_scheduler::models::{CampaignInstance, CampaignTypeConfig, Contact, ContactCampaign};
use email_scheduler::storage::SharedScheduleRepository;

/// Population-weighted state pool
const STATES: &[(&str, usize)] = &[
    ("CA", 12), ("TX", 9), ("FL", 7), ("NY", 6), ("PA", 4), ("IL", 4),
    ("OH", 3), ("GA", 3), ("NC", 3), ("MI", 3), ("NJ", 2), ("VA", 2),
    ("WA", 2), ("AZ", 2), ("MA", 2), ("TN", 2), ("IN", 2), ("MD", 2),
    ("MO", 2), ("WI", 2), ("CT", 1), ("OR", 1), ("KY", 1), ("OK", 1),
    ("NV", 1), ("ID", 1), ("AL", 1), ("SC", 1), ("LA", 1), ("UT", 1),
];

const CARRIERS: &[&str] = &["Anthem", "BCBS", "Humana", "Aetna", "UnitedHealth", "Cigna", "Kaiser"];

const INSERT_BATCH: usize = 10_000;

/// Build `count` synthetic contacts; the same seed always yields the same set
pub fn synthetic_contacts(count: usize, seed: u64) -> Vec<Contact> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let pool: Vec<&str> = STATES
        .iter()
        .flat_map(|(state, weight)| std::iter::repeat(*state).take(*weight))
        .collect();

    (1..=count as i64)
        .map(|id| {
            let birth = NaiveDate::from_ymd_opt(
                rng.gen_range(1940..=2000),
                rng.gen_range(1..=12),
                rng.gen_range(1..=28),
            );
            let effective = NaiveDate::from_ymd_opt(
                rng.gen_range(2019..=2023),
                rng.gen_range(1..=12),
                rng.gen_range(1..=28),
            );

            let mut contact = Contact::new(id, format!("contact{id}@test{}.com", rng.gen_range(1000..=9999)))
                .with_zip(format!("{:05}", rng.gen_range(10000..=99999)))
                .with_failed_underwriting(rng.gen_bool(0.15));
            // ~5% arrive without a state and rely on ZIP lookup
            if !rng.gen_bool(0.05) {
                if let Some(state) = pool.choose(&mut rng) {
                    contact = contact.with_state(*state);
                }
            }
            if let Some(carrier) = CARRIERS.choose(&mut rng) {
                contact = contact.with_carrier(*carrier);
            }
            if let Some(birth) = birth {
                contact = contact.with_birth_date(birth);
            }
            if let Some(effective) = effective {
                contact = contact.with_effective_date(effective);
            }
            contact
        })
        .collect()
}

/// Sample campaign types, two active instances and enrollments for the first 50 contacts
pub fn seed_sample_campaigns(repo: &SharedScheduleRepository, today: NaiveDate) -> Result<usize> {
    let rate_increase = CampaignTypeConfig {
        days_before_event: 14,
        ..CampaignTypeConfig::new("rate_increase", 1)
    };
    let seasonal_promo = CampaignTypeConfig {
        days_before_event: 7,
        ..CampaignTypeConfig::new("seasonal_promo", 5)
    };
    let initial_blast = CampaignTypeConfig {
        respect_exclusion_windows: false,
        enable_followups: false,
        target_all_contacts: true,
        ..CampaignTypeConfig::new("initial_blast", 10)
    };
    for campaign_type in [&rate_increase, &seasonal_promo, &initial_blast] {
        repo.upsert_campaign_type(campaign_type)
            .with_context(|| format!("Failed to store campaign type {}", campaign_type.name))?;
    }

    let active_end = today + Duration::days(90);
    let instance = |campaign_type: &str, name: &str, template: &str| CampaignInstance {
        campaign_type: campaign_type.to_string(),
        instance_name: name.to_string(),
        email_template: Some(format!("{template}_template")),
        sms_template: Some(format!("{template}_sms")),
        active_start_date: Some(today),
        active_end_date: Some(active_end),
        ..Default::default()
    };
    let rate_id = repo.upsert_campaign_instance(&instance("rate_increase", "rate_increase_sample", "rate_increase"))?;
    let promo_id = repo.upsert_campaign_instance(&instance("seasonal_promo", "seasonal_promo_sample", "seasonal_promo"))?;

    let trigger = today + Duration::days(30);
    let contacts = repo.get_all_contacts()?;
    let mut enrolled = 0;
    for (i, contact) in contacts.iter().take(50).enumerate() {
        let instance_id = if i < 25 { rate_id } else { promo_id };
        repo.enroll_contact(&ContactCampaign {
            contact_id: contact.id,
            campaign_instance_id: instance_id,
            trigger_date: Some(trigger),
            status: "pending".to_string(),
        })?;
        enrolled += 1;
    }
    Ok(enrolled)
}

pub async fn generate_contacts(
    repo: SharedScheduleRepository,
    count: usize,
    seed: u64,
    with_campaigns: bool,
    today: NaiveDate,
) -> Result<()> {
    println!("Generating {count} synthetic contacts (seed {seed})");

    let contacts = tokio::task::spawn_blocking(move || synthetic_contacts(count, seed))
        .await
        .context("Contact generation task failed")?;

    let mut written = 0;
    for chunk in contacts.chunks(INSERT_BATCH) {
        written += repo
            .upsert_contacts(chunk)
            .context("Failed to store generated contacts")?;
        tracing::debug!(written, total = contacts.len(), "Contacts stored");
    }
    println!("  Contacts stored: {written}");

    if with_campaigns {
        let enrolled = seed_sample_campaigns(&repo, today)?;
        println!("  Sample campaigns created, {enrolled} enrollments");
    }

    tracing::info!(count = written, seed, with_campaigns, "Synthetic contacts generated");
    Ok(())
}
