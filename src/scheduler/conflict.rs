//! Campaign priority conflicts
//!
//! A contact gets at most one campaign email per day. When several
//! pre-scheduled campaigns land on the same `(contact, date)`, the lowest
//! priority value wins and the rest are skipped. Anniversary and follow-up
//! emails are untouched except for exact duplicates.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::models::EmailSchedule;

#[derive(Debug, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, schedules: Vec<EmailSchedule>) -> Vec<EmailSchedule> {
        let mut skip_reasons: Vec<Option<String>> = vec![None; schedules.len()];

        let mut campaigns: BTreeMap<(i64, NaiveDate), Vec<usize>> = BTreeMap::new();
        let mut seen: HashSet<(i64, String, NaiveDate)> = HashSet::new();

        for (idx, schedule) in schedules.iter().enumerate() {
            if !schedule.is_pre_scheduled() {
                continue;
            }
            if schedule.email_type.is_campaign() {
                campaigns
                    .entry((schedule.contact_id, schedule.scheduled_date))
                    .or_default()
                    .push(idx);
            } else if !seen.insert(schedule.upsert_key()) {
                skip_reasons[idx] = Some(format!(
                    "Duplicate {} on {} for contact {}",
                    schedule.email_type.key(),
                    schedule.scheduled_date,
                    schedule.contact_id
                ));
            }
        }

        let mut conflicts = 0usize;
        for ((contact_id, date), mut indices) in campaigns {
            if indices.len() < 2 {
                continue;
            }
            indices.sort_by_cached_key(|&i| (schedules[i].priority, schedules[i].email_type.key(), i));

            let winner = &schedules[indices[0]];
            debug!(
                contact_id,
                date = %date,
                winner = %winner.email_type.key(),
                losers = indices.len() - 1,
                "Campaign conflict resolved"
            );
            for &i in &indices[1..] {
                skip_reasons[i] = Some(format!(
                    "Campaign priority conflict on {date} for contact {contact_id}"
                ));
                conflicts += 1;
            }
        }

        let duplicates = skip_reasons.iter().flatten().count() - conflicts;
        info!(conflicts, duplicates, "Campaign conflicts resolved");

        schedules
            .into_iter()
            .zip(skip_reasons)
            .map(|(s, reason)| match reason {
                Some(reason) => s.skip(reason),
                None => s,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnniversaryKind, EmailType};
    use chrono::NaiveTime;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn campaign(contact_id: i64, name: &str, instance_id: i64, priority: i32, day: NaiveDate) -> EmailSchedule {
        EmailSchedule::new(
            contact_id,
            EmailType::Campaign {
                campaign_type: name.to_string(),
                instance_id,
                respect_exclusions: true,
                days_before_event: 0,
                priority,
            },
            day,
            NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            "run",
        )
    }

    fn birthday(contact_id: i64, day: NaiveDate) -> EmailSchedule {
        EmailSchedule::new(
            contact_id,
            EmailType::anniversary(AnniversaryKind::Birthday),
            day,
            NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            "run",
        )
    }

    #[test]
    fn test_lowest_priority_value_wins() {
        let d = date(2024, 7, 1);
        let input = vec![
            campaign(1, "initial_blast", 1, 10, d),
            campaign(1, "rate_increase", 2, 1, d),
            birthday(1, d),
            campaign(2, "initial_blast", 1, 10, d),
        ];

        let out = ConflictResolver::new().resolve(input);

        assert_eq!(
            out[0].status.skip_reason(),
            Some("Campaign priority conflict on 2024-07-01 for contact 1")
        );
        assert!(out[1].is_pre_scheduled());
        assert!(out[2].is_pre_scheduled());
        assert!(out[3].is_pre_scheduled());
    }

    #[test]
    fn test_different_days_do_not_conflict() {
        let input = vec![
            campaign(1, "initial_blast", 1, 10, date(2024, 7, 1)),
            campaign(1, "rate_increase", 2, 1, date(2024, 7, 2)),
        ];
        let out = ConflictResolver::new().resolve(input);
        assert!(out.iter().all(EmailSchedule::is_pre_scheduled));
    }

    #[test]
    fn test_skipped_campaigns_are_ignored() {
        let d = date(2024, 7, 1);
        let input = vec![
            campaign(1, "rate_increase", 2, 1, d).skip("Exclusion window"),
            campaign(1, "initial_blast", 1, 10, d),
        ];
        let out = ConflictResolver::new().resolve(input);
        assert_eq!(out[0].status.skip_reason(), Some("Exclusion window"));
        assert!(out[1].is_pre_scheduled());
    }

    #[test]
    fn test_exact_duplicates_are_skipped() {
        let d = date(2024, 6, 1);
        let out = ConflictResolver::new().resolve(vec![birthday(3, d), birthday(3, d)]);

        assert!(out[0].is_pre_scheduled());
        assert_eq!(
            out[1].status.skip_reason(),
            Some("Duplicate birthday on 2024-06-01 for contact 3")
        );
    }

    #[test]
    fn test_no_duplicate_campaign_days_after_resolution() {
        let days = [date(2024, 7, 1), date(2024, 7, 2)];
        let mut input = Vec::new();
        for contact in 1..=5 {
            for (n, day) in days.iter().enumerate() {
                for priority in [3, 1, 2] {
                    input.push(campaign(contact, &format!("c{priority}"), priority as i64, priority + n as i32, *day));
                }
            }
        }

        let out = ConflictResolver::new().resolve(input);
        let mut seen = HashSet::new();
        for s in out.iter().filter(|s| s.is_pre_scheduled() && s.email_type.is_campaign()) {
            assert!(seen.insert((s.contact_id, s.scheduled_date)));
            assert_eq!(s.priority, 1 + days.iter().position(|d| *d == s.scheduled_date).unwrap() as i32);
        }
        assert_eq!(seen.len(), 10);
    }
}
