//! Daily volume smoothing and capping
//!
//! ```text
//!   pre-scheduled ──► [0] past dates ─────────────────────────┐
//!        │                                                     │
//!        ▼                                                     │
//!   [1] effective-date smoothing (jitter crowded ED days)      │
//!        │                                                     │
//!        ▼                                                     ▼
//!   [2] daily cap: keep `daily_cap` per overloaded day,   [3] catch-up:
//!       carry the rest to the next busy day  ───overflow──►  today + (i mod spread) + 1
//! ```
//!
//! Skipped schedules pass through untouched. Every pre-scheduled input comes
//! out exactly once, never dated before `today`. Campaign conflicts created
//! by moving emails are resolved again on the balanced set.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use super::calendar::{add_days, jitter};
use super::conflict::ConflictResolver;
use super::context::SchedulingContext;
use super::error::{SchedulerError, SchedulerResult};
use crate::config::LoadBalancingConfig;
use crate::models::{DailyStats, EmailSchedule};

/// Pre-scheduled email tagged with its input position
type Slot = (usize, EmailSchedule);

pub struct LoadBalancer<'a> {
    today: NaiveDate,
    settings: &'a LoadBalancingConfig,
}

impl<'a> LoadBalancer<'a> {
    pub fn new(ctx: &'a SchedulingContext) -> Self {
        Self {
            today: ctx.today,
            settings: &ctx.load_balancing,
        }
    }

    /// Run all passes and verify nothing was lost or duplicated
    pub fn balance(&self, schedules: Vec<EmailSchedule>) -> SchedulerResult<Vec<EmailSchedule>> {
        let input_len = schedules.len();
        let (active, passthrough): (Vec<Slot>, Vec<Slot>) = schedules
            .into_iter()
            .enumerate()
            .partition(|(_, s)| s.is_pre_scheduled());
        let active_len = active.len();

        let (current, mut catch_up) = self.route_past_dates(active);
        let smoothed = self.smooth_effective_dates(current);
        let (capped, overflow) = self.enforce_daily_cap(smoothed);
        catch_up.extend(overflow);
        let caught_up = self.distribute_catch_up(catch_up);

        let mut balanced: Vec<Slot> = capped;
        balanced.extend(caught_up);
        self.verify(&balanced, active_len)?;

        balanced.extend(passthrough);
        balanced.sort_by_key(|(idx, _)| *idx);
        if balanced.len() != input_len {
            return Err(SchedulerError::load_balancing(format!(
                "expected {} schedules, produced {}",
                input_len,
                balanced.len()
            )));
        }

        info!(
            daily_cap = self.settings.daily_cap(),
            ed_threshold = self.settings.ed_threshold(),
            balanced = active_len,
            "Load balancing complete"
        );
        // moved campaigns can land on a day the contact already has one
        let balanced = balanced.into_iter().map(|(_, s)| s).collect();
        Ok(ConflictResolver::new().resolve(balanced))
    }

    /// Pass 0: anything dated before today goes to catch-up
    fn route_past_dates(&self, slots: Vec<Slot>) -> (Vec<Slot>, Vec<Slot>) {
        let (current, past): (Vec<Slot>, Vec<Slot>) =
            slots.into_iter().partition(|(_, s)| s.scheduled_date >= self.today);
        if !past.is_empty() {
            debug!(count = past.len(), "Past-dated schedules routed to catch-up");
        }
        (current, past)
    }

    /// Pass 1: spread effective-date emails off crowded days
    fn smooth_effective_dates(&self, slots: Vec<Slot>) -> Vec<Slot> {
        let threshold = self.settings.ed_threshold();
        let window = self.settings.ed_smoothing_window_days;

        let ed_per_day = slots
            .iter()
            .filter(|(_, s)| s.email_type.is_effective_date())
            .fold(BTreeMap::<NaiveDate, usize>::new(), |mut acc, (_, s)| {
                *acc.entry(s.scheduled_date).or_default() += 1;
                acc
            });

        let mut moved = 0usize;
        let smoothed = slots
            .into_iter()
            .map(|(idx, schedule)| {
                let crowded = schedule.email_type.is_effective_date()
                    && ed_per_day.get(&schedule.scheduled_date).copied().unwrap_or(0) > threshold;
                if !crowded {
                    return (idx, schedule);
                }
                let date = schedule.scheduled_date;
                let offset = jitter(
                    schedule.contact_id,
                    &schedule.email_type.key(),
                    date.year(),
                    window,
                );
                let target = add_days(date, offset);
                if target < self.today || target == date {
                    (idx, schedule)
                } else {
                    moved += 1;
                    (idx, schedule.with_date(target))
                }
            })
            .collect();

        debug!(threshold, window, moved, "Effective-date smoothing applied");
        smoothed
    }

    /// Pass 2: trim overloaded days, carrying overflow forward
    fn enforce_daily_cap(&self, slots: Vec<Slot>) -> (Vec<Slot>, Vec<Slot>) {
        let cap = self.settings.daily_cap();
        let limit = self.settings.overage_limit();

        let buckets = slots
            .into_iter()
            .fold(BTreeMap::<NaiveDate, Vec<Slot>>::new(), |mut acc, slot| {
                acc.entry(slot.1.scheduled_date).or_default().push(slot);
                acc
            });

        let mut kept = Vec::new();
        let mut carry: Vec<Slot> = Vec::new();
        for (date, mut bucket) in buckets {
            bucket.extend(carry.drain(..).map(|(idx, s)| (idx, s.with_date(date))));
            if (bucket.len() as f64) <= limit {
                kept.extend(bucket);
                continue;
            }

            bucket.sort_by_cached_key(|(idx, s)| (s.priority, s.contact_id, s.email_type.key(), *idx));
            let overflow = bucket.split_off(cap.min(bucket.len()));
            debug!(
                date = %date,
                kept = bucket.len(),
                carried = overflow.len(),
                "Daily cap enforced"
            );
            kept.extend(bucket);
            carry = overflow;
        }

        (kept, carry)
    }

    /// Pass 3: spread catch-up emails over the days after today
    fn distribute_catch_up(&self, mut slots: Vec<Slot>) -> Vec<Slot> {
        let spread = self.settings.catch_up_spread_days.max(1);
        slots.sort_by_cached_key(|(idx, s)| (s.priority, s.contact_id, s.email_type.key(), *idx));

        if !slots.is_empty() {
            info!(count = slots.len(), spread_days = spread, "Catch-up schedules distributed");
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(i, (idx, s))| {
                let date = add_days(self.today, (i as i64).rem_euclid(spread) + 1);
                (idx, s.with_date(date))
            })
            .collect()
    }

    fn verify(&self, slots: &[Slot], expected: usize) -> SchedulerResult<()> {
        let mut seen: Vec<usize> = slots.iter().map(|(idx, _)| *idx).collect();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != slots.len() {
            return Err(SchedulerError::load_balancing(format!(
                "{} schedules duplicated during balancing",
                slots.len() - seen.len()
            )));
        }
        if slots.len() != expected {
            return Err(SchedulerError::load_balancing(format!(
                "{} schedules lost during balancing",
                expected.saturating_sub(slots.len())
            )));
        }
        if let Some((_, past)) = slots.iter().find(|(_, s)| s.scheduled_date < self.today) {
            return Err(SchedulerError::load_balancing(format!(
                "schedule for contact {} dated {} before {}",
                past.contact_id, past.scheduled_date, self.today
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Distribution Analysis
// ============================================================================

/// Per-day volume summary over pre-scheduled emails
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionAnalysis {
    pub total_emails: usize,
    pub days_used: usize,
    pub avg_per_day: f64,
    pub max_per_day: usize,
    pub min_per_day: usize,
    /// Spread between the busiest and quietest day
    pub distribution_variance: usize,
}

impl DistributionAnalysis {
    pub fn from_schedules(schedules: &[EmailSchedule]) -> Self {
        Self::from_daily_stats(&daily_stats(schedules))
    }

    pub fn from_daily_stats(days: &[DailyStats]) -> Self {
        let total_emails: usize = days.iter().map(|d| d.total).sum();
        let max_per_day = days.iter().map(|d| d.total).max().unwrap_or(0);
        let min_per_day = days.iter().map(|d| d.total).min().unwrap_or(0);
        let avg_per_day = if days.is_empty() {
            0.0
        } else {
            total_emails as f64 / days.len() as f64
        };

        Self {
            total_emails,
            days_used: days.len(),
            avg_per_day,
            max_per_day,
            min_per_day,
            distribution_variance: max_per_day - min_per_day,
        }
    }
}

/// Pre-scheduled volume per day, in date order
pub fn daily_stats(schedules: &[EmailSchedule]) -> Vec<DailyStats> {
    schedules
        .iter()
        .filter(|s| s.is_pre_scheduled())
        .fold(BTreeMap::<NaiveDate, DailyStats>::new(), |mut acc, s| {
            let day = acc
                .remove(&s.scheduled_date)
                .unwrap_or_else(|| DailyStats::new(s.scheduled_date));
            acc.insert(s.scheduled_date, day.add(&s.email_type));
            acc
        })
        .into_values()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{AnniversaryKind, EmailType};
    use chrono::NaiveTime;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 6, 1)
    }

    fn context(total_contacts: usize) -> SchedulingContext {
        SchedulingContext::new(&Config::default(), today(), total_contacts).unwrap()
    }

    fn schedule(contact_id: i64, kind: AnniversaryKind, day: NaiveDate) -> EmailSchedule {
        EmailSchedule::new(
            contact_id,
            EmailType::anniversary(kind),
            day,
            NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            "run",
        )
    }

    fn per_day(schedules: &[EmailSchedule]) -> HashMap<NaiveDate, usize> {
        schedules
            .iter()
            .filter(|s| s.is_pre_scheduled())
            .fold(HashMap::new(), |mut acc, s| {
                *acc.entry(s.scheduled_date).or_default() += 1;
                acc
            })
    }

    #[test]
    fn test_cap_scenario() {
        let ctx = context(1000);
        assert_eq!(ctx.load_balancing.daily_cap(), 70);

        let busy = date(2024, 7, 1);
        let input: Vec<_> = (1..=200)
            .map(|id| schedule(id, AnniversaryKind::Birthday, busy))
            .collect();

        let out = LoadBalancer::new(&ctx).balance(input).unwrap();
        assert_eq!(out.len(), 200);

        let counts = per_day(&out);
        assert!(counts[&busy] <= 84);
        assert_eq!(counts[&busy], 70);
        let catch_up: usize = (2..=8).map(|d| counts.get(&date(2024, 6, d)).copied().unwrap_or(0)).sum();
        assert_eq!(catch_up, 130);
    }

    #[test]
    fn test_overflow_carries_to_next_busy_day() {
        let ctx = context(100); // cap 7, limit 8.4
        let mut input: Vec<_> = (1..=10)
            .map(|id| schedule(id, AnniversaryKind::Birthday, date(2024, 7, 1)))
            .collect();
        input.push(schedule(50, AnniversaryKind::Aep, date(2024, 7, 9)));

        let out = LoadBalancer::new(&ctx).balance(input).unwrap();
        let counts = per_day(&out);
        assert_eq!(counts[&date(2024, 7, 1)], 7);
        assert_eq!(counts[&date(2024, 7, 9)], 4);
        // contact order decides who stays
        assert_eq!(out[0].scheduled_date, date(2024, 7, 1));
        assert_eq!(out[9].scheduled_date, date(2024, 7, 9));
    }

    #[test]
    fn test_carried_campaign_does_not_collide() {
        let ctx = context(30); // cap 2, limit 2.4
        let campaign = |name: &str, instance_id, priority, day| {
            EmailSchedule::new(
                1,
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
        };
        let input = vec![
            schedule(2, AnniversaryKind::Birthday, date(2024, 7, 1)),
            schedule(3, AnniversaryKind::Birthday, date(2024, 7, 1)),
            campaign("initial_blast", 1, 50, date(2024, 7, 1)),
            campaign("rate_increase", 2, 40, date(2024, 7, 2)),
        ];

        let out = LoadBalancer::new(&ctx).balance(input).unwrap();

        // the blast is carried onto 07-02 and loses to the rate increase
        assert_eq!(out[2].scheduled_date, date(2024, 7, 2));
        assert!(out[2].status.is_skipped());
        assert!(out[3].is_pre_scheduled());
        let campaign_days: Vec<_> = out
            .iter()
            .filter(|s| s.is_pre_scheduled() && s.email_type.is_campaign())
            .map(|s| (s.contact_id, s.scheduled_date))
            .collect();
        assert_eq!(campaign_days, vec![(1, date(2024, 7, 2))]);
    }

    #[test]
    fn test_small_overage_is_tolerated() {
        let ctx = context(100);
        let input: Vec<_> = (1..=8)
            .map(|id| schedule(id, AnniversaryKind::Birthday, date(2024, 7, 1)))
            .collect();

        let out = LoadBalancer::new(&ctx).balance(input).unwrap();
        assert!(out.iter().all(|s| s.scheduled_date == date(2024, 7, 1)));
    }

    #[test]
    fn test_past_dates_go_to_catch_up() {
        let ctx = context(1000);
        let input = vec![
            schedule(1, AnniversaryKind::Birthday, date(2024, 5, 28)),
            schedule(2, AnniversaryKind::Birthday, date(2024, 6, 20)),
            schedule(3, AnniversaryKind::Birthday, date(2024, 5, 1)).skip("Exclusion window"),
        ];

        let out = LoadBalancer::new(&ctx).balance(input).unwrap();
        assert_eq!(out[0].scheduled_date, date(2024, 6, 2));
        assert_eq!(out[1].scheduled_date, date(2024, 6, 20));
        assert_eq!(out[2].scheduled_date, date(2024, 5, 1));
        assert!(out
            .iter()
            .filter(|s| s.is_pre_scheduled())
            .all(|s| s.scheduled_date >= today()));
    }

    #[test]
    fn test_effective_date_smoothing() {
        let ctx = context(1000); // ed threshold min(15, 21) = 15
        let busy = date(2024, 7, 1);
        let input: Vec<_> = (1..=40)
            .map(|id| schedule(id, AnniversaryKind::EffectiveDate, busy))
            .collect();

        let out = LoadBalancer::new(&ctx).balance(input).unwrap();
        let counts = per_day(&out);

        assert!(counts.len() > 1);
        assert!(counts[&busy] < 40);
        assert!(out
            .iter()
            .all(|s| (s.scheduled_date - busy).num_days().abs() <= 2));
    }

    #[test]
    fn test_balancing_is_deterministic() {
        let ctx = context(300);
        let input: Vec<_> = (1..=120)
            .map(|id| {
                let kind = if id % 2 == 0 {
                    AnniversaryKind::EffectiveDate
                } else {
                    AnniversaryKind::Birthday
                };
                schedule(id, kind, date(2024, 6, 1 + (id % 5) as u32))
            })
            .collect();

        let a = LoadBalancer::new(&ctx).balance(input.clone()).unwrap();
        let b = LoadBalancer::new(&ctx).balance(input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distribution_analysis() {
        let input = vec![
            schedule(1, AnniversaryKind::Birthday, date(2024, 6, 2)),
            schedule(2, AnniversaryKind::EffectiveDate, date(2024, 6, 2)),
            schedule(3, AnniversaryKind::Aep, date(2024, 6, 2)),
            schedule(4, AnniversaryKind::Birthday, date(2024, 6, 5)),
            schedule(5, AnniversaryKind::Birthday, date(2024, 6, 6)).skip("Frequency limit exceeded"),
        ];

        let stats = daily_stats(&input);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].total, 3);
        assert_eq!(stats[0].effective_date, 1);

        let analysis = DistributionAnalysis::from_schedules(&input);
        assert_eq!(analysis.total_emails, 4);
        assert_eq!(analysis.days_used, 2);
        assert_eq!(analysis.max_per_day, 3);
        assert_eq!(analysis.min_per_day, 1);
        assert_eq!(analysis.distribution_variance, 2);
        assert!((analysis.avg_per_day - 2.0).abs() < f64::EPSILON);
    }
}
