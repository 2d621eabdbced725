//! Per-contact frequency limiting
//!
//! ```text
//! contact 7:  [aep p30 09-15] [birthday p10 09-20] [campaign p5 09-22] ...
//!                   |               sort by priority, date
//!                   v
//!   accept while sends in [date - period_days, date] < max_emails_per_period
//!   (stored history + schedules accepted so far), skip the rest
//! ```

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::calendar::add_days;
use super::context::SchedulingContext;
use crate::models::EmailSchedule;
use crate::storage::repository::ScheduleRepository;

pub const FREQUENCY_SKIP_REASON: &str = "Frequency limit exceeded";

pub struct FrequencyLimiter<'a> {
    ctx: &'a SchedulingContext,
    history: &'a dyn ScheduleRepository,
}

impl<'a> FrequencyLimiter<'a> {
    pub fn new(ctx: &'a SchedulingContext, history: &'a dyn ScheduleRepository) -> Self {
        Self { ctx, history }
    }

    /// Skip schedules that would push a contact over the period limit
    ///
    /// Only pre-scheduled emails compete for slots. Output keeps input order.
    pub fn apply(&self, schedules: Vec<EmailSchedule>) -> Vec<EmailSchedule> {
        let max = self.ctx.organization.max_emails_per_period;
        let period = self.ctx.organization.period_days;

        let mut by_contact: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (idx, schedule) in schedules.iter().enumerate() {
            if schedule.is_pre_scheduled() {
                by_contact.entry(schedule.contact_id).or_default().push(idx);
            }
        }

        let mut skipped = vec![false; schedules.len()];
        for (contact_id, mut indices) in by_contact {
            indices.sort_by_cached_key(|&i| {
                let s = &schedules[i];
                (s.priority, s.scheduled_date, s.email_type.key())
            });

            let Some(history) = self.history_for(contact_id, &schedules, &indices) else {
                continue;
            };

            let mut accepted: Vec<NaiveDate> = Vec::with_capacity(indices.len());
            for i in indices {
                let date = schedules[i].scheduled_date;
                let window_start = add_days(date, -period);
                let in_window = |d: &&NaiveDate| **d >= window_start && **d <= date;
                let count = history.iter().filter(in_window).count()
                    + accepted.iter().filter(in_window).count();

                if count >= max {
                    debug!(
                        contact_id,
                        email_type = %schedules[i].email_type.key(),
                        date = %date,
                        count,
                        "Frequency limit reached"
                    );
                    skipped[i] = true;
                } else {
                    accepted.push(date);
                }
            }
        }

        let total_skipped = skipped.iter().filter(|s| **s).count();
        info!(
            max_emails_per_period = max,
            period_days = period,
            skipped = total_skipped,
            "Frequency limits applied"
        );

        schedules
            .into_iter()
            .zip(skipped)
            .map(|(s, skip)| if skip { s.skip(FREQUENCY_SKIP_REASON) } else { s })
            .collect()
    }

    /// Stored sends for the span covered by `indices`; `None` means allow all
    fn history_for(
        &self,
        contact_id: i64,
        schedules: &[EmailSchedule],
        indices: &[usize],
    ) -> Option<Vec<NaiveDate>> {
        let dates = indices.iter().map(|&i| schedules[i].scheduled_date);
        let earliest = dates.clone().min()?;
        let latest = dates.max()?;
        let from = add_days(earliest, -self.ctx.organization.period_days);

        match self.history.get_recent_send_dates(contact_id, from, latest) {
            Ok(history) => Some(history),
            Err(e) => {
                warn!(
                    contact_id,
                    error = %e,
                    "Send history lookup failed, allowing emails"
                );
                None
            }
        }
    }
}
