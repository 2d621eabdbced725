//! Scheduling run orchestration
//!
//! ```text
//!  load contacts ─► resolve states ─► checkpoint(started)
//!        │
//!        ▼
//!  anniversaries (JoinSet of spawn_blocking, one task per batch)
//!        │
//!        ▼
//!  campaigns ─► follow-ups ─► frequency ─► conflicts ─► load balancer
//!        │
//!        ▼
//!  clear pending + persist ─► checkpoint(completed | failed) ─► metrics
//! ```
//!
//! Per-item failures are collected into the [`RunSummary`]. Configuration,
//! balancing and persistence failures abort the run.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::anniversary::AnniversaryGenerator;
use super::campaign::CampaignGenerator;
use super::conflict::ConflictResolver;
use super::context::{GenerationBatch, SchedulingContext};
use super::error::{SchedulerError, SchedulerResult};
use super::followup::FollowupGenerator;
use super::frequency::FrequencyLimiter;
use super::load_balancer::{daily_stats, DistributionAnalysis, LoadBalancer};
use crate::config::Config;
use crate::metrics;
use crate::models::{Contact, DailyStats, EmailSchedule};
use crate::storage::checkpoint::RunCheckpoint;
use crate::storage::repository::SharedScheduleRepository;
use crate::storage::zip::{create_zip_resolver, SharedZipResolver};

// ============================================================================
// Run Summary
// ============================================================================

/// Outcome of one scheduling run
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub today: NaiveDate,
    pub dry_run: bool,
    pub contacts_processed: usize,
    pub anniversary_generated: usize,
    pub campaign_generated: usize,
    pub followup_generated: usize,
    pub scheduled: usize,
    pub skipped: usize,
    /// Rows written to storage (0 for dry runs)
    pub persisted: usize,
    pub errors: Vec<SchedulerError>,
    pub analysis: DistributionAnalysis,
    pub daily_stats: Vec<DailyStats>,
    pub schedules: Vec<EmailSchedule>,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Human readable report
    pub fn display(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Scheduler run {} for {}", self.run_id, self.today);
        if self.dry_run {
            let _ = writeln!(out, "  (dry run, nothing persisted)");
        }
        let _ = writeln!(out, "  Contacts processed:  {}", self.contacts_processed);
        let _ = writeln!(
            out,
            "  Generated:           {} anniversary, {} campaign, {} follow-up",
            self.anniversary_generated, self.campaign_generated, self.followup_generated
        );
        let _ = writeln!(out, "  Scheduled:           {}", self.scheduled);
        let _ = writeln!(out, "  Skipped:             {}", self.skipped);
        let _ = writeln!(out, "  Persisted:           {}", self.persisted);
        let _ = writeln!(
            out,
            "  Days used:           {} (avg {:.1}, max {}, min {}, spread {})",
            self.analysis.days_used,
            self.analysis.avg_per_day,
            self.analysis.max_per_day,
            self.analysis.min_per_day,
            self.analysis.distribution_variance
        );
        let _ = writeln!(out, "  Duration:            {:.2}s", self.duration_secs);

        if !self.errors.is_empty() {
            let _ = writeln!(out, "  Errors:              {}", self.errors.len());
            for err in self.errors.iter().take(10) {
                let _ = writeln!(out, "    - {err}");
            }
            if self.errors.len() > 10 {
                let _ = writeln!(out, "    ... and {} more", self.errors.len() - 10);
            }
        }
        out
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler {
    repo: SharedScheduleRepository,
    config: Config,
    zip: SharedZipResolver,
    dry_run: bool,
    run_id: Option<String>,
}

/// Output of the single-threaded stages
struct Pipeline {
    schedules: Vec<EmailSchedule>,
    errors: Vec<SchedulerError>,
    campaign_generated: usize,
    followup_generated: usize,
}

impl Scheduler {
    pub fn new(repo: SharedScheduleRepository, config: Config) -> Self {
        let zip = create_zip_resolver(config.zip_prefixes.clone());
        Self {
            repo,
            config,
            zip,
            dry_run: false,
            run_id: None,
        }
    }

    /// Compute everything but write nothing
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_zip_resolver(mut self, zip: SharedZipResolver) -> Self {
        self.zip = zip;
        self
    }

    #[instrument(skip(self), fields(dry_run = self.dry_run))]
    pub async fn run(&self, today: NaiveDate) -> SchedulerResult<RunSummary> {
        let started = Instant::now();

        let contacts = self.load_contacts(today)?;
        let total_contacts = match self.repo.count_contacts() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to count contacts, using loaded set size");
                contacts.len()
            }
        };

        let mut ctx = SchedulingContext::new(&self.config, today, total_contacts)?;
        if let Some(run_id) = &self.run_id {
            ctx = ctx.with_run_id(run_id.clone());
        }
        let ctx = Arc::new(ctx);
        info!(
            run_id = %ctx.run_id,
            %today,
            contacts = contacts.len(),
            total_contacts,
            daily_cap = ctx.load_balancing.daily_cap(),
            "Scheduler run started"
        );

        let mut errors = Vec::new();
        let checkpoint = RunCheckpoint::started(ctx.run_id.clone(), &contacts);
        self.write_checkpoint(&checkpoint, &mut errors);

        let contacts = Arc::new(contacts);
        let anniversaries = match self.generate_anniversaries(&ctx, &contacts).await {
            Ok(batch) => batch,
            Err(e) => return Err(self.abort(checkpoint, e, started)),
        };
        let anniversary_generated = anniversaries.schedules.len();
        errors.extend(anniversaries.errors);

        let pipeline = {
            let repo = Arc::clone(&self.repo);
            let zip = Arc::clone(&self.zip);
            let ctx = Arc::clone(&ctx);
            let contacts = Arc::clone(&contacts);
            let schedules = anniversaries.schedules;
            let windowed = self.config.contacts.lookahead_days.is_some();
            tokio::task::spawn_blocking(move || {
                run_pipeline(&ctx, &repo, &zip, &contacts, windowed, schedules)
            })
            .await
            .map_err(|e| SchedulerError::task_failed("pipeline", e.to_string()))
            .and_then(|result| result)
        };
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => return Err(self.abort(checkpoint, e, started)),
        };
        errors.extend(pipeline.errors);
        let schedules = pipeline.schedules;

        let persisted = if self.dry_run {
            0
        } else {
            match self.persist(&contacts, &schedules) {
                Ok(n) => n,
                Err(e) => return Err(self.abort(checkpoint, e, started)),
            }
        };

        self.write_checkpoint(&checkpoint.complete(&schedules), &mut errors);

        for err in &errors {
            warn!(kind = err.kind(), error = %err, "Collected scheduling error");
            metrics::record_error(err.kind());
        }

        let stats = daily_stats(&schedules);
        let analysis = DistributionAnalysis::from_daily_stats(&stats);
        let duration_secs = started.elapsed().as_secs_f64();
        metrics::record_schedules(&schedules);
        metrics::record_run(
            true,
            duration_secs,
            ctx.load_balancing.daily_cap(),
            analysis.max_per_day,
        );

        let summary = RunSummary {
            run_id: ctx.run_id.clone(),
            today,
            dry_run: self.dry_run,
            contacts_processed: contacts.len(),
            anniversary_generated,
            campaign_generated: pipeline.campaign_generated,
            followup_generated: pipeline.followup_generated,
            scheduled: schedules.iter().filter(|s| s.is_pre_scheduled()).count(),
            skipped: schedules.iter().filter(|s| s.status.is_skipped()).count(),
            persisted,
            errors,
            analysis,
            daily_stats: stats,
            schedules,
            duration_secs,
        };

        info!(
            run_id = %summary.run_id,
            scheduled = summary.scheduled,
            skipped = summary.skipped,
            persisted = summary.persisted,
            errors = summary.errors.len(),
            duration_secs,
            "Scheduler run completed"
        );
        Ok(summary)
    }

    fn load_contacts(&self, today: NaiveDate) -> SchedulerResult<Vec<Contact>> {
        let window = &self.config.contacts;
        let loaded = match window.lookahead_days {
            Some(ahead) => self
                .repo
                .get_contacts_in_window(today, ahead, window.lookback_days)
                .map_err(|e| SchedulerError::database("get_contacts_in_window", format!("{e:#}")))?,
            None => self
                .repo
                .get_all_contacts()
                .map_err(|e| SchedulerError::database("get_all_contacts", format!("{e:#}")))?,
        };

        let mut resolved = 0usize;
        let contacts = loaded
            .into_iter()
            .map(|mut contact| {
                if contact.state_code().is_none() {
                    if let Some(state) = contact.zip_code.as_deref().and_then(|z| self.zip.state_for_zip(z)) {
                        contact.state = Some(state);
                        resolved += 1;
                    }
                }
                contact
            })
            .collect::<Vec<_>>();

        debug!(contacts = contacts.len(), resolved, "Contacts loaded");
        Ok(contacts)
    }

    /// Anniversary generation over `batch_size` partitions on the blocking pool
    async fn generate_anniversaries(
        &self,
        ctx: &Arc<SchedulingContext>,
        contacts: &Arc<Vec<Contact>>,
    ) -> SchedulerResult<GenerationBatch> {
        let batch_size = ctx.load_balancing.batch_size.max(1);
        let batches = contacts.len().div_ceil(batch_size);

        let mut tasks = JoinSet::new();
        for batch in 0..batches {
            let ctx = Arc::clone(ctx);
            let contacts = Arc::clone(contacts);
            tasks.spawn_blocking(move || {
                let start = batch * batch_size;
                let end = (start + batch_size).min(contacts.len());
                let schedules = AnniversaryGenerator::new(&ctx).generate_batch(&contacts[start..end]);
                (batch, schedules)
            });
        }

        let mut results: Vec<(usize, Vec<EmailSchedule>)> = Vec::with_capacity(batches);
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(error = %e, "Anniversary batch task failed");
                    errors.push(SchedulerError::task_failed("anniversary batch", e.to_string()));
                }
            }
        }
        results.sort_by_key(|(batch, _)| *batch);

        let schedules: Vec<EmailSchedule> = results.into_iter().flat_map(|(_, s)| s).collect();
        info!(
            batches,
            schedules = schedules.len(),
            failed_batches = errors.len(),
            "Anniversary schedules generated"
        );
        Ok(GenerationBatch { schedules, errors })
    }

    fn persist(&self, contacts: &[Contact], schedules: &[EmailSchedule]) -> SchedulerResult<usize> {
        let contact_ids: Vec<i64> = contacts
            .iter()
            .map(|c| c.id)
            .chain(schedules.iter().map(|s| s.contact_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let cleared = self
            .repo
            .clear_pending_schedules(&contact_ids)
            .map_err(|e| SchedulerError::database("clear_pending_schedules", format!("{e:#}")))?;
        let written = self
            .repo
            .persist_schedules(schedules)
            .map_err(|e| SchedulerError::database("persist_schedules", format!("{e:#}")))?;

        info!(cleared, written, "Schedules persisted");
        Ok(written)
    }

    fn write_checkpoint(&self, checkpoint: &RunCheckpoint, errors: &mut Vec<SchedulerError>) {
        if self.dry_run {
            return;
        }
        if let Err(e) = self.repo.record_checkpoint(checkpoint) {
            warn!(run_id = %checkpoint.run_id, error = %e, "Failed to record checkpoint");
            errors.push(SchedulerError::database("record_checkpoint", format!("{e:#}")));
        }
    }

    /// Record the failure and hand the error back
    fn abort(&self, checkpoint: RunCheckpoint, err: SchedulerError, started: Instant) -> SchedulerError {
        error!(run_id = %checkpoint.run_id, error = %err, "Scheduler run failed");
        let mut ignored = Vec::new();
        self.write_checkpoint(&checkpoint.fail(err.to_string()), &mut ignored);
        metrics::record_error(err.kind());
        metrics::record_run(false, started.elapsed().as_secs_f64(), 0, 0);
        err
    }
}

/// Campaign and follow-up generation, then the filtering and balancing stages
fn run_pipeline(
    ctx: &SchedulingContext,
    repo: &SharedScheduleRepository,
    zip: &SharedZipResolver,
    contacts: &[Contact],
    windowed: bool,
    anniversaries: Vec<EmailSchedule>,
) -> SchedulerResult<Pipeline> {
    let campaigns = CampaignGenerator::new(ctx, repo.as_ref())
        .with_zip_resolver(zip.as_ref())
        .with_windowed_contacts(windowed)
        .generate(contacts);
    let followups = FollowupGenerator::new(ctx, repo.as_ref())
        .with_zip_resolver(zip.as_ref())
        .generate();

    let campaign_generated = campaigns.schedules.len();
    let followup_generated = followups.schedules.len();

    let combined = GenerationBatch {
        schedules: anniversaries,
        errors: Vec::new(),
    }
    .merge(campaigns)
    .merge(followups);

    let limited = FrequencyLimiter::new(ctx, repo.as_ref()).apply(combined.schedules);
    let resolved = ConflictResolver::new().resolve(limited);
    let balanced = LoadBalancer::new(ctx).balance(resolved)?;

    Ok(Pipeline {
        schedules: balanced,
        errors: combined.errors,
        campaign_generated,
        followup_generated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnniversaryKind, CampaignInstance, CampaignTypeConfig};
    use crate::storage::checkpoint::CheckpointStatus;
    use crate::storage::repository::{MockScheduleRepository, ScheduleRepository};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seeded() -> Arc<MockScheduleRepository> {
        let repo = Arc::new(MockScheduleRepository::new());
        repo.upsert_contacts(&[
            Contact::new(1, "a@example.com")
                .with_state("TX")
                .with_birth_date(date(1990, 6, 15)),
            Contact::new(2, "b@example.com")
                .with_zip("90210")
                .with_birth_date(date(1985, 8, 20)),
            Contact::new(3, "c@example.com")
                .with_state("AZ")
                .with_effective_date(date(2020, 7, 10)),
        ])
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_run_persists_and_checkpoints() {
        let repo = seeded();
        let scheduler = Scheduler::new(repo.clone(), Config::default()).with_run_id("run-1");

        let summary = scheduler.run(date(2024, 6, 5)).await.unwrap();

        assert_eq!(summary.run_id, "run-1");
        assert_eq!(summary.contacts_processed, 3);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.persisted, summary.schedules.len());
        assert_eq!(repo.count_schedules().unwrap(), summary.schedules.len());

        let checkpoint = repo.get_checkpoint("run-1").unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.emails_scheduled, summary.scheduled);
    }

    #[tokio::test]
    async fn test_birthday_before_today_is_caught_up() {
        let repo = seeded();
        let summary = Scheduler::new(repo, Config::default())
            .with_dry_run(true)
            .run(date(2024, 6, 5))
            .await
            .unwrap();

        let birthday = summary
            .schedules
            .iter()
            .find(|s| s.contact_id == 1 && s.email_type.key() == AnniversaryKind::Birthday.as_str())
            .unwrap();
        assert!(birthday.is_pre_scheduled());
        assert!(birthday.scheduled_date > date(2024, 6, 5));
        assert!(birthday.scheduled_date <= date(2024, 6, 12));
    }

    #[tokio::test]
    async fn test_zip_resolution_feeds_exclusions() {
        let repo = seeded();
        let summary = Scheduler::new(repo, Config::default())
            .with_dry_run(true)
            .run(date(2024, 7, 1))
            .await
            .unwrap();

        // 90210 resolves to CA, whose birthday window covers 2024-08-06
        let birthday = summary
            .schedules
            .iter()
            .find(|s| s.contact_id == 2 && s.email_type.key() == "birthday")
            .unwrap();
        assert!(birthday.status.is_skipped());
    }

    #[tokio::test]
    async fn test_windowed_run_still_reaches_all_contact_campaigns() {
        let repo = seeded();
        repo.upsert_campaign_type(&CampaignTypeConfig {
            target_all_contacts: true,
            respect_exclusion_windows: false,
            ..CampaignTypeConfig::new("initial_blast", 10)
        })
        .unwrap();
        repo.upsert_campaign_instance(&CampaignInstance {
            campaign_type: "initial_blast".to_string(),
            instance_name: "blast".to_string(),
            ..Default::default()
        })
        .unwrap();

        let mut config = Config::default();
        config.contacts.lookahead_days = Some(30);
        let summary = Scheduler::new(repo, config)
            .with_dry_run(true)
            .run(date(2024, 6, 5))
            .await
            .unwrap();

        // only contact 1 has an anniversary within the window
        assert_eq!(summary.contacts_processed, 1);
        let mut reached: Vec<i64> = summary
            .schedules
            .iter()
            .filter(|s| s.email_type.is_campaign())
            .map(|s| s.contact_id)
            .collect();
        reached.sort_unstable();
        assert_eq!(reached, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let repo = seeded();
        let summary = Scheduler::new(repo.clone(), Config::default())
            .with_dry_run(true)
            .with_run_id("dry")
            .run(date(2024, 6, 5))
            .await
            .unwrap();

        assert!(!summary.schedules.is_empty());
        assert_eq!(summary.persisted, 0);
        assert_eq!(repo.count_schedules().unwrap(), 0);
        assert!(repo.get_checkpoint("dry").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_failure_fails_run() {
        let repo = seeded();
        repo.fail_operation("persist_schedules");

        let err = Scheduler::new(repo.clone(), Config::default())
            .with_run_id("broken")
            .run(date(2024, 6, 5))
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::DatabaseError { .. }));
        let checkpoint = repo.get_checkpoint("broken").unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    }

    #[tokio::test]
    async fn test_contact_load_failure_is_fatal() {
        let repo = seeded();
        repo.fail_operation("get_all_contacts");

        let err = Scheduler::new(repo, Config::default())
            .run(date(2024, 6, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DatabaseError { .. }));
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            run_id: "r".to_string(),
            today: date(2024, 6, 5),
            dry_run: true,
            contacts_processed: 3,
            anniversary_generated: 4,
            campaign_generated: 0,
            followup_generated: 0,
            scheduled: 3,
            skipped: 1,
            persisted: 0,
            errors: vec![SchedulerError::invalid_contact(9, "missing email")],
            analysis: DistributionAnalysis::from_daily_stats(&[]),
            daily_stats: Vec::new(),
            schedules: Vec::new(),
            duration_secs: 0.01,
        };

        let text = summary.display();
        assert!(text.contains("dry run"));
        assert!(text.contains("Scheduled:           3"));
        assert!(text.contains("missing email"));
    }
}
