use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

use email_scheduler::config::Config;
use email_scheduler::metrics;
use email_scheduler::scheduler::Scheduler;
use email_scheduler::storage::SharedScheduleRepository;

pub struct RunParams {
    pub today: NaiveDate,
    pub dry_run: bool,
    pub run_id: Option<String>,
    pub metrics_out: Option<PathBuf>,
}

pub async fn run(repo: SharedScheduleRepository, config: Config, params: RunParams) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    println!("Email Scheduler");
    println!("===============");
    println!("  Date:    {}", params.today);
    println!("  Dry run: {}", params.dry_run);

    let mut scheduler = Scheduler::new(repo, config).with_dry_run(params.dry_run);
    if let Some(run_id) = params.run_id {
        scheduler = scheduler.with_run_id(run_id);
    }

    let summary = scheduler
        .run(params.today)
        .await
        .context("Scheduler run failed")?;

    println!();
    print!("{}", summary.display());

    if let Some(path) = params.metrics_out {
        let text = metrics::gather_metrics()
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        println!("  Metrics written to {}", path.display());
    }

    Ok(())
}
