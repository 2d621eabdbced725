//! email-scheduler - batch email scheduling for insurance contacts
//!
//! Computes anniversary, campaign and follow-up emails for a contact base,
//! honors per-state compliance exclusion windows and spreads the resulting
//! sends so no single day carries an unsustainable volume.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Contacts, email types, schedules and campaigns
//! - [`scheduler`] - Generators, filters, load balancer and run orchestration
//! - [`storage`] - SQLite repository, ZIP lookup and run checkpoints
//! - [`metrics`] - Prometheus run metrics
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use email_scheduler::config::Config;
//! use email_scheduler::scheduler::Scheduler;
//! use email_scheduler::storage::open_repository;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let repo = open_repository(&config.database)?;
//!     let today = chrono::Local::now().date_naive();
//!     let summary = Scheduler::new(repo, config).run(today).await?;
//!     println!("{}", summary.display());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{Contact, EmailSchedule, EmailType, ScheduleStatus};
    pub use crate::scheduler::{RunSummary, Scheduler, SchedulerError};
    pub use crate::storage::{ScheduleRepository, SharedScheduleRepository};
}

// Direct re-exports for convenience
pub use models::{Contact, EmailSchedule, EmailType, ScheduleStatus};
