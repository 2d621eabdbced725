//! Email scheduling engine
//!
//! Computes every email a contact population should receive (yearly
//! anniversaries, marketing campaigns and behavior-driven follow-ups) and
//! spreads the sends across calendar days so no day exceeds a sustainable
//! volume, while honoring per-state exclusion windows during which no
//! marketing email may go out.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │                                                              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐     │
//! │  │ Anniversary │   │  Campaign   │   │    Follow-up    │     │
//! │  │  Generator  │   │  Generator  │   │    Generator    │     │
//! │  └──────┬──────┘   └──────┬──────┘   └────────┬────────┘     │
//! │         │   calendar + exclusion windows      │              │
//! │         └─────────────────┼───────────────────┘              │
//! │                           ▼                                  │
//! │   Frequency Limiter ─► Conflict Resolver ─► Load Balancer    │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             ▼
//!                  ScheduleRepository (SQLite)
//! ```
//!
//! # Modules
//!
//! - [`calendar`] - Anniversary dates, day arithmetic and deterministic jitter
//! - [`exclusion`] - State rule table and exclusion window checks
//! - [`anniversary`] - Birthday, effective date, AEP and post-window emails
//! - [`campaign`] - Campaign instance schedules
//! - [`followup`] - Engagement-based follow-ups
//! - [`frequency`] - Per-contact send limits
//! - [`conflict`] - One campaign per contact per day
//! - [`load_balancer`] - Effective-date smoothing, daily cap and catch-up
//! - [`orchestrator`] - Full run over storage
//!
//! # Usage
//!
//! ```ignore
//! use email_scheduler::config::Config;
//! use email_scheduler::scheduler::Scheduler;
//! use email_scheduler::storage::create_sqlite_repository;
//!
//! let repo = create_sqlite_repository("data/scheduler.db")?;
//! let summary = Scheduler::new(repo, Config::default())
//!     .run(chrono::Local::now().date_naive())
//!     .await?;
//! println!("{}", summary.display());
//! ```
//!
//! # Priorities
//!
//! Lower values win. Anniversaries use fixed priorities (birthday 10,
//! effective date 20, AEP 30, post-window 40), campaigns carry the priority
//! of their campaign type and follow-ups rank by engagement (1 to 4).

pub mod anniversary;
pub mod calendar;
pub mod campaign;
pub mod conflict;
pub mod context;
pub mod error;
pub mod exclusion;
pub mod followup;
pub mod frequency;
pub mod load_balancer;
pub mod orchestrator;

// Re-export main types
pub use anniversary::AnniversaryGenerator;
pub use campaign::CampaignGenerator;
pub use conflict::ConflictResolver;
pub use context::{GenerationBatch, SchedulingContext};
pub use error::{SchedulerError, SchedulerResult};
pub use exclusion::{
    default_state_rules, ExclusionCheck, ExclusionEvaluator, ExclusionRules, RuleKind, StateRule,
};
pub use followup::FollowupGenerator;
pub use frequency::FrequencyLimiter;
pub use load_balancer::{daily_stats, DistributionAnalysis, LoadBalancer};
pub use orchestrator::{RunSummary, Scheduler};
