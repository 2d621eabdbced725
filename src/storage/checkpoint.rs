//! Run audit checkpoints
//!
//! Every scheduler run records a checkpoint when it starts and updates it
//! when it completes or fails. The checksums let an operator tell whether two
//! runs saw the same contact base and produced the same schedule set.
//!
//! # Example
//!
//! ```no_run
//! use email_scheduler::storage::checkpoint::RunCheckpoint;
//!
//! let checkpoint = RunCheckpoint::started("run-1", &[]);
//! let done = checkpoint.complete(&[]);
//! assert!(done.completed_at.is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{Contact, EmailSchedule};

/// Lifecycle of a run checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Started,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "started" => Self::Started,
            "completed" => Self::Completed,
            _ => Self::Failed,
        })
    }
}

/// Audit record of one scheduler run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub run_timestamp: DateTime<Utc>,
    pub status: CheckpointStatus,
    pub contacts_checksum: String,
    pub schedules_checksum: Option<String>,
    pub contacts_processed: usize,
    pub emails_scheduled: usize,
    pub emails_skipped: usize,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunCheckpoint {
    /// Checkpoint for a run that is about to process `contacts`
    pub fn started(run_id: impl Into<String>, contacts: &[Contact]) -> Self {
        Self {
            run_id: run_id.into(),
            run_timestamp: Utc::now(),
            status: CheckpointStatus::Started,
            contacts_checksum: contacts_checksum(contacts),
            schedules_checksum: None,
            contacts_processed: contacts.len(),
            emails_scheduled: 0,
            emails_skipped: 0,
            error_message: None,
            completed_at: None,
        }
    }

    /// Mark the run as completed with its final schedule set
    pub fn complete(mut self, schedules: &[EmailSchedule]) -> Self {
        self.status = CheckpointStatus::Completed;
        self.schedules_checksum = Some(schedules_checksum(schedules));
        self.emails_scheduled = schedules.iter().filter(|s| s.is_pre_scheduled()).count();
        self.emails_skipped = schedules.iter().filter(|s| s.status.is_skipped()).count();
        self.completed_at = Some(Utc::now());
        self
    }

    /// Mark the run as failed
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = CheckpointStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
        self
    }
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Order-independent SHA-256 over the scheduling-relevant contact fields
pub fn contacts_checksum(contacts: &[Contact]) -> String {
    let mut rows: Vec<String> = contacts
        .iter()
        .map(|c| {
            format!(
                "{}|{}|{}|{}|{}",
                c.id,
                c.state_code().unwrap_or(""),
                c.birth_date.map(|d| d.to_string()).unwrap_or_default(),
                c.effective_date.map(|d| d.to_string()).unwrap_or_default(),
                c.failed_underwriting
            )
        })
        .collect();
    rows.sort_unstable();

    let mut hasher = Sha256::new();
    for row in &rows {
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    hex_digest(hasher)
}

/// Order-independent SHA-256 over schedule keys and statuses
pub fn schedules_checksum(schedules: &[EmailSchedule]) -> String {
    let mut rows: Vec<String> = schedules
        .iter()
        .map(|s| {
            format!(
                "{}|{}|{}|{}",
                s.contact_id,
                s.email_type.key(),
                s.scheduled_date,
                s.status.as_str()
            )
        })
        .collect();
    rows.sort_unstable();

    let mut hasher = Sha256::new();
    for row in &rows {
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    hex_digest(hasher)
}
