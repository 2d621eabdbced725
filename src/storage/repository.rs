//! Repository Pattern for Scheduler Storage
//!
//! The scheduling pipeline only talks to storage through the
//! [`ScheduleRepository`] trait, so the same orchestrator runs against SQLite
//! in production and an in-memory mock in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Scheduling Orchestrator                   │
//! │      (generators, limiter, resolver, load balancer)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ScheduleRepository                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//!      ┌─────────────────┐         ┌─────────────────┐
//!      │     SQLite      │         │      Mock       │
//!      │  Implementation │         │ Implementation  │
//!      └─────────────────┘         └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use email_scheduler::storage::repository::{ScheduleRepository, SqliteScheduleRepository};
//!
//! // Production: use SQLite
//! let repo = SqliteScheduleRepository::new("data/scheduler.db")?;
//!
//! // Testing: use Mock
//! let mock_repo = MockScheduleRepository::new();
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    CampaignInstance, CampaignTypeConfig, Contact, ContactCampaign, ContactInteractions,
    EmailSchedule, EmailType, EnrolledContact, ScheduleStatus, SentEmail,
};
use crate::scheduler::calendar::{add_days, next_anniversary};
use crate::storage::checkpoint::RunCheckpoint;

/// Enrollment statuses that still produce campaign emails
pub const ACTIVE_ENROLLMENT_STATUSES: [&str; 2] = ["pending", "active"];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite bound-parameter budget per statement
const SQL_CHUNK: usize = 500;

// ============================================================================
// Repository Trait
// ============================================================================

/// Storage operations used by a scheduling run
pub trait ScheduleRepository: Send + Sync {
    // ---- contacts -------------------------------------------------------

    /// All contacts with a deliverable email address
    fn get_all_contacts(&self) -> Result<Vec<Contact>>;

    /// Contacts with a birthday or policy anniversary near `today`
    fn get_contacts_in_window(
        &self,
        today: NaiveDate,
        lookahead_days: i64,
        lookback_days: i64,
    ) -> Result<Vec<Contact>> {
        Ok(self
            .get_all_contacts()?
            .into_iter()
            .filter(|c| contact_in_window(c, today, lookahead_days, lookback_days))
            .collect())
    }

    fn count_contacts(&self) -> Result<usize>;

    fn get_contact(&self, id: i64) -> Result<Option<Contact>>;

    /// Insert or replace contacts
    fn upsert_contacts(&self, contacts: &[Contact]) -> Result<usize>;

    // ---- campaigns ------------------------------------------------------

    fn get_active_campaign_instances(&self, today: NaiveDate) -> Result<Vec<CampaignInstance>>;

    fn get_campaign_instance(&self, id: i64) -> Result<Option<CampaignInstance>>;

    fn get_campaign_type_config(&self, name: &str) -> Result<Option<CampaignTypeConfig>>;

    /// Active enrollment rows of one campaign instance
    fn get_contact_campaigns_for_instance(&self, instance_id: i64) -> Result<Vec<ContactCampaign>>;

    /// Enrolled contacts of one campaign instance with their trigger dates
    fn get_contacts_for_campaign(&self, instance_id: i64) -> Result<Vec<EnrolledContact>> {
        let enrollments = self.get_contact_campaigns_for_instance(instance_id)?;
        let mut enrolled = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            if let Some(contact) = self.get_contact(enrollment.contact_id)? {
                enrolled.push(EnrolledContact {
                    contact,
                    trigger_date: enrollment.trigger_date,
                });
            }
        }
        Ok(enrolled)
    }

    fn upsert_campaign_type(&self, config: &CampaignTypeConfig) -> Result<()>;

    /// Insert or replace an instance; returns its id
    fn upsert_campaign_instance(&self, instance: &CampaignInstance) -> Result<i64>;

    fn enroll_contact(&self, enrollment: &ContactCampaign) -> Result<()>;

    // ---- follow-up inputs ----------------------------------------------

    /// Sent anniversary or campaign emails in `[today - lookback_days, today]`
    fn get_sent_emails_for_followup(&self, today: NaiveDate, lookback_days: i64) -> Result<Vec<SentEmail>>;

    /// Contacts holding a follow-up dated on or after `since`
    fn get_contacts_with_followups(&self, since: NaiveDate) -> Result<HashSet<i64>>;

    /// Clicks and health answers recorded on or after `since`
    fn get_contact_interactions(&self, contact_id: i64, since: NaiveDate) -> Result<ContactInteractions>;

    fn record_sent_email(&self, email: &SentEmail) -> Result<()>;

    fn record_click(&self, contact_id: i64, clicked_on: NaiveDate) -> Result<()>;

    /// Store a health questionnaire answer set (JSON object of answer flags)
    fn record_health_answers(
        &self,
        contact_id: i64,
        answered_on: NaiveDate,
        answers: &serde_json::Value,
    ) -> Result<()>;

    // ---- schedules ------------------------------------------------------

    /// Dates of committed sends (scheduled, processing or sent) in `[from, to]`
    fn get_recent_send_dates(&self, contact_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>>;

    /// Idempotent upsert keyed by `(contact_id, email_type, scheduled_date)`
    ///
    /// Rows already past `pre-scheduled`/`skipped` are left untouched.
    fn persist_schedules(&self, schedules: &[EmailSchedule]) -> Result<usize>;

    /// Delete pre-scheduled and skipped rows for the given contacts
    fn clear_pending_schedules(&self, contact_ids: &[i64]) -> Result<usize>;

    fn get_schedules_for_contact(&self, contact_id: i64) -> Result<Vec<EmailSchedule>>;

    fn count_schedules(&self) -> Result<usize>;

    // ---- audit ----------------------------------------------------------

    fn record_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<()>;

    fn get_checkpoint(&self, run_id: &str) -> Result<Option<RunCheckpoint>>;
}

/// Whether a birthday or effective-date anniversary falls within
/// `[today - lookback_days, today + lookahead_days]`
pub fn contact_in_window(contact: &Contact, today: NaiveDate, lookahead_days: i64, lookback_days: i64) -> bool {
    let start = add_days(today, -lookback_days);
    let end = add_days(today, lookahead_days);
    [contact.birth_date, contact.effective_date]
        .into_iter()
        .flatten()
        .any(|anchor| next_anniversary(start, anchor) <= end)
}

/// One schedule per upsert key, in input order
///
/// A pre-scheduled row beats any other row sharing its key; otherwise the
/// first occurrence is kept. Two campaign instances of the same type on one
/// day share a key, and the conflict loser must not replace the winner.
pub fn collapse_upsert_keys(schedules: &[EmailSchedule]) -> Vec<&EmailSchedule> {
    let mut chosen: HashMap<(i64, String, NaiveDate), usize> = HashMap::new();
    for (idx, s) in schedules.iter().enumerate() {
        chosen
            .entry(s.upsert_key())
            .and_modify(|kept| {
                if !schedules[*kept].is_pre_scheduled() && s.is_pre_scheduled() {
                    *kept = idx;
                }
            })
            .or_insert(idx);
    }
    let mut kept: Vec<usize> = chosen.into_values().collect();
    kept.sort_unstable();
    kept.into_iter().map(|idx| &schedules[idx]).collect()
}

/// Health answer keys flagged true (or with a positive count)
pub fn answer_flags(answers: &serde_json::Value) -> Vec<String> {
    let Some(map) = answers.as_object() else {
        return Vec::new();
    };
    let mut flags: Vec<String> = map
        .iter()
        .filter(|(_, v)| v.as_bool().unwrap_or(false) || v.as_f64().is_some_and(|n| n > 0.0))
        .map(|(k, _)| k.clone())
        .collect();
    flags.sort();
    flags
}

// ============================================================================
// Row helpers
// ============================================================================

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), DATE_FORMAT).ok()
}

fn opt_date(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_date))
}

fn req_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    parse_date(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid date '{raw}'").into(),
        )
    })
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Rebuild an email type from its stored key
///
/// Campaign rows carry only the type name and instance id; the remaining
/// campaign flags are not needed once a schedule is stored.
fn email_type_from_row(key: &str, instance_id: Option<i64>, priority: i32) -> EmailType {
    EmailType::parse_simple(key).unwrap_or_else(|| EmailType::Campaign {
        campaign_type: EmailType::campaign_type_from_key(key)
            .unwrap_or(key)
            .to_string(),
        instance_id: instance_id.unwrap_or_default(),
        respect_exclusions: true,
        days_before_event: 0,
        priority,
    })
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of ScheduleRepository
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteScheduleRepository {
    conn: Mutex<Connection>,
}

impl SqliteScheduleRepository {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite repository initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS contacts (
                    id INTEGER PRIMARY KEY,
                    email TEXT NOT NULL,
                    zip_code TEXT,
                    state TEXT,
                    birth_date TEXT,
                    effective_date TEXT,
                    carrier TEXT,
                    failed_underwriting INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS campaign_types (
                    name TEXT PRIMARY KEY,
                    priority INTEGER NOT NULL DEFAULT 10,
                    days_before_event INTEGER NOT NULL DEFAULT 0,
                    respect_exclusion_windows INTEGER NOT NULL DEFAULT 1,
                    target_all_contacts INTEGER NOT NULL DEFAULT 0,
                    spread_evenly INTEGER NOT NULL DEFAULT 0,
                    skip_failed_underwriting INTEGER NOT NULL DEFAULT 0,
                    enable_followups INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS campaign_instances (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    campaign_type TEXT NOT NULL,
                    instance_name TEXT NOT NULL,
                    email_template TEXT,
                    sms_template TEXT,
                    active_start_date TEXT,
                    active_end_date TEXT,
                    spread_start_date TEXT,
                    spread_end_date TEXT,
                    target_states TEXT,
                    target_carriers TEXT,
                    metadata TEXT,
                    UNIQUE(campaign_type, instance_name)
                );

                CREATE TABLE IF NOT EXISTS contact_campaigns (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    contact_id INTEGER NOT NULL,
                    campaign_instance_id INTEGER NOT NULL,
                    trigger_date TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    UNIQUE(contact_id, campaign_instance_id, trigger_date)
                );

                CREATE INDEX IF NOT EXISTS idx_contact_campaigns_instance
                    ON contact_campaigns(campaign_instance_id);

                CREATE TABLE IF NOT EXISTS email_schedules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    contact_id INTEGER NOT NULL,
                    email_type TEXT NOT NULL,
                    scheduled_send_date TEXT NOT NULL,
                    scheduled_send_time TEXT NOT NULL DEFAULT '08:30:00',
                    status TEXT NOT NULL DEFAULT 'pre-scheduled',
                    skip_reason TEXT,
                    priority INTEGER NOT NULL DEFAULT 10,
                    campaign_instance_id INTEGER,
                    email_template TEXT,
                    sms_template TEXT,
                    event_year INTEGER,
                    scheduler_run_id TEXT,
                    UNIQUE(contact_id, email_type, scheduled_send_date)
                );

                CREATE INDEX IF NOT EXISTS idx_email_schedules_contact
                    ON email_schedules(contact_id, scheduled_send_date);

                CREATE INDEX IF NOT EXISTS idx_email_schedules_status
                    ON email_schedules(status);

                CREATE TABLE IF NOT EXISTS tracking_clicks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    contact_id INTEGER NOT NULL,
                    clicked_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS contact_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    contact_id INTEGER NOT NULL,
                    event_type TEXT NOT NULL,
                    metadata TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS scheduler_checkpoints (
                    scheduler_run_id TEXT PRIMARY KEY,
                    run_timestamp TEXT NOT NULL,
                    status TEXT NOT NULL,
                    contacts_checksum TEXT NOT NULL,
                    schedules_checksum TEXT,
                    contacts_processed INTEGER NOT NULL DEFAULT 0,
                    emails_scheduled INTEGER NOT NULL DEFAULT 0,
                    emails_skipped INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    completed_at TEXT
                );
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn row_to_contact(row: &Row) -> rusqlite::Result<Contact> {
        Ok(Contact {
            id: row.get(0)?,
            email: row.get(1)?,
            zip_code: row.get(2)?,
            state: row.get(3)?,
            birth_date: opt_date(row, 4)?,
            effective_date: opt_date(row, 5)?,
            carrier: row.get(6)?,
            failed_underwriting: row.get(7)?,
        })
    }

    fn row_to_instance(row: &Row) -> rusqlite::Result<CampaignInstance> {
        let metadata: Option<String> = row.get(11)?;
        Ok(CampaignInstance {
            id: row.get(0)?,
            campaign_type: row.get(1)?,
            instance_name: row.get(2)?,
            email_template: row.get(3)?,
            sms_template: row.get(4)?,
            active_start_date: opt_date(row, 5)?,
            active_end_date: opt_date(row, 6)?,
            spread_start_date: opt_date(row, 7)?,
            spread_end_date: opt_date(row, 8)?,
            target_states: split_list(row.get(9)?),
            target_carriers: split_list(row.get(10)?),
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        })
    }

    fn row_to_schedule(row: &Row) -> rusqlite::Result<EmailSchedule> {
        let key: String = row.get(1)?;
        let time: String = row.get(3)?;
        let status: String = row.get(4)?;
        let priority: i32 = row.get(6)?;
        let campaign_instance_id: Option<i64> = row.get(7)?;
        Ok(EmailSchedule {
            contact_id: row.get(0)?,
            email_type: email_type_from_row(&key, campaign_instance_id, priority),
            scheduled_date: req_date(row, 2)?,
            scheduled_time: NaiveTime::parse_from_str(&time, "%H:%M:%S").unwrap_or_default(),
            status: ScheduleStatus::from_parts(&status, row.get(5)?),
            priority,
            template_id: row.get(8)?,
            sms_template_id: row.get(9)?,
            campaign_instance_id,
            event_year: row.get(10)?,
            run_id: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        })
    }
}

const CONTACT_COLUMNS: &str =
    "id, email, zip_code, state, birth_date, effective_date, carrier, failed_underwriting";

const INSTANCE_COLUMNS: &str = "id, campaign_type, instance_name, email_template, sms_template, \
     active_start_date, active_end_date, spread_start_date, spread_end_date, \
     target_states, target_carriers, metadata";

const SCHEDULE_COLUMNS: &str = "contact_id, email_type, scheduled_send_date, scheduled_send_time, \
     status, skip_reason, priority, campaign_instance_id, email_template, sms_template, \
     event_year, scheduler_run_id";

impl ScheduleRepository for SqliteScheduleRepository {
    fn get_all_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE email IS NOT NULL AND email != '' ORDER BY id"
        ))?;
        let contacts = stmt
            .query_map([], Self::row_to_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load contacts")?;
        Ok(contacts)
    }

    fn count_contacts(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM contacts WHERE email IS NOT NULL AND email != ''",
                [],
                |row| row.get(0),
            )
            .context("Failed to count contacts")?;
        Ok(count as usize)
    }

    fn get_contact(&self, id: i64) -> Result<Option<Contact>> {
        let conn = self.conn()?;
        let contact = conn
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id],
                Self::row_to_contact,
            )
            .optional()
            .context("Failed to get contact")?;
        Ok(contact)
    }

    fn upsert_contacts(&self, contacts: &[Contact]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO contacts (id, email, zip_code, state, birth_date, effective_date, carrier, failed_underwriting)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    email = excluded.email,
                    zip_code = excluded.zip_code,
                    state = excluded.state,
                    birth_date = excluded.birth_date,
                    effective_date = excluded.effective_date,
                    carrier = excluded.carrier,
                    failed_underwriting = excluded.failed_underwriting
                "#,
            )?;
            for c in contacts {
                stmt.execute(params![
                    c.id,
                    c.email,
                    c.zip_code,
                    c.state,
                    c.birth_date.map(fmt_date),
                    c.effective_date.map(fmt_date),
                    c.carrier,
                    c.failed_underwriting,
                ])?;
            }
        }
        tx.commit().context("Failed to upsert contacts")?;
        Ok(contacts.len())
    }

    fn get_active_campaign_instances(&self, today: NaiveDate) -> Result<Vec<CampaignInstance>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM campaign_instances
             WHERE (active_start_date IS NULL OR active_start_date <= ?1)
               AND (active_end_date IS NULL OR active_end_date >= ?1)
             ORDER BY id"
        ))?;
        let instances = stmt
            .query_map(params![fmt_date(today)], Self::row_to_instance)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load active campaign instances")?;
        Ok(instances)
    }

    fn get_campaign_instance(&self, id: i64) -> Result<Option<CampaignInstance>> {
        let conn = self.conn()?;
        let instance = conn
            .query_row(
                &format!("SELECT {INSTANCE_COLUMNS} FROM campaign_instances WHERE id = ?1"),
                params![id],
                Self::row_to_instance,
            )
            .optional()
            .context("Failed to get campaign instance")?;
        Ok(instance)
    }

    fn get_campaign_type_config(&self, name: &str) -> Result<Option<CampaignTypeConfig>> {
        let conn = self.conn()?;
        let config = conn
            .query_row(
                "SELECT name, priority, days_before_event, respect_exclusion_windows,
                        target_all_contacts, spread_evenly, skip_failed_underwriting, enable_followups
                 FROM campaign_types WHERE name = ?1",
                params![name],
                |row| {
                    Ok(CampaignTypeConfig {
                        name: row.get(0)?,
                        priority: row.get(1)?,
                        days_before_event: row.get(2)?,
                        respect_exclusion_windows: row.get(3)?,
                        target_all_contacts: row.get(4)?,
                        spread_evenly: row.get(5)?,
                        skip_failed_underwriting: row.get(6)?,
                        enable_followups: row.get(7)?,
                    })
                },
            )
            .optional()
            .context("Failed to get campaign type")?;
        Ok(config)
    }

    fn get_contact_campaigns_for_instance(&self, instance_id: i64) -> Result<Vec<ContactCampaign>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT contact_id, campaign_instance_id, trigger_date, status
             FROM contact_campaigns
             WHERE campaign_instance_id = ?1 AND status IN (?2, ?3)
             ORDER BY contact_id",
        )?;
        let rows = stmt
            .query_map(
                params![
                    instance_id,
                    ACTIVE_ENROLLMENT_STATUSES[0],
                    ACTIVE_ENROLLMENT_STATUSES[1]
                ],
                |row| {
                    Ok(ContactCampaign {
                        contact_id: row.get(0)?,
                        campaign_instance_id: row.get(1)?,
                        trigger_date: opt_date(row, 2)?,
                        status: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load enrollments")?;
        Ok(rows)
    }

    fn get_contacts_for_campaign(&self, instance_id: i64) -> Result<Vec<EnrolledContact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.email, c.zip_code, c.state, c.birth_date, c.effective_date,
                    c.carrier, c.failed_underwriting, cc.trigger_date
             FROM contact_campaigns cc
             JOIN contacts c ON c.id = cc.contact_id
             WHERE cc.campaign_instance_id = ?1 AND cc.status IN (?2, ?3)
             ORDER BY c.id, cc.trigger_date",
        )?;
        let rows = stmt
            .query_map(
                params![
                    instance_id,
                    ACTIVE_ENROLLMENT_STATUSES[0],
                    ACTIVE_ENROLLMENT_STATUSES[1]
                ],
                |row| {
                    Ok(EnrolledContact {
                        contact: Self::row_to_contact(row)?,
                        trigger_date: opt_date(row, 8)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load campaign contacts")?;
        Ok(rows)
    }

    fn upsert_campaign_type(&self, config: &CampaignTypeConfig) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO campaign_types (name, priority, days_before_event, respect_exclusion_windows,
                target_all_contacts, spread_evenly, skip_failed_underwriting, enable_followups)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(name) DO UPDATE SET
                priority = excluded.priority,
                days_before_event = excluded.days_before_event,
                respect_exclusion_windows = excluded.respect_exclusion_windows,
                target_all_contacts = excluded.target_all_contacts,
                spread_evenly = excluded.spread_evenly,
                skip_failed_underwriting = excluded.skip_failed_underwriting,
                enable_followups = excluded.enable_followups
            "#,
            params![
                config.name,
                config.priority,
                config.days_before_event,
                config.respect_exclusion_windows,
                config.target_all_contacts,
                config.spread_evenly,
                config.skip_failed_underwriting,
                config.enable_followups,
            ],
        )
        .context("Failed to upsert campaign type")?;
        Ok(())
    }

    fn upsert_campaign_instance(&self, instance: &CampaignInstance) -> Result<i64> {
        let conn = self.conn()?;
        let metadata = instance
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let id: i64 = conn
            .query_row(
                r#"
                INSERT INTO campaign_instances (campaign_type, instance_name, email_template, sms_template,
                    active_start_date, active_end_date, spread_start_date, spread_end_date,
                    target_states, target_carriers, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(campaign_type, instance_name) DO UPDATE SET
                    email_template = excluded.email_template,
                    sms_template = excluded.sms_template,
                    active_start_date = excluded.active_start_date,
                    active_end_date = excluded.active_end_date,
                    spread_start_date = excluded.spread_start_date,
                    spread_end_date = excluded.spread_end_date,
                    target_states = excluded.target_states,
                    target_carriers = excluded.target_carriers,
                    metadata = excluded.metadata
                RETURNING id
                "#,
                params![
                    instance.campaign_type,
                    instance.instance_name,
                    instance.email_template,
                    instance.sms_template,
                    instance.active_start_date.map(fmt_date),
                    instance.active_end_date.map(fmt_date),
                    instance.spread_start_date.map(fmt_date),
                    instance.spread_end_date.map(fmt_date),
                    instance.target_states.join(","),
                    instance.target_carriers.join(","),
                    metadata,
                ],
                |row| row.get(0),
            )
            .context("Failed to upsert campaign instance")?;
        Ok(id)
    }

    fn enroll_contact(&self, enrollment: &ContactCampaign) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO contact_campaigns (contact_id, campaign_instance_id, trigger_date, status)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(contact_id, campaign_instance_id, trigger_date) DO UPDATE SET
                status = excluded.status
            "#,
            params![
                enrollment.contact_id,
                enrollment.campaign_instance_id,
                enrollment.trigger_date.map(fmt_date),
                enrollment.status,
            ],
        )
        .context("Failed to enroll contact")?;
        Ok(())
    }

    fn get_sent_emails_for_followup(&self, today: NaiveDate, lookback_days: i64) -> Result<Vec<SentEmail>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, contact_id, email_type, scheduled_send_date, campaign_instance_id
             FROM email_schedules
             WHERE status IN ('sent', 'delivered')
               AND scheduled_send_date >= ?1 AND scheduled_send_date <= ?2
               AND (email_type IN ('birthday', 'effective_date', 'aep', 'post_window')
                    OR (email_type LIKE 'campaign_%' AND campaign_instance_id IS NOT NULL))
             ORDER BY contact_id, scheduled_send_date",
        )?;
        let rows = stmt
            .query_map(
                params![fmt_date(add_days(today, -lookback_days)), fmt_date(today)],
                |row| {
                    Ok(SentEmail {
                        email_id: row.get(0)?,
                        contact_id: row.get(1)?,
                        email_type: row.get(2)?,
                        sent_date: req_date(row, 3)?,
                        campaign_instance_id: row.get(4)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load sent emails")?;
        Ok(rows)
    }

    fn get_contacts_with_followups(&self, since: NaiveDate) -> Result<HashSet<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT contact_id FROM email_schedules
             WHERE email_type LIKE 'followup_%'
               AND status IN ('pre-scheduled', 'scheduled', 'processing', 'sent', 'delivered')
               AND scheduled_send_date >= ?1",
        )?;
        let ids = stmt
            .query_map(params![fmt_date(since)], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<i64>>>()
            .context("Failed to load follow-up contacts")?;
        Ok(ids)
    }

    fn get_contact_interactions(&self, contact_id: i64, since: NaiveDate) -> Result<ContactInteractions> {
        let conn = self.conn()?;
        let since = fmt_date(since);

        let has_clicks: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM tracking_clicks WHERE contact_id = ?1 AND clicked_at >= ?2)",
                params![contact_id, since],
                |row| row.get(0),
            )
            .context("Failed to check clicks")?;

        let answers: Option<Option<String>> = conn
            .query_row(
                "SELECT metadata FROM contact_events
                 WHERE contact_id = ?1 AND event_type = 'eligibility_answered' AND created_at >= ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![contact_id, since],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load health answers")?;

        let has_health_answers = answers.is_some();
        let flags = answers
            .flatten()
            .and_then(|m| serde_json::from_str::<serde_json::Value>(&m).ok())
            .map(|v| answer_flags(&v))
            .unwrap_or_default();

        Ok(ContactInteractions {
            has_clicks,
            has_health_answers,
            answer_flags: flags,
        })
    }

    fn record_sent_email(&self, email: &SentEmail) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO email_schedules (id, contact_id, email_type, scheduled_send_date, status,
                campaign_instance_id, scheduler_run_id)
            VALUES (?1, ?2, ?3, ?4, 'sent', ?5, 'external')
            ON CONFLICT(contact_id, email_type, scheduled_send_date) DO UPDATE SET
                status = 'sent',
                campaign_instance_id = excluded.campaign_instance_id
            "#,
            params![
                email.email_id,
                email.contact_id,
                email.email_type,
                fmt_date(email.sent_date),
                email.campaign_instance_id,
            ],
        )
        .context("Failed to record sent email")?;
        Ok(())
    }

    fn record_click(&self, contact_id: i64, clicked_on: NaiveDate) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tracking_clicks (contact_id, clicked_at) VALUES (?1, ?2)",
            params![contact_id, fmt_date(clicked_on)],
        )
        .context("Failed to record click")?;
        Ok(())
    }

    fn record_health_answers(
        &self,
        contact_id: i64,
        answered_on: NaiveDate,
        answers: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO contact_events (contact_id, event_type, metadata, created_at)
             VALUES (?1, 'eligibility_answered', ?2, ?3)",
            params![contact_id, answers.to_string(), fmt_date(answered_on)],
        )
        .context("Failed to record health answers")?;
        Ok(())
    }

    fn get_recent_send_dates(&self, contact_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scheduled_send_date FROM email_schedules
             WHERE contact_id = ?1
               AND status IN ('scheduled', 'processing', 'sent', 'delivered')
               AND scheduled_send_date >= ?2 AND scheduled_send_date <= ?3
             ORDER BY scheduled_send_date",
        )?;
        let dates = stmt
            .query_map(params![contact_id, fmt_date(from), fmt_date(to)], |row| {
                req_date(row, 0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load send history")?;
        Ok(dates)
    }

    fn persist_schedules(&self, schedules: &[EmailSchedule]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO email_schedules (contact_id, email_type, scheduled_send_date, scheduled_send_time,
                    status, skip_reason, priority, campaign_instance_id, email_template, sms_template,
                    event_year, scheduler_run_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(contact_id, email_type, scheduled_send_date) DO UPDATE SET
                    scheduled_send_time = excluded.scheduled_send_time,
                    status = excluded.status,
                    skip_reason = excluded.skip_reason,
                    priority = excluded.priority,
                    campaign_instance_id = excluded.campaign_instance_id,
                    email_template = excluded.email_template,
                    sms_template = excluded.sms_template,
                    event_year = excluded.event_year,
                    scheduler_run_id = excluded.scheduler_run_id
                WHERE email_schedules.status IN ('pre-scheduled', 'skipped')
                "#,
            )?;
            for s in collapse_upsert_keys(schedules) {
                written += stmt.execute(params![
                    s.contact_id,
                    s.email_type.key(),
                    fmt_date(s.scheduled_date),
                    s.scheduled_time.format("%H:%M:%S").to_string(),
                    s.status.as_str(),
                    s.status.skip_reason(),
                    s.priority,
                    s.campaign_instance_id,
                    s.template_id,
                    s.sms_template_id,
                    s.event_year,
                    s.run_id,
                ])?;
            }
        }
        tx.commit().context("Failed to persist schedules")?;
        Ok(written)
    }

    fn clear_pending_schedules(&self, contact_ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for chunk in contact_ids.chunks(SQL_CHUNK) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!(
                "DELETE FROM email_schedules
                 WHERE status IN ('pre-scheduled', 'skipped') AND contact_id IN ({placeholders})"
            );
            let params: Vec<&dyn rusqlite::ToSql> =
                chunk.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            deleted += tx.execute(&query, params.as_slice())?;
        }
        tx.commit().context("Failed to clear pending schedules")?;
        Ok(deleted)
    }

    fn get_schedules_for_contact(&self, contact_id: i64) -> Result<Vec<EmailSchedule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM email_schedules
             WHERE contact_id = ?1 ORDER BY scheduled_send_date, email_type"
        ))?;
        let schedules = stmt
            .query_map(params![contact_id], Self::row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load schedules")?;
        Ok(schedules)
    }

    fn count_schedules(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM email_schedules", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn record_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO scheduler_checkpoints (scheduler_run_id, run_timestamp, status, contacts_checksum,
                schedules_checksum, contacts_processed, emails_scheduled, emails_skipped,
                error_message, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(scheduler_run_id) DO UPDATE SET
                status = excluded.status,
                schedules_checksum = excluded.schedules_checksum,
                contacts_processed = excluded.contacts_processed,
                emails_scheduled = excluded.emails_scheduled,
                emails_skipped = excluded.emails_skipped,
                error_message = excluded.error_message,
                completed_at = excluded.completed_at
            "#,
            params![
                checkpoint.run_id,
                checkpoint.run_timestamp.to_rfc3339(),
                checkpoint.status.as_str(),
                checkpoint.contacts_checksum,
                checkpoint.schedules_checksum,
                checkpoint.contacts_processed as i64,
                checkpoint.emails_scheduled as i64,
                checkpoint.emails_skipped as i64,
                checkpoint.error_message,
                checkpoint.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to record checkpoint")?;
        Ok(())
    }

    fn get_checkpoint(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        let conn = self.conn()?;
        let checkpoint = conn
            .query_row(
                "SELECT scheduler_run_id, run_timestamp, status, contacts_checksum, schedules_checksum,
                        contacts_processed, emails_scheduled, emails_skipped, error_message, completed_at
                 FROM scheduler_checkpoints WHERE scheduler_run_id = ?1",
                params![run_id],
                |row| {
                    let parse_ts = |raw: Option<String>| {
                        raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                            .map(|dt| dt.with_timezone(&chrono::Utc))
                    };
                    Ok(RunCheckpoint {
                        run_id: row.get(0)?,
                        run_timestamp: parse_ts(row.get(1)?).unwrap_or_default(),
                        status: row
                            .get::<_, String>(2)?
                            .parse()
                            .unwrap_or(crate::storage::checkpoint::CheckpointStatus::Failed),
                        contacts_checksum: row.get(3)?,
                        schedules_checksum: row.get(4)?,
                        contacts_processed: row.get::<_, i64>(5)? as usize,
                        emails_scheduled: row.get::<_, i64>(6)? as usize,
                        emails_skipped: row.get::<_, i64>(7)? as usize,
                        error_message: row.get(8)?,
                        completed_at: parse_ts(row.get(9)?),
                    })
                },
            )
            .optional()
            .context("Failed to get checkpoint")?;
        Ok(checkpoint)
    }
}

// ============================================================================
// Mock Implementation
// ============================================================================

type ScheduleKey = (i64, String, NaiveDate);

#[derive(Debug, Clone)]
struct HealthAnswer {
    contact_id: i64,
    answered_on: NaiveDate,
    answers: serde_json::Value,
}

/// In-memory mock implementation of ScheduleRepository
///
/// Useful for testing without database dependencies. Individual operations
/// can be made to fail with [`MockScheduleRepository::fail_operation`].
#[derive(Default)]
pub struct MockScheduleRepository {
    contacts: RwLock<BTreeMap<i64, Contact>>,
    campaign_types: RwLock<HashMap<String, CampaignTypeConfig>>,
    instances: RwLock<BTreeMap<i64, CampaignInstance>>,
    enrollments: RwLock<Vec<ContactCampaign>>,
    schedules: RwLock<BTreeMap<ScheduleKey, EmailSchedule>>,
    sent: RwLock<Vec<SentEmail>>,
    clicks: RwLock<Vec<(i64, NaiveDate)>>,
    answers: RwLock<Vec<HealthAnswer>>,
    checkpoints: RwLock<HashMap<String, RunCheckpoint>>,
    failing: RwLock<HashSet<String>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MockScheduleRepository {
    /// Create a new mock repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `operation` return an error
    pub fn fail_operation(&self, operation: &str) {
        write(&self.failing).insert(operation.to_string());
    }

    /// Stop failing all operations
    pub fn reset_failures(&self) {
        write(&self.failing).clear();
    }

    fn check(&self, operation: &str) -> Result<()> {
        if read(&self.failing).contains(operation) {
            anyhow::bail!("injected failure in {operation}");
        }
        Ok(())
    }

    /// Snapshot of every stored schedule
    pub fn all_schedules(&self) -> Vec<EmailSchedule> {
        read(&self.schedules).values().cloned().collect()
    }

    /// Store a schedule as-is, bypassing upsert rules
    pub fn insert_schedule(&self, schedule: EmailSchedule) {
        write(&self.schedules).insert(schedule.upsert_key(), schedule);
    }

    pub fn checkpoints(&self) -> Vec<RunCheckpoint> {
        read(&self.checkpoints).values().cloned().collect()
    }
}

impl ScheduleRepository for MockScheduleRepository {
    fn get_all_contacts(&self) -> Result<Vec<Contact>> {
        self.check("get_all_contacts")?;
        Ok(read(&self.contacts)
            .values()
            .filter(|c| !c.email.trim().is_empty())
            .cloned()
            .collect())
    }

    fn count_contacts(&self) -> Result<usize> {
        self.check("count_contacts")?;
        Ok(read(&self.contacts)
            .values()
            .filter(|c| !c.email.trim().is_empty())
            .count())
    }

    fn get_contact(&self, id: i64) -> Result<Option<Contact>> {
        self.check("get_contact")?;
        Ok(read(&self.contacts).get(&id).cloned())
    }

    fn upsert_contacts(&self, contacts: &[Contact]) -> Result<usize> {
        self.check("upsert_contacts")?;
        let mut stored = write(&self.contacts);
        for c in contacts {
            stored.insert(c.id, c.clone());
        }
        Ok(contacts.len())
    }

    fn get_active_campaign_instances(&self, today: NaiveDate) -> Result<Vec<CampaignInstance>> {
        self.check("get_active_campaign_instances")?;
        Ok(read(&self.instances)
            .values()
            .filter(|i| i.is_active_on(today))
            .cloned()
            .collect())
    }

    fn get_campaign_instance(&self, id: i64) -> Result<Option<CampaignInstance>> {
        self.check("get_campaign_instance")?;
        Ok(read(&self.instances).get(&id).cloned())
    }

    fn get_campaign_type_config(&self, name: &str) -> Result<Option<CampaignTypeConfig>> {
        self.check("get_campaign_type_config")?;
        Ok(read(&self.campaign_types).get(name).cloned())
    }

    fn get_contact_campaigns_for_instance(&self, instance_id: i64) -> Result<Vec<ContactCampaign>> {
        self.check("get_contact_campaigns_for_instance")?;
        let mut rows: Vec<ContactCampaign> = read(&self.enrollments)
            .iter()
            .filter(|e| {
                e.campaign_instance_id == instance_id
                    && ACTIVE_ENROLLMENT_STATUSES.contains(&e.status.as_str())
            })
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.contact_id);
        Ok(rows)
    }

    fn upsert_campaign_type(&self, config: &CampaignTypeConfig) -> Result<()> {
        self.check("upsert_campaign_type")?;
        write(&self.campaign_types).insert(config.name.clone(), config.clone());
        Ok(())
    }

    fn upsert_campaign_instance(&self, instance: &CampaignInstance) -> Result<i64> {
        self.check("upsert_campaign_instance")?;
        let mut instances = write(&self.instances);
        let existing = instances
            .values()
            .find(|i| {
                i.campaign_type == instance.campaign_type && i.instance_name == instance.instance_name
            })
            .map(|i| i.id);
        let id = existing.unwrap_or_else(|| instances.keys().next_back().copied().unwrap_or(0) + 1);
        instances.insert(
            id,
            CampaignInstance {
                id,
                ..instance.clone()
            },
        );
        Ok(id)
    }

    fn enroll_contact(&self, enrollment: &ContactCampaign) -> Result<()> {
        self.check("enroll_contact")?;
        let mut enrollments = write(&self.enrollments);
        enrollments.retain(|e| {
            !(e.contact_id == enrollment.contact_id
                && e.campaign_instance_id == enrollment.campaign_instance_id
                && e.trigger_date == enrollment.trigger_date)
        });
        enrollments.push(enrollment.clone());
        Ok(())
    }

    fn get_sent_emails_for_followup(&self, today: NaiveDate, lookback_days: i64) -> Result<Vec<SentEmail>> {
        self.check("get_sent_emails_for_followup")?;
        let start = add_days(today, -lookback_days);
        let mut rows: Vec<SentEmail> = read(&self.sent)
            .iter()
            .filter(|e| e.sent_date >= start && e.sent_date <= today)
            .filter(|e| match EmailType::parse_simple(&e.email_type) {
                Some(t) => t.is_anniversary(),
                None => {
                    EmailType::campaign_type_from_key(&e.email_type).is_some()
                        && e.campaign_instance_id.is_some()
                }
            })
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.contact_id, e.sent_date));
        Ok(rows)
    }

    fn get_contacts_with_followups(&self, since: NaiveDate) -> Result<HashSet<i64>> {
        self.check("get_contacts_with_followups")?;
        let mut ids: HashSet<i64> = read(&self.schedules)
            .values()
            .filter(|s| s.email_type.is_followup() && !s.status.is_skipped() && s.scheduled_date >= since)
            .map(|s| s.contact_id)
            .collect();
        ids.extend(
            read(&self.sent)
                .iter()
                .filter(|e| e.email_type.starts_with("followup_") && e.sent_date >= since)
                .map(|e| e.contact_id),
        );
        Ok(ids)
    }

    fn get_contact_interactions(&self, contact_id: i64, since: NaiveDate) -> Result<ContactInteractions> {
        self.check("get_contact_interactions")?;
        let has_clicks = read(&self.clicks)
            .iter()
            .any(|(id, on)| *id == contact_id && *on >= since);
        let answers = read(&self.answers);
        let latest = answers
            .iter()
            .filter(|a| a.contact_id == contact_id && a.answered_on >= since)
            .max_by_key(|a| a.answered_on);
        Ok(ContactInteractions {
            has_clicks,
            has_health_answers: latest.is_some(),
            answer_flags: latest.map(|a| answer_flags(&a.answers)).unwrap_or_default(),
        })
    }

    fn record_sent_email(&self, email: &SentEmail) -> Result<()> {
        self.check("record_sent_email")?;
        write(&self.sent).push(email.clone());
        Ok(())
    }

    fn record_click(&self, contact_id: i64, clicked_on: NaiveDate) -> Result<()> {
        self.check("record_click")?;
        write(&self.clicks).push((contact_id, clicked_on));
        Ok(())
    }

    fn record_health_answers(
        &self,
        contact_id: i64,
        answered_on: NaiveDate,
        answers: &serde_json::Value,
    ) -> Result<()> {
        self.check("record_health_answers")?;
        write(&self.answers).push(HealthAnswer {
            contact_id,
            answered_on,
            answers: answers.clone(),
        });
        Ok(())
    }

    fn get_recent_send_dates(&self, contact_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDate>> {
        self.check("get_recent_send_dates")?;
        let in_range = |d: NaiveDate| d >= from && d <= to;
        let mut dates: Vec<NaiveDate> = read(&self.schedules)
            .values()
            .filter(|s| {
                s.contact_id == contact_id
                    && matches!(
                        s.status,
                        ScheduleStatus::Scheduled | ScheduleStatus::Processing | ScheduleStatus::Sent
                    )
                    && in_range(s.scheduled_date)
            })
            .map(|s| s.scheduled_date)
            .collect();
        dates.extend(
            read(&self.sent)
                .iter()
                .filter(|e| e.contact_id == contact_id && in_range(e.sent_date))
                .map(|e| e.sent_date),
        );
        dates.sort();
        Ok(dates)
    }

    fn persist_schedules(&self, schedules: &[EmailSchedule]) -> Result<usize> {
        self.check("persist_schedules")?;
        let mut stored = write(&self.schedules);
        let mut written = 0;
        for s in collapse_upsert_keys(schedules) {
            let key = s.upsert_key();
            let replaceable = stored
                .get(&key)
                .map_or(true, |existing| existing.is_pre_scheduled() || existing.status.is_skipped());
            if replaceable {
                stored.insert(key, s.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    fn clear_pending_schedules(&self, contact_ids: &[i64]) -> Result<usize> {
        self.check("clear_pending_schedules")?;
        let ids: HashSet<i64> = contact_ids.iter().copied().collect();
        let mut stored = write(&self.schedules);
        let before = stored.len();
        stored.retain(|_, s| {
            !(ids.contains(&s.contact_id) && (s.is_pre_scheduled() || s.status.is_skipped()))
        });
        Ok(before - stored.len())
    }

    fn get_schedules_for_contact(&self, contact_id: i64) -> Result<Vec<EmailSchedule>> {
        self.check("get_schedules_for_contact")?;
        let mut rows: Vec<EmailSchedule> = read(&self.schedules)
            .values()
            .filter(|s| s.contact_id == contact_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.scheduled_date, a.email_type.key()).cmp(&(b.scheduled_date, b.email_type.key()))
        });
        Ok(rows)
    }

    fn count_schedules(&self) -> Result<usize> {
        self.check("count_schedules")?;
        Ok(read(&self.schedules).len())
    }

    fn record_checkpoint(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        self.check("record_checkpoint")?;
        write(&self.checkpoints).insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn get_checkpoint(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        self.check("get_checkpoint")?;
        Ok(read(&self.checkpoints).get(run_id).cloned())
    }
}

// ============================================================================
// Shared Repository Types
// ============================================================================

/// Thread-safe shared repository wrapper
pub type SharedScheduleRepository = Arc<dyn ScheduleRepository>;

/// Create a shared SQLite repository
pub fn create_sqlite_repository(path: impl AsRef<Path>) -> Result<SharedScheduleRepository> {
    let repo = SqliteScheduleRepository::new(path)?;
    Ok(Arc::new(repo))
}

/// Create a shared mock repository
pub fn create_mock_repository() -> SharedScheduleRepository {
    Arc::new(MockScheduleRepository::new())
}

// ============================================================================
// Tests
// ============================================================================
