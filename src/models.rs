// Core data structures for the email scheduler

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Targeting sentinel meaning "every state / every carrier"
pub const TARGET_ALL: &str = "ALL";

/// Contact (policyholder) read from storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Contact {
    pub id: i64,
    pub email: String,
    pub zip_code: Option<String>,
    pub state: Option<String>, // two-letter code, may be derived from zip_code
    pub birth_date: Option<NaiveDate>,
    pub effective_date: Option<NaiveDate>,
    pub carrier: Option<String>,
    pub failed_underwriting: bool,
}

impl Contact {
    /// Create a contact with only identity fields set
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_zip(mut self, zip: impl Into<String>) -> Self {
        self.zip_code = Some(zip.into());
        self
    }

    pub fn with_birth_date(mut self, date: NaiveDate) -> Self {
        self.birth_date = Some(date);
        self
    }

    pub fn with_effective_date(mut self, date: NaiveDate) -> Self {
        self.effective_date = Some(date);
        self
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self
    }

    pub fn with_failed_underwriting(mut self, failed: bool) -> Self {
        self.failed_underwriting = failed;
        self
    }

    /// Normalized state code, if any
    pub fn state_code(&self) -> Option<&str> {
        self.state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether the contact carries a usable location
    pub fn has_location(&self) -> bool {
        self.state_code().is_some()
    }
}

// ============================================================================
// Email Types
// ============================================================================

/// Yearly recurring email kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnniversaryKind {
    Birthday,
    EffectiveDate,
    Aep,
    PostWindow,
}

impl AnniversaryKind {
    pub fn all() -> Vec<Self> {
        vec![Self::Birthday, Self::EffectiveDate, Self::Aep, Self::PostWindow]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Birthday => "birthday",
            Self::EffectiveDate => "effective_date",
            Self::Aep => "aep",
            Self::PostWindow => "post_window",
        }
    }

    /// Fixed priority (lower wins)
    pub fn priority(&self) -> i32 {
        match self {
            Self::Birthday => 10,
            Self::EffectiveDate => 20,
            Self::Aep => 30,
            Self::PostWindow => 40,
        }
    }
}

/// Behavior-driven follow-up tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupKind {
    Cold,
    ClickedNoHq,
    HqNoYes,
    HqWithYes,
}

impl FollowupKind {
    pub fn all() -> Vec<Self> {
        vec![Self::Cold, Self::ClickedNoHq, Self::HqNoYes, Self::HqWithYes]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "followup_1_cold",
            Self::ClickedNoHq => "followup_2_clicked_no_hq",
            Self::HqNoYes => "followup_3_hq_no_yes",
            Self::HqWithYes => "followup_4_hq_with_yes",
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            Self::HqWithYes => 1,
            Self::HqNoYes => 2,
            Self::ClickedNoHq => 3,
            Self::Cold => 4,
        }
    }

    pub fn default_template(&self) -> &'static str {
        match self {
            Self::Cold => "followup_cold_template",
            Self::ClickedNoHq => "followup_clicked_template",
            Self::HqNoYes => "followup_hq_no_conditions_template",
            Self::HqWithYes => "followup_hq_with_conditions_template",
        }
    }
}

/// Email type attached to every schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum EmailType {
    Anniversary {
        kind: AnniversaryKind,
    },
    Campaign {
        campaign_type: String,
        instance_id: i64,
        respect_exclusions: bool,
        days_before_event: i64,
        priority: i32,
    },
    Followup {
        kind: FollowupKind,
    },
}

impl EmailType {
    pub fn anniversary(kind: AnniversaryKind) -> Self {
        Self::Anniversary { kind }
    }

    pub fn followup(kind: FollowupKind) -> Self {
        Self::Followup { kind }
    }

    /// Priority consistent with the type
    pub fn priority(&self) -> i32 {
        match self {
            Self::Anniversary { kind } => kind.priority(),
            Self::Campaign { priority, .. } => *priority,
            Self::Followup { kind } => kind.priority(),
        }
    }

    /// Storage / hashing key, e.g. `birthday` or `campaign_rate_increase`
    pub fn key(&self) -> String {
        match self {
            Self::Anniversary { kind } => kind.as_str().to_string(),
            Self::Campaign { campaign_type, .. } => format!("campaign_{campaign_type}"),
            Self::Followup { kind } => kind.as_str().to_string(),
        }
    }

    pub fn default_template(&self) -> Option<String> {
        match self {
            Self::Anniversary { kind } => Some(format!("{}_default", kind.as_str())),
            Self::Campaign { .. } => None,
            Self::Followup { kind } => Some(kind.default_template().to_string()),
        }
    }

    pub fn campaign_instance_id(&self) -> Option<i64> {
        match self {
            Self::Campaign { instance_id, .. } => Some(*instance_id),
            _ => None,
        }
    }

    pub fn is_campaign(&self) -> bool {
        matches!(self, Self::Campaign { .. })
    }

    pub fn is_anniversary(&self) -> bool {
        matches!(self, Self::Anniversary { .. })
    }

    pub fn is_followup(&self) -> bool {
        matches!(self, Self::Followup { .. })
    }

    pub fn is_effective_date(&self) -> bool {
        matches!(
            self,
            Self::Anniversary {
                kind: AnniversaryKind::EffectiveDate
            }
        )
    }

    /// Parse a non-campaign storage key
    pub fn parse_simple(key: &str) -> Option<Self> {
        AnniversaryKind::all()
            .into_iter()
            .find(|k| k.as_str() == key)
            .map(Self::anniversary)
            .or_else(|| {
                FollowupKind::all()
                    .into_iter()
                    .find(|k| k.as_str() == key)
                    .map(Self::followup)
            })
    }

    /// Extract the campaign type name from a `campaign_<type>` key
    pub fn campaign_type_from_key(key: &str) -> Option<&str> {
        key.strip_prefix("campaign_").filter(|s| !s.is_empty())
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ============================================================================
// Schedule Status
// ============================================================================

/// Lifecycle status of a schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ScheduleStatus {
    PreScheduled,
    Skipped(String),
    Scheduled,
    Processing,
    Sent,
}

impl ScheduleStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreScheduled => "pre-scheduled",
            Self::Skipped(_) => "skipped",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Sent => "sent",
        }
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Self::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_pre_scheduled(&self) -> bool {
        matches!(self, Self::PreScheduled)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// Rebuild from the stored status column and skip reason
    pub fn from_parts(status: &str, reason: Option<String>) -> Self {
        match status {
            "pre-scheduled" => Self::PreScheduled,
            "skipped" => Self::Skipped(reason.unwrap_or_default()),
            "scheduled" => Self::Scheduled,
            "processing" => Self::Processing,
            "sent" | "delivered" => Self::Sent,
            other => Self::Skipped(format!("unknown status '{other}'")),
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

// ============================================================================
// Email Schedule
// ============================================================================

/// One planned send
///
/// Pipeline stages never mutate a schedule in place; they derive a new one
/// through [`EmailSchedule::with_status`] or [`EmailSchedule::with_date`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSchedule {
    pub contact_id: i64,
    pub email_type: EmailType,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: ScheduleStatus,
    pub priority: i32,
    pub template_id: Option<String>,
    pub sms_template_id: Option<String>,
    pub campaign_instance_id: Option<i64>,
    pub event_year: Option<i32>,
    pub run_id: String,
}

impl EmailSchedule {
    /// Create a pre-scheduled email with type-derived priority and template
    pub fn new(
        contact_id: i64,
        email_type: EmailType,
        scheduled_date: NaiveDate,
        scheduled_time: NaiveTime,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            contact_id,
            priority: email_type.priority(),
            template_id: email_type.default_template(),
            sms_template_id: None,
            campaign_instance_id: email_type.campaign_instance_id(),
            email_type,
            scheduled_date,
            scheduled_time,
            status: ScheduleStatus::PreScheduled,
            event_year: None,
            run_id: run_id.into(),
        }
    }

    pub fn with_status(&self, status: ScheduleStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn with_date(&self, scheduled_date: NaiveDate) -> Self {
        Self {
            scheduled_date,
            ..self.clone()
        }
    }

    /// Downgrade to skipped; already skipped schedules keep their first reason
    pub fn skip(&self, reason: impl Into<String>) -> Self {
        if self.status.is_skipped() {
            return self.clone();
        }
        self.with_status(ScheduleStatus::skipped(reason))
    }

    pub fn with_templates(mut self, email: Option<String>, sms: Option<String>) -> Self {
        if email.is_some() {
            self.template_id = email;
        }
        self.sms_template_id = sms;
        self
    }

    pub fn with_event_year(mut self, year: i32) -> Self {
        self.event_year = Some(year);
        self
    }

    pub fn is_pre_scheduled(&self) -> bool {
        self.status.is_pre_scheduled()
    }

    /// Idempotency key used by persistence
    pub fn upsert_key(&self) -> (i64, String, NaiveDate) {
        (self.contact_id, self.email_type.key(), self.scheduled_date)
    }
}

// ============================================================================
// Campaigns
// ============================================================================

/// A concrete run of a campaign type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CampaignInstance {
    pub id: i64,
    pub campaign_type: String,
    pub instance_name: String,
    pub email_template: Option<String>,
    pub sms_template: Option<String>,
    pub active_start_date: Option<NaiveDate>,
    pub active_end_date: Option<NaiveDate>,
    pub spread_start_date: Option<NaiveDate>,
    pub spread_end_date: Option<NaiveDate>,
    pub target_states: Vec<String>,
    pub target_carriers: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

impl CampaignInstance {
    /// Whether this instance runs on `date`
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.active_start_date.map_or(true, |start| start <= date)
            && self.active_end_date.map_or(true, |end| end >= date)
    }

    /// Whether any non-universal targeting applies
    pub fn has_targeting(&self) -> bool {
        is_targeted(&self.target_states) || is_targeted(&self.target_carriers)
    }

    /// Check state / carrier targeting for a contact
    pub fn targets(&self, contact: &Contact) -> bool {
        let state_ok = !is_targeted(&self.target_states)
            || contact
                .state_code()
                .is_some_and(|s| self.target_states.iter().any(|t| t.eq_ignore_ascii_case(s)));
        let carrier_ok = !is_targeted(&self.target_carriers)
            || contact.carrier.as_deref().is_some_and(|c| {
                self.target_carriers
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(c))
            });
        state_ok && carrier_ok
    }

    /// Follow-up template override from instance metadata
    ///
    /// Metadata layout: `{"followup_templates": {"<type>": {"email": .., "sms": ..}}}`
    pub fn followup_template(&self, kind: FollowupKind) -> (Option<String>, Option<String>) {
        let entry = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("followup_templates"))
            .and_then(|t| t.get(kind.as_str()));
        let field = |name: &str| {
            entry
                .and_then(|e| e.get(name))
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        (field("email"), field("sms"))
    }
}

fn is_targeted(targets: &[String]) -> bool {
    !targets.is_empty() && !targets.iter().any(|t| t.eq_ignore_ascii_case(TARGET_ALL))
}

/// Behavior flags of a campaign type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignTypeConfig {
    pub name: String,
    pub priority: i32,
    pub days_before_event: i64,
    pub respect_exclusion_windows: bool,
    pub target_all_contacts: bool,
    pub spread_evenly: bool,
    pub skip_failed_underwriting: bool,
    pub enable_followups: bool,
}

impl CampaignTypeConfig {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            days_before_event: 0,
            respect_exclusion_windows: true,
            target_all_contacts: false,
            spread_evenly: false,
            skip_failed_underwriting: false,
            enable_followups: true,
        }
    }

    /// Email type for one instance of this campaign type
    pub fn email_type(&self, instance_id: i64) -> EmailType {
        EmailType::Campaign {
            campaign_type: self.name.clone(),
            instance_id,
            respect_exclusions: self.respect_exclusion_windows,
            days_before_event: self.days_before_event,
            priority: self.priority,
        }
    }
}

/// Enrollment row linking a contact to a campaign instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCampaign {
    pub contact_id: i64,
    pub campaign_instance_id: i64,
    pub trigger_date: Option<NaiveDate>,
    pub status: String,
}

/// Contact joined with its enrollment trigger date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledContact {
    pub contact: Contact,
    pub trigger_date: Option<NaiveDate>,
}

// ============================================================================
// Follow-up Inputs
// ============================================================================

/// Previously sent email considered for a follow-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentEmail {
    pub email_id: i64,
    pub contact_id: i64,
    pub email_type: String,
    pub sent_date: NaiveDate,
    pub campaign_instance_id: Option<i64>,
}

/// Engagement observed since an email was sent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactInteractions {
    pub has_clicks: bool,
    pub has_health_answers: bool,
    /// Answer keys flagged true in the health-question metadata
    pub answer_flags: Vec<String>,
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-day send volume, derived from a schedule set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total: usize,
    pub effective_date: usize,
    pub campaign: usize,
    pub anniversary: usize,
    pub followup: usize,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total: 0,
            effective_date: 0,
            campaign: 0,
            anniversary: 0,
            followup: 0,
        }
    }

    /// Count one schedule into this day
    pub fn add(mut self, email_type: &EmailType) -> Self {
        self.total += 1;
        if email_type.is_effective_date() {
            self.effective_date += 1;
        }
        match email_type {
            EmailType::Anniversary { .. } => self.anniversary += 1,
            EmailType::Campaign { .. } => self.campaign += 1,
            EmailType::Followup { .. } => self.followup += 1,
        }
        self
    }
}
