//! crates/reading_log_core/src/domain.rs
//!
//! Defines the core data structures for the reading-log backend.
//! Every record is an explicit, tagged struct: optional fields are `Option`,
//! list fields default to empty, and nothing relies on implicit coalescing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

//=========================================================================================
// Reading Logs
//=========================================================================================

/// Completion state of a reading session. Only `Completed` and `Partial`
/// logs count toward statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Completed,
    Partial,
    #[serde(other)]
    Other,
}

impl LogStatus {
    pub fn counts_toward_stats(self) -> bool {
        matches!(self, LogStatus::Completed | LogStatus::Partial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Completed => "completed",
            LogStatus::Partial => "partial",
            LogStatus::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "completed" => LogStatus::Completed,
            "partial" => LogStatus::Partial,
            _ => LogStatus::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Invalid => "invalid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "valid" => Some(ValidationStatus::Valid),
            "invalid" => Some(ValidationStatus::Invalid),
            _ => None,
        }
    }
}

/// One recorded reading session for a student on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingLog {
    pub id: Uuid,
    pub student_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    /// The calendar day of the session, stored as a timestamp.
    pub date: DateTime<Utc>,
    pub minutes_read: i64,
    #[serde(default)]
    pub book_titles: Vec<String>,
    pub status: LogStatus,
    #[serde(default)]
    pub validation_status: Option<ValidationStatus>,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

impl ReadingLog {
    pub fn books_read(&self) -> i64 {
        self.book_titles.len() as i64
    }
}

/// The result of validating a newly created log, written back onto it.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValidation {
    Valid { validated_at: DateTime<Utc> },
    Invalid { errors: Vec<String> },
}

impl LogValidation {
    pub fn status(&self) -> ValidationStatus {
        match self {
            LogValidation::Valid { .. } => ValidationStatus::Valid,
            LogValidation::Invalid { .. } => ValidationStatus::Invalid,
        }
    }
}

//=========================================================================================
// Students, Parents and Classes
//=========================================================================================

/// Authoritative reading statistics, derived from the full log set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentStats {
    pub total_minutes_read: i64,
    pub total_books_read: i64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_reading_date: Option<DateTime<Utc>>,
    pub average_minutes_per_day: f64,
    pub total_reading_days: u32,
    /// Assigned by the store when the stats are written.
    pub last_updated: Option<DateTime<Utc>>,
}

impl StudentStats {
    /// The same figures with the store-assigned timestamp cleared.
    pub fn without_timestamp(&self) -> Self {
        Self {
            last_updated: None,
            ..self.clone()
        }
    }
}

/// A milestone earned by a student. Append-only; an id is never re-awarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub school_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub class_id: Option<Uuid>,
    #[serde(default)]
    pub parent_ids: Vec<Uuid>,
    #[serde(default)]
    pub stats: StudentStats,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_achievement(&self, achievement_id: &str) -> bool {
        self.achievements.iter().any(|a| a.id == achievement_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub id: Uuid,
    pub school_id: Uuid,
    #[serde(default)]
    pub linked_children: Vec<Uuid>,
    /// Device token for push delivery, if the parent registered one.
    #[serde(default)]
    pub push_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassStats {
    pub total_minutes_read: i64,
    pub total_books_read: i64,
    pub active_students: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub stats: ClassStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    /// Hour of day (0-23) at which quiet hours begin.
    pub start: u32,
    /// Hour of day (0-23) at which quiet hours end.
    pub end: u32,
}

impl QuietHours {
    pub fn is_active_at(&self, hour: u32) -> bool {
        self.enabled && (hour >= self.start || hour < self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
}

//=========================================================================================
// Staff and Callers
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StaffRole {
    SchoolAdmin,
    Teacher,
    #[serde(other)]
    Other,
}

impl StaffRole {
    pub fn can_issue_link_codes(self) -> bool {
        matches!(self, StaffRole::SchoolAdmin | StaffRole::Teacher)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StaffRole::SchoolAdmin => "schoolAdmin",
            StaffRole::Teacher => "teacher",
            StaffRole::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "schoolAdmin" => StaffRole::SchoolAdmin,
            "teacher" => StaffRole::Teacher,
            _ => StaffRole::Other,
        }
    }
}

/// A school user account (administrator, teacher, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub role: StaffRole,
}

/// The authenticated identity behind a callable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
}

//=========================================================================================
// Link Codes
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkCodeStatus {
    Active,
    Used,
    Expired,
    Revoked,
}

impl LinkCodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkCodeStatus::Active => "active",
            LinkCodeStatus::Used => "used",
            LinkCodeStatus::Expired => "expired",
            LinkCodeStatus::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(LinkCodeStatus::Active),
            "used" => Some(LinkCodeStatus::Used),
            "expired" => Some(LinkCodeStatus::Expired),
            "revoked" => Some(LinkCodeStatus::Revoked),
            _ => None,
        }
    }
}

/// The student(s) a link code grants access to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkTarget {
    Single {
        #[serde(rename = "studentId")]
        student_id: Uuid,
    },
    Bulk {
        #[serde(rename = "studentIds")]
        student_ids: Vec<Uuid>,
    },
}

impl LinkTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            LinkTarget::Single { .. } => "single",
            LinkTarget::Bulk { .. } => "bulk",
        }
    }

    /// The single student of a `single` code.
    pub fn student_id(&self) -> Option<Uuid> {
        match self {
            LinkTarget::Single { student_id } => Some(*student_id),
            LinkTarget::Bulk { .. } => None,
        }
    }

    pub fn student_ids(&self) -> Vec<Uuid> {
        match self {
            LinkTarget::Single { student_id } => vec![*student_id],
            LinkTarget::Bulk { student_ids } => student_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCode {
    pub id: Uuid,
    pub code: String,
    #[serde(flatten)]
    pub target: LinkTarget,
    pub school_id: Uuid,
    pub status: LinkCodeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoke_reason: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Denormalised student display data embedded in bulk link codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

impl From<&Student> for StudentSummary {
    fn from(student: &Student) -> Self {
        Self {
            student_id: student.id,
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            full_name: student.full_name(),
        }
    }
}

//=========================================================================================
// Rate Limiting and Audit
//=========================================================================================

/// Per-IP verification attempt counter. Ephemeral, not business data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    CodeVerificationFailed,
    CodeVerificationSuccess,
    ParentSelfUnlink,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::CodeVerificationFailed => "code_verification_failed",
            AuditKind::CodeVerificationSuccess => "code_verification_success",
            AuditKind::ParentSelfUnlink => "parent_self_unlink",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code_verification_failed" => Some(AuditKind::CodeVerificationFailed),
            "code_verification_success" => Some(AuditKind::CodeVerificationSuccess),
            "parent_self_unlink" => Some(AuditKind::ParentSelfUnlink),
            _ => None,
        }
    }
}

/// An append-only audit record. Never mutated or deleted by this system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AuditKind,
    pub code: Option<String>,
    pub code_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub school_id: Option<Uuid>,
    pub parent_user_id: Option<Uuid>,
    pub ip: Option<String>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(kind: AuditKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            code: None,
            code_id: None,
            student_id: None,
            school_id: None,
            parent_user_id: None,
            ip: None,
            reason: None,
            timestamp,
        }
    }
}

//=========================================================================================
// Change Events and Outbound Messages
//=========================================================================================

/// A create/update/delete of one reading log, as delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingLogChange {
    pub school_id: Uuid,
    pub log_id: Uuid,
    #[serde(default)]
    pub before: Option<ReadingLog>,
    #[serde(default)]
    pub after: Option<ReadingLog>,
}

impl ReadingLogChange {
    pub fn is_creation(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    /// Every student whose logs the write touched: the current owner first,
    /// then the previous owner when an update moved the log.
    pub fn student_ids(&self) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(2);
        for log in [self.after.as_ref(), self.before.as_ref()].into_iter().flatten() {
            if let Some(student_id) = log.student_id {
                if !ids.contains(&student_id) {
                    ids.push(student_id);
                }
            }
        }
        ids
    }
}

/// An update of one student document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentChange {
    pub school_id: Uuid,
    pub student_id: Uuid,
    pub before: Student,
    pub after: Student,
}

impl StudentChange {
    pub fn stats_changed(&self) -> bool {
        self.before.stats != self.after.stats
    }
}

/// A push notification addressed to one device token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}
