//! services/api/src/web/protocol.rs
//!
//! Defines the JSON request and response bodies of the HTTP surface.
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use reading_log_core::domain::{ReadingLog, Student, StudentSummary};
use reading_log_core::link_codes::verifier::INVALID_FORMAT;
use reading_log_core::{
    IssuedBulkCode, LogReactionReport, ReadingLogChange, ReminderReport, StudentChange,
    VerifiedLinkCode,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::extract::RequestBody;

//=========================================================================================
// Callables
//=========================================================================================

// --- verify-link-code ---

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyLinkCodeRequest {
    /// A missing code is treated like a malformed one.
    #[serde(default)]
    pub code: Option<String>,
}

impl RequestBody for VerifyLinkCodeRequest {
    const INVALID: &'static str = INVALID_FORMAT;
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkCodeData {
    pub id: Uuid,
    pub code: String,
    pub student_id: Option<Uuid>,
    pub student_ids: Vec<Uuid>,
    pub school_id: Uuid,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

impl From<VerifiedLinkCode> for LinkCodeData {
    fn from(verified: VerifiedLinkCode) -> Self {
        Self {
            id: verified.id,
            code: verified.code,
            student_id: verified.student_id,
            student_ids: verified.student_ids,
            school_id: verified.school_id,
            status: verified.status.as_str().to_string(),
            expires_at: verified.expires_at,
            metadata: verified.metadata,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyLinkCodeResponse {
    pub success: bool,
    pub code_data: LinkCodeData,
}

// --- create-bulk-link-code ---

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBulkLinkCodeRequest {
    pub student_ids: Vec<Uuid>,
    pub school_id: Uuid,
    /// Days until the code expires. Defaults to 365.
    #[serde(default)]
    pub validity_days: Option<u32>,
}

impl RequestBody for CreateBulkLinkCodeRequest {
    const INVALID: &'static str = "Valid student IDs and a School ID are required.";
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummaryDto {
    pub student_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

impl From<StudentSummary> for StudentSummaryDto {
    fn from(summary: StudentSummary) -> Self {
        Self {
            student_id: summary.student_id,
            first_name: summary.first_name,
            last_name: summary.last_name,
            full_name: summary.full_name,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBulkLinkCodeResponse {
    pub success: bool,
    pub code_id: Uuid,
    pub code: String,
    pub student_count: usize,
    pub students: Vec<StudentSummaryDto>,
    pub expires_at: DateTime<Utc>,
}

impl From<IssuedBulkCode> for CreateBulkLinkCodeResponse {
    fn from(issued: IssuedBulkCode) -> Self {
        Self {
            success: true,
            code_id: issued.code_id,
            code: issued.code,
            student_count: issued.student_count,
            students: issued.students.into_iter().map(Into::into).collect(),
            expires_at: issued.expires_at,
        }
    }
}

// --- unlink-parent ---

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlinkParentRequest {
    pub student_id: Uuid,
    pub school_id: Uuid,
}

impl RequestBody for UnlinkParentRequest {
    const INVALID: &'static str = "Student ID and School ID are required.";
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnlinkParentResponse {
    pub success: bool,
    pub message: String,
}

//=========================================================================================
// Trigger Delivery
//=========================================================================================

/// A reading log was created, updated or deleted.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingLogWrittenRequest {
    pub school_id: Uuid,
    pub log_id: Uuid,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub before: Option<ReadingLog>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub after: Option<ReadingLog>,
}

impl RequestBody for ReadingLogWrittenRequest {
    const INVALID: &'static str = "Malformed reading log change event.";
}

impl From<ReadingLogWrittenRequest> for ReadingLogChange {
    fn from(request: ReadingLogWrittenRequest) -> Self {
        Self {
            school_id: request.school_id,
            log_id: request.log_id,
            before: request.before,
            after: request.after,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingLogWrittenResponse {
    pub stats_updated: bool,
    /// Every class whose rollup was rebuilt.
    pub classes_updated: Vec<Uuid>,
    /// `valid` or `invalid` when the log was validated.
    pub validation: Option<String>,
    /// Ids of achievements awarded as a follow-up.
    pub achievements: Vec<String>,
}

impl From<LogReactionReport> for ReadingLogWrittenResponse {
    fn from(report: LogReactionReport) -> Self {
        Self {
            stats_updated: report.stats_updated,
            classes_updated: report.classes_updated,
            validation: report.validation.map(|v| v.as_str().to_string()),
            achievements: report.achievements,
        }
    }
}

/// A student document changed.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentUpdatedRequest {
    pub school_id: Uuid,
    pub student_id: Uuid,
    #[schema(value_type = Object)]
    pub before: Student,
    #[schema(value_type = Object)]
    pub after: Student,
}

impl RequestBody for StudentUpdatedRequest {
    const INVALID: &'static str = "Malformed student change event.";
}

impl From<StudentUpdatedRequest> for StudentChange {
    fn from(request: StudentUpdatedRequest) -> Self {
        Self {
            school_id: request.school_id,
            student_id: request.student_id,
            before: request.before,
            after: request.after,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StudentUpdatedResponse {
    /// Ids of the achievements awarded by this change.
    pub achievements: Vec<String>,
}

//=========================================================================================
// Scheduled Jobs and Health
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct ExpireLinkCodesResponse {
    pub expired: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRemindersResponse {
    pub sent: usize,
    pub skipped_schools: usize,
}

impl From<ReminderReport> for ReadingRemindersResponse {
    fn from(report: ReminderReport) -> Self {
        Self {
            sent: report.sent,
            skipped_schools: report.skipped_schools,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
