//! crates/reading_log_core/src/link_codes/verifier.rs
//!
//! Server-side verification of a link code typed in by a parent.
//!
//! Every outcome except a rate-limit rejection leaves exactly one audit entry.
//! A rate-limited call does no lookup and is only visible as a warning log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use super::normalize_code;
use crate::domain::{AuditKind, AuditLogEntry, LinkCode, LinkCodeStatus};
use crate::error::{ServiceError, ServiceResult, StepError};
use crate::ports::{AuditSink, Clock, DatabaseService, PortResult, RateDecision, RateLimiter};
use crate::rate_limit::verification_key;

pub const INVALID_FORMAT: &str = "Invalid code format. Code must be 8 alphanumeric characters.";
const TOO_MANY_ATTEMPTS: &str = "Too many attempts. Please wait a minute and try again.";
const VERIFY_FAILED: &str = "An error occurred while verifying the code. Please try again.";

/// Why a well-formed code was refused. Recorded as the audit `reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    CodeNotFound,
    CodeAlreadyUsed,
    CodeExpired,
    CodeRevoked,
}

impl VerificationFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationFailure::CodeNotFound => "code_not_found",
            VerificationFailure::CodeAlreadyUsed => "code_already_used",
            VerificationFailure::CodeExpired => "code_expired",
            VerificationFailure::CodeRevoked => "code_revoked",
        }
    }

    fn into_error(self, code: Option<&LinkCode>) -> ServiceError {
        match self {
            VerificationFailure::CodeNotFound => ServiceError::NotFound(
                "Invalid or expired code. Please check with your school.".to_string(),
            ),
            VerificationFailure::CodeAlreadyUsed => ServiceError::Precondition(
                "This code has already been used by another parent.".to_string(),
            ),
            VerificationFailure::CodeExpired => ServiceError::Precondition(
                "This code has expired. Please request a new code.".to_string(),
            ),
            VerificationFailure::CodeRevoked => ServiceError::Precondition(
                code.and_then(|c| c.revoke_reason.clone())
                    .unwrap_or_else(|| "This code has been revoked.".to_string()),
            ),
        }
    }
}

/// The caller-safe projection of a verified code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedLinkCode {
    pub id: Uuid,
    pub code: String,
    pub student_id: Option<Uuid>,
    pub student_ids: Vec<Uuid>,
    pub school_id: Uuid,
    pub status: LinkCodeStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl From<&LinkCode> for VerifiedLinkCode {
    fn from(code: &LinkCode) -> Self {
        Self {
            id: code.id,
            code: code.code.clone(),
            student_id: code.target.student_id(),
            student_ids: code.target.student_ids(),
            school_id: code.school_id,
            status: code.status,
            expires_at: code.expires_at,
            metadata: if code.metadata.is_null() {
                serde_json::json!({})
            } else {
                code.metadata.clone()
            },
        }
    }
}

/// Picks the code a lookup by value refers to: the active one if any,
/// otherwise the most recently created.
fn select_code(mut candidates: Vec<LinkCode>) -> Option<LinkCode> {
    if let Some(pos) = candidates
        .iter()
        .position(|c| c.status == LinkCodeStatus::Active)
    {
        return Some(candidates.swap_remove(pos));
    }
    candidates.into_iter().max_by_key(|c| c.created_at)
}

pub struct CodeVerifier {
    db: Arc<dyn DatabaseService>,
    rate_limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl CodeVerifier {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        rate_limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            rate_limiter,
            audit,
            clock,
        }
    }

    /// Verifies `raw_code` on behalf of the client at `client_ip`.
    pub async fn verify(&self, raw_code: &str, client_ip: &str) -> ServiceResult<VerifiedLinkCode> {
        let code = normalize_code(raw_code)
            .ok_or_else(|| ServiceError::InvalidInput(INVALID_FORMAT.to_string()))?;

        match self.verify_normalized(&code, client_ip).await {
            Ok(verified) => Ok(verified),
            Err(StepError::Rejected(e)) => Err(e),
            Err(StepError::Store(e)) => {
                error!(code = %code, ip = %client_ip, error = %e, "Unexpected error in link code verification");
                Err(ServiceError::Internal(VERIFY_FAILED.to_string()))
            }
        }
    }

    async fn verify_normalized(&self, code: &str, client_ip: &str) -> Result<VerifiedLinkCode, StepError> {
        let now = self.clock.now();

        // --- Rate Limit ---
        let decision = self
            .rate_limiter
            .check_and_record(&verification_key(client_ip), now)
            .await?;
        if let RateDecision::Exceeded { retry_after_secs } = decision {
            warn!(ip = %client_ip, code = %code, "Rate limit exceeded for code verification");
            return Err(ServiceError::RateExceeded {
                message: TOO_MANY_ATTEMPTS.to_string(),
                retry_after_secs,
            }
            .into());
        }

        // --- Lookup ---
        let Some(link_code) = select_code(self.db.find_link_codes_by_value(code).await?) else {
            return Err(self
                .reject(code, client_ip, VerificationFailure::CodeNotFound, None)
                .await);
        };

        // --- Status, then Expiry ---
        let failure = match link_code.status {
            LinkCodeStatus::Active => None,
            LinkCodeStatus::Used => Some(VerificationFailure::CodeAlreadyUsed),
            LinkCodeStatus::Expired => Some(VerificationFailure::CodeExpired),
            LinkCodeStatus::Revoked => Some(VerificationFailure::CodeRevoked),
        }
        .or_else(|| {
            link_code
                .expires_at
                .filter(|at| *at < now)
                .map(|_| VerificationFailure::CodeExpired)
        });
        if let Some(failure) = failure {
            return Err(self
                .reject(code, client_ip, failure, Some(&link_code))
                .await);
        }

        // --- Success ---
        let mut entry = AuditLogEntry::new(AuditKind::CodeVerificationSuccess, now);
        entry.code = Some(code.to_string());
        entry.code_id = Some(link_code.id);
        entry.student_id = link_code.target.student_id();
        entry.school_id = Some(link_code.school_id);
        entry.ip = Some(client_ip.to_string());
        self.audit.append(entry).await?;

        Ok(VerifiedLinkCode::from(&link_code))
    }

    /// Audits a refused code and returns the error for the caller.
    /// A failure to write the audit entry takes precedence.
    async fn reject(
        &self,
        code: &str,
        client_ip: &str,
        failure: VerificationFailure,
        link_code: Option<&LinkCode>,
    ) -> StepError {
        match self.audit_failure(code, client_ip, failure).await {
            Ok(()) => StepError::Rejected(failure.into_error(link_code)),
            Err(e) => StepError::Store(e),
        }
    }

    async fn audit_failure(
        &self,
        code: &str,
        client_ip: &str,
        failure: VerificationFailure,
    ) -> PortResult<()> {
        let mut entry = AuditLogEntry::new(AuditKind::CodeVerificationFailed, self.clock.now());
        entry.code = Some(code.to_string());
        entry.reason = Some(failure.as_str().to_string());
        entry.ip = Some(client_ip.to_string());
        self.audit.append(entry).await
    }
}
