//! crates/reading_log_core/src/link_codes/bulk.rs
//!
//! Staff-issued link codes that cover several students (typically siblings).

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::generate_code;
use crate::domain::{Caller, LinkCode, LinkCodeStatus, LinkTarget, Student, StudentSummary};
use crate::error::{ServiceError, ServiceResult, StepError};
use crate::ports::{Clock, DatabaseService, PortError};

pub const MAX_STUDENTS_PER_CODE: usize = 10;
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Upper bound on fresh codes drawn before giving up on finding a free value.
const MAX_GENERATION_ATTEMPTS: usize = 20;

const CREATE_FAILED: &str = "An error occurred while creating the bulk link code.";

#[derive(Debug, Clone, PartialEq)]
pub struct BulkCodeRequest {
    pub student_ids: Vec<Uuid>,
    pub school_id: Uuid,
    /// Defaults to [`DEFAULT_VALIDITY_DAYS`].
    pub validity_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedBulkCode {
    pub code_id: Uuid,
    pub code: String,
    pub student_count: usize,
    pub students: Vec<StudentSummary>,
    pub expires_at: DateTime<Utc>,
}

/// Checks the request shape. Runs before any store access.
fn validate_request(request: &BulkCodeRequest) -> ServiceResult<u32> {
    if request.student_ids.is_empty() {
        return Err(ServiceError::InvalidInput(
            "You must provide at least one student ID.".to_string(),
        ));
    }
    if request.student_ids.len() > MAX_STUDENTS_PER_CODE {
        return Err(ServiceError::InvalidInput(format!(
            "Maximum {} students can be linked with a single code.",
            MAX_STUDENTS_PER_CODE
        )));
    }
    let unique: HashSet<&Uuid> = request.student_ids.iter().collect();
    if unique.len() != request.student_ids.len() {
        return Err(ServiceError::InvalidInput(
            "Each student can only be listed once.".to_string(),
        ));
    }

    let validity_days = request.validity_days.unwrap_or(DEFAULT_VALIDITY_DAYS);
    if validity_days == 0 {
        return Err(ServiceError::InvalidInput(
            "Validity must be at least 1 day.".to_string(),
        ));
    }
    Ok(validity_days)
}

pub struct BulkCodeIssuer {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl BulkCodeIssuer {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Creates one active code linking to every requested student.
    ///
    /// The caller must be a school administrator or teacher of the school, and
    /// every student must exist there; otherwise nothing is written.
    pub async fn issue(&self, caller: Caller, request: BulkCodeRequest) -> ServiceResult<IssuedBulkCode> {
        let validity_days = validate_request(&request)?;
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(Duration::days(i64::from(validity_days)))
            .ok_or_else(|| ServiceError::InvalidInput("Validity period is too long.".to_string()))?;

        match self.issue_checked(caller, &request, expires_at).await {
            Ok(issued) => Ok(issued),
            Err(StepError::Rejected(e)) => Err(e),
            Err(StepError::Store(e)) => {
                error!(
                    student_ids = ?request.student_ids,
                    school_id = %request.school_id,
                    error = %e,
                    "Error creating bulk link code"
                );
                Err(ServiceError::Internal(CREATE_FAILED.to_string()))
            }
        }
    }

    async fn issue_checked(
        &self,
        caller: Caller,
        request: &BulkCodeRequest,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedBulkCode, StepError> {
        let school_id = request.school_id;

        // --- Permission ---
        let member = match self.db.get_staff_member(school_id, caller.user_id).await {
            Ok(member) => member,
            Err(PortError::NotFound(_)) => {
                return Err(ServiceError::PermissionDenied(
                    "You do not have permission to create link codes for this school.".to_string(),
                )
                .into())
            }
            Err(e) => return Err(e.into()),
        };
        if !member.role.can_issue_link_codes() {
            return Err(ServiceError::PermissionDenied(
                "Only administrators and teachers can create bulk link codes.".to_string(),
            )
            .into());
        }

        // --- Students ---
        let students = self.load_students(school_id, &request.student_ids).await?;
        let summaries: Vec<StudentSummary> = students.iter().map(StudentSummary::from).collect();

        // --- Code ---
        let mut link_code = LinkCode {
            id: Uuid::new_v4(),
            code: String::new(),
            target: LinkTarget::Bulk {
                student_ids: request.student_ids.clone(),
            },
            school_id,
            status: LinkCodeStatus::Active,
            created_at: self.clock.now(),
            expires_at: Some(expires_at),
            created_by: Some(caller.user_id),
            expired_at: None,
            revoke_reason: None,
            metadata: serde_json::json!({
                "students": summaries,
                "studentCount": summaries.len(),
            }),
        };
        self.insert_with_fresh_code(&mut link_code).await?;

        info!(
            code_id = %link_code.id,
            code = %link_code.code,
            student_count = summaries.len(),
            school_id = %school_id,
            created_by = %caller.user_id,
            "Bulk link code created"
        );

        Ok(IssuedBulkCode {
            code_id: link_code.id,
            code: link_code.code,
            student_count: summaries.len(),
            students: summaries,
            expires_at,
        })
    }

    /// Loads every requested student, in request order.
    /// Any missing one rejects the whole request.
    async fn load_students(&self, school_id: Uuid, student_ids: &[Uuid]) -> Result<Vec<Student>, StepError> {
        let results = join_all(
            student_ids
                .iter()
                .map(|student_id| self.db.get_student(school_id, *student_id)),
        )
        .await;

        let mut students = Vec::with_capacity(results.len());
        let mut missing = 0usize;
        for result in results {
            match result {
                Ok(student) => students.push(student),
                Err(PortError::NotFound(_)) => missing += 1,
                Err(e) => return Err(e.into()),
            }
        }
        if missing > 0 {
            return Err(ServiceError::NotFound(format!("{} student(s) not found.", missing)).into());
        }
        Ok(students)
    }

    /// Draws codes until one is free among active codes and inserts it.
    async fn insert_with_fresh_code(&self, link_code: &mut LinkCode) -> Result<(), StepError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            link_code.code = generate_code();
            if self.db.insert_link_code_if_unique(link_code).await? {
                return Ok(());
            }
        }
        Err(PortError::Conflict(format!(
            "no free link code after {} attempts",
            MAX_GENERATION_ATTEMPTS
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(count: usize) -> BulkCodeRequest {
        BulkCodeRequest {
            student_ids: (0..count).map(|_| Uuid::new_v4()).collect(),
            school_id: Uuid::new_v4(),
            validity_days: None,
        }
    }

    #[test]
    fn accepts_one_to_ten_students() {
        assert_eq!(validate_request(&request(1)), Ok(DEFAULT_VALIDITY_DAYS));
        assert_eq!(validate_request(&request(10)), Ok(DEFAULT_VALIDITY_DAYS));
    }

    #[test]
    fn rejects_empty_and_oversized_requests() {
        assert!(matches!(validate_request(&request(0)), Err(ServiceError::InvalidInput(_))));
        assert!(matches!(validate_request(&request(11)), Err(ServiceError::InvalidInput(_))));
    }

    #[test]
    fn rejects_duplicates_and_zero_validity() {
        let mut dup = request(2);
        dup.student_ids[1] = dup.student_ids[0];
        assert!(matches!(validate_request(&dup), Err(ServiceError::InvalidInput(_))));

        let mut zero = request(1);
        zero.validity_days = Some(0);
        assert_eq!(
            validate_request(&zero),
            Err(ServiceError::InvalidInput("Validity must be at least 1 day.".into()))
        );
    }
}
