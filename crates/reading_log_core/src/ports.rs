//! crates/reading_log_core/src/ports.rs
//!
//! Defines the service contracts (traits) the core logic depends on.
//! These traits form the boundary of the hexagonal architecture: the core never
//! touches a database handle, a push gateway or the system clock directly, so each
//! capability can be swapped for the in-memory fakes in `crate::memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Achievement, AuditLogEntry, ClassStats, LinkCode, LogStatus, LogValidation, Parent,
    PushMessage, ReadingLog, School, StaffMember, Student, StudentChange, StudentStats,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Data Access
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth ---
    /// Resolves an auth session issued by the identity provider to its user id.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    // --- Schools and Staff ---
    async fn list_schools(&self) -> PortResult<Vec<School>>;

    async fn get_staff_member(&self, school_id: Uuid, user_id: Uuid) -> PortResult<StaffMember>;

    // --- Reading Logs ---
    /// All logs of one student whose status is one of `statuses`.
    async fn list_student_logs(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        statuses: &[LogStatus],
    ) -> PortResult<Vec<ReadingLog>>;

    /// All logs, of any status, belonging to any of `student_ids`.
    async fn list_logs_for_students(
        &self,
        school_id: Uuid,
        student_ids: &[Uuid],
    ) -> PortResult<Vec<ReadingLog>>;

    /// The stored copy of one log.
    async fn get_log(&self, school_id: Uuid, log_id: Uuid) -> PortResult<ReadingLog>;

    async fn has_log_since(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        since: DateTime<Utc>,
    ) -> PortResult<bool>;

    async fn set_log_validation(
        &self,
        school_id: Uuid,
        log_id: Uuid,
        validation: &LogValidation,
    ) -> PortResult<()>;

    // --- Students and Parents ---
    async fn get_student(&self, school_id: Uuid, student_id: Uuid) -> PortResult<Student>;

    async fn list_students(&self, school_id: Uuid) -> PortResult<Vec<Student>>;

    async fn get_parent(&self, school_id: Uuid, parent_id: Uuid) -> PortResult<Parent>;

    /// Replaces the whole stats sub-document, stamping `last_updated` with the
    /// store's clock, and reports the before/after student snapshots.
    async fn write_student_stats(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        stats: StudentStats,
    ) -> PortResult<StudentChange>;

    /// Appends achievements whose id the student does not hold yet, stamping
    /// `earned_at` with the store's clock. Returns only the ones appended.
    async fn append_achievements(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        achievements: Vec<Achievement>,
    ) -> PortResult<Vec<Achievement>>;

    // --- Classes ---
    async fn list_class_member_ids(&self, school_id: Uuid, class_id: Uuid)
        -> PortResult<Vec<Uuid>>;

    async fn write_class_stats(
        &self,
        school_id: Uuid,
        class_id: Uuid,
        stats: ClassStats,
    ) -> PortResult<()>;

    // --- Link Codes ---
    /// Every code with this exact value, whatever its status.
    async fn find_link_codes_by_value(&self, code: &str) -> PortResult<Vec<LinkCode>>;

    /// Inserts `code` unless another `active` code already has the same value.
    /// The check and the insert are one atomic step. Returns `false` on collision.
    async fn insert_link_code_if_unique(&self, code: &LinkCode) -> PortResult<bool>;

    /// Marks every active code whose expiry lies before `now` as expired.
    async fn expire_link_codes(&self, now: DateTime<Utc>) -> PortResult<u64>;

    // --- Transactions ---
    async fn begin_link_transaction(&self) -> PortResult<Box<dyn LinkTransaction>>;
}

/// An all-or-nothing unit of work over parent/student link documents.
///
/// Writes become visible only on `commit`; dropping the transaction discards them.
#[async_trait]
pub trait LinkTransaction: Send {
    async fn get_parent(&mut self, school_id: Uuid, parent_id: Uuid) -> PortResult<Parent>;

    async fn get_student(&mut self, school_id: Uuid, student_id: Uuid) -> PortResult<Student>;

    async fn set_linked_children(
        &mut self,
        school_id: Uuid,
        parent_id: Uuid,
        linked_children: Vec<Uuid>,
    ) -> PortResult<()>;

    async fn set_parent_ids(
        &mut self,
        school_id: Uuid,
        student_id: Uuid,
        parent_ids: Vec<Uuid>,
    ) -> PortResult<()>;

    async fn append_audit(&mut self, entry: AuditLogEntry) -> PortResult<()>;

    async fn commit(self: Box<Self>) -> PortResult<()>;
}

//=========================================================================================
// Rate Limiting, Audit, Notification and Time
//=========================================================================================

/// Outcome of registering one attempt against a rate-limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { attempts: u32 },
    Exceeded { retry_after_secs: u64 },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Checks the counter for `key` and, if allowed, records the attempt.
    /// Both happen atomically with respect to concurrent callers.
    async fn check_and_record(&self, key: &str, now: DateTime<Utc>) -> PortResult<RateDecision>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Appends one entry to the audit log.
    async fn append(&self, entry: AuditLogEntry) -> PortResult<()>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Delivers one push notification.
    async fn send(&self, message: &PushMessage) -> PortResult<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
