//! crates/reading_log_core/src/memory.rs
//!
//! In-memory implementations of every port.
//!
//! `InMemoryStore` keeps all documents in a `HashMap`-based state behind a
//! `tokio::sync::Mutex`, so a `LinkTransaction` can hold the lock across awaits
//! and apply its staged writes in one step. Used by the test suites and by the
//! service when no database is configured. Data is lost when the store is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    Achievement, AuditLogEntry, Class, ClassStats, LinkCode, LinkCodeStatus, LogStatus,
    LogValidation, Parent, PushMessage, RateLimitCounter, ReadingLog, School, StaffMember,
    Student, StudentChange, StudentStats,
};
use crate::ports::{
    AuditSink, Clock, DatabaseService, LinkTransaction, NotificationService, PortError,
    PortResult, RateDecision, RateLimiter, SystemClock,
};
use crate::rate_limit::RateLimitPolicy;

/// Documents are keyed by `(school_id, document_id)`.
type Key = (Uuid, Uuid);

#[derive(Debug, Default)]
struct MemoryState {
    auth_sessions: HashMap<String, Uuid>,
    schools: HashMap<Uuid, School>,
    staff: HashMap<Key, StaffMember>,
    students: HashMap<Key, Student>,
    parents: HashMap<Key, Parent>,
    classes: HashMap<Key, Class>,
    logs: HashMap<Key, ReadingLog>,
    link_codes: Vec<LinkCode>,
    audit_log: Vec<AuditLogEntry>,
}

//=========================================================================================
// The Main Store Struct
//=========================================================================================

/// An in-memory document store implementing `DatabaseService` and `AuditSink`.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store whose server-assigned timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }

    // --- Seeding ---

    pub async fn insert_auth_session(&self, session_id: &str, user_id: Uuid) {
        let mut state = self.state.lock().await;
        state.auth_sessions.insert(session_id.to_string(), user_id);
    }

    pub async fn insert_school(&self, school: School) {
        self.state.lock().await.schools.insert(school.id, school);
    }

    pub async fn insert_staff_member(&self, member: StaffMember) {
        let key = (member.school_id, member.user_id);
        self.state.lock().await.staff.insert(key, member);
    }

    pub async fn insert_student(&self, student: Student) {
        let key = (student.school_id, student.id);
        self.state.lock().await.students.insert(key, student);
    }

    pub async fn insert_parent(&self, parent: Parent) {
        let key = (parent.school_id, parent.id);
        self.state.lock().await.parents.insert(key, parent);
    }

    pub async fn insert_class(&self, class: Class) {
        let key = (class.school_id, class.id);
        self.state.lock().await.classes.insert(key, class);
    }

    pub async fn insert_log(&self, school_id: Uuid, log: ReadingLog) {
        self.state.lock().await.logs.insert((school_id, log.id), log);
    }

    pub async fn remove_log(&self, school_id: Uuid, log_id: Uuid) -> Option<ReadingLog> {
        self.state.lock().await.logs.remove(&(school_id, log_id))
    }

    pub async fn insert_link_code(&self, code: LinkCode) {
        self.state.lock().await.link_codes.push(code);
    }

    /// Links a parent and a student on both sides of the relation.
    pub async fn link(&self, school_id: Uuid, parent_id: Uuid, student_id: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(parent) = state.parents.get_mut(&(school_id, parent_id)) {
            if !parent.linked_children.contains(&student_id) {
                parent.linked_children.push(student_id);
            }
        }
        if let Some(student) = state.students.get_mut(&(school_id, student_id)) {
            if !student.parent_ids.contains(&parent_id) {
                student.parent_ids.push(parent_id);
            }
        }
    }

    // --- Inspection ---

    pub async fn student(&self, school_id: Uuid, student_id: Uuid) -> Option<Student> {
        self.state.lock().await.students.get(&(school_id, student_id)).cloned()
    }

    pub async fn parent(&self, school_id: Uuid, parent_id: Uuid) -> Option<Parent> {
        self.state.lock().await.parents.get(&(school_id, parent_id)).cloned()
    }

    pub async fn class(&self, school_id: Uuid, class_id: Uuid) -> Option<Class> {
        self.state.lock().await.classes.get(&(school_id, class_id)).cloned()
    }

    pub async fn log(&self, school_id: Uuid, log_id: Uuid) -> Option<ReadingLog> {
        self.state.lock().await.logs.get(&(school_id, log_id)).cloned()
    }

    pub async fn link_codes(&self) -> Vec<LinkCode> {
        self.state.lock().await.link_codes.clone()
    }

    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.state.lock().await.audit_log.clone()
    }
}

fn not_found(what: &str, id: Uuid) -> PortError {
    PortError::NotFound(format!("{} {} not found", what, id))
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        self.state
            .lock()
            .await
            .auth_sessions
            .get(session_id)
            .copied()
            .ok_or(PortError::Unauthorized)
    }

    async fn list_schools(&self) -> PortResult<Vec<School>> {
        let mut schools: Vec<School> = self.state.lock().await.schools.values().cloned().collect();
        schools.sort_by_key(|s| s.id);
        Ok(schools)
    }

    async fn get_staff_member(&self, school_id: Uuid, user_id: Uuid) -> PortResult<StaffMember> {
        self.state
            .lock()
            .await
            .staff
            .get(&(school_id, user_id))
            .cloned()
            .ok_or_else(|| not_found("Staff member", user_id))
    }

    async fn list_student_logs(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        statuses: &[LogStatus],
    ) -> PortResult<Vec<ReadingLog>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|((school, _), log)| {
                *school == school_id
                    && log.student_id == Some(student_id)
                    && statuses.contains(&log.status)
            })
            .map(|(_, log)| log.clone())
            .collect())
    }

    async fn list_logs_for_students(
        &self,
        school_id: Uuid,
        student_ids: &[Uuid],
    ) -> PortResult<Vec<ReadingLog>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|((school, _), log)| {
                *school == school_id
                    && log.student_id.map_or(false, |id| student_ids.contains(&id))
            })
            .map(|(_, log)| log.clone())
            .collect())
    }

    async fn has_log_since(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        since: DateTime<Utc>,
    ) -> PortResult<bool> {
        let state = self.state.lock().await;
        Ok(state.logs.iter().any(|((school, _), log)| {
            *school == school_id && log.student_id == Some(student_id) && log.date >= since
        }))
    }

    async fn get_log(&self, school_id: Uuid, log_id: Uuid) -> PortResult<ReadingLog> {
        self.state
            .lock()
            .await
            .logs
            .get(&(school_id, log_id))
            .cloned()
            .ok_or_else(|| not_found("Reading log", log_id))
    }

    async fn set_log_validation(
        &self,
        school_id: Uuid,
        log_id: Uuid,
        validation: &LogValidation,
    ) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let log = state
            .logs
            .get_mut(&(school_id, log_id))
            .ok_or_else(|| not_found("Reading log", log_id))?;
        log.validation_status = Some(validation.status());
        log.validation_errors = match validation {
            LogValidation::Valid { .. } => Vec::new(),
            LogValidation::Invalid { errors } => errors.clone(),
        };
        Ok(())
    }

    async fn get_student(&self, school_id: Uuid, student_id: Uuid) -> PortResult<Student> {
        self.student(school_id, student_id)
            .await
            .ok_or_else(|| not_found("Student", student_id))
    }

    async fn list_students(&self, school_id: Uuid) -> PortResult<Vec<Student>> {
        let state = self.state.lock().await;
        let mut students: Vec<Student> = state
            .students
            .iter()
            .filter(|((school, _), _)| *school == school_id)
            .map(|(_, s)| s.clone())
            .collect();
        students.sort_by_key(|s| s.id);
        Ok(students)
    }

    async fn get_parent(&self, school_id: Uuid, parent_id: Uuid) -> PortResult<Parent> {
        self.parent(school_id, parent_id)
            .await
            .ok_or_else(|| not_found("Parent", parent_id))
    }

    async fn write_student_stats(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        mut stats: StudentStats,
    ) -> PortResult<StudentChange> {
        stats.last_updated = Some(self.clock.now());
        let mut state = self.state.lock().await;
        let student = state
            .students
            .get_mut(&(school_id, student_id))
            .ok_or_else(|| not_found("Student", student_id))?;
        let before = student.clone();
        student.stats = stats;
        Ok(StudentChange {
            school_id,
            student_id,
            before,
            after: student.clone(),
        })
    }

    async fn append_achievements(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        achievements: Vec<Achievement>,
    ) -> PortResult<Vec<Achievement>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let student = state
            .students
            .get_mut(&(school_id, student_id))
            .ok_or_else(|| not_found("Student", student_id))?;

        let mut appended = Vec::new();
        for mut achievement in achievements {
            if student.has_achievement(&achievement.id) {
                continue;
            }
            achievement.earned_at = now;
            student.achievements.push(achievement.clone());
            appended.push(achievement);
        }
        Ok(appended)
    }

    async fn list_class_member_ids(
        &self,
        school_id: Uuid,
        class_id: Uuid,
    ) -> PortResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .students
            .values()
            .filter(|s| s.school_id == school_id && s.class_id == Some(class_id))
            .map(|s| s.id)
            .collect())
    }

    async fn write_class_stats(
        &self,
        school_id: Uuid,
        class_id: Uuid,
        mut stats: ClassStats,
    ) -> PortResult<()> {
        stats.last_updated = Some(self.clock.now());
        let mut state = self.state.lock().await;
        let class = state
            .classes
            .get_mut(&(school_id, class_id))
            .ok_or_else(|| not_found("Class", class_id))?;
        class.stats = stats;
        Ok(())
    }

    async fn find_link_codes_by_value(&self, code: &str) -> PortResult<Vec<LinkCode>> {
        let state = self.state.lock().await;
        Ok(state
            .link_codes
            .iter()
            .filter(|c| c.code == code)
            .cloned()
            .collect())
    }

    async fn insert_link_code_if_unique(&self, code: &LinkCode) -> PortResult<bool> {
        let mut state = self.state.lock().await;
        let taken = state
            .link_codes
            .iter()
            .any(|c| c.code == code.code && c.status == LinkCodeStatus::Active);
        if taken {
            return Ok(false);
        }
        state.link_codes.push(code.clone());
        Ok(true)
    }

    async fn expire_link_codes(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for code in state.link_codes.iter_mut() {
            let past_expiry = code.expires_at.map_or(false, |at| at < now);
            if code.status == LinkCodeStatus::Active && past_expiry {
                code.status = LinkCodeStatus::Expired;
                code.expired_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn begin_link_transaction(&self) -> PortResult<Box<dyn LinkTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryLinkTransaction {
            guard,
            parents: HashMap::new(),
            students: HashMap::new(),
            audits: Vec::new(),
        }))
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn append(&self, entry: AuditLogEntry) -> PortResult<()> {
        self.state.lock().await.audit_log.push(entry);
        Ok(())
    }
}

//=========================================================================================
// Link Transaction
//=========================================================================================

/// Holds the store lock for its whole lifetime and stages writes until commit.
pub struct MemoryLinkTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    parents: HashMap<Key, Parent>,
    students: HashMap<Key, Student>,
    audits: Vec<AuditLogEntry>,
}

impl MemoryLinkTransaction {
    fn current_parent(&self, key: &Key) -> Option<Parent> {
        self.parents
            .get(key)
            .or_else(|| self.guard.parents.get(key))
            .cloned()
    }

    fn current_student(&self, key: &Key) -> Option<Student> {
        self.students
            .get(key)
            .or_else(|| self.guard.students.get(key))
            .cloned()
    }
}

#[async_trait]
impl LinkTransaction for MemoryLinkTransaction {
    async fn get_parent(&mut self, school_id: Uuid, parent_id: Uuid) -> PortResult<Parent> {
        self.current_parent(&(school_id, parent_id))
            .ok_or_else(|| not_found("Parent", parent_id))
    }

    async fn get_student(&mut self, school_id: Uuid, student_id: Uuid) -> PortResult<Student> {
        self.current_student(&(school_id, student_id))
            .ok_or_else(|| not_found("Student", student_id))
    }

    async fn set_linked_children(
        &mut self,
        school_id: Uuid,
        parent_id: Uuid,
        linked_children: Vec<Uuid>,
    ) -> PortResult<()> {
        let key = (school_id, parent_id);
        let mut parent = self
            .current_parent(&key)
            .ok_or_else(|| not_found("Parent", parent_id))?;
        parent.linked_children = linked_children;
        self.parents.insert(key, parent);
        Ok(())
    }

    async fn set_parent_ids(
        &mut self,
        school_id: Uuid,
        student_id: Uuid,
        parent_ids: Vec<Uuid>,
    ) -> PortResult<()> {
        let key = (school_id, student_id);
        let mut student = self
            .current_student(&key)
            .ok_or_else(|| not_found("Student", student_id))?;
        student.parent_ids = parent_ids;
        self.students.insert(key, student);
        Ok(())
    }

    async fn append_audit(&mut self, entry: AuditLogEntry) -> PortResult<()> {
        self.audits.push(entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        let MemoryLinkTransaction {
            mut guard,
            parents,
            students,
            audits,
        } = *self;
        guard.parents.extend(parents);
        guard.students.extend(students);
        guard.audit_log.extend(audits);
        Ok(())
    }
}

//=========================================================================================
// Rate Limiter
//=========================================================================================

/// A process-local rate limiter. Thread-safe via `Mutex<HashMap>`.
///
/// Counters whose window has passed are dropped on every call.
pub struct InMemoryRateLimiter {
    policy: RateLimitPolicy,
    counters: StdMutex<HashMap<String, RateLimitCounter>>,
}

impl InMemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            counters: StdMutex::new(HashMap::new()),
        }
    }

    pub fn counter(&self, key: &str) -> Option<RateLimitCounter> {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(key).copied()
    }

    /// Number of keys currently held.
    pub fn tracked_keys(&self) -> usize {
        self.counters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_record(&self, key: &str, now: DateTime<Utc>) -> PortResult<RateDecision> {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.retain(|_, counter| !self.policy.is_expired(counter, now));
        let (decision, next) = self.policy.register_attempt(counters.get(key).copied(), now);
        if let Some(counter) = next {
            counters.insert(key.to_string(), counter);
        }
        Ok(decision)
    }
}

//=========================================================================================
// Notification and Clock Fakes
//=========================================================================================

/// Records every delivered message; tokens in `failing_tokens` are rejected.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: StdMutex<Vec<PushMessage>>,
    failing_tokens: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sent: StdMutex::new(Vec::new()),
            failing_tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send(&self, message: &PushMessage) -> PortResult<()> {
        if self.failing_tokens.contains(&message.token) {
            return Err(PortError::Unexpected(format!(
                "token {} is not registered",
                message.token
            )));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

/// A settable clock.
pub struct FixedClock {
    now: StdMutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
