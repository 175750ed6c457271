//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService`, `AuditSink` and `LinkTransaction` ports from the core
//! crate. It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reading_log_core::domain::{
    Achievement, AuditLogEntry, ClassStats, LinkCode, LinkCodeStatus, LinkTarget, LogStatus,
    LogValidation, Parent, QuietHours, ReadingLog, School, StaffMember, StaffRole, Student,
    StudentChange, StudentStats, ValidationStatus,
};
use reading_log_core::ports::{
    AuditSink, DatabaseService, LinkTransaction, PortError, PortResult,
};
use sqlx::postgres::PgExecutor;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(what: &'static str, id: Uuid) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} {} not found", what, id)),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SchoolRecord {
    id: Uuid,
    name: String,
    quiet_hours: Option<Json<QuietHours>>,
}
impl SchoolRecord {
    fn to_domain(self) -> School {
        School {
            id: self.id,
            name: self.name,
            quiet_hours: self.quiet_hours.map(|q| q.0),
        }
    }
}

#[derive(FromRow)]
struct StaffRecord {
    school_id: Uuid,
    user_id: Uuid,
    role: String,
}
impl StaffRecord {
    fn to_domain(self) -> StaffMember {
        StaffMember {
            user_id: self.user_id,
            school_id: self.school_id,
            role: StaffRole::parse(&self.role),
        }
    }
}

#[derive(FromRow)]
struct StudentRecord {
    id: Uuid,
    school_id: Uuid,
    first_name: String,
    last_name: String,
    class_id: Option<Uuid>,
    parent_ids: Vec<Uuid>,
    stats: Json<StudentStats>,
}
impl StudentRecord {
    fn to_domain(self, achievements: Vec<Achievement>) -> Student {
        Student {
            id: self.id,
            school_id: self.school_id,
            first_name: self.first_name,
            last_name: self.last_name,
            class_id: self.class_id,
            parent_ids: self.parent_ids,
            stats: self.stats.0,
            achievements,
        }
    }
}

#[derive(FromRow)]
struct AchievementRecord {
    student_id: Uuid,
    achievement_id: String,
    name: String,
    description: String,
    icon: String,
    earned_at: DateTime<Utc>,
}
impl AchievementRecord {
    fn to_domain(self) -> Achievement {
        Achievement {
            id: self.achievement_id,
            name: self.name,
            description: self.description,
            icon: self.icon,
            earned_at: self.earned_at,
        }
    }
}

#[derive(FromRow)]
struct ParentRecord {
    id: Uuid,
    school_id: Uuid,
    linked_children: Vec<Uuid>,
    push_token: Option<String>,
}
impl ParentRecord {
    fn to_domain(self) -> Parent {
        Parent {
            id: self.id,
            school_id: self.school_id,
            linked_children: self.linked_children,
            push_token: self.push_token,
        }
    }
}

#[derive(FromRow)]
struct ReadingLogRecord {
    id: Uuid,
    student_id: Option<Uuid>,
    parent_id: Option<Uuid>,
    date: DateTime<Utc>,
    minutes_read: i64,
    book_titles: Vec<String>,
    status: String,
    validation_status: Option<String>,
    validation_errors: Vec<String>,
}
impl ReadingLogRecord {
    fn to_domain(self) -> ReadingLog {
        ReadingLog {
            id: self.id,
            student_id: self.student_id,
            parent_id: self.parent_id,
            date: self.date,
            minutes_read: self.minutes_read,
            book_titles: self.book_titles,
            status: LogStatus::parse(&self.status),
            validation_status: self
                .validation_status
                .as_deref()
                .and_then(ValidationStatus::parse),
            validation_errors: self.validation_errors,
        }
    }
}

#[derive(FromRow)]
struct LinkCodeRecord {
    id: Uuid,
    code: String,
    kind: String,
    student_ids: Vec<Uuid>,
    school_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    created_by: Option<Uuid>,
    revoke_reason: Option<String>,
    metadata: serde_json::Value,
}
impl LinkCodeRecord {
    fn to_domain(self) -> PortResult<LinkCode> {
        let status = LinkCodeStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!("Link code {} has unknown status '{}'", self.id, self.status))
        })?;
        let target = match (self.kind.as_str(), self.student_ids.as_slice()) {
            ("single", [student_id]) => LinkTarget::Single {
                student_id: *student_id,
            },
            ("bulk", _) => LinkTarget::Bulk {
                student_ids: self.student_ids.clone(),
            },
            _ => {
                return Err(PortError::Unexpected(format!(
                    "Link code {} has malformed target '{}'",
                    self.id, self.kind
                )))
            }
        };
        Ok(LinkCode {
            id: self.id,
            code: self.code,
            target,
            school_id: self.school_id,
            status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            created_by: self.created_by,
            expired_at: self.expired_at,
            revoke_reason: self.revoke_reason,
            metadata: self.metadata,
        })
    }
}

//=========================================================================================
// Shared Queries
//=========================================================================================

const STUDENT_COLUMNS: &str =
    "id, school_id, first_name, last_name, class_id, parent_ids, stats";
const PARENT_COLUMNS: &str = "id, school_id, linked_children, push_token";
const LOG_COLUMNS: &str = "id, student_id, parent_id, date, minutes_read, book_titles, status, \
     validation_status, validation_errors";
const LINK_CODE_COLUMNS: &str = "id, code, kind, student_ids, school_id, status, created_at, \
     expires_at, expired_at, created_by, revoke_reason, metadata";

async fn fetch_achievements<'e, E>(
    executor: E,
    student_ids: &[Uuid],
) -> PortResult<HashMap<Uuid, Vec<Achievement>>>
where
    E: PgExecutor<'e>,
{
    let records = sqlx::query_as::<_, AchievementRecord>(
        "SELECT student_id, achievement_id, name, description, icon, earned_at \
         FROM student_achievements WHERE student_id = ANY($1) ORDER BY earned_at, achievement_id",
    )
    .bind(student_ids.to_vec())
    .fetch_all(executor)
    .await
    .map_err(unexpected)?;

    let mut by_student: HashMap<Uuid, Vec<Achievement>> = HashMap::new();
    for record in records {
        by_student
            .entry(record.student_id)
            .or_default()
            .push(record.to_domain());
    }
    Ok(by_student)
}

async fn fetch_student_record<'e, E>(
    executor: E,
    school_id: Uuid,
    student_id: Uuid,
    for_update: bool,
) -> PortResult<StudentRecord>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM students WHERE school_id = $1 AND id = $2{}",
        STUDENT_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, StudentRecord>(&sql)
        .bind(school_id)
        .bind(student_id)
        .fetch_one(executor)
        .await
        .map_err(not_found_or_unexpected("Student", student_id))
}

async fn fetch_parent<'e, E>(
    executor: E,
    school_id: Uuid,
    parent_id: Uuid,
    for_update: bool,
) -> PortResult<Parent>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM parents WHERE school_id = $1 AND id = $2{}",
        PARENT_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let record = sqlx::query_as::<_, ParentRecord>(&sql)
        .bind(school_id)
        .bind(parent_id)
        .fetch_one(executor)
        .await
        .map_err(not_found_or_unexpected("Parent", parent_id))?;
    Ok(record.to_domain())
}

async fn insert_audit<'e, E>(executor: E, entry: &AuditLogEntry) -> PortResult<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO audit_logs \
         (id, kind, code, code_id, student_id, school_id, parent_user_id, ip, reason, timestamp) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(entry.id)
    .bind(entry.kind.as_str())
    .bind(entry.code.clone())
    .bind(entry.code_id)
    .bind(entry.student_id)
    .bind(entry.school_id)
    .bind(entry.parent_user_id)
    .bind(entry.ip.clone())
    .bind(entry.reason.clone())
    .bind(entry.timestamp)
    .execute(executor)
    .await
    .map_err(unexpected)?;
    Ok(())
}

fn ensure_updated(rows: u64, what: &'static str, id: Uuid) -> PortResult<()> {
    if rows == 0 {
        return Err(PortError::NotFound(format!("{} {} not found", what, id)));
    }
    Ok(())
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM auth_sessions WHERE session_id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)
    }

    async fn list_schools(&self) -> PortResult<Vec<School>> {
        let records = sqlx::query_as::<_, SchoolRecord>(
            "SELECT id, name, quiet_hours FROM schools ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(SchoolRecord::to_domain).collect())
    }

    async fn get_staff_member(&self, school_id: Uuid, user_id: Uuid) -> PortResult<StaffMember> {
        let record = sqlx::query_as::<_, StaffRecord>(
            "SELECT school_id, user_id, role FROM staff_members WHERE school_id = $1 AND user_id = $2",
        )
        .bind(school_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected("Staff member", user_id))?;
        Ok(record.to_domain())
    }

    async fn list_student_logs(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        statuses: &[LogStatus],
    ) -> PortResult<Vec<ReadingLog>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "SELECT {} FROM reading_logs \
             WHERE school_id = $1 AND student_id = $2 AND status = ANY($3) ORDER BY date DESC",
            LOG_COLUMNS
        );
        let records = sqlx::query_as::<_, ReadingLogRecord>(&sql)
            .bind(school_id)
            .bind(student_id)
            .bind(statuses)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(ReadingLogRecord::to_domain).collect())
    }

    async fn list_logs_for_students(
        &self,
        school_id: Uuid,
        student_ids: &[Uuid],
    ) -> PortResult<Vec<ReadingLog>> {
        if student_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM reading_logs WHERE school_id = $1 AND student_id = ANY($2)",
            LOG_COLUMNS
        );
        let records = sqlx::query_as::<_, ReadingLogRecord>(&sql)
            .bind(school_id)
            .bind(student_ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(ReadingLogRecord::to_domain).collect())
    }

    async fn get_log(&self, school_id: Uuid, log_id: Uuid) -> PortResult<ReadingLog> {
        let sql = format!(
            "SELECT {} FROM reading_logs WHERE school_id = $1 AND id = $2",
            LOG_COLUMNS
        );
        sqlx::query_as::<_, ReadingLogRecord>(&sql)
            .bind(school_id)
            .bind(log_id)
            .fetch_one(&self.pool)
            .await
            .map(ReadingLogRecord::to_domain)
            .map_err(not_found_or_unexpected("Reading log", log_id))
    }

    async fn has_log_since(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        since: DateTime<Utc>,
    ) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM reading_logs \
             WHERE school_id = $1 AND student_id = $2 AND date >= $3)",
        )
        .bind(school_id)
        .bind(student_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn set_log_validation(
        &self,
        school_id: Uuid,
        log_id: Uuid,
        validation: &LogValidation,
    ) -> PortResult<()> {
        let (errors, validated_at) = match validation {
            LogValidation::Valid { validated_at } => (Vec::new(), Some(*validated_at)),
            LogValidation::Invalid { errors } => (errors.clone(), None),
        };
        let result = sqlx::query(
            "UPDATE reading_logs \
             SET validation_status = $3, validation_errors = $4, validated_at = $5 \
             WHERE school_id = $1 AND id = $2",
        )
        .bind(school_id)
        .bind(log_id)
        .bind(validation.status().as_str())
        .bind(errors)
        .bind(validated_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        ensure_updated(result.rows_affected(), "Reading log", log_id)
    }

    async fn get_student(&self, school_id: Uuid, student_id: Uuid) -> PortResult<Student> {
        let record = fetch_student_record(&self.pool, school_id, student_id, false).await?;
        let mut achievements = fetch_achievements(&self.pool, &[student_id]).await?;
        Ok(record.to_domain(achievements.remove(&student_id).unwrap_or_default()))
    }

    async fn list_students(&self, school_id: Uuid) -> PortResult<Vec<Student>> {
        let sql = format!(
            "SELECT {} FROM students WHERE school_id = $1 ORDER BY id",
            STUDENT_COLUMNS
        );
        let records = sqlx::query_as::<_, StudentRecord>(&sql)
            .bind(school_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let mut achievements = fetch_achievements(&self.pool, &ids).await?;
        Ok(records
            .into_iter()
            .map(|r| {
                let earned = achievements.remove(&r.id).unwrap_or_default();
                r.to_domain(earned)
            })
            .collect())
    }

    async fn get_parent(&self, school_id: Uuid, parent_id: Uuid) -> PortResult<Parent> {
        fetch_parent(&self.pool, school_id, parent_id, false).await
    }

    async fn write_student_stats(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        mut stats: StudentStats,
    ) -> PortResult<StudentChange> {
        stats.last_updated = Some(Utc::now());
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let record = fetch_student_record(&mut *tx, school_id, student_id, true).await?;
        let achievements = fetch_achievements(&mut *tx, &[student_id])
            .await?
            .remove(&student_id)
            .unwrap_or_default();

        sqlx::query("UPDATE students SET stats = $3 WHERE school_id = $1 AND id = $2")
            .bind(school_id)
            .bind(student_id)
            .bind(Json(&stats))
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        let before = record.to_domain(achievements);
        let after = Student {
            stats,
            ..before.clone()
        };
        Ok(StudentChange {
            school_id,
            student_id,
            before,
            after,
        })
    }

    async fn append_achievements(
        &self,
        school_id: Uuid,
        student_id: Uuid,
        achievements: Vec<Achievement>,
    ) -> PortResult<Vec<Achievement>> {
        let earned_at = Utc::now();
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        fetch_student_record(&mut *tx, school_id, student_id, true).await?;

        let mut appended = Vec::new();
        for mut achievement in achievements {
            achievement.earned_at = earned_at;
            let result = sqlx::query(
                "INSERT INTO student_achievements \
                 (student_id, achievement_id, name, description, icon, earned_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (student_id, achievement_id) DO NOTHING",
            )
            .bind(student_id)
            .bind(&achievement.id)
            .bind(&achievement.name)
            .bind(&achievement.description)
            .bind(&achievement.icon)
            .bind(achievement.earned_at)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
            if result.rows_affected() == 1 {
                appended.push(achievement);
            }
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(appended)
    }

    async fn list_class_member_ids(
        &self,
        school_id: Uuid,
        class_id: Uuid,
    ) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM students WHERE school_id = $1 AND class_id = $2",
        )
        .bind(school_id)
        .bind(class_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn write_class_stats(
        &self,
        school_id: Uuid,
        class_id: Uuid,
        mut stats: ClassStats,
    ) -> PortResult<()> {
        stats.last_updated = Some(Utc::now());
        let result = sqlx::query("UPDATE classes SET stats = $3 WHERE school_id = $1 AND id = $2")
            .bind(school_id)
            .bind(class_id)
            .bind(Json(&stats))
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        ensure_updated(result.rows_affected(), "Class", class_id)
    }

    async fn find_link_codes_by_value(&self, code: &str) -> PortResult<Vec<LinkCode>> {
        let sql = format!("SELECT {} FROM link_codes WHERE code = $1", LINK_CODE_COLUMNS);
        let records = sqlx::query_as::<_, LinkCodeRecord>(&sql)
            .bind(code)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(LinkCodeRecord::to_domain).collect()
    }

    async fn insert_link_code_if_unique(&self, code: &LinkCode) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT INTO link_codes \
             (id, code, kind, student_ids, school_id, status, created_at, expires_at, \
              expired_at, created_by, revoke_reason, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (code) WHERE status = 'active' DO NOTHING",
        )
        .bind(code.id)
        .bind(&code.code)
        .bind(code.target.kind())
        .bind(code.target.student_ids())
        .bind(code.school_id)
        .bind(code.status.as_str())
        .bind(code.created_at)
        .bind(code.expires_at)
        .bind(code.expired_at)
        .bind(code.created_by)
        .bind(code.revoke_reason.clone())
        .bind(&code.metadata)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_link_codes(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query(
            "UPDATE link_codes SET status = 'expired', expired_at = $1 \
             WHERE status = 'active' AND expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected())
    }

    async fn begin_link_transaction(&self) -> PortResult<Box<dyn LinkTransaction>> {
        let tx = self.pool.begin().await.map_err(unexpected)?;
        Ok(Box::new(PgLinkTransaction { tx }))
    }
}

#[async_trait]
impl AuditSink for DbAdapter {
    async fn append(&self, entry: AuditLogEntry) -> PortResult<()> {
        insert_audit(&self.pool, &entry).await
    }
}

//=========================================================================================
// Link Transaction
//=========================================================================================

/// A database transaction over parent/student links. Rows read through it are
/// locked until commit; dropping it rolls back.
pub struct PgLinkTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LinkTransaction for PgLinkTransaction {
    async fn get_parent(&mut self, school_id: Uuid, parent_id: Uuid) -> PortResult<Parent> {
        fetch_parent(&mut *self.tx, school_id, parent_id, true).await
    }

    async fn get_student(&mut self, school_id: Uuid, student_id: Uuid) -> PortResult<Student> {
        let record = fetch_student_record(&mut *self.tx, school_id, student_id, true).await?;
        let mut achievements = fetch_achievements(&mut *self.tx, &[student_id]).await?;
        Ok(record.to_domain(achievements.remove(&student_id).unwrap_or_default()))
    }

    async fn set_linked_children(
        &mut self,
        school_id: Uuid,
        parent_id: Uuid,
        linked_children: Vec<Uuid>,
    ) -> PortResult<()> {
        let result =
            sqlx::query("UPDATE parents SET linked_children = $3 WHERE school_id = $1 AND id = $2")
                .bind(school_id)
                .bind(parent_id)
                .bind(linked_children)
                .execute(&mut *self.tx)
                .await
                .map_err(unexpected)?;
        ensure_updated(result.rows_affected(), "Parent", parent_id)
    }

    async fn set_parent_ids(
        &mut self,
        school_id: Uuid,
        student_id: Uuid,
        parent_ids: Vec<Uuid>,
    ) -> PortResult<()> {
        let result =
            sqlx::query("UPDATE students SET parent_ids = $3 WHERE school_id = $1 AND id = $2")
                .bind(school_id)
                .bind(student_id)
                .bind(parent_ids)
                .execute(&mut *self.tx)
                .await
                .map_err(unexpected)?;
        ensure_updated(result.rows_affected(), "Student", student_id)
    }

    async fn append_audit(&mut self, entry: AuditLogEntry) -> PortResult<()> {
        insert_audit(&mut *self.tx, &entry).await
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        self.tx.commit().await.map_err(unexpected)
    }
}
