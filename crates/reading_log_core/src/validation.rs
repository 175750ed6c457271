//! crates/reading_log_core/src/validation.rs
//!
//! Business-rule validation of newly created reading logs.
//!
//! Validation runs beside aggregation, not in front of it: an invalid log is
//! marked as such but still counts toward statistics.

use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{LogValidation, ReadingLog, ReadingLogChange, Student};
use crate::ports::{Clock, DatabaseService, PortError, PortResult};

/// Accepted session length in minutes.
pub const MINUTES_RANGE: RangeInclusive<i64> = 1..=240;

/// Checks one log against its student (if the student exists).
/// Returns the human-readable reasons the log is invalid; empty means valid.
pub fn validation_errors(log: &ReadingLog, student: Option<&Student>) -> Vec<String> {
    let mut errors = Vec::new();

    if !MINUTES_RANGE.contains(&log.minutes_read) {
        errors.push("Minutes read must be between 1 and 240".to_string());
    }

    match student {
        None => errors.push("Student does not exist".to_string()),
        Some(student) => {
            let linked = log
                .parent_id
                .map_or(false, |parent_id| student.parent_ids.contains(&parent_id));
            if !linked {
                errors.push("Parent not linked to this student".to_string());
            }
        }
    }

    errors
}

pub struct LogValidator {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl LogValidator {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Validates a log on creation and writes the outcome back onto it.
    /// Updates and deletions are ignored.
    ///
    /// The delivered snapshot only signals which log to check; the rules run
    /// against the stored copy. A log that no longer exists is skipped.
    pub async fn handle_log_change(&self, change: &ReadingLogChange) -> PortResult<Option<LogValidation>> {
        if !change.is_creation() {
            return Ok(None);
        }

        let log = match self.db.get_log(change.school_id, change.log_id).await {
            Ok(log) => log,
            Err(PortError::NotFound(_)) => {
                debug!(log_id = %change.log_id, "Reading log no longer stored; skipping validation");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let student = match log.student_id {
            Some(student_id) => match self.db.get_student(change.school_id, student_id).await {
                Ok(student) => Some(student),
                Err(PortError::NotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        let errors = validation_errors(&log, student.as_ref());
        let outcome = if errors.is_empty() {
            LogValidation::Valid {
                validated_at: self.clock.now(),
            }
        } else {
            warn!(log_id = %change.log_id, errors = ?errors, "Invalid reading log detected");
            LogValidation::Invalid { errors }
        };

        self.db
            .set_log_validation(change.school_id, change.log_id, &outcome)
            .await?;
        if matches!(outcome, LogValidation::Valid { .. }) {
            info!(log_id = %change.log_id, "Reading log validated");
        }
        Ok(Some(outcome))
    }
}
