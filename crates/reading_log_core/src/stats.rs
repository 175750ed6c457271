//! crates/reading_log_core/src/stats.rs
//!
//! Recomputes a student's authoritative reading statistics from their logs.
//!
//! Statistics are never patched incrementally. Every trigger re-reads the full
//! qualifying log set and rebuilds the record, so the result does not depend on
//! trigger ordering, retries or deletions.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{LogStatus, ReadingLog, ReadingLogChange, StudentChange, StudentStats};
use crate::ports::{Clock, DatabaseService, PortResult};
use crate::streak::{compute_streaks, ReadingCalendar};

/// Log statuses that count toward statistics.
pub const QUALIFYING_STATUSES: [LogStatus; 2] = [LogStatus::Completed, LogStatus::Partial];

/// Builds the full statistics record for one student.
///
/// Totals accumulate per log, so two logs on the same day both contribute
/// minutes and books. Streaks and the reading-day count are per calendar day.
/// The returned record has no `last_updated`; the store assigns it on write.
pub fn compute_student_stats(
    logs: &[ReadingLog],
    calendar: &ReadingCalendar,
    today: NaiveDate,
) -> StudentStats {
    let qualifying = logs.iter().filter(|log| log.status.counts_toward_stats());

    let mut total_minutes_read = 0i64;
    let mut total_books_read = 0i64;
    let mut last_reading_date = None;
    let mut reading_days = BTreeSet::new();

    for log in qualifying {
        total_minutes_read += log.minutes_read;
        total_books_read += log.books_read();
        reading_days.insert(calendar.day_of(log.date));
        if last_reading_date.map_or(true, |latest| log.date > latest) {
            last_reading_date = Some(log.date);
        }
    }

    let streaks = compute_streaks(&reading_days, today);
    let average_minutes_per_day = if streaks.reading_days > 0 {
        round_to_tenth(total_minutes_read as f64 / streaks.reading_days as f64)
    } else {
        0.0
    };

    StudentStats {
        total_minutes_read,
        total_books_read,
        current_streak: streaks.current,
        longest_streak: streaks.longest,
        last_reading_date,
        average_minutes_per_day,
        total_reading_days: streaks.reading_days,
        last_updated: None,
    }
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

//=========================================================================================
// The Aggregator Service
//=========================================================================================

/// Reacts to reading-log writes by rebuilding the owning student's stats.
///
/// This is the only writer of the `stats` sub-document.
pub struct StatsAggregator {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
    calendar: ReadingCalendar,
}

impl StatsAggregator {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>, calendar: ReadingCalendar) -> Self {
        Self { db, clock, calendar }
    }

    /// Handles one log create/update/delete.
    ///
    /// Rebuilds every student the write touched, so a log moved between
    /// students leaves neither with stale totals. A log without a student is
    /// skipped. On success, returns the student changes produced by the writes.
    pub async fn handle_log_change(
        &self,
        change: &ReadingLogChange,
    ) -> PortResult<Vec<StudentChange>> {
        let student_ids = change.student_ids();
        if student_ids.is_empty() {
            warn!(log_id = %change.log_id, "Reading log has no studentId");
        }

        let mut changes = Vec::with_capacity(student_ids.len());
        for student_id in student_ids {
            changes.push(self.recompute(change.school_id, student_id).await?);
        }
        Ok(changes)
    }

    /// Rebuilds and writes the stats of one student.
    pub async fn recompute(&self, school_id: Uuid, student_id: Uuid) -> PortResult<StudentChange> {
        let result = async {
            let logs = self
                .db
                .list_student_logs(school_id, student_id, &QUALIFYING_STATUSES)
                .await?;
            let today = self.calendar.day_of(self.clock.now());
            let stats = compute_student_stats(&logs, &self.calendar, today);
            self.db.write_student_stats(school_id, student_id, stats).await
        }
        .await;

        match result {
            Ok(change) => {
                let stats = &change.after.stats;
                info!(
                    student_id = %student_id,
                    total_minutes_read = stats.total_minutes_read,
                    total_books_read = stats.total_books_read,
                    current_streak = stats.current_streak,
                    "Student stats aggregated"
                );
                Ok(change)
            }
            Err(e) => {
                error!(student_id = %student_id, error = %e, "Error aggregating student stats");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Student;
    use crate::memory::{FixedClock, InMemoryStore};
    use chrono::{DateTime, Days, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 15, 30, 0).unwrap()
    }

    fn log_on(days_ago: u64, minutes: i64, books: usize, status: LogStatus) -> ReadingLog {
        ReadingLog {
            id: Uuid::new_v4(),
            student_id: None,
            parent_id: None,
            date: now().checked_sub_days(Days::new(days_ago)).unwrap(),
            minutes_read: minutes,
            book_titles: (0..books).map(|i| format!("Book {i}")).collect(),
            status,
            validation_status: None,
            validation_errors: Vec::new(),
        }
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    #[test]
    fn totals_are_per_log_and_days_are_per_day() {
        let logs = vec![
            log_on(0, 20, 1, LogStatus::Completed),
            log_on(0, 15, 2, LogStatus::Partial),
            log_on(1, 10, 0, LogStatus::Completed),
        ];
        let stats = compute_student_stats(&logs, &ReadingCalendar::utc(), today());
        assert_eq!(stats.total_minutes_read, 45);
        assert_eq!(stats.total_books_read, 3);
        assert_eq!(stats.total_reading_days, 2);
        assert_eq!(stats.current_streak, 2);
        assert_eq!(stats.longest_streak, 2);
        assert_eq!(stats.average_minutes_per_day, 22.5);
        assert_eq!(stats.last_reading_date, Some(logs[0].date));
    }

    #[test]
    fn non_qualifying_logs_are_ignored() {
        let logs = vec![
            log_on(0, 30, 1, LogStatus::Other),
            log_on(1, 10, 1, LogStatus::Completed),
        ];
        let stats = compute_student_stats(&logs, &ReadingCalendar::utc(), today());
        assert_eq!(stats.total_minutes_read, 10);
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 1);
    }

    #[test]
    fn average_is_rounded_to_one_decimal() {
        let logs = vec![
            log_on(0, 10, 0, LogStatus::Completed),
            log_on(1, 10, 0, LogStatus::Completed),
            log_on(2, 12, 0, LogStatus::Completed),
        ];
        let stats = compute_student_stats(&logs, &ReadingCalendar::utc(), today());
        assert_eq!(stats.average_minutes_per_day, 10.7);
    }

    #[test]
    fn no_logs_gives_zeroed_stats() {
        let stats = compute_student_stats(&[], &ReadingCalendar::utc(), today());
        assert_eq!(stats, StudentStats::default());
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let clock = Arc::new(FixedClock::new(now()));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let school_id = Uuid::new_v4();
        let student = Student {
            id: Uuid::new_v4(),
            school_id,
            first_name: "Sam".into(),
            last_name: "Reed".into(),
            class_id: None,
            parent_ids: Vec::new(),
            stats: StudentStats::default(),
            achievements: Vec::new(),
        };
        store.insert_student(student.clone()).await;
        for days_ago in [0, 1, 2, 4] {
            let mut log = log_on(days_ago, 25, 1, LogStatus::Completed);
            log.student_id = Some(student.id);
            store.insert_log(school_id, log).await;
        }

        let aggregator = StatsAggregator::new(store.clone(), clock.clone(), ReadingCalendar::utc());
        let first = aggregator.recompute(school_id, student.id).await.unwrap();
        clock.advance(chrono::Duration::minutes(5));
        let second = aggregator.recompute(school_id, student.id).await.unwrap();

        assert_eq!(
            first.after.stats.without_timestamp(),
            second.after.stats.without_timestamp()
        );
        assert_ne!(first.after.stats.last_updated, second.after.stats.last_updated);
        assert_eq!(second.after.stats.longest_streak, 3);
        assert_eq!(second.after.stats.current_streak, 3);
    }

    #[tokio::test]
    async fn log_without_student_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = StatsAggregator::new(
            store.clone(),
            Arc::new(FixedClock::new(now())),
            ReadingCalendar::utc(),
        );
        let change = ReadingLogChange {
            school_id: Uuid::new_v4(),
            log_id: Uuid::new_v4(),
            before: None,
            after: Some(log_on(0, 10, 0, LogStatus::Completed)),
        };
        assert!(aggregator.handle_log_change(&change).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_student_propagates_the_error() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = StatsAggregator::new(
            store.clone(),
            Arc::new(FixedClock::new(now())),
            ReadingCalendar::utc(),
        );
        let result = aggregator.recompute(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(result.is_err());
    }
}
