//! crates/reading_log_core/src/class_stats.rs
//!
//! Class-level rollup of reading activity.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::{ClassStats, ReadingLog, ReadingLogChange};
use crate::ports::{DatabaseService, PortError, PortResult};

/// Sums minutes and books over `logs` and counts the distinct students in them.
pub fn compute_class_stats(logs: &[ReadingLog]) -> ClassStats {
    let mut active = HashSet::new();
    let mut stats = ClassStats::default();
    for log in logs {
        stats.total_minutes_read += log.minutes_read;
        stats.total_books_read += log.books_read();
        if let Some(student_id) = log.student_id {
            active.insert(student_id);
        }
    }
    stats.active_students = active.len() as u32;
    stats
}

/// Rebuilds the stats of the class the written log's student belongs to.
pub struct ClassStatsAggregator {
    db: Arc<dyn DatabaseService>,
}

impl ClassStatsAggregator {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Returns the classes that were updated; empty when there was nothing to do.
    /// A log moved between students updates the class on each side.
    pub async fn handle_log_change(&self, change: &ReadingLogChange) -> PortResult<Vec<Uuid>> {
        let mut class_ids = Vec::new();
        for student_id in change.student_ids() {
            let student = match self.db.get_student(change.school_id, student_id).await {
                Ok(student) => student,
                Err(PortError::NotFound(_)) => {
                    debug!(student_id = %student_id, "No student for log; skipping class stats");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(class_id) = student.class_id {
                if !class_ids.contains(&class_id) {
                    class_ids.push(class_id);
                }
            }
        }

        for class_id in &class_ids {
            self.recompute(change.school_id, *class_id).await?;
        }
        Ok(class_ids)
    }

    pub async fn recompute(&self, school_id: Uuid, class_id: Uuid) -> PortResult<Uuid> {
        let result = async {
            let members = self.db.list_class_member_ids(school_id, class_id).await?;
            let logs = self.db.list_logs_for_students(school_id, &members).await?;
            let stats = compute_class_stats(&logs);
            self.db.write_class_stats(school_id, class_id, stats.clone()).await?;
            Ok::<_, PortError>(stats)
        }
        .await;

        match result {
            Ok(stats) => {
                info!(
                    class_id = %class_id,
                    total_minutes_read = stats.total_minutes_read,
                    active_students = stats.active_students,
                    "Class stats aggregated"
                );
                Ok(class_id)
            }
            Err(e) => {
                error!(class_id = %class_id, error = %e, "Error aggregating class stats");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Class, LogStatus, Student, StudentStats};
    use crate::memory::InMemoryStore;
    use chrono::Utc;

    fn student(school_id: Uuid, class_id: Option<Uuid>) -> Student {
        Student {
            id: Uuid::new_v4(),
            school_id,
            first_name: "Kim".into(),
            last_name: "Park".into(),
            class_id,
            parent_ids: Vec::new(),
            stats: StudentStats::default(),
            achievements: Vec::new(),
        }
    }

    fn log_for(student_id: Uuid, minutes: i64, books: usize) -> ReadingLog {
        ReadingLog {
            id: Uuid::new_v4(),
            student_id: Some(student_id),
            parent_id: None,
            date: Utc::now(),
            minutes_read: minutes,
            book_titles: vec!["A book".to_string(); books],
            status: LogStatus::Completed,
            validation_status: None,
            validation_errors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn aggregates_only_class_members() {
        let store = Arc::new(InMemoryStore::new());
        let school_id = Uuid::new_v4();
        let class_id = Uuid::new_v4();
        store
            .insert_class(Class {
                id: class_id,
                school_id,
                name: "3B".into(),
                stats: ClassStats::default(),
            })
            .await;

        let a = student(school_id, Some(class_id));
        let b = student(school_id, Some(class_id));
        let c = student(school_id, Some(class_id));
        let outsider = student(school_id, None);
        for s in [&a, &b, &c, &outsider] {
            store.insert_student(s.clone()).await;
        }
        let written = log_for(a.id, 20, 1);
        store.insert_log(school_id, written.clone()).await;
        store.insert_log(school_id, log_for(a.id, 10, 0)).await;
        store.insert_log(school_id, log_for(b.id, 15, 2)).await;
        store.insert_log(school_id, log_for(outsider.id, 99, 9)).await;

        let aggregator = ClassStatsAggregator::new(store.clone());
        let change = ReadingLogChange {
            school_id,
            log_id: written.id,
            before: None,
            after: Some(written),
        };
        assert_eq!(aggregator.handle_log_change(&change).await.unwrap(), vec![class_id]);

        let stats = store.class(school_id, class_id).await.unwrap().stats;
        assert_eq!(stats.total_minutes_read, 45);
        assert_eq!(stats.total_books_read, 3);
        assert_eq!(stats.active_students, 2);
        assert!(stats.last_updated.is_some());
    }

    #[tokio::test]
    async fn student_without_class_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let school_id = Uuid::new_v4();
        let s = student(school_id, None);
        store.insert_student(s.clone()).await;
        let log = log_for(s.id, 10, 1);

        let aggregator = ClassStatsAggregator::new(store.clone());
        let change = ReadingLogChange {
            school_id,
            log_id: log.id,
            before: None,
            after: Some(log),
        };
        assert!(aggregator.handle_log_change(&change).await.unwrap().is_empty());
    }
}
