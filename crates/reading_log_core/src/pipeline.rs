//! crates/reading_log_core/src/pipeline.rs
//!
//! Fans change events out to the reactions that consume them.
//!
//! A reading-log write feeds three independent reactions (student stats, class
//! stats, validation) that run concurrently with no ordering between them. The
//! student update produced by the stats write is then handed to achievement
//! detection, the same way an external change feed would deliver it.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::achievements::AchievementDetector;
use crate::class_stats::ClassStatsAggregator;
use crate::domain::{Achievement, ReadingLogChange, StudentChange, ValidationStatus};
use crate::ports::{Clock, DatabaseService, NotificationService, PortError, PortResult};
use crate::stats::StatsAggregator;
use crate::streak::ReadingCalendar;
use crate::validation::LogValidator;

/// What the reactions to one log write did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogReactionReport {
    pub stats_updated: bool,
    pub classes_updated: Vec<Uuid>,
    pub validation: Option<ValidationStatus>,
    pub achievements: Vec<String>,
}

pub struct ReactionPipeline {
    stats: StatsAggregator,
    class_stats: ClassStatsAggregator,
    validator: LogValidator,
    achievements: AchievementDetector,
}

impl ReactionPipeline {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        notifier: Arc<dyn NotificationService>,
        clock: Arc<dyn Clock>,
        calendar: ReadingCalendar,
    ) -> Self {
        Self {
            stats: StatsAggregator::new(db.clone(), clock.clone(), calendar),
            class_stats: ClassStatsAggregator::new(db.clone()),
            validator: LogValidator::new(db.clone(), clock.clone()),
            achievements: AchievementDetector::new(db, notifier, clock),
        }
    }

    /// Runs every reaction to one log create/update/delete.
    ///
    /// All reactions run even when a sibling fails; the first failure is
    /// returned afterwards so the delivering runtime retries the event.
    pub async fn reading_log_written(&self, change: &ReadingLogChange) -> PortResult<LogReactionReport> {
        let (stats, class_stats, validation) = futures::join!(
            self.stats.handle_log_change(change),
            self.class_stats.handle_log_change(change),
            self.validator.handle_log_change(change),
        );

        let mut report = LogReactionReport::default();
        let mut first_error: Option<PortError> = None;

        match stats {
            Ok(student_changes) => {
                report.stats_updated = !student_changes.is_empty();
                for student_change in &student_changes {
                    match self.student_updated(student_change).await {
                        Ok(earned) => report.achievements.extend(earned.into_iter().map(|a| a.id)),
                        Err(e) => first_error = first_error.or(Some(e)),
                    }
                }
            }
            Err(e) => first_error = first_error.or(Some(e)),
        }
        match class_stats {
            Ok(class_ids) => report.classes_updated = class_ids,
            Err(e) => first_error = first_error.or(Some(e)),
        }
        match validation {
            Ok(outcome) => report.validation = outcome.map(|v| v.status()),
            Err(e) => first_error = first_error.or(Some(e)),
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Runs the reactions to one student update.
    pub async fn student_updated(&self, change: &StudentChange) -> PortResult<Vec<Achievement>> {
        self.achievements.handle_student_change(change).await
    }
}
