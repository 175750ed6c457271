//! crates/reading_log_core/src/achievements.rs
//!
//! Milestone detection on student stats transitions.
//!
//! A milestone fires only when a metric crosses its threshold between the old and
//! the new stats (old below, new at or above). Re-delivering the same transition
//! cannot award an achievement twice: the store appends only ids the student does
//! not hold yet.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{Achievement, PushMessage, Student, StudentChange, StudentStats};
use crate::ports::{Clock, DatabaseService, NotificationService, PortError, PortResult};

//=========================================================================================
// Milestone Table
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CurrentStreak,
    TotalBooksRead,
    TotalMinutesRead,
}

impl Metric {
    fn value(self, stats: &StudentStats) -> i64 {
        match self {
            Metric::CurrentStreak => i64::from(stats.current_streak),
            Metric::TotalBooksRead => stats.total_books_read,
            Metric::TotalMinutesRead => stats.total_minutes_read,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Milestone {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub metric: Metric,
    pub threshold: i64,
}

impl Milestone {
    pub fn is_crossed(&self, old: &StudentStats, new: &StudentStats) -> bool {
        self.metric.value(new) >= self.threshold && self.metric.value(old) < self.threshold
    }

    fn to_achievement(self, earned_at: chrono::DateTime<chrono::Utc>) -> Achievement {
        Achievement {
            id: self.id.to_string(),
            name: self.name.to_string(),
            description: self.description.to_string(),
            icon: self.icon.to_string(),
            earned_at,
        }
    }
}

pub const MILESTONES: [Milestone; 5] = [
    Milestone {
        id: "week_streak",
        name: "Week Warrior",
        description: "Read for 7 days in a row!",
        icon: "🔥",
        metric: Metric::CurrentStreak,
        threshold: 7,
    },
    Milestone {
        id: "month_streak",
        name: "Monthly Master",
        description: "Read for 30 days in a row!",
        icon: "🌟",
        metric: Metric::CurrentStreak,
        threshold: 30,
    },
    Milestone {
        id: "ten_books",
        name: "Book Collector",
        description: "Read 10 books!",
        icon: "📚",
        metric: Metric::TotalBooksRead,
        threshold: 10,
    },
    Milestone {
        id: "fifty_books",
        name: "Bookworm",
        description: "Read 50 books!",
        icon: "🐛",
        metric: Metric::TotalBooksRead,
        threshold: 50,
    },
    Milestone {
        id: "ten_hours",
        name: "Time Traveler",
        description: "Read for 10 hours total!",
        icon: "⏰",
        metric: Metric::TotalMinutesRead,
        threshold: 600,
    },
];

/// Milestones crossed by the transition from `old` to `new`, in table order.
pub fn crossed_milestones(old: &StudentStats, new: &StudentStats) -> Vec<Milestone> {
    MILESTONES
        .iter()
        .filter(|m| m.is_crossed(old, new))
        .copied()
        .collect()
}

//=========================================================================================
// The Detector Service
//=========================================================================================

/// Client-side rendering payload; the timestamp is left out.
#[derive(Serialize)]
struct AchievementPayload<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    icon: &'a str,
}

pub struct AchievementDetector {
    db: Arc<dyn DatabaseService>,
    notifier: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
}

impl AchievementDetector {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        notifier: Arc<dyn NotificationService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { db, notifier, clock }
    }

    /// Awards the milestones crossed by a student update and notifies parents.
    ///
    /// The delivered `after` stats must match the stored student; a stale or
    /// fabricated transition awards nothing. Held achievements, parents and the
    /// student name all come from the stored copy.
    ///
    /// Returns the achievements actually appended. Persistence errors propagate;
    /// notification failures are logged per parent and never abort the call.
    pub async fn handle_student_change(&self, change: &StudentChange) -> PortResult<Vec<Achievement>> {
        if !change.stats_changed() {
            return Ok(Vec::new());
        }

        let stored = match self.db.get_student(change.school_id, change.student_id).await {
            Ok(student) => student,
            Err(PortError::NotFound(_)) => {
                warn!(student_id = %change.student_id, "Student update for unknown student");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        if stored.stats.without_timestamp() != change.after.stats.without_timestamp() {
            warn!(student_id = %change.student_id, "Delivered stats differ from stored stats; no achievements awarded");
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let candidates: Vec<Achievement> = crossed_milestones(&change.before.stats, &stored.stats)
            .into_iter()
            .filter(|m| !stored.has_achievement(m.id))
            .map(|m| m.to_achievement(now))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let appended = self
            .db
            .append_achievements(change.school_id, change.student_id, candidates)
            .await
            .map_err(|e| {
                error!(student_id = %change.student_id, error = %e, "Failed to save achievements");
                e
            })?;

        if !appended.is_empty() {
            self.notify_parents(change.school_id, &stored, &appended).await;
        }
        Ok(appended)
    }

    /// Sends one notification per linked parent with a push token.
    /// Returns how many were delivered.
    async fn notify_parents(&self, school_id: Uuid, student: &Student, earned: &[Achievement]) -> usize {
        let payload: Vec<AchievementPayload> = earned
            .iter()
            .map(|a| AchievementPayload {
                id: &a.id,
                name: &a.name,
                description: &a.description,
                icon: &a.icon,
            })
            .collect();
        let names: Vec<&str> = earned.iter().map(|a| a.name.as_str()).collect();

        let mut data = BTreeMap::new();
        data.insert("type".to_string(), "achievement_earned".to_string());
        data.insert("studentId".to_string(), student.id.to_string());
        data.insert("schoolId".to_string(), school_id.to_string());
        data.insert(
            "achievements".to_string(),
            serde_json::to_string(&payload).unwrap_or_default(),
        );

        let mut delivered = 0;
        for parent_id in &student.parent_ids {
            let parent = match self.db.get_parent(school_id, *parent_id).await {
                Ok(parent) => parent,
                Err(e) => {
                    error!(parent_id = %parent_id, student_id = %student.id, error = %e, "Failed to load parent for achievement notification");
                    continue;
                }
            };
            let Some(token) = parent.push_token else {
                continue;
            };

            let message = PushMessage {
                token,
                title: format!("{} earned new achievements! 🎉", student.first_name),
                body: names.join(", "),
                data: data.clone(),
            };
            match self.notifier.send(&message).await {
                Ok(()) => {
                    delivered += 1;
                    info!(parent_id = %parent_id, student_id = %student.id, achievements = ?names, "Achievement notification sent");
                }
                Err(e) => {
                    error!(parent_id = %parent_id, student_id = %student.id, error = %e, "Failed to send achievement notification");
                }
            }
        }
        delivered
    }
}
