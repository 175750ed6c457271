//! crates/reading_log_core/src/reminders.rs
//!
//! The daily reading-reminder sweep.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::{PushMessage, School, Student};
use crate::ports::{Clock, DatabaseService, NotificationService, PortError, PortResult};
use crate::streak::ReadingCalendar;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderReport {
    pub sent: usize,
    pub skipped_schools: usize,
}

/// Reminds the parents of every student with no log today to record one.
pub struct ReminderSweep {
    db: Arc<dyn DatabaseService>,
    notifier: Arc<dyn NotificationService>,
    clock: Arc<dyn Clock>,
    calendar: ReadingCalendar,
}

impl ReminderSweep {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        notifier: Arc<dyn NotificationService>,
        clock: Arc<dyn Clock>,
        calendar: ReadingCalendar,
    ) -> Self {
        Self {
            db,
            notifier,
            clock,
            calendar,
        }
    }

    /// Runs one sweep over every school.
    ///
    /// Schools inside their quiet hours are skipped. Store errors abort the sweep;
    /// delivery failures are logged per parent and skipped.
    pub async fn run(&self) -> PortResult<ReminderReport> {
        info!("Starting daily reading reminders");
        let result = self.sweep().await;
        if let Err(e) = &result {
            error!(error = %e, "Error in reading reminder sweep");
        }
        result
    }

    async fn sweep(&self) -> PortResult<ReminderReport> {
        let now = self.clock.now();
        let hour = self.calendar.hour_of(now);
        let since = self.calendar.start_of_day(self.calendar.day_of(now));

        let mut report = ReminderReport::default();
        for school in self.db.list_schools().await? {
            if school.quiet_hours.map_or(false, |q| q.is_active_at(hour)) {
                info!(school_id = %school.id, "Skipping school, quiet hours active");
                report.skipped_schools += 1;
                continue;
            }

            for student in self.db.list_students(school.id).await? {
                if student.parent_ids.is_empty() {
                    continue;
                }
                if self.db.has_log_since(school.id, student.id, since).await? {
                    continue;
                }
                report.sent += self.remind_parents(&school, &student).await?;
            }
        }
        Ok(report)
    }

    async fn remind_parents(&self, school: &School, student: &Student) -> PortResult<usize> {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), "reading_reminder".to_string());
        data.insert("studentId".to_string(), student.id.to_string());
        data.insert("schoolId".to_string(), school.id.to_string());

        let mut sent = 0;
        for parent_id in &student.parent_ids {
            let parent = match self.db.get_parent(school.id, *parent_id).await {
                Ok(parent) => parent,
                Err(PortError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let Some(token) = parent.push_token else {
                continue;
            };

            let message = PushMessage {
                token,
                title: "Time to read! 📚".to_string(),
                body: format!("Don't forget to log {}'s reading today!", student.first_name),
                data: data.clone(),
            };
            match self.notifier.send(&message).await {
                Ok(()) => {
                    sent += 1;
                    info!(parent_id = %parent_id, student_id = %student.id, "Reminder sent");
                }
                Err(e) => {
                    error!(parent_id = %parent_id, student_id = %student.id, error = %e, "Failed to send reminder");
                }
            }
        }
        Ok(sent)
    }
}
