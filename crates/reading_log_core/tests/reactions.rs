//! Integration tests for the change-event reactions: stats recomputation,
//! class rollups, validation and achievement detection driven through the
//! pipeline against the in-memory store.

use chrono::{DateTime, Days, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use reading_log_core::achievements::AchievementDetector;
use reading_log_core::domain::{
    Class, ClassStats, LogStatus, Parent, ReadingLog, ReadingLogChange, Student, StudentChange,
    StudentStats, ValidationStatus,
};
use reading_log_core::memory::{FixedClock, InMemoryStore, RecordingNotifier};
use reading_log_core::ports::DatabaseService;
use reading_log_core::{ReactionPipeline, ReadingCalendar};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 15, 16, 0, 0).unwrap()
}

struct World {
    store: Arc<InMemoryStore>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<FixedClock>,
    school_id: Uuid,
    class_id: Uuid,
    parent_id: Uuid,
    student_id: Uuid,
}

impl World {
    async fn new() -> Self {
        let clock = Arc::new(FixedClock::new(now()));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let notifier = Arc::new(RecordingNotifier::failing_for(["broken-device"]));
        let school_id = Uuid::new_v4();
        let class_id = Uuid::new_v4();
        let parent_id = Uuid::new_v4();
        let student_id = Uuid::new_v4();

        store
            .insert_class(Class {
                id: class_id,
                school_id,
                name: "2A".into(),
                stats: ClassStats::default(),
            })
            .await;
        store
            .insert_student(Student {
                id: student_id,
                school_id,
                first_name: "Theo".into(),
                last_name: "Marsh".into(),
                class_id: Some(class_id),
                parent_ids: Vec::new(),
                stats: StudentStats::default(),
                achievements: Vec::new(),
            })
            .await;
        store
            .insert_parent(Parent {
                id: parent_id,
                school_id,
                linked_children: Vec::new(),
                push_token: Some("parent-device".into()),
            })
            .await;
        store.link(school_id, parent_id, student_id).await;

        Self {
            store,
            notifier,
            clock,
            school_id,
            class_id,
            parent_id,
            student_id,
        }
    }

    fn pipeline(&self) -> ReactionPipeline {
        ReactionPipeline::new(
            self.store.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            ReadingCalendar::utc(),
        )
    }

    fn log(&self, days_ago: u64, minutes: i64, books: usize) -> ReadingLog {
        ReadingLog {
            id: Uuid::new_v4(),
            student_id: Some(self.student_id),
            parent_id: Some(self.parent_id),
            date: now().checked_sub_days(Days::new(days_ago)).unwrap(),
            minutes_read: minutes,
            book_titles: (0..books).map(|i| format!("Title {i}")).collect(),
            status: LogStatus::Completed,
            validation_status: None,
            validation_errors: Vec::new(),
        }
    }

    /// Stores the log and delivers its creation event.
    async fn create(&self, log: ReadingLog) -> ReadingLogChange {
        self.store.insert_log(self.school_id, log.clone()).await;
        ReadingLogChange {
            school_id: self.school_id,
            log_id: log.id,
            before: None,
            after: Some(log),
        }
    }

    async fn student(&self) -> Student {
        self.store.student(self.school_id, self.student_id).await.unwrap()
    }

    /// Stores new stats for the student and returns the resulting change.
    async fn write_stats(&self, stats: StudentStats) -> StudentChange {
        self.store
            .write_student_stats(self.school_id, self.student_id, stats)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn creation_runs_every_reaction() {
    let world = World::new().await;
    let change = world.create(world.log(0, 25, 1)).await;

    let report = world.pipeline().reading_log_written(&change).await.unwrap();
    assert!(report.stats_updated);
    assert_eq!(report.classes_updated, vec![world.class_id]);
    assert_eq!(report.validation, Some(ValidationStatus::Valid));
    assert!(report.achievements.is_empty());

    let stats = world.student().await.stats;
    assert_eq!(stats.total_minutes_read, 25);
    assert_eq!(stats.current_streak, 1);
    let class = world.store.class(world.school_id, world.class_id).await.unwrap();
    assert_eq!(class.stats.total_minutes_read, 25);
    assert_eq!(class.stats.active_students, 1);
}

#[tokio::test]
async fn streak_must_include_today() {
    let world = World::new().await;
    world.create(world.log(1, 10, 0)).await;
    let change = world.create(world.log(2, 10, 0)).await;

    world.pipeline().reading_log_written(&change).await.unwrap();
    let stats = world.student().await.stats;
    assert_eq!(stats.current_streak, 0);
    assert_eq!(stats.longest_streak, 2);
}

#[tokio::test]
async fn deletion_recomputes_from_the_remaining_logs() {
    let world = World::new().await;
    let kept = world.log(0, 30, 1);
    world.create(kept).await;
    let doomed = world.log(1, 45, 2);
    let created = world.create(doomed.clone()).await;
    world.pipeline().reading_log_written(&created).await.unwrap();
    assert_eq!(world.student().await.stats.total_minutes_read, 75);

    world.store.remove_log(world.school_id, doomed.id).await;
    let deletion = ReadingLogChange {
        school_id: world.school_id,
        log_id: doomed.id,
        before: Some(doomed),
        after: None,
    };
    let report = world.pipeline().reading_log_written(&deletion).await.unwrap();
    assert!(report.stats_updated);
    assert_eq!(report.validation, None);

    let stats = world.student().await.stats;
    assert_eq!(stats.total_minutes_read, 30);
    assert_eq!(stats.total_books_read, 1);
    assert_eq!(stats.longest_streak, 1);
}

#[tokio::test]
async fn invalid_log_is_flagged_but_still_counted() {
    let world = World::new().await;
    let mut log = world.log(0, 300, 0);
    log.parent_id = Some(Uuid::new_v4());
    let change = world.create(log.clone()).await;

    let report = world.pipeline().reading_log_written(&change).await.unwrap();
    assert_eq!(report.validation, Some(ValidationStatus::Invalid));

    let stored = world.store.log(world.school_id, log.id).await.unwrap();
    assert_eq!(stored.validation_errors.len(), 2);
    assert_eq!(world.student().await.stats.total_minutes_read, 300);
}

#[tokio::test]
async fn crossing_ten_hours_awards_and_notifies_once() {
    let world = World::new().await;
    world.create(world.log(3, 300, 0)).await;
    world.create(world.log(2, 290, 0)).await;
    let first = world.create(world.log(1, 5, 0)).await;
    let report = world.pipeline().reading_log_written(&first).await.unwrap();
    assert!(report.achievements.is_empty());

    let crossing = world.create(world.log(0, 5, 0)).await;
    let report = world.pipeline().reading_log_written(&crossing).await.unwrap();
    assert_eq!(report.achievements, vec!["ten_hours".to_string()]);

    // Redelivering the same event recomputes identical stats and awards nothing.
    let report = world.pipeline().reading_log_written(&crossing).await.unwrap();
    assert!(report.achievements.is_empty());

    let student = world.student().await;
    let ten_hours: Vec<_> = student
        .achievements
        .iter()
        .filter(|a| a.id == "ten_hours")
        .collect();
    assert_eq!(ten_hours.len(), 1);
    assert_eq!(ten_hours[0].earned_at, now());

    let sent = world.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Theo earned new achievements! 🎉");
    assert_eq!(sent[0].body, "Time Traveler");
    assert_eq!(sent[0].data["type"], "achievement_earned");
}

#[tokio::test]
async fn replaying_a_student_change_never_duplicates_an_achievement() {
    let world = World::new().await;
    let change = world
        .write_stats(StudentStats {
            current_streak: 7,
            longest_streak: 7,
            ..StudentStats::default()
        })
        .await;

    let detector = AchievementDetector::new(world.store.clone(), world.notifier.clone(), world.clock.clone());
    let first = detector.handle_student_change(&change).await.unwrap();
    let second = detector.handle_student_change(&change).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "week_streak");
    assert!(second.is_empty());
    assert_eq!(world.student().await.achievements.len(), 1);
    assert_eq!(world.notifier.sent().len(), 1);
}

#[tokio::test]
async fn staying_above_a_threshold_does_not_refire() {
    let world = World::new().await;
    let mut change = world
        .write_stats(StudentStats {
            current_streak: 8,
            ..StudentStats::default()
        })
        .await;
    change.before.stats.current_streak = 7;

    let earned = world.pipeline().student_updated(&change).await.unwrap();
    assert!(earned.is_empty());
    assert!(world.notifier.sent().is_empty());
}

#[tokio::test]
async fn a_delivered_transition_the_store_never_saw_awards_nothing() {
    let world = World::new().await;
    let before = world.student().await;
    let mut after = before.clone();
    after.stats = StudentStats {
        current_streak: 30,
        longest_streak: 30,
        total_books_read: 50,
        total_minutes_read: 600,
        ..StudentStats::default()
    };
    let change = StudentChange {
        school_id: world.school_id,
        student_id: world.student_id,
        before,
        after,
    };

    let earned = world.pipeline().student_updated(&change).await.unwrap();

    assert!(earned.is_empty());
    assert!(world.student().await.achievements.is_empty());
    assert!(world.notifier.sent().is_empty());
}

#[tokio::test]
async fn a_failing_device_does_not_block_other_parents() {
    let world = World::new().await;
    let broken_parent = Uuid::new_v4();
    world
        .store
        .insert_parent(Parent {
            id: broken_parent,
            school_id: world.school_id,
            linked_children: Vec::new(),
            push_token: Some("broken-device".into()),
        })
        .await;
    world.store.link(world.school_id, broken_parent, world.student_id).await;

    let change = world
        .write_stats(StudentStats {
            total_books_read: 10,
            ..StudentStats::default()
        })
        .await;

    let earned = world.pipeline().student_updated(&change).await.unwrap();
    assert_eq!(earned.len(), 1);
    let sent = world.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].token, "parent-device");
    assert!(world.student().await.has_achievement("ten_books"));
}

#[tokio::test]
async fn moving_a_log_to_another_student_recomputes_both() {
    let world = World::new().await;
    let other_class = Uuid::new_v4();
    let other_student = Uuid::new_v4();
    world
        .store
        .insert_class(Class {
            id: other_class,
            school_id: world.school_id,
            name: "4C".into(),
            stats: ClassStats::default(),
        })
        .await;
    world
        .store
        .insert_student(Student {
            id: other_student,
            school_id: world.school_id,
            first_name: "Iris".into(),
            last_name: "Marsh".into(),
            class_id: Some(other_class),
            parent_ids: Vec::new(),
            stats: StudentStats::default(),
            achievements: Vec::new(),
        })
        .await;

    let original = world.log(0, 40, 1);
    let created = world.create(original.clone()).await;
    world.pipeline().reading_log_written(&created).await.unwrap();
    assert_eq!(world.student().await.stats.total_minutes_read, 40);

    let moved = ReadingLog {
        student_id: Some(other_student),
        ..original.clone()
    };
    world.store.insert_log(world.school_id, moved.clone()).await;
    let update = ReadingLogChange {
        school_id: world.school_id,
        log_id: original.id,
        before: Some(original),
        after: Some(moved),
    };
    let report = world.pipeline().reading_log_written(&update).await.unwrap();

    assert_eq!(report.classes_updated, vec![other_class, world.class_id]);
    assert_eq!(world.student().await.stats.total_minutes_read, 0);
    assert_eq!(world.student().await.stats.total_books_read, 0);
    let receiver = world.store.student(world.school_id, other_student).await.unwrap();
    assert_eq!(receiver.stats.total_minutes_read, 40);

    let left = world.store.class(world.school_id, world.class_id).await.unwrap();
    let joined = world.store.class(world.school_id, other_class).await.unwrap();
    assert_eq!(left.stats.total_minutes_read, 0);
    assert_eq!(left.stats.active_students, 0);
    assert_eq!(joined.stats.total_minutes_read, 40);
    assert_eq!(joined.stats.active_students, 1);
}
