//! Shared helpers for the HTTP integration tests: an application wired to the
//! in-memory adapters, a seeded school, and request/response utilities.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use tracing::Level;
use uuid::Uuid;

use api_lib::config::Config;
use api_lib::web::{build_router, Adapters, AppState, INTERNAL_SECRET_HEADER};
use reading_log_core::domain::{
    Class, ClassStats, Parent, School, StaffMember, StaffRole, Student, StudentStats,
};
use reading_log_core::memory::{FixedClock, InMemoryRateLimiter, InMemoryStore, RecordingNotifier};
use reading_log_core::{RateLimitPolicy, ReadingCalendar};

pub const TEACHER_SESSION: &str = "teacher-session";
pub const PARENT_SESSION: &str = "parent-session";
pub const OUTSIDER_SESSION: &str = "outsider-session";
pub const INTERNAL_SECRET: &str = "test-internal-secret";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 15, 16, 0, 0).unwrap()
}

/// Build a test `Config` with safe defaults and no external services.
pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: None,
        log_level: Level::INFO,
        db_max_connections: 1,
        calendar: ReadingCalendar::utc(),
        verify_rate_limit: RateLimitPolicy::default(),
        push: None,
        cors_origin: "http://localhost:3000".to_string(),
        internal_secret: INTERNAL_SECRET.to_string(),
        trust_proxy_headers: false,
    }
}

/// One school with a teacher, a linked parent/student pair, a second student
/// and a class holding both students.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub school_id: Uuid,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub parent_id: Uuid,
    pub student_id: Uuid,
    pub sibling_id: Uuid,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let clock = Arc::new(FixedClock::new(now()));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let notifier = Arc::new(RecordingNotifier::new());

        let school_id = Uuid::new_v4();
        let class_id = Uuid::new_v4();
        let teacher_id = Uuid::new_v4();
        let parent_id = Uuid::new_v4();
        let student_id = Uuid::new_v4();
        let sibling_id = Uuid::new_v4();

        store
            .insert_school(School {
                id: school_id,
                name: "Riverside Primary".into(),
                quiet_hours: None,
            })
            .await;
        store
            .insert_staff_member(StaffMember {
                user_id: teacher_id,
                school_id,
                role: StaffRole::Teacher,
            })
            .await;
        store
            .insert_class(Class {
                id: class_id,
                school_id,
                name: "3B".into(),
                stats: ClassStats::default(),
            })
            .await;
        for (id, first_name) in [(student_id, "Mia"), (sibling_id, "Leo")] {
            store
                .insert_student(Student {
                    id,
                    school_id,
                    first_name: first_name.into(),
                    last_name: "Okafor".into(),
                    class_id: Some(class_id),
                    parent_ids: Vec::new(),
                    stats: StudentStats::default(),
                    achievements: Vec::new(),
                })
                .await;
        }
        store
            .insert_parent(Parent {
                id: parent_id,
                school_id,
                linked_children: Vec::new(),
                push_token: Some("parent-device".into()),
            })
            .await;
        store.link(school_id, parent_id, student_id).await;

        store.insert_auth_session(TEACHER_SESSION, teacher_id).await;
        store.insert_auth_session(PARENT_SESSION, parent_id).await;
        store.insert_auth_session(OUTSIDER_SESSION, Uuid::new_v4()).await;

        let adapters = Adapters {
            db: store.clone(),
            audit: store.clone(),
            rate_limiter: Arc::new(InMemoryRateLimiter::new(RateLimitPolicy::default())),
            notifier: notifier.clone(),
            clock: clock.clone(),
        };
        let state = Arc::new(AppState::new(config, adapters));
        let router = build_router(state).unwrap();

        Self {
            router,
            store,
            clock,
            notifier,
            school_id,
            class_id,
            teacher_id,
            parent_id,
            student_id,
            sibling_id,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Method::GET, uri, None, &[]).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> Response<Body> {
        self.send(Method::POST, uri, Some(body), &[]).await
    }

    /// POST as the event runtime or scheduler, presenting the internal secret.
    pub async fn post_internal(&self, uri: &str, body: Value) -> Response<Body> {
        self.send(
            Method::POST,
            uri,
            Some(body),
            &[(INTERNAL_SECRET_HEADER, INTERNAL_SECRET)],
        )
        .await
    }

    /// POST with the `session` cookie set.
    pub async fn post_as(&self, session: &str, uri: &str, body: Value) -> Response<Body> {
        let cookie = format!("session={session}");
        self.send(Method::POST, uri, Some(body), &[(header::COOKIE.as_str(), &cookie)])
            .await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
