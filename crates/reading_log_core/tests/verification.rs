//! Integration tests for link-code verification: format checks, rate limiting,
//! status/expiry handling and the audit trail each outcome leaves.

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use reading_log_core::domain::{AuditKind, LinkCode, LinkCodeStatus, LinkTarget};
use reading_log_core::memory::{FixedClock, InMemoryRateLimiter, InMemoryStore};
use reading_log_core::rate_limit::verification_key;
use reading_log_core::{CodeVerifier, RateLimitPolicy, ServiceError};

const IP: &str = "203.0.113.7";

struct Fixture {
    store: Arc<InMemoryStore>,
    limiter: Arc<InMemoryRateLimiter>,
    clock: Arc<FixedClock>,
    verifier: CodeVerifier,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap()
}

fn fixture() -> Fixture {
    let clock = Arc::new(FixedClock::new(start()));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let limiter = Arc::new(InMemoryRateLimiter::new(RateLimitPolicy::default()));
    let verifier = CodeVerifier::new(store.clone(), limiter.clone(), store.clone(), clock.clone());
    Fixture {
        store,
        limiter,
        clock,
        verifier,
    }
}

fn link_code(value: &str, status: LinkCodeStatus) -> LinkCode {
    LinkCode {
        id: Uuid::new_v4(),
        code: value.to_string(),
        target: LinkTarget::Single {
            student_id: Uuid::new_v4(),
        },
        school_id: Uuid::new_v4(),
        status,
        created_at: start() - Duration::days(10),
        expires_at: Some(start() + Duration::days(355)),
        created_by: None,
        expired_at: None,
        revoke_reason: None,
        metadata: serde_json::json!({ "studentName": "Ava Stone" }),
    }
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_code_is_rejected_before_any_access() {
    let fx = fixture();
    let err = fx.verifier.verify("AB-12", IP).await.unwrap_err();

    assert_eq!(
        err,
        ServiceError::InvalidInput("Invalid code format. Code must be 8 alphanumeric characters.".into())
    );
    assert!(fx.limiter.counter(&verification_key(IP)).is_none());
    assert!(fx.store.audit_entries().await.is_empty());
}

#[tokio::test]
async fn lowercase_input_is_normalized() {
    let fx = fixture();
    fx.store.insert_link_code(link_code("AB12CD34", LinkCodeStatus::Active)).await;

    let verified = fx.verifier.verify("ab12cd34", IP).await.unwrap();
    assert_eq!(verified.code, "AB12CD34");
}

// ---------------------------------------------------------------------------
// Lookup outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_code_is_not_found_with_one_audit_entry() {
    let fx = fixture();
    let err = fx.verifier.verify("AB12CD34", IP).await.unwrap_err();

    assert_matches!(err, ServiceError::NotFound(_));
    let audits = fx.store.audit_entries().await;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].kind, AuditKind::CodeVerificationFailed);
    assert_eq!(audits[0].reason.as_deref(), Some("code_not_found"));
    assert_eq!(audits[0].code.as_deref(), Some("AB12CD34"));
    assert_eq!(audits[0].ip.as_deref(), Some(IP));
}

#[tokio::test]
async fn expired_status_is_a_precondition_failure() {
    let fx = fixture();
    fx.store.insert_link_code(link_code("AB12CD34", LinkCodeStatus::Expired)).await;

    let err = fx.verifier.verify("AB12CD34", IP).await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Precondition("This code has expired. Please request a new code.".into())
    );

    let audits = fx.store.audit_entries().await;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].reason.as_deref(), Some("code_expired"));
}

#[tokio::test]
async fn active_code_past_expiry_is_rejected() {
    let fx = fixture();
    let mut code = link_code("ZX98YW76", LinkCodeStatus::Active);
    code.expires_at = Some(start() - Duration::minutes(1));
    fx.store.insert_link_code(code).await;

    let err = fx.verifier.verify("ZX98YW76", IP).await.unwrap_err();
    assert_matches!(err, ServiceError::Precondition(_));
    let audits = fx.store.audit_entries().await;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].reason.as_deref(), Some("code_expired"));
}

#[tokio::test]
async fn each_inactive_status_has_its_own_reason() {
    let cases = [
        (LinkCodeStatus::Used, "code_already_used", "This code has already been used by another parent."),
        (LinkCodeStatus::Revoked, "code_revoked", "This code has been revoked."),
    ];
    for (status, reason, message) in cases {
        let fx = fixture();
        fx.store.insert_link_code(link_code("QW34ER56", status)).await;

        let err = fx.verifier.verify("QW34ER56", IP).await.unwrap_err();
        assert_eq!(err, ServiceError::Precondition(message.into()));
        let audits = fx.store.audit_entries().await;
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].reason.as_deref(), Some(reason));
    }
}

#[tokio::test]
async fn success_is_audited_and_projected() {
    let fx = fixture();
    let code = link_code("AB12CD34", LinkCodeStatus::Active);
    fx.store.insert_link_code(code.clone()).await;

    let verified = fx.verifier.verify("AB12CD34", IP).await.unwrap();
    assert_eq!(verified.id, code.id);
    assert_eq!(verified.student_id, code.target.student_id());
    assert_eq!(verified.school_id, code.school_id);
    assert_eq!(verified.status, LinkCodeStatus::Active);
    assert_eq!(verified.metadata["studentName"], "Ava Stone");

    let audits = fx.store.audit_entries().await;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].kind, AuditKind::CodeVerificationSuccess);
    assert_eq!(audits[0].code_id, Some(code.id));
    assert_eq!(audits[0].school_id, Some(code.school_id));
    assert!(audits[0].reason.is_none());
}

#[tokio::test]
async fn retired_value_reused_by_a_new_active_code_resolves_to_the_new_one() {
    let fx = fixture();
    fx.store.insert_link_code(link_code("AB12CD34", LinkCodeStatus::Used)).await;
    let fresh = link_code("AB12CD34", LinkCodeStatus::Active);
    fx.store.insert_link_code(fresh.clone()).await;

    let verified = fx.verifier.verify("AB12CD34", IP).await.unwrap();
    assert_eq!(verified.id, fresh.id);
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn eleventh_attempt_in_a_minute_fails_fast_without_audit() {
    let fx = fixture();
    for _ in 0..10 {
        fx.clock.advance(Duration::seconds(1));
        let err = fx.verifier.verify("AB12CD34", IP).await.unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));
    }

    fx.clock.advance(Duration::seconds(1));
    let err = fx.verifier.verify("AB12CD34", IP).await.unwrap_err();
    assert_matches!(err, ServiceError::RateExceeded { .. });
    assert_eq!(err.kind(), "RATE_EXCEEDED");

    assert_eq!(fx.store.audit_entries().await.len(), 10);
}

#[tokio::test]
async fn other_addresses_are_not_affected() {
    let fx = fixture();
    for _ in 0..11 {
        let _ = fx.verifier.verify("AB12CD34", IP).await;
    }
    let err = fx.verifier.verify("AB12CD34", "198.51.100.4").await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn counter_resets_once_the_last_attempt_is_a_minute_old() {
    let fx = fixture();
    for _ in 0..10 {
        let _ = fx.verifier.verify("AB12CD34", IP).await;
    }
    assert_matches!(
        fx.verifier.verify("AB12CD34", IP).await,
        Err(ServiceError::RateExceeded { .. })
    );

    fx.clock.advance(Duration::seconds(60));
    assert_matches!(
        fx.verifier.verify("AB12CD34", IP).await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(fx.limiter.counter(&verification_key(IP)).unwrap().attempts, 1);
}
