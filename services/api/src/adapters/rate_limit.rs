//! services/api/src/adapters/rate_limit.rs
//!
//! A Postgres-backed implementation of the `RateLimiter` port. Counters live in
//! the `rate_limits` table so every API instance shares the same budget.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reading_log_core::domain::RateLimitCounter;
use reading_log_core::ports::{PortError, PortResult, RateDecision, RateLimiter};
use reading_log_core::RateLimitPolicy;
use sqlx::{FromRow, PgPool};

#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
    policy: RateLimitPolicy,
}

impl PgRateLimiter {
    pub fn new(pool: PgPool, policy: RateLimitPolicy) -> Self {
        Self { pool, policy }
    }
}

#[derive(FromRow)]
struct CounterRecord {
    attempts: i32,
    last_attempt: DateTime<Utc>,
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_and_record(&self, key: &str, now: DateTime<Utc>) -> PortResult<RateDecision> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Make sure a row exists so the lock below serialises concurrent first attempts.
        sqlx::query(
            "INSERT INTO rate_limits (key, attempts, last_attempt) VALUES ($1, 0, 'epoch') \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, CounterRecord>(
            "SELECT attempts, last_attempt FROM rate_limits WHERE key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        let existing = RateLimitCounter {
            attempts: u32::try_from(record.attempts).unwrap_or(0),
            last_attempt: record.last_attempt,
        };
        let (decision, next) = self.policy.register_attempt(Some(existing), now);

        if let Some(counter) = next {
            sqlx::query("UPDATE rate_limits SET attempts = $2, last_attempt = $3 WHERE key = $1")
                .bind(key)
                .bind(i32::try_from(counter.attempts).unwrap_or(i32::MAX))
                .bind(counter.last_attempt)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(decision)
    }
}
