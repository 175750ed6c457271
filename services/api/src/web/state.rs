//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use reading_log_core::ports::{
    AuditSink, Clock, DatabaseService, NotificationService, RateLimiter,
};
use reading_log_core::{
    BulkCodeIssuer, CodeVerifier, LinkCodeSweeper, ReactionPipeline, ReminderSweep, UnlinkService,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The adapters the services are wired against.
#[derive(Clone)]
pub struct Adapters {
    pub db: Arc<dyn DatabaseService>,
    pub audit: Arc<dyn AuditSink>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub notifier: Arc<dyn NotificationService>,
    pub clock: Arc<dyn Clock>,
}

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub verifier: CodeVerifier,
    pub bulk_issuer: BulkCodeIssuer,
    pub unlink: UnlinkService,
    pub pipeline: ReactionPipeline,
    pub sweeper: LinkCodeSweeper,
    pub reminders: ReminderSweep,
}

impl AppState {
    pub fn new(config: Config, adapters: Adapters) -> Self {
        let Adapters {
            db,
            audit,
            rate_limiter,
            notifier,
            clock,
        } = adapters;
        let calendar = config.calendar;

        Self {
            verifier: CodeVerifier::new(db.clone(), rate_limiter, audit, clock.clone()),
            bulk_issuer: BulkCodeIssuer::new(db.clone(), clock.clone()),
            unlink: UnlinkService::new(db.clone(), clock.clone()),
            pipeline: ReactionPipeline::new(db.clone(), notifier.clone(), clock.clone(), calendar),
            sweeper: LinkCodeSweeper::new(db.clone(), clock.clone()),
            reminders: ReminderSweep::new(db.clone(), notifier, clock, calendar),
            db,
            config: Arc::new(config),
        }
    }
}
