pub mod achievements;
pub mod class_stats;
pub mod domain;
pub mod error;
pub mod link_codes;
pub mod memory;
pub mod pipeline;
pub mod ports;
pub mod rate_limit;
pub mod reminders;
pub mod stats;
pub mod streak;
pub mod unlink;
pub mod validation;

pub use domain::{
    Achievement, AuditKind, AuditLogEntry, Caller, LinkCode, LinkCodeStatus, LinkTarget, Parent,
    ReadingLog, ReadingLogChange, Student, StudentChange, StudentStats,
};
pub use error::{ServiceError, ServiceResult};
pub use link_codes::{BulkCodeIssuer, BulkCodeRequest, CodeVerifier, IssuedBulkCode, LinkCodeSweeper, VerifiedLinkCode};
pub use pipeline::{LogReactionReport, ReactionPipeline};
pub use ports::{
    AuditSink, Clock, DatabaseService, LinkTransaction, NotificationService, PortError, PortResult,
    RateDecision, RateLimiter, SystemClock,
};
pub use rate_limit::RateLimitPolicy;
pub use reminders::{ReminderReport, ReminderSweep};
pub use streak::ReadingCalendar;
pub use unlink::UnlinkService;
