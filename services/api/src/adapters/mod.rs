pub mod db;
pub mod push;
pub mod rate_limit;

pub use db::DbAdapter;
pub use push::{HttpPushAdapter, LogOnlyPushAdapter};
pub use rate_limit::PgRateLimiter;
