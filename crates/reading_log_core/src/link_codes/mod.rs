//! crates/reading_log_core/src/link_codes/mod.rs
//!
//! Link codes: the short tokens that let a parent account attach to students.
//!
//! - `verifier`: rate-limited, audited lookup of a code typed in by a parent.
//! - `bulk`: staff-issued codes covering several students at once.
//! - this module: the code format, the generator and the expiry sweep.

pub mod bulk;
pub mod verifier;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{error, info};

use crate::ports::{Clock, DatabaseService, PortResult};

pub use bulk::{BulkCodeIssuer, BulkCodeRequest, IssuedBulkCode};
pub use verifier::{CodeVerifier, VerificationFailure, VerifiedLinkCode};

/// Characters a generated code may contain. Visually ambiguous glyphs
/// (`0`, `O`, `1`, `I`) are left out.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LENGTH: usize = 8;

static CODE_FORMAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z0-9]{8}$").unwrap());

/// Uppercases a user-typed code and checks its shape.
/// Returns `None` when the value can never be a valid code.
pub fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.to_uppercase();
    CODE_FORMAT.is_match(&code).then_some(code)
}

/// Draws a fresh code from [`CODE_ALPHABET`].
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

//=========================================================================================
// Expiry Sweep
//=========================================================================================

/// Moves every `active` code past its expiry to `expired`.
pub struct LinkCodeSweeper {
    db: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl LinkCodeSweeper {
    pub fn new(db: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Returns how many codes were expired.
    pub async fn run(&self) -> PortResult<u64> {
        let now: DateTime<Utc> = self.clock.now();
        match self.db.expire_link_codes(now).await {
            Ok(expired) => {
                info!(expired, "Expired link codes swept");
                Ok(expired)
            }
            Err(e) => {
                error!(error = %e, "Error expiring link codes");
                Err(e)
            }
        }
    }
}
