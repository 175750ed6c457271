//! services/api/src/web/jobs.rs
//!
//! Endpoints the external scheduler calls. They sit behind the internal
//! secret check, like the trigger endpoints.

use crate::error::ApiResult;
use crate::web::protocol::{ExpireLinkCodesResponse, ReadingRemindersResponse};
use crate::web::state::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;

/// Mark every active link code past its expiry as expired.
#[utoipa::path(
    post,
    path = "/jobs/expire-link-codes",
    responses(
        (status = 200, description = "Sweep finished", body = ExpireLinkCodesResponse),
        (status = 401, description = "Missing or wrong internal secret"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn expire_link_codes_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ExpireLinkCodesResponse>> {
    let expired = state.sweeper.run().await?;
    Ok(Json(ExpireLinkCodesResponse { expired }))
}

/// Remind parents of students with no reading logged today.
#[utoipa::path(
    post,
    path = "/jobs/reading-reminders",
    responses(
        (status = 200, description = "Sweep finished", body = ReadingRemindersResponse),
        (status = 401, description = "Missing or wrong internal secret"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn reading_reminders_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ReadingRemindersResponse>> {
    let report = state.reminders.run().await?;
    Ok(Json(report.into()))
}
