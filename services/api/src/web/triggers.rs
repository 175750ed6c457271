//! services/api/src/web/triggers.rs
//!
//! Endpoints the change-event runtime delivers document writes to. A failed
//! reaction answers 500 so the runtime redelivers the event.

use crate::error::ApiResult;
use crate::web::extract::ApiJson;
use crate::web::protocol::{
    ReadingLogWrittenRequest, ReadingLogWrittenResponse, StudentUpdatedRequest,
    StudentUpdatedResponse,
};
use crate::web::state::AppState;
use axum::{extract::State, Json};
use reading_log_core::{ReadingLogChange, StudentChange};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/triggers/reading-log-written",
    request_body = ReadingLogWrittenRequest,
    responses(
        (status = 200, description = "All reactions ran", body = ReadingLogWrittenResponse),
        (status = 400, description = "Malformed event"),
        (status = 401, description = "Missing or wrong internal secret"),
        (status = 500, description = "A reaction failed; redeliver the event")
    )
)]
pub async fn reading_log_written_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ReadingLogWrittenRequest>,
) -> ApiResult<Json<ReadingLogWrittenResponse>> {
    let change = ReadingLogChange::from(req);
    let report = state.pipeline.reading_log_written(&change).await?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    post,
    path = "/triggers/student-updated",
    request_body = StudentUpdatedRequest,
    responses(
        (status = 200, description = "Achievements checked", body = StudentUpdatedResponse),
        (status = 400, description = "Malformed event"),
        (status = 401, description = "Missing or wrong internal secret"),
        (status = 500, description = "The reaction failed; redeliver the event")
    )
)]
pub async fn student_updated_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<StudentUpdatedRequest>,
) -> ApiResult<Json<StudentUpdatedResponse>> {
    let change = StudentChange::from(req);
    let awarded = state.pipeline.student_updated(&change).await?;
    Ok(Json(StudentUpdatedResponse {
        achievements: awarded.into_iter().map(|a| a.id).collect(),
    }))
}
