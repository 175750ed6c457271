//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the callable endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiResult;
use crate::web::extract::ApiJson;
use crate::web::middleware::ClientIp;
use crate::web::protocol::{
    CreateBulkLinkCodeRequest, CreateBulkLinkCodeResponse, ExpireLinkCodesResponse,
    HealthResponse, LinkCodeData, ReadingLogWrittenRequest, ReadingLogWrittenResponse,
    ReadingRemindersResponse, StudentSummaryDto, StudentUpdatedRequest, StudentUpdatedResponse,
    UnlinkParentRequest, UnlinkParentResponse, VerifyLinkCodeRequest, VerifyLinkCodeResponse,
};
use crate::web::state::AppState;
use axum::{extract::State, Extension, Json};
use reading_log_core::{BulkCodeRequest, Caller};
use std::sync::Arc;
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        verify_link_code_handler,
        create_bulk_link_code_handler,
        unlink_parent_handler,
        crate::web::triggers::reading_log_written_handler,
        crate::web::triggers::student_updated_handler,
        crate::web::jobs::expire_link_codes_handler,
        crate::web::jobs::reading_reminders_handler,
    ),
    components(
        schemas(
            HealthResponse,
            VerifyLinkCodeRequest,
            VerifyLinkCodeResponse,
            LinkCodeData,
            CreateBulkLinkCodeRequest,
            CreateBulkLinkCodeResponse,
            StudentSummaryDto,
            UnlinkParentRequest,
            UnlinkParentResponse,
            ReadingLogWrittenRequest,
            ReadingLogWrittenResponse,
            StudentUpdatedRequest,
            StudentUpdatedResponse,
            ExpireLinkCodesResponse,
            ReadingRemindersResponse,
        )
    ),
    tags(
        (name = "Reading Log API", description = "Parent linking, reading statistics and scheduled jobs.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Health
//=========================================================================================

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

//=========================================================================================
// Callable Handlers
//=========================================================================================

/// Verify a parent link code.
///
/// Public. Attempts are rate limited per client address.
#[utoipa::path(
    post,
    path = "/callable/verify-link-code",
    request_body = VerifyLinkCodeRequest,
    responses(
        (status = 200, description = "The code is valid", body = VerifyLinkCodeResponse),
        (status = 400, description = "Malformed code"),
        (status = 404, description = "No such code"),
        (status = 412, description = "The code is used, expired or revoked"),
        (status = 429, description = "Too many attempts from this address"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn verify_link_code_handler(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    ApiJson(req): ApiJson<VerifyLinkCodeRequest>,
) -> ApiResult<Json<VerifyLinkCodeResponse>> {
    let raw_code = req.code.unwrap_or_default();
    let verified = state.verifier.verify(&raw_code, &ip).await?;
    Ok(Json(VerifyLinkCodeResponse {
        success: true,
        code_data: verified.into(),
    }))
}

/// Create one link code covering several students.
#[utoipa::path(
    post,
    path = "/callable/create-bulk-link-code",
    request_body = CreateBulkLinkCodeRequest,
    responses(
        (status = 200, description = "Code created", body = CreateBulkLinkCodeResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Caller is not staff of the school"),
        (status = 404, description = "Some students do not exist"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_bulk_link_code_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<CreateBulkLinkCodeRequest>,
) -> ApiResult<Json<CreateBulkLinkCodeResponse>> {
    let request = BulkCodeRequest {
        student_ids: req.student_ids,
        school_id: req.school_id,
        validity_days: req.validity_days,
    };
    let issued = state.bulk_issuer.issue(caller, request).await?;
    Ok(Json(issued.into()))
}

/// Remove the link between the calling parent and one student.
#[utoipa::path(
    post,
    path = "/callable/unlink-parent",
    request_body = UnlinkParentRequest,
    responses(
        (status = 200, description = "Unlinked", body = UnlinkParentResponse),
        (status = 400, description = "Missing or malformed ids"),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "Parent or student not found"),
        (status = 412, description = "Caller is not linked to this student"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn unlink_parent_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    ApiJson(req): ApiJson<UnlinkParentRequest>,
) -> ApiResult<Json<UnlinkParentResponse>> {
    let message = state
        .unlink
        .unlink(caller, req.school_id, req.student_id)
        .await?;
    Ok(Json(UnlinkParentResponse {
        success: true,
        message,
    }))
}
