pub mod extract;
pub mod jobs;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod triggers;

pub use middleware::{require_auth, require_internal, INTERNAL_SECRET_HEADER};
pub use rest::ApiDoc;
pub use state::{Adapters, AppState};

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ConfigError;
use crate::error::ApiResult;

/// Builds the complete application router: API routes plus the Swagger UI.
pub fn build_router(app_state: Arc<AppState>) -> ApiResult<Router> {
    let origin = HeaderValue::from_str(&app_state.config.cors_origin).map_err(|e| {
        ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/callable/verify-link-code", post(rest::verify_link_code_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/callable/create-bulk-link-code",
            post(rest::create_bulk_link_code_handler),
        )
        .route("/callable/unlink-parent", post(rest::unlink_parent_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Event delivery and scheduler routes (internal secret required)
    let internal_routes = Router::new()
        .route(
            "/triggers/reading-log-written",
            post(triggers::reading_log_written_handler),
        )
        .route(
            "/triggers/student-updated",
            post(triggers::student_updated_handler),
        )
        .route("/jobs/expire-link-codes", post(jobs::expire_link_codes_handler))
        .route("/jobs/reading-reminders", post(jobs::reading_reminders_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_internal,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(internal_routes)
        .layer(cors)
        .with_state(app_state);

    Ok(Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())))
}
