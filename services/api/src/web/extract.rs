//! services/api/src/web/extract.rs
//!
//! JSON body extraction that answers undecodable bodies with the API's error
//! envelope instead of axum's plain-text rejection.

use axum::extract::{FromRequest, Request};
use axum::Json;
use reading_log_core::ServiceError;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;

/// A request body and the message returned when it cannot be decoded.
pub trait RequestBody: DeserializeOwned + Send {
    const INVALID: &'static str;
}

/// Like [`Json`], but a missing, mistyped or malformed body becomes a 400
/// `INVALID_ARGUMENT` carrying `T::INVALID`.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: RequestBody,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                debug!(reason = %rejection.body_text(), "Rejected request body");
                Err(ServiceError::InvalidInput(T::INVALID.to_string()).into())
            }
        }
    }
}
