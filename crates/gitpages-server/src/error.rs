//! HTTP-edge error mapping (spec §6 error mapping table, §7 error kinds).
//! Every handler returns `Result<T, ApiError>`; this is the one place that
//! table gets consulted.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use gitpages_ingest::WebhookError;
use gitpages_serve::HostError;
use gitpages_types::Error;

pub struct ApiError {
    status: StatusCode,
    body: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, body: detail.into() }
    }

    pub fn unsupported_media_type(detail: impl Into<String>) -> Self {
        ApiError { status: StatusCode::UNSUPPORTED_MEDIA_TYPE, body: detail.into() }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError { status, body: err.to_string() }
    }
}

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, body: err.to_string() }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let status = match &err {
            WebhookError::NotAPushEvent(_) => StatusCode::BAD_REQUEST,
            WebhookError::RefMismatch { .. } => StatusCode::UNAUTHORIZED,
        };
        ApiError { status, body: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}
