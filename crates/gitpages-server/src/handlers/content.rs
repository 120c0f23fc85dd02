//! GET/HEAD content-plane handler (§4.5, §6): turns an axum request into a
//! [`ServeRequest`] and an axum response out of the resulting
//! [`ServeResponse`]. HEAD is handled by serving the same body and letting
//! axum's router drop it, matching how the teacher's CLI leaves transport
//! concerns to the layer that actually owns them.

use axum::body::Body;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use gitpages_serve::ServeRequest;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn serve_get(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let host = header_str(&headers, "host").unwrap_or_default();
    let request = ServeRequest {
        host,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        accept_encoding: header_str(&headers, "accept-encoding"),
        if_none_match: header_str(&headers, "if-none-match"),
        has_origin_header: headers.contains_key("origin"),
        authorized_for_manifest_json: false,
    };

    let response = state.serve.serve(request).await?;
    Ok(to_axum_response(response))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn to_axum_response(response: gitpages_serve::ServeResponse) -> Response {
    use gitpages_serve::ServeResponse::*;
    match response {
        Ok { status, headers, body } => {
            let mut builder = Response::builder().status(status_or_500(status));
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::from(body)).unwrap_or_else(|_| fallback_response())
        }
        Redirect { status, location } => Response::builder()
            .status(status_or_500(status))
            .header("Location", location)
            .body(Body::empty())
            .unwrap_or_else(|_| fallback_response()),
        NotModified { etag } => Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header("ETag", etag)
            .body(Body::empty())
            .unwrap_or_else(|_| fallback_response()),
    }
}

fn status_or_500(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn fallback_response() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(Body::from("response assembly failed"))
        .expect("a fixed status/body response always builds")
}
