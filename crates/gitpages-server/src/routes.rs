//! Route table (§4.5, §6): one content-plane route family handling the
//! `GET/HEAD/PUT/PATCH/DELETE/POST` verbs a site's own path space answers
//! to, plus the proxy-plane domain-check route a front-proxy consults
//! before it ever forwards a request here.

use axum::routing::get;
use axum::Router;

use crate::handlers::{content, domain_check, webhook, write};
use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/.git-pages/domain-check", get(domain_check::check))
        .route(
            "/",
            get(content::serve_get)
                .put(write::put)
                .patch(write::patch)
                .delete(write::delete)
                .post(webhook::receive),
        )
        .route(
            "/{*rest}",
            get(content::serve_get)
                .put(write::put)
                .patch(write::patch)
                .delete(write::delete)
                .post(webhook::receive),
        )
        .with_state(state)
}
