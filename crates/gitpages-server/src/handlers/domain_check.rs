//! `GET /.git-pages/domain-check?domain=<host>` (§10 supplemented feature):
//! lets a front-proxy ask "should I route this Host to git-pages at all?"
//! before forwarding a request, so an unrelated domain pointed at the same
//! IP gets a clean 404 instead of whatever git-pages would otherwise do
//! with it. [`DomainStore::check_domain`] already folds in the
//! `list_manifests`-fallback for backends that never got a `create_domain`
//! marker, so this handler doesn't need to consult `FeatureStore` itself.

use std::net::IpAddr;
use std::str::FromStr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DomainCheckQuery {
    domain: String,
}

pub async fn check(
    State(state): State<AppState>,
    Query(query): Query<DomainCheckQuery>,
) -> Result<StatusCode, ApiError> {
    let host = gitpages_serve::normalize_host(&query.domain, gitpages_serve::HostPolicy::default())?;

    if IpAddr::from_str(&host).is_ok() {
        return Ok(StatusCode::NOT_FOUND);
    }

    let marker = state.domains.check_domain(&host).await?;
    if marker.exists {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}
