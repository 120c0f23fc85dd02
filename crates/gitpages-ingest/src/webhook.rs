//! Push-event webhook parsing (§6, §10): Forgejo, Gitea, GitHub, and Gogs
//! all send a JSON body shaped closely enough alike that one `PushEvent`
//! comes out of all four, but each has its own envelope for "this was a
//! push" vs. some other event type, so each gets its own `serde` shape
//! before being folded down.
//!
//! This has its own error type rather than folding into
//! [`gitpages_types::Error`]: the 400/401 split here (malformed body vs.
//! event-is-real-but-not-what-we-want) doesn't correspond to any existing
//! variant, and forcing one in would blur a distinction the HTTP edge needs.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("request body is not a recognized push-event payload: {0}")]
    NotAPushEvent(String),

    #[error("push ref {actual:?} does not match configured branch {expected:?}")]
    RefMismatch { expected: String, actual: String },
}

/// The parts of a push event the ingest pipeline actually needs: which
/// branch moved, and where to fetch from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub git_ref: String,
    pub repo_url: String,
}

#[derive(Deserialize)]
struct Repository {
    clone_url: Option<String>,
    html_url: Option<String>,
}

/// Shape common to Forgejo, Gitea, Gogs, and GitHub push payloads: each
/// names the field `ref` and nests repository info under `repository`.
/// GitHub additionally sends other event types (`issues`, `pull_request`,
/// ...) to the same endpoint distinguished only by the `X-GitHub-Event`
/// header, which callers must check before reaching this parser — absence
/// of `ref` here is treated as "not a push event" regardless of provider.
#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    repository: Option<Repository>,
}

/// Parses `body` as a push event and checks its ref against
/// `expected_branch` (the branch configured for this domain/project).
/// `expected_branch` should be the short name (`main`), matched against the
/// payload's `refs/heads/<branch>` form.
pub fn parse_push_event(body: &[u8], expected_branch: &str) -> Result<PushEvent, WebhookError> {
    let payload: PushPayload = serde_json::from_slice(body)
        .map_err(|e| WebhookError::NotAPushEvent(e.to_string()))?;

    let git_ref = payload
        .git_ref
        .ok_or_else(|| WebhookError::NotAPushEvent("missing \"ref\" field".to_string()))?;

    let repo_url = payload
        .repository
        .and_then(|r| r.clone_url.or(r.html_url))
        .ok_or_else(|| WebhookError::NotAPushEvent("missing repository URL".to_string()))?;

    let expected_ref = format!("refs/heads/{expected_branch}");
    if git_ref != expected_ref {
        return Err(WebhookError::RefMismatch {
            expected: expected_ref,
            actual: git_ref,
        });
    }

    Ok(PushEvent { git_ref, repo_url })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_body(git_ref: &str, url: &str) -> Vec<u8> {
        format!(r#"{{"ref":"{git_ref}","repository":{{"clone_url":"{url}"}}}}"#).into_bytes()
    }

    #[test]
    fn parses_a_matching_push_event() {
        let event = parse_push_event(&push_body("refs/heads/main", "https://example.org/r.git"), "main").unwrap();
        assert_eq!(event.repo_url, "https://example.org/r.git");
    }

    #[test]
    fn rejects_ref_mismatch_as_unauthorized() {
        let err = parse_push_event(&push_body("refs/heads/other", "https://example.org/r.git"), "main").unwrap_err();
        assert!(matches!(err, WebhookError::RefMismatch { .. }));
    }

    #[test]
    fn rejects_non_push_payload_missing_ref() {
        let body = br#"{"action":"opened","issue":{}}"#;
        let err = parse_push_event(body, "main").unwrap_err();
        assert!(matches!(err, WebhookError::NotAPushEvent(_)));
    }

    #[test]
    fn falls_back_to_html_url_when_clone_url_absent() {
        let body = br#"{"ref":"refs/heads/main","repository":{"html_url":"https://example.org/r"}}"#;
        let event = parse_push_event(body, "main").unwrap();
        assert_eq!(event.repo_url, "https://example.org/r");
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_push_event(b"not json", "main").unwrap_err();
        assert!(matches!(err, WebhookError::NotAPushEvent(_)));
    }
}
