use thiserror::Error;

/// Unified error kind for git-pages. Every component crate defines its own
/// error type where it has local detail to add (ingest, cache, storage) and
/// converts into this one at the boundary the HTTP edge consumes, so the
/// edge can match a single enum against the mapping table in the external
/// interfaces design.
#[derive(Debug, Error)]
pub enum Error {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// CAS precondition failed. Internal signal only — PATCH callers must
    /// see this converted to [`Error::WriteConflict`], never surfaced raw.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("write conflict on {0}")]
    WriteConflict(String),

    #[error("domain {0} is frozen")]
    DomainFrozen(String),

    #[error("archive decompresses to more than the configured site size limit")]
    ArchiveTooLarge,

    #[error("site exceeds max_site_size ({actual} > {limit} bytes)")]
    SiteTooLarge { actual: u64, limit: u64 },

    #[error("manifest exceeds max_manifest_size ({actual} > {limit} bytes)")]
    ManifestTooLarge { actual: u64, limit: u64 },

    #[error("malformed patch: {0}")]
    MalformedPatch(String),

    #[error("symlink expansion exceeded max_symlink_depth ({0})")]
    SymlinkLoop(usize),

    #[error("header rule disallowed: {0}")]
    HeaderNotAllowed(String),

    #[error("unrecognized archive content type: {0}")]
    ErrArchiveFormat(String),

    #[error("operation exceeded update_timeout")]
    UpdateTimeout,

    #[error("audit log append failed, aborting the audited operation: {0}")]
    AuditAppendFailure(String),

    #[error("transient backend error: {0}")]
    Transient(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Maps this error to the HTTP status the content-plane edge should
    /// respond with, per the error-mapping table in the external interfaces
    /// design. Internal-only variants ([`Error::PreconditionFailed`]) are not
    /// expected to reach the edge; they map conservatively to 500.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::ObjectNotFound(_) => 404,
            Error::PreconditionFailed(_) => 500,
            Error::WriteConflict(_) => 409,
            Error::DomainFrozen(_) => 403,
            Error::ArchiveTooLarge | Error::SiteTooLarge { .. } | Error::ManifestTooLarge { .. } => {
                413
            }
            Error::MalformedPatch(_) => 400,
            Error::SymlinkLoop(_) => 500,
            Error::HeaderNotAllowed(_) => 500,
            Error::ErrArchiveFormat(_) => 415,
            Error::UpdateTimeout => 504,
            Error::AuditAppendFailure(_) => 503,
            Error::Transient(_) => 503,
            Error::Other(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::UpdateTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_design() {
        assert_eq!(Error::ObjectNotFound("x".into()).http_status(), 404);
        assert_eq!(Error::WriteConflict("x".into()).http_status(), 409);
        assert_eq!(Error::DomainFrozen("x".into()).http_status(), 403);
        assert_eq!(Error::ArchiveTooLarge.http_status(), 413);
        assert_eq!(
            Error::SiteTooLarge {
                actual: 2,
                limit: 1
            }
            .http_status(),
            413
        );
        assert_eq!(Error::MalformedPatch("x".into()).http_status(), 400);
        assert_eq!(Error::ErrArchiveFormat("x".into()).http_status(), 415);
        assert_eq!(Error::UpdateTimeout.http_status(), 504);
        assert_eq!(Error::Transient("x".into()).http_status(), 503);
    }

    #[test]
    fn only_transient_and_timeout_are_retryable() {
        assert!(Error::Transient("x".into()).is_retryable());
        assert!(Error::UpdateTimeout.is_retryable());
        assert!(!Error::WriteConflict("x".into()).is_retryable());
    }
}
