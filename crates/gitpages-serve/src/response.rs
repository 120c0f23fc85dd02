//! Response assembly (§4.5 steps 4-6): content negotiation for
//! Zstd-transformed entries, custom `HeaderRule` application with
//! re-validation, serving-wide headers, and ETag/If-None-Match handling.
//! Delegates nothing to a generic static-file helper crate — the behavior
//! here *is* that helper, scoped to exactly what the manifest model needs.

use gitpages_types::{Error, HeaderRule, Result};

/// What to do with a `Transform::Zstd` entry's stored bytes, decided from
/// the request's `Accept-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingDecision {
    /// Serve the stored Zstd bytes as-is with `Content-Encoding: zstd`.
    PassThroughCompressed,
    /// Client doesn't advertise Zstd support; decompress before serving.
    DecompressServerSide,
}

pub fn negotiate_encoding(accept_encoding: Option<&str>) -> EncodingDecision {
    let accepts_zstd = accept_encoding
        .map(|header| header.split(',').any(|tok| tok.trim().starts_with("zstd")))
        .unwrap_or(false);
    if accepts_zstd {
        EncodingDecision::PassThroughCompressed
    } else {
        EncodingDecision::DecompressServerSide
    }
}

pub fn decompress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    zstd::stream::decode_all(data)
}

/// ETag for an `ExternalFile` entry: the blob name, quoted.
pub fn etag_for_blob(blob_name: &str) -> String {
    format!("\"{blob_name}\"")
}

/// Whether `if_none_match` (a raw header value, possibly a comma-separated
/// list or `*`) matches `etag`.
pub fn if_none_match_matches(if_none_match: Option<&str>, etag: &str) -> bool {
    match if_none_match {
        None => false,
        Some(value) => value.trim() == "*" || value.split(',').any(|tok| tok.trim() == etag),
    }
}

/// Matches a `_headers`/`HeaderRule` path pattern against a lookup path.
/// Same shape as `_redirects`: `*` only ever appears as the final segment
/// and matches any (possibly empty) suffix.
fn path_matches(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix = prefix.strip_prefix('/').unwrap_or(prefix);
        let path = path.strip_prefix('/').unwrap_or(path);
        if prefix.is_empty() {
            return true;
        }
        return path == prefix || path.starts_with(&format!("{prefix}/"));
    }
    pattern.trim_start_matches('/') == path.trim_start_matches('/')
}

/// Every rule whose `path` pattern matches `path`, re-validated against
/// `allowlist` (the allowlist may have tightened since the manifest was
/// prepared). Later rules' headers take precedence over earlier ones for
/// the same name, matching Netlify's merge order.
pub fn matching_headers(
    rules: &[HeaderRule],
    path: &str,
    allowlist: &[String],
) -> Result<Vec<(String, String)>> {
    let mut out: Vec<(String, String)> = Vec::new();

    for rule in rules.iter().filter(|r| path_matches(&r.path, path)) {
        rule.validate(allowlist).map_err(Error::HeaderNotAllowed)?;
        for (name, values) in &rule.headers {
            out.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            out.push((name.clone(), values.join(", ")));
        }
    }

    Ok(out)
}

/// Headers applied to every response regardless of entry or rules (§4.5
/// step 5).
pub fn serving_wide_headers(has_origin_header: bool) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Cache-Control".to_string(), "max-age=60, stale-while-revalidate=3600".to_string()),
        ("Cross-Origin-Embedder-Policy".to_string(), "credentialless".to_string()),
        ("Cross-Origin-Opener-Policy".to_string(), "same-origin".to_string()),
    ];
    if has_origin_header {
        headers.push(("Access-Control-Allow-Origin".to_string(), "*".to_string()));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_zstd_when_advertised() {
        assert_eq!(
            negotiate_encoding(Some("gzip, zstd;q=0.9")),
            EncodingDecision::PassThroughCompressed
        );
        assert_eq!(negotiate_encoding(Some("gzip")), EncodingDecision::DecompressServerSide);
        assert_eq!(negotiate_encoding(None), EncodingDecision::DecompressServerSide);
    }

    #[test]
    fn if_none_match_matches_exact_and_wildcard() {
        assert!(if_none_match_matches(Some("\"sha256-abc\""), "\"sha256-abc\""));
        assert!(if_none_match_matches(Some("*"), "\"sha256-abc\""));
        assert!(!if_none_match_matches(Some("\"sha256-def\""), "\"sha256-abc\""));
        assert!(!if_none_match_matches(None, "\"sha256-abc\""));
    }

    #[test]
    fn matching_headers_applies_wildcard_rule() {
        let rules = vec![HeaderRule {
            path: "/*".to_string(),
            headers: vec![("X-Custom".to_string(), vec!["1".to_string()])],
        }];
        let allowlist = vec!["X-Custom".to_string()];
        let headers = matching_headers(&rules, "a/b.html", &allowlist).unwrap();
        assert_eq!(headers, vec![("X-Custom".to_string(), "1".to_string())]);
    }

    #[test]
    fn matching_headers_rejects_disallowed_name_at_serve_time() {
        let rules = vec![HeaderRule {
            path: "/*".to_string(),
            headers: vec![("X-Custom".to_string(), vec!["1".to_string()])],
        }];
        let err = matching_headers(&rules, "a.html", &[]).unwrap_err();
        assert!(matches!(err, Error::HeaderNotAllowed(_)));
    }

    #[test]
    fn later_rule_overrides_earlier_for_same_header_name() {
        let rules = vec![
            HeaderRule { path: "/*".to_string(), headers: vec![("X-Custom".to_string(), vec!["1".to_string()])] },
            HeaderRule { path: "/a.html".to_string(), headers: vec![("X-Custom".to_string(), vec!["2".to_string()])] },
        ];
        let allowlist = vec!["X-Custom".to_string()];
        let headers = matching_headers(&rules, "a.html", &allowlist).unwrap();
        assert_eq!(headers, vec![("X-Custom".to_string(), "2".to_string())]);
    }

    #[test]
    fn serving_wide_headers_include_cors_only_with_origin() {
        assert!(!serving_wide_headers(false).iter().any(|(n, _)| n == "Access-Control-Allow-Origin"));
        assert!(serving_wide_headers(true).iter().any(|(n, _)| n == "Access-Control-Allow-Origin"));
    }
}
