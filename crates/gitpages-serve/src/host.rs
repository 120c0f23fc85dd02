//! Host normalization (§4.5 step 1): lowercase, strip a port, IDNA-canonicalize.
//!
//! Strict IDNA already rejects most of what we'd otherwise have to check by
//! hand; the `_`-prefixed-label rule only matters when a deployment has
//! relaxed IDNA checking (some registrars allow underscores for DNS-01
//! ownership records), so it's applied as a second pass only in that mode.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPolicy {
    pub strict_idna: bool,
}

impl Default for HostPolicy {
    fn default() -> Self {
        HostPolicy { strict_idna: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("invalid host: {0}")]
    InvalidHost(String),
    #[error("label {0:?} starts with an underscore, which is rejected under relaxed IDNA policy")]
    UnderscorePrefixedLabel(String),
}

/// Normalizes `raw_host` (as received in a `Host`/SNI header, possibly with
/// a `:port` suffix) to its canonical lowercase ASCII form.
pub fn normalize_host(raw_host: &str, policy: HostPolicy) -> Result<String, HostError> {
    let without_port = strip_port(raw_host);

    let ascii = idna::domain_to_ascii(without_port)
        .map_err(|e| HostError::InvalidHost(format!("{without_port}: {e}")))?;

    if !policy.strict_idna {
        for label in ascii.split('.') {
            if label.starts_with('_') {
                return Err(HostError::UnderscorePrefixedLabel(label.to_string()));
            }
        }
    }

    Ok(ascii)
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal: `[::1]:8080`; split after the closing bracket.
        if let Some(end) = host.find(']') {
            return &host[..=end];
        }
        return host;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_port() {
        assert_eq!(normalize_host("Example.ORG:8443", HostPolicy::default()).unwrap(), "example.org");
    }

    #[test]
    fn leaves_ipv6_literal_alone() {
        let policy = HostPolicy { strict_idna: false };
        let result = normalize_host("[::1]:8080", policy);
        assert!(result.is_ok());
    }

    #[test]
    fn relaxed_policy_rejects_underscore_prefixed_label() {
        let policy = HostPolicy { strict_idna: false };
        let err = normalize_host("_acme-challenge.example.org", policy).unwrap_err();
        assert!(matches!(err, HostError::UnderscorePrefixedLabel(_)));
    }

    #[test]
    fn relaxed_policy_allows_underscore_within_a_label() {
        let policy = HostPolicy { strict_idna: false };
        assert!(normalize_host("my_site.example.org", policy).is_ok());
    }

    #[test]
    fn idna_canonicalizes_unicode_labels() {
        let result = normalize_host("münchen.example", HostPolicy::default()).unwrap();
        assert!(result.starts_with("xn--"));
    }
}
