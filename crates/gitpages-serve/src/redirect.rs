//! Redirect matching (§4.5 step 4, invariant 7): matches a lookup-miss path
//! against a manifest's `_redirects` rules and builds the response target.

use gitpages_types::RedirectRule;

pub struct RedirectMatch {
    pub to: String,
    pub status: u16,
    /// Whether the winning rule is a `force` rule — see Design Notes: a
    /// `force` rule applies even when `from` resolves to a live entry,
    /// which would otherwise take precedence over any redirect.
    pub force: bool,
}

/// Matches `path` (and `query`, preserved verbatim on the target) against
/// `rules` in order, returning the first hit. `from_pattern_is_valid`
/// already guarantees `*` only ever appears as the final segment, so a
/// match either is exact or captures everything past the wildcard's parent.
pub fn match_redirect(rules: &[RedirectRule], path: &str, query: Option<&str>) -> Option<RedirectMatch> {
    for rule in rules {
        if let Some(splat) = matches_from(&rule.from, path) {
            let to = substitute_splat(&rule.to, splat.as_deref());
            let to = match query {
                Some(q) if !q.is_empty() => format!("{to}?{q}"),
                _ => to,
            };
            return Some(RedirectMatch { to, status: rule.status, force: rule.force });
        }
    }
    None
}

/// Returns `Some(None)` for an exact non-wildcard match, `Some(Some(splat))`
/// for a wildcard match capturing `splat`, or `None` for no match.
fn matches_from(from: &str, path: &str) -> Option<Option<String>> {
    if let Some(prefix) = from.strip_suffix("/*") {
        let path = path.strip_prefix('/').unwrap_or(path);
        let prefix_trimmed = prefix.strip_prefix('/').unwrap_or(prefix);
        if prefix_trimmed.is_empty() {
            return Some(Some(path.to_string()));
        }
        return path
            .strip_prefix(prefix_trimmed)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|splat| Some(splat.to_string()));
    }
    if from == path {
        return Some(None);
    }
    None
}

fn substitute_splat(to: &str, splat: Option<&str>) -> String {
    match splat {
        Some(value) => to.replace(":splat", value),
        None => to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(from: &str, to: &str, status: u16) -> RedirectRule {
        RedirectRule { from: from.to_string(), to: to.to_string(), status, force: false }
    }

    #[test]
    fn force_flag_is_carried_through_to_the_match() {
        let rules = vec![RedirectRule {
            from: "/old".to_string(),
            to: "/new".to_string(),
            status: 301,
            force: true,
        }];
        let m = match_redirect(&rules, "/old", None).unwrap();
        assert!(m.force);
    }

    #[test]
    fn exact_match_ignores_splat_substitution() {
        let rules = vec![rule("/old", "/new", 301)];
        let m = match_redirect(&rules, "/old", None).unwrap();
        assert_eq!(m.to, "/new");
        assert_eq!(m.status, 301);
    }

    #[test]
    fn wildcard_match_substitutes_splat() {
        let rules = vec![rule("/blog/*", "/archive/:splat", 301)];
        let m = match_redirect(&rules, "/blog/2020/post", None).unwrap();
        assert_eq!(m.to, "/archive/2020/post");
    }

    #[test]
    fn query_string_is_preserved() {
        let rules = vec![rule("/old", "/new", 301)];
        let m = match_redirect(&rules, "/old", Some("a=1")).unwrap();
        assert_eq!(m.to, "/new?a=1");
    }

    #[test]
    fn no_match_returns_none() {
        let rules = vec![rule("/old", "/new", 301)];
        assert!(match_redirect(&rules, "/other", None).is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![rule("/a", "/first", 301), rule("/a", "/second", 301)];
        let m = match_redirect(&rules, "/a", None).unwrap();
        assert_eq!(m.to, "/first");
    }
}
