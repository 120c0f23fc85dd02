//! `_redirects` parsing (§4.2 step 1): a Netlify-compatible subset, one
//! rule per line: `from to [status]`. Invalid rules are recorded as
//! problems and skipped rather than failing the whole ingest.

use gitpages_types::{Problem, RedirectRule};

pub struct RedirectParseOutcome {
    pub rules: Vec<RedirectRule>,
    pub problems: Vec<Problem>,
}

pub fn parse_redirects(text: &str) -> RedirectParseOutcome {
    let mut rules = Vec::new();
    let mut problems = Vec::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 || fields.len() > 3 {
            problems.push(Problem {
                path: format!("_redirects:{}", lineno + 1),
                cause: format!("expected \"from to [status]\", got {line:?}"),
            });
            continue;
        }

        let from = fields[0].to_string();
        let to = fields[1].to_string();
        let (status, force): (u16, bool) = match fields.get(2) {
            Some(s) => {
                let (digits, force) = match s.strip_suffix('!') {
                    Some(stripped) => (stripped, true),
                    None => (*s, false),
                };
                match digits.parse() {
                    Ok(v) => (v, force),
                    Err(_) => {
                        problems.push(Problem {
                            path: format!("_redirects:{}", lineno + 1),
                            cause: format!("status {s:?} is not a number"),
                        });
                        continue;
                    }
                }
            }
            None => (301, false),
        };

        let rule = RedirectRule { from, to, status, force };

        if !rule.status_is_allowed() {
            problems.push(Problem {
                path: format!("_redirects:{}", lineno + 1),
                cause: format!("status {status} is not in the allowed set"),
            });
            continue;
        }
        if !rule.from_pattern_is_valid() {
            problems.push(Problem {
                path: format!("_redirects:{}", lineno + 1),
                cause: format!("from pattern {:?} is invalid", rule.from),
            });
            continue;
        }
        if has_hostname(&rule.to) && !rule.is_redirect_status() {
            problems.push(Problem {
                path: format!("_redirects:{}", lineno + 1),
                cause: "a \"to\" hostname is only allowed for 3xx statuses".into(),
            });
            continue;
        }

        rules.push(rule);
    }

    RedirectParseOutcome { rules, problems }
}

fn has_hostname(to: &str) -> bool {
    to.starts_with("http://") || to.starts_with("https://") || to.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_rules_in_order() {
        let outcome = parse_redirects("/old /new 301\n/a /b 302\n");
        assert_eq!(outcome.rules.len(), 2);
        assert_eq!(outcome.rules[0].from, "/old");
        assert_eq!(outcome.rules[1].status, 302);
        assert!(outcome.problems.is_empty());
    }

    #[test]
    fn rejects_disallowed_status_as_a_problem() {
        let outcome = parse_redirects("/old /new 999\n");
        assert!(outcome.rules.is_empty());
        assert_eq!(outcome.problems.len(), 1);
    }

    #[test]
    fn rejects_wildcard_not_in_last_segment() {
        let outcome = parse_redirects("/*/foo /bar 301\n");
        assert!(outcome.rules.is_empty());
        assert_eq!(outcome.problems.len(), 1);
    }

    #[test]
    fn rejects_hostname_target_on_non_redirect_status() {
        let outcome = parse_redirects("/old https://example.com/new 200\n");
        assert!(outcome.rules.is_empty());
    }

    #[test]
    fn default_status_is_301() {
        let outcome = parse_redirects("/old /new\n");
        assert_eq!(outcome.rules[0].status, 301);
    }

    #[test]
    fn blank_lines_and_comments_are_ignored() {
        let outcome = parse_redirects("# comment\n\n/old /new 301\n");
        assert_eq!(outcome.rules.len(), 1);
        assert!(outcome.problems.is_empty());
    }

    #[test]
    fn trailing_bang_on_status_sets_force() {
        let outcome = parse_redirects("/old /new 301!\n");
        assert_eq!(outcome.rules.len(), 1);
        assert_eq!(outcome.rules[0].status, 301);
        assert!(outcome.rules[0].force);
    }

    #[test]
    fn no_bang_leaves_force_unset() {
        let outcome = parse_redirects("/old /new 301\n");
        assert!(!outcome.rules[0].force);
    }
}
