//! `_headers` parsing (§4.2 step 2): a Netlify-compatible subset. A
//! non-indented line starts a new path rule; subsequent indented
//! `Name: value[, value...]` lines attach to it. Names are validated
//! against the unsafe set and the configured allowlist at parse time, and
//! again at serving time since the allowlist may have tightened since.

use gitpages_types::{HeaderRule, Problem};

pub struct HeaderParseOutcome {
    pub rules: Vec<HeaderRule>,
    pub problems: Vec<Problem>,
}

pub fn parse_headers(text: &str, allowlist: &[String]) -> HeaderParseOutcome {
    let mut rules = Vec::new();
    let mut problems = Vec::new();
    let mut current: Option<HeaderRule> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        if raw_line.trim().is_empty() || raw_line.trim_start().starts_with('#') {
            continue;
        }

        let is_indented = raw_line.starts_with(' ') || raw_line.starts_with('\t');
        let line = raw_line.trim();

        if !is_indented {
            if let Some(rule) = current.take() {
                push_if_valid(rule, allowlist, &mut rules, &mut problems);
            }
            current = Some(HeaderRule { path: line.to_string(), headers: Vec::new() });
            continue;
        }

        let Some(rule) = current.as_mut() else {
            problems.push(Problem {
                path: format!("_headers:{}", lineno + 1),
                cause: "header line with no preceding path".into(),
            });
            continue;
        };

        let Some((name, value)) = line.split_once(':') else {
            problems.push(Problem {
                path: format!("_headers:{}", lineno + 1),
                cause: format!("expected \"Name: value\", got {line:?}"),
            });
            continue;
        };

        let values = value.split(',').map(|v| v.trim().to_string()).collect();
        rule.headers.push((name.trim().to_string(), values));
    }

    if let Some(rule) = current.take() {
        push_if_valid(rule, allowlist, &mut rules, &mut problems);
    }

    HeaderParseOutcome { rules, problems }
}

fn push_if_valid(
    rule: HeaderRule,
    allowlist: &[String],
    rules: &mut Vec<HeaderRule>,
    problems: &mut Vec<Problem>,
) {
    match rule.validate(allowlist) {
        Ok(()) => rules.push(rule),
        Err(cause) => problems.push(Problem { path: rule.path, cause }),
    }
}
