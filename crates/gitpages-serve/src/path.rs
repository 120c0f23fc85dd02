//! Project-path routing (§4.5 step 2, §6): turns a request path into a
//! candidate project name plus the remaining site-relative path. GET
//! routing and the write routes (PUT/PATCH/DELETE/POST) use related but
//! distinct rules — GET is exploratory (try the first segment as a
//! project, fall back to the domain default), the write routes commit to
//! exactly one project up front and reject ambiguity outright.

use gitpages_types::Error;

/// For GET: `/` has no candidate project. `/name/...` yields `Some("name")`
/// with the remainder, unless `name` starts with `.` (reserved — the
/// `.git-pages/*` special path and any literal-dot project are never a
/// valid candidate, so step 3's domain-default fallback applies instead).
pub fn split_project_candidate(path: &str) -> (Option<&str>, &str) {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return (None, "");
    }
    match trimmed.split_once('/') {
        Some((name, rest)) if !name.is_empty() && !name.starts_with('.') => (Some(name), rest),
        None if !trimmed.starts_with('.') => (Some(trimmed), ""),
        _ => (None, trimmed),
    }
}

/// For PUT/PATCH/DELETE/POST: `/` maps to project `.index`; `/name/` or
/// `/name` maps to `name`; a leading `.` segment or a nested `/a/b/` path
/// is rejected with `MalformedPatch` (surfaced as 400).
pub fn parse_write_project(path: &str) -> Result<String, Error> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(gitpages_types::INDEX_PROJECT.to_string());
    }
    if trimmed.contains('/') {
        return Err(Error::MalformedPatch(format!(
            "nested project path {path:?} is rejected"
        )));
    }
    if trimmed.starts_with('.') {
        return Err(Error::MalformedPatch(format!(
            "project path {path:?} starts with a reserved '.' segment"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_candidate_project() {
        assert_eq!(split_project_candidate("/"), (None, ""));
        assert_eq!(split_project_candidate(""), (None, ""));
    }

    #[test]
    fn first_segment_is_the_candidate_with_remainder() {
        assert_eq!(split_project_candidate("/blog/posts/1"), (Some("blog"), "posts/1"));
    }

    #[test]
    fn single_segment_path_is_a_whole_candidate() {
        assert_eq!(split_project_candidate("/blog"), (Some("blog"), ""));
    }

    #[test]
    fn dot_prefixed_first_segment_is_not_a_candidate() {
        assert_eq!(split_project_candidate("/.git-pages/manifest.json"), (None, ".git-pages/manifest.json"));
    }

    #[test]
    fn write_project_root_maps_to_index() {
        assert_eq!(parse_write_project("/").unwrap(), gitpages_types::INDEX_PROJECT);
        assert_eq!(parse_write_project("").unwrap(), gitpages_types::INDEX_PROJECT);
    }

    #[test]
    fn write_project_rejects_nested_path() {
        assert!(parse_write_project("/a/b/").is_err());
    }

    #[test]
    fn write_project_rejects_leading_dot() {
        assert!(parse_write_project("/.hidden").is_err());
    }

    #[test]
    fn write_project_accepts_bare_name_with_or_without_trailing_slash() {
        assert_eq!(parse_write_project("/blog").unwrap(), "blog");
        assert_eq!(parse_write_project("/blog/").unwrap(), "blog");
    }
}
