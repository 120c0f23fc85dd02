//! Entry lookup with symlink expansion (§4.5 step 4, invariant 8).
//!
//! "For each prefix of the path, if it resolves to a Symlink entry, splice
//! its target and restart" is implemented as a fixed-point loop: every
//! restart re-checks every prefix of the (possibly new) path, longest
//! first, so a symlinked directory several segments up is caught the same
//! way a symlinked leaf entry is.

use std::collections::BTreeMap;

use gitpages_types::{Entry, EntryKind, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found { path: String, entry: Entry },
    NotFound { path: String },
}

/// Resolves symlinks along `path` against `contents`, then looks up the
/// final entry. `path` must already have its trailing slash stripped by
/// the caller (trailing-slash handling is a site-level, not a lookup-level,
/// concern — see [`crate::lib`]'s directory-index step).
pub fn resolve(contents: &BTreeMap<String, Entry>, path: &str, max_symlink_depth: u32) -> Result<LookupOutcome> {
    let mut current = path.to_string();
    let mut hops = 0u32;

    loop {
        match splice_one_symlink(contents, &current) {
            Some(spliced) => {
                hops += 1;
                if hops > max_symlink_depth {
                    return Err(Error::SymlinkLoop(max_symlink_depth as usize));
                }
                current = spliced;
            }
            None => break,
        }
    }

    match contents.get(&current) {
        Some(entry) => Ok(LookupOutcome::Found { path: current, entry: entry.clone() }),
        None => Ok(LookupOutcome::NotFound { path: current }),
    }
}

/// Checks every prefix of `path`, longest first, for a Symlink entry and
/// returns the spliced full path for the first one found, or `None` if no
/// prefix is a symlink.
fn splice_one_symlink(contents: &BTreeMap<String, Entry>, path: &str) -> Option<String> {
    for prefix in prefixes_longest_first(path) {
        if let Some(entry) = contents.get(&prefix) {
            if let EntryKind::Symlink { target } = &entry.kind {
                let remainder = &path[prefix.len()..];
                return Some(splice(&prefix, target, remainder));
            }
        }
    }
    None
}

fn prefixes_longest_first(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    let segments: Vec<&str> = path.split('/').collect();
    (1..=segments.len()).rev().map(|n| segments[..n].join("/")).collect()
}

fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((parent, _)) => parent,
        None => "",
    }
}

/// Joins `parent` and a symlink's `target` (relative to `parent`), then
/// reattaches whatever of the original path came after the symlinked
/// prefix.
fn splice(matched_prefix: &str, target: &str, remainder: &str) -> String {
    let parent = parent_dir(matched_prefix);
    let resolved_prefix = if parent.is_empty() {
        target.to_string()
    } else {
        format!("{parent}/{target}")
    };
    format!("{resolved_prefix}{remainder}")
}
