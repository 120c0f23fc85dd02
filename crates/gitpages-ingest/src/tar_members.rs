//! Shared tar-member parsing used by both fresh extraction and patch
//! application: normalizes paths the same way in both modes so a whiteout
//! chardev or directory member resolves to the identical target path
//! regardless of which pipeline stage is reading it.

use std::io::Read;

use gitpages_types::{Error, Problem, Result};
use tar::{Archive, EntryType};

pub enum MemberKind {
    Directory,
    File(Vec<u8>),
    Symlink(String),
    /// Tar whiteout chardev (major=0, minor=0).
    Whiteout,
}

pub struct Member {
    pub path: String,
    pub kind: MemberKind,
}

/// Strips a leading `./`, drops a trailing `/`, and rejects `..` segments
/// and anything that normalizes to empty (the root is never an explicit
/// member).
pub fn normalize_member_path(raw: &str) -> Option<String> {
    let trimmed = raw.strip_prefix("./").unwrap_or(raw);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return None;
    }
    Some(trimmed.to_string())
}

fn is_whiteout(entry: &tar::Entry<'_, impl Read>) -> bool {
    if entry.header().entry_type() != EntryType::Char {
        return false;
    }
    matches!(
        (entry.header().device_major(), entry.header().device_minor()),
        (Ok(Some(0)), Ok(Some(0)))
    )
}

/// Reads every member of a tar stream into memory, bounding total read
/// bytes via the caller-supplied `reader` (a [`crate::extract::Bounded`]
/// wrapper, typically). Unsupported entry types produce a `problem` rather
/// than aborting the whole archive.
pub fn read_tar_members<R: Read>(reader: R) -> Result<(Vec<Member>, Vec<Problem>)> {
    let mut archive = Archive::new(reader);
    let mut members = Vec::new();
    let mut problems = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| map_tar_io_error(e))?
    {
        let mut entry = entry.map_err(|e| map_tar_io_error(e))?;
        let raw_path = entry.path().map(|p| p.to_string_lossy().into_owned());
        let raw_path = match raw_path {
            Ok(p) => p,
            Err(e) => return Err(map_tar_io_error(e)),
        };

        let Some(path) = normalize_member_path(&raw_path) else {
            problems.push(Problem {
                path: raw_path,
                cause: "path escapes the site root or is malformed".into(),
            });
            continue;
        };

        if is_whiteout(&entry) {
            members.push(Member {
                path,
                kind: MemberKind::Whiteout,
            });
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Directory => {
                members.push(Member {
                    path,
                    kind: MemberKind::Directory,
                });
            }
            EntryType::Regular | EntryType::Continuous => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(map_tar_io_error)?;
                members.push(Member {
                    path,
                    kind: MemberKind::File(data),
                });
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .ok()
                    .flatten()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                members.push(Member {
                    path,
                    kind: MemberKind::Symlink(target),
                });
            }
            other => {
                problems.push(Problem {
                    path,
                    cause: format!("unsupported tar entry type {other:?}"),
                });
            }
        }
    }

    Ok((members, problems))
}

fn map_tar_io_error(e: std::io::Error) -> Error {
    if e.to_string().contains(crate::extract::ARCHIVE_TOO_LARGE_MARKER) {
        Error::ArchiveTooLarge
    } else {
        Error::Other(anyhow::anyhow!("reading tar archive: {e}"))
    }
}
