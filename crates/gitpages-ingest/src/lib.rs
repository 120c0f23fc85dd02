//! Manifest ingest pipeline (§4.2): turns an uploaded archive, or a tar
//! patch against an existing manifest, into a fully-prepared [`Manifest`]
//! ready for [`gitpages_cas::CasStore`] to commit.
//!
//! The pipeline is deliberately a sequence of small, independently-tested
//! steps rather than one function: extraction/patch builds the directory
//! tree, then `_redirects`/`_headers` are parsed, then content types are
//! assigned, then eligible files are compressed, then [`externalize`]
//! prepares the manifest for commit. Each step only depends on the ones
//! before it.

mod compress;
mod content_type;
mod extract;
mod externalize;
mod headers;
mod patch;
mod redirects;
mod tar_members;
mod tree;
pub mod webhook;

pub use externalize::{externalize, ExternalizeLimits};
pub use webhook::{parse_push_event, PushEvent, WebhookError};

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use gitpages_types::{Entry, EntryKind, Manifest, Problem, Result};

/// Archive formats accepted on the content-plane PUT/PATCH routes (§6).
pub enum ArchiveKind {
    Tar,
    TarGzip,
    TarZstd,
    Zip,
}

const REDIRECTS_PATH: &str = "_redirects";
const HEADERS_PATH: &str = "_headers";

/// Everything the redirects/headers steps need that isn't in the archive
/// itself — `_redirects`/`_headers` are read straight out of the extracted
/// tree by [`assemble`], not supplied here.
pub struct IngestInputs<'a> {
    pub header_allowlist: &'a [String],
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Builds a fresh manifest from an uploaded archive (`PUT`, or the repo
/// fetch behind a webhook push). `reader` must already be the raw archive
/// bytes for [`ArchiveKind::Tar`]/[`ArchiveKind::Zip`]; for the gzip/zstd
/// variants the caller should not pre-decompress — wrap with
/// [`extract::wrap_gzip`]/[`extract::wrap_zstd`] before calling, or use
/// [`prepare_from_tar_stream`] which does it for you given `max_site_size`.
pub fn prepare_from_tar<R: Read>(reader: R, inputs: IngestInputs<'_>) -> Result<Manifest> {
    let outcome = extract::extract_tar(reader)?;
    assemble(outcome.tree.flatten(), outcome.problems, inputs)
}

/// As [`prepare_from_tar`], but for an already-decompressed zip archive.
pub fn prepare_from_zip<R: Read + Seek>(
    reader: R,
    max_site_size: u64,
    inputs: IngestInputs<'_>,
) -> Result<Manifest> {
    let outcome = extract::extract_zip(reader, max_site_size)?;
    assemble(outcome.tree.flatten(), outcome.problems, inputs)
}

/// Extracts a tar stream, applying the gzip/zstd unwrap named by `kind`
/// first and bounding decompressed output to `max_site_size` either way.
pub fn prepare_from_tar_stream<R: Read + 'static>(
    kind: ArchiveKind,
    reader: R,
    max_site_size: u64,
    inputs: IngestInputs<'_>,
) -> Result<Manifest> {
    match kind {
        ArchiveKind::Tar => prepare_from_tar(reader, inputs),
        ArchiveKind::TarGzip => prepare_from_tar(extract::wrap_gzip(reader, max_site_size), inputs),
        ArchiveKind::TarZstd => prepare_from_tar(extract::wrap_zstd(reader, max_site_size)?, inputs),
        ArchiveKind::Zip => Err(gitpages_types::Error::ErrArchiveFormat(
            "zip archives are not seekable from a streamed reader; use prepare_from_zip".into(),
        )),
    }
}

/// Applies a tar patch against `current`'s contents and re-runs the
/// preparation steps (redirects/headers re-parsed only if the caller passed
/// new text; content-type/compression only touch entries still at
/// `Transform::Identity`, so already-prepared unchanged files are untouched).
pub fn apply_patch<R: Read>(
    current: &Manifest,
    reader: R,
    create_parents: bool,
    inputs: IngestInputs<'_>,
) -> Result<Manifest> {
    let outcome = patch::apply_tar_patch(&current.contents, reader, create_parents)?;
    assemble(outcome.contents, outcome.problems, inputs)
}

/// Builds a fresh manifest from a fetched git tree (§4.2 "Git import",
/// triggered by a webhook push): `files` is every blob the caller already
/// pulled via `gitpages_git::GitTreeSource`, keyed by repo-relative path,
/// paired with the git blob hash that produced it. Unlike the archive path
/// there's no extraction step — the tree is already flat — so this goes
/// straight into the same content-type/compress/redirects/headers pipeline
/// [`assemble`] runs for everything else.
pub fn prepare_from_git_tree(
    files: BTreeMap<String, (Vec<u8>, String)>,
    inputs: IngestInputs<'_>,
) -> Result<Manifest> {
    let contents = files
        .into_iter()
        .map(|(path, (data, git_hash))| {
            let mut entry = Entry::inline(data, None);
            entry.git_hash = Some(git_hash);
            (path, entry)
        })
        .collect();
    assemble(contents, Vec::new(), inputs)
}

/// Pulls a control file's text out of the extracted tree, removing it from
/// `contents` so it is never also served as literal site content at its own
/// path. A non-file entry at the control path (e.g. a directory or symlink
/// named `_redirects`) is removed but otherwise ignored.
fn take_control_file(contents: &mut BTreeMap<String, Entry>, path: &str) -> Option<String> {
    match contents.remove(path)?.kind {
        EntryKind::InlineFile { data } => Some(String::from_utf8_lossy(&data).into_owned()),
        _ => None,
    }
}

fn assemble(
    mut contents: BTreeMap<String, Entry>,
    mut problems: Vec<Problem>,
    inputs: IngestInputs<'_>,
) -> Result<Manifest> {
    let redirects = match take_control_file(&mut contents, REDIRECTS_PATH) {
        Some(text) => {
            let outcome = redirects::parse_redirects(&text);
            problems.extend(outcome.problems);
            outcome.rules
        }
        None => Vec::new(),
    };

    let headers = match take_control_file(&mut contents, HEADERS_PATH) {
        Some(text) => {
            let outcome = headers::parse_headers(&text, inputs.header_allowlist);
            problems.extend(outcome.problems);
            outcome.rules
        }
        None => Vec::new(),
    };

    content_type::apply_content_types(&mut contents);
    compress::compress_eligible(&mut contents)?;

    let original_size_total = contents.values().map(|e| e.original_size).sum();

    let manifest = Manifest {
        repo_url: inputs.repo_url,
        branch: inputs.branch,
        commit: inputs.commit,
        contents,
        redirects,
        headers,
        problems,
        original_size_total,
        manifest_size_total: 0,
    };

    manifest.validate(inputs.header_allowlist)?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn no_inputs() -> IngestInputs<'static> {
        IngestInputs {
            header_allowlist: &[],
            repo_url: None,
            branch: None,
            commit: None,
        }
    }

    #[test]
    fn prepares_a_fresh_manifest_with_content_types_and_compression() {
        let tar_bytes = make_tar(&[
            ("index.html", b"<html>hi</html>"),
            ("notes.txt", &b"x".repeat(2000)),
        ]);
        let manifest = prepare_from_tar(std::io::Cursor::new(tar_bytes), no_inputs()).unwrap();

        assert_eq!(
            manifest.contents["index.html"].content_type.as_deref(),
            Some("text/html")
        );
        assert_eq!(
            manifest.contents["notes.txt"].transform,
            gitpages_types::Transform::Zstd
        );
        assert!(manifest.original_size_total > 0);
    }

    #[test]
    fn redirects_and_headers_files_in_the_tree_are_parsed_into_the_manifest() {
        let tar_bytes = make_tar(&[
            ("index.html", b"hi"),
            ("_redirects", b"/old /new 301\n"),
            ("_headers", b"/*\n  X-Custom: 1\n"),
        ]);
        let inputs = IngestInputs {
            header_allowlist: &["X-Custom".to_string()],
            repo_url: Some("https://example.org/r.git".to_string()),
            branch: Some("main".to_string()),
            commit: Some("abc123".to_string()),
        };
        let manifest = prepare_from_tar(std::io::Cursor::new(tar_bytes), inputs).unwrap();

        assert_eq!(manifest.redirects.len(), 1);
        assert_eq!(manifest.headers.len(), 1);
        assert_eq!(manifest.commit.as_deref(), Some("abc123"));
        assert!(!manifest.contents.contains_key("_redirects"));
        assert!(!manifest.contents.contains_key("_headers"));
    }

    #[test]
    fn git_tree_files_are_assembled_with_their_git_hash_attached() {
        let mut files = BTreeMap::new();
        files.insert("index.html".to_string(), (b"<html>hi</html>".to_vec(), "abc123".to_string()));
        let manifest = prepare_from_git_tree(files, no_inputs()).unwrap();

        assert_eq!(manifest.contents["index.html"].git_hash.as_deref(), Some("abc123"));
        assert_eq!(manifest.contents["index.html"].content_type.as_deref(), Some("text/html"));
    }

    #[test]
    fn patching_preserves_untouched_entries() {
        let base_tar = make_tar(&[("a.txt", b"original"), ("b.txt", b"keep")]);
        let base = prepare_from_tar(std::io::Cursor::new(base_tar), no_inputs()).unwrap();

        let patch_tar = make_tar(&[("a.txt", b"updated")]);
        let patched = apply_patch(&base, std::io::Cursor::new(patch_tar), false, no_inputs()).unwrap();

        match &patched.contents["a.txt"].kind {
            gitpages_types::EntryKind::InlineFile { data } => assert_eq!(data, b"updated"),
            _ => panic!("expected inline file"),
        }
        assert!(patched.contents.contains_key("b.txt"));
    }
}
