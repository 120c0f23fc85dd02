//! Archive extraction (§4.2 `ExtractTar`/`ExtractZip`/`ExtractGzip`/`ExtractZstd`):
//! builds a fresh [`Tree`] from an uploaded archive, with no prior manifest
//! to patch against.

use std::io::{Read, Seek};

use gitpages_types::{Entry, Error, Problem, Result};

use crate::tar_members::{read_tar_members, MemberKind};
use crate::tree::Tree;

/// Sentinel substring `Bounded`'s io error carries, so callers two layers up
/// (tar's own io-error wrapping) can still recognize a size-limit trip.
pub const ARCHIVE_TOO_LARGE_MARKER: &str = "git-pages: archive exceeds max_site_size";

/// Wraps a reader and fails once more than `limit` bytes have been read
/// from it, bounding a decompression stream against `max_site_size`
/// regardless of what the archive's own size headers claim (defuses
/// gzip/zstd bombs the same way the zip path's upfront sum does).
pub struct Bounded<R> {
    inner: R,
    limit: u64,
    read_so_far: u64,
}

impl<R: Read> Bounded<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Bounded { inner, limit, read_so_far: 0 }
    }
}

impl<R: Read> Read for Bounded<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read_so_far += n as u64;
        if self.read_so_far > self.limit {
            return Err(std::io::Error::other(ARCHIVE_TOO_LARGE_MARKER));
        }
        Ok(n)
    }
}

pub struct ExtractOutcome {
    pub tree: Tree,
    pub problems: Vec<Problem>,
}

/// `ExtractGzip(next)`: wraps `reader` in a gzip decoder and bounds its
/// output to `max_site_size` before handing it to `next`.
pub fn wrap_gzip<R: Read + 'static>(reader: R, max_site_size: u64) -> Bounded<flate2::read::GzDecoder<R>> {
    Bounded::new(flate2::read::GzDecoder::new(reader), max_site_size)
}

/// `ExtractZstd(next)`: wraps `reader` in a Zstd decoder and bounds its
/// output the same way as the gzip wrapper.
pub fn wrap_zstd<R: Read + 'static>(reader: R, max_site_size: u64) -> Result<Bounded<zstd::stream::read::Decoder<'static, std::io::BufReader<R>>>> {
    let decoder = zstd::stream::read::Decoder::new(reader)
        .map_err(|e| Error::Other(anyhow::anyhow!("opening zstd stream: {e}")))?;
    Ok(Bounded::new(decoder, max_site_size))
}

/// `ExtractTar`: reads every member of `reader` (already decompressed and
/// bounded by the caller) into a fresh [`Tree`]. A tar whiteout member is
/// not a patch operation here — extraction mode has no existing subtree to
/// delete, so it is recorded as a problem and skipped, per §4.2.
pub fn extract_tar<R: Read>(reader: R) -> Result<ExtractOutcome> {
    let (members, mut problems) = read_tar_members(reader)?;
    let mut tree = Tree::new();

    for member in members {
        match member.kind {
            MemberKind::Directory => {
                tree.set_dir(&member.path, true)?;
            }
            MemberKind::File(data) => {
                tree.set_leaf(&member.path, Entry::inline(data, None), true)?;
            }
            MemberKind::Symlink(target) => {
                tree.set_leaf(
                    &member.path,
                    gitpages_types::Entry {
                        kind: gitpages_types::EntryKind::Symlink { target },
                        transform: gitpages_types::Transform::Identity,
                        original_size: 0,
                        compressed_size: 0,
                        content_type: None,
                        git_hash: None,
                    },
                    true,
                )?;
            }
            MemberKind::Whiteout => {
                problems.push(Problem {
                    path: member.path,
                    cause: "whiteout outside patch mode is not applicable".into(),
                });
            }
        }
    }

    Ok(ExtractOutcome { tree, problems })
}

/// `ExtractZip`: sums `UncompressedSize64` across every entry before
/// reading any bytes, so an oversized archive fails with `ArchiveTooLarge`
/// before doing any decompression work.
pub fn extract_zip<R: Read + Seek>(reader: R, max_site_size: u64) -> Result<ExtractOutcome> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| Error::ErrArchiveFormat(e.to_string()))?;

    let mut total: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| Error::ErrArchiveFormat(e.to_string()))?;
        total += entry.size();
        if total > max_site_size {
            return Err(Error::ArchiveTooLarge);
        }
    }

    let mut tree = Tree::new();
    let mut problems = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::ErrArchiveFormat(e.to_string()))?;
        let raw_name = entry.name().to_string();
        let Some(path) = crate::tar_members::normalize_member_path(&raw_name) else {
            problems.push(Problem {
                path: raw_name,
                cause: "path escapes the site root or is malformed".into(),
            });
            continue;
        };

        if entry.is_dir() {
            tree.set_dir(&path, true)?;
            continue;
        }

        if entry.is_symlink() {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| Error::Other(anyhow::anyhow!("reading zip symlink {path}: {e}")))?;
            tree.set_leaf(
                &path,
                gitpages_types::Entry {
                    kind: gitpages_types::EntryKind::Symlink { target },
                    transform: gitpages_types::Transform::Identity,
                    original_size: 0,
                    compressed_size: 0,
                    content_type: None,
                    git_hash: None,
                },
                true,
            )?;
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::Other(anyhow::anyhow!("reading zip member {path}: {e}")))?;
        tree.set_leaf(&path, Entry::inline(data, None), true)?;
    }

    Ok(ExtractOutcome { tree, problems })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

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

    #[test]
    fn extracts_flat_files_into_tree() {
        let tar_bytes = make_tar(&[("index.html", b"<h1>hi</h1>"), ("a/b.txt", b"nested")]);
        let outcome = extract_tar(Cursor::new(tar_bytes)).unwrap();
        let flat = outcome.tree.flatten();
        assert!(flat.contains_key("index.html"));
        assert!(flat.contains_key("a/b.txt"));
        assert!(flat.contains_key("a"));
    }

    #[test]
    fn strips_leading_dot_slash() {
        let tar_bytes = make_tar(&[("./index.html", b"hi")]);
        let outcome = extract_tar(Cursor::new(tar_bytes)).unwrap();
        assert!(outcome.tree.flatten().contains_key("index.html"));
    }

    #[test]
    fn bounded_reader_trips_on_oversized_gzip_output() {
        use std::io::Write;
        let tar_bytes = make_tar(&[("big.bin", &vec![0u8; 4096])]);
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        let gz_bytes = encoder.finish().unwrap();

        let bounded = wrap_gzip(Cursor::new(gz_bytes), 128);
        let err = extract_tar(bounded).unwrap_err();
        assert!(matches!(err, Error::ArchiveTooLarge));
    }
}
