//! Content-type detection (§4.2 step 3): for every inline file still at
//! `Transform::Identity` (i.e. not yet compressed), derive a content type by
//! extension first, falling back to sniffing the first 512 bytes for
//! extension-less or unrecognized names. Entries that already carry a
//! `content_type` (imported from a git blob with known mode, say) are left
//! alone.

use std::collections::BTreeMap;

use gitpages_types::{Entry, EntryKind, Transform};

const SNIFF_WINDOW: usize = 512;

/// Assigns `content_type` in place to every eligible entry in `contents`.
pub fn apply_content_types(contents: &mut BTreeMap<String, Entry>) {
    for (path, entry) in contents.iter_mut() {
        if entry.content_type.is_some() || entry.transform != Transform::Identity {
            continue;
        }
        if let EntryKind::InlineFile { data } = &entry.kind {
            entry.content_type = Some(detect(path, data));
        }
    }
}

fn detect(path: &str, data: &[u8]) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|guess| guess.essence_str().to_string())
        .unwrap_or_else(|| sniff(data))
}

fn sniff(data: &[u8]) -> String {
    let head = &data[..data.len().min(SNIFF_WINDOW)];

    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png".to_string();
    }
    if head.starts_with(b"\xff\xd8\xff") {
        return "image/jpeg".to_string();
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif".to_string();
    }
    if head.starts_with(b"%PDF-") {
        return "application/pdf".to_string();
    }
    if head.starts_with(b"\x1f\x8b") {
        return "application/gzip".to_string();
    }
    if looks_like_html(head) {
        return "text/html".to_string();
    }
    if std::str::from_utf8(head).is_ok() {
        return "text/plain".to_string();
    }
    "application/octet-stream".to_string()
}

fn looks_like_html(head: &[u8]) -> bool {
    let trimmed = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| &head[i..])
        .unwrap_or(head);
    let lower: Vec<u8> = trimmed
        .iter()
        .take(15)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    lower.starts_with(b"<!doctype html") || lower.starts_with(b"<html")
}
