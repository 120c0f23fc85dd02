//! Compression (§4.2 step 4): Zstd-encode every inline file still at
//! `Transform::Identity` whose content type is not audio or video, and keep
//! the encoding only if it is strictly smaller than the original. Run after
//! [`crate::content_type::apply_content_types`], since eligibility depends
//! on the content type assigned there.

use std::collections::BTreeMap;

use gitpages_types::{Entry, EntryKind, Transform};

/// `zstd`'s "better compression" tier: high ratio, not the slowest "best"
/// tier, matching what's affordable on an ingest request path.
const BETTER_COMPRESSION_LEVEL: i32 = 19;

/// Compresses eligible entries in place.
pub fn compress_eligible(contents: &mut BTreeMap<String, Entry>) -> anyhow::Result<()> {
    for entry in contents.values_mut() {
        if entry.transform != Transform::Identity || is_audio_or_video(entry.content_type.as_deref()) {
            continue;
        }
        let EntryKind::InlineFile { data } = &entry.kind else {
            continue;
        };
        let encoded = zstd::stream::encode_all(data.as_slice(), BETTER_COMPRESSION_LEVEL)?;
        if encoded.len() < data.len() {
            entry.compressed_size = encoded.len() as u64;
            entry.transform = Transform::Zstd;
            entry.kind = EntryKind::InlineFile { data: encoded };
        }
    }
    Ok(())
}

fn is_audio_or_video(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.starts_with("audio/") || ct.starts_with("video/"))
        .unwrap_or(false)
}
