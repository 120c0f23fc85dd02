//! Externalization (§4.2 `StoreManifest`, blob half): turns a manifest whose
//! files are all inline into the form actually committed — oversized inline
//! files become `ExternalFile` references, with their bytes uploaded to the
//! blob store first. The CAS commit itself (staging the encoded manifest and
//! swapping it in) is [`gitpages_cas::CasStore::write_full`]; this module
//! only prepares the manifest and performs the blob uploads that commit
//! depends on.

use std::sync::Arc;

use gitpages_blob::{blob_name, Algo, BlobStore};
use gitpages_types::{Entry, EntryKind, Error, Manifest, Result};

pub struct ExternalizeLimits {
    pub max_inline_file_size: u64,
    pub max_site_size: u64,
    pub max_manifest_size: u64,
}

/// Rewrites `manifest` in place into external form and uploads any blobs
/// that transition, then checks `original_size_total`/`manifest_size_total`
/// against `limits`. Caller is expected to pass the result straight to
/// [`gitpages_cas::CasStore::write_full`].
pub async fn externalize(
    blobs: Arc<dyn BlobStore>,
    manifest: &mut Manifest,
    limits: &ExternalizeLimits,
) -> Result<()> {
    let mut original_size_total = 0u64;
    let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();

    for entry in manifest.contents.values_mut() {
        original_size_total += entry.original_size;
        externalize_entry(entry, limits.max_inline_file_size, &mut uploads);
    }

    if original_size_total > limits.max_site_size {
        return Err(Error::SiteTooLarge {
            actual: original_size_total,
            limit: limits.max_site_size,
        });
    }
    manifest.original_size_total = original_size_total;

    upload_all(blobs, uploads).await?;

    let encoded = gitpages_storage::encode_manifest(manifest)?;
    manifest.manifest_size_total = encoded.len() as u64;
    if manifest.manifest_size_total > limits.max_manifest_size {
        return Err(Error::ManifestTooLarge {
            actual: manifest.manifest_size_total,
            limit: limits.max_manifest_size,
        });
    }

    Ok(())
}

/// Only inline→external transitions produce an upload; already-external
/// entries, directories, and symlinks pass through untouched.
fn externalize_entry(entry: &mut Entry, max_inline_file_size: u64, uploads: &mut Vec<(String, Vec<u8>)>) {
    if entry.compressed_size <= max_inline_file_size {
        return;
    }
    let EntryKind::InlineFile { data } = &entry.kind else {
        return;
    };
    let name = blob_name(Algo::Sha256, data);
    uploads.push((name.clone(), data.clone()));
    entry.kind = EntryKind::ExternalFile { blob_name: name };
}

/// Uploads every `(name, bytes)` pair concurrently. The first failure wins:
/// the `JoinSet` is dropped on early return, which aborts whatever uploads
/// are still in flight.
async fn upload_all(blobs: Arc<dyn BlobStore>, uploads: Vec<(String, Vec<u8>)>) -> Result<()> {
    let mut set = tokio::task::JoinSet::new();
    for (name, data) in uploads {
        let blobs = blobs.clone();
        set.spawn(async move { blobs.put(&name, &data).await });
    }

    while let Some(joined) = set.join_next().await {
        joined.map_err(|e| Error::Other(anyhow::anyhow!("blob upload task panicked: {e}")))??;
    }
    Ok(())
}
