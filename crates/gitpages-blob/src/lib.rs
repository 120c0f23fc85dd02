//! Content-addressed blob store (§4.1).
//!
//! Blobs are named `<algo>-<hex-hash>` and never mutated once written. The
//! [`BlobStore`] trait is the shape every backend (filesystem today, S3 via
//! `gitpages-storage`) implements; this crate only supplies the filesystem
//! backend and the naming/sharding helpers shared by all of them.

use std::time::SystemTime;

use async_trait::async_trait;

mod fs;

pub use fs::FsBlobStore;

pub type Result<T> = std::result::Result<T, gitpages_types::Error>;

/// Metadata returned alongside a blob's bytes.
#[derive(Debug, Clone, Copy)]
pub struct BlobMeta {
    pub size: u64,
    pub last_modified: SystemTime,
}

/// Uniform content-addressed blob operations (§4.1, §4.8 `*Blob` primitives).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Idempotent: if `name` already exists, returns `Ok(())` without
    /// rewriting. Concurrent puts of the same name converge to one stored
    /// blob.
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Fails with [`gitpages_types::Error::ObjectNotFound`] if `name` is missing.
    async fn get(&self, name: &str) -> Result<(Vec<u8>, BlobMeta)>;

    /// Unconditional; may leave manifests dangling (GC's responsibility).
    async fn delete(&self, name: &str) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// All blob names currently stored, for the garbage tracer.
    async fn enumerate(&self) -> Result<Vec<String>>;
}

/// Hash algorithm tag used as the first component of a blob name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algo {
    Sha256,
}

impl Algo {
    pub fn tag(&self) -> &'static str {
        match self {
            Algo::Sha256 => "sha256",
        }
    }
}

/// Computes the content-addressed name for `bytes`: `<algo>-<hex-hash>`.
/// Invariant 4 — the hash is over the *stored* (post-transform) bytes, so
/// callers must pass the already-compressed bytes when `transform = Zstd`.
pub fn blob_name(algo: Algo, bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    match algo {
        Algo::Sha256 => {
            let digest = Sha256::digest(bytes);
            format!("{}-{}", algo.tag(), hex::encode(digest))
        }
    }
}



/// Splits a blob name into the `<algo>/<aa>/<bb>/<rest>` shard path used by
/// the filesystem backend, to keep any one directory from growing huge.
pub fn shard_path(name: &str) -> Option<(String, String, String, String)> {
    let (algo, hash) = name.split_once('-')?;
    if hash.len() < 4 {
        return None;
    }
    let aa = hash[0..2].to_string();
    let bb = hash[2..4].to_string();
    let rest = hash[4..].to_string();
    Some((algo.to_string(), aa, bb, rest))
}
