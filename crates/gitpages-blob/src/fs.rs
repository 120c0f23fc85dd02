use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::{shard_path, BlobMeta, BlobStore, Result};
use gitpages_types::Error;

/// Filesystem-backed blob store, sharded `<algo>/<aa>/<bb>/<rest>` to avoid
/// huge directories. Writes go to a temporary sibling file, get chmod'd
/// read-only, then renamed into place — rename is atomic on the same
/// filesystem, so concurrent puts of the same name converge to whichever
/// write's rename lands last; both wrote identical bytes.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let (algo, aa, bb, rest) = shard_path(name)?;
        Some(self.root.join(algo).join(aa).join(bb).join(rest))
    }

    /// `mkdir -p`, retried to absorb the TOCTOU race where a concurrent
    /// writer creates the same directory between our `exists` check and our
    /// `create_dir`.
    async fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        for _ in 0..3 {
            match tokio::fs::create_dir_all(parent).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        tokio::fs::create_dir_all(parent).await
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self
            .path_for(name)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("malformed blob name: {name}")))?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        Self::ensure_parent_dir(&path)
            .await
            .map_err(|e| Error::Transient(format!("mkdir for blob {name}: {e}")))?;

        let tmp_path = path.with_extension(format!("tmp-{}", std::process::id()));
        {
            let mut f = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| Error::Transient(format!("create temp blob {name}: {e}")))?;
            f.write_all(bytes)
                .await
                .map_err(|e| Error::Transient(format!("write temp blob {name}: {e}")))?;
            f.flush()
                .await
                .map_err(|e| Error::Transient(format!("flush temp blob {name}: {e}")))?;
        }

        let mut perms = tokio::fs::metadata(&tmp_path)
            .await
            .map_err(|e| Error::Transient(format!("stat temp blob {name}: {e}")))?
            .permissions();
        perms.set_readonly(true);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Transient(format!("chmod temp blob {name}: {e}")))?;

        match tokio::fs::rename(&tmp_path, &path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    // A concurrent put already landed; converge silently.
                    Ok(())
                } else {
                    Err(Error::Transient(format!("rename blob {name} into place: {e}")))
                }
            }
        }
    }

    async fn get(&self, name: &str) -> Result<(Vec<u8>, BlobMeta)> {
        let path = self
            .path_for(name)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("malformed blob name: {name}")))?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(name.to_string())
            } else {
                Error::Transient(format!("read blob {name}: {e}"))
            }
        })?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::Transient(format!("stat blob {name}: {e}")))?;

        Ok((
            bytes,
            BlobMeta {
                size: meta.len(),
                last_modified: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            },
        ))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self
            .path_for(name)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("malformed blob name: {name}")))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Transient(format!("delete blob {name}: {e}"))),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let Some(path) = self.path_for(name) else {
            return Ok(false);
        };
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut algo_dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Transient(format!("list blob root: {e}"))),
        };
        while let Some(algo_entry) = algo_dirs
            .next_entry()
            .await
            .map_err(|e| Error::Transient(format!("list blob root: {e}")))?
        {
            let algo = algo_entry.file_name().to_string_lossy().to_string();
            let mut aa_dirs = tokio::fs::read_dir(algo_entry.path())
                .await
                .map_err(|e| Error::Transient(format!("list {algo}: {e}")))?;
            while let Some(aa_entry) = aa_dirs
                .next_entry()
                .await
                .map_err(|e| Error::Transient(format!("list {algo}: {e}")))?
            {
                let aa = aa_entry.file_name().to_string_lossy().to_string();
                let mut bb_dirs = tokio::fs::read_dir(aa_entry.path())
                    .await
                    .map_err(|e| Error::Transient(format!("list {algo}/{aa}: {e}")))?;
                while let Some(bb_entry) = bb_dirs
                    .next_entry()
                    .await
                    .map_err(|e| Error::Transient(format!("list {algo}/{aa}: {e}")))?
                {
                    let bb = bb_entry.file_name().to_string_lossy().to_string();
                    let mut rest_entries = tokio::fs::read_dir(bb_entry.path())
                        .await
                        .map_err(|e| Error::Transient(format!("list {algo}/{aa}/{bb}: {e}")))?;
                    while let Some(rest_entry) = rest_entries
                        .next_entry()
                        .await
                        .map_err(|e| Error::Transient(format!("list {algo}/{aa}/{bb}: {e}")))?
                    {
                        let rest = rest_entry.file_name().to_string_lossy().to_string();
                        out.push(format!("{algo}-{aa}{bb}{rest}"));
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{blob_name, Algo};

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let name = blob_name(Algo::Sha256, b"hello world");

        store.put(&name, b"hello world").await.unwrap();
        let (bytes, meta) = store.get(&name).await.unwrap();
        assert_eq!(bytes, b"hello world");
        assert_eq!(meta.size, 11);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let name = blob_name(Algo::Sha256, b"dup");

        store.put(&name, b"dup").await.unwrap();
        store.put(&name, b"dup").await.unwrap();
        assert!(store.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.get("sha256-deadbeef").await.unwrap_err();
        assert!(matches!(err, Error::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_unconditional_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let name = blob_name(Algo::Sha256, b"to-delete");
        store.put(&name, b"to-delete").await.unwrap();
        store.delete(&name).await.unwrap();
        assert!(!store.exists(&name).await.unwrap());
        store.delete(&name).await.unwrap(); // deleting again is not an error
    }

    #[tokio::test]
    async fn enumerate_lists_every_stored_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let a = blob_name(Algo::Sha256, b"a");
        let b = blob_name(Algo::Sha256, b"b");
        store.put(&a, b"a").await.unwrap();
        store.put(&b, b"b").await.unwrap();

        let mut names = store.enumerate().await.unwrap();
        names.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn concurrent_puts_of_same_name_converge() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FsBlobStore::new(dir.path()));
        let name = blob_name(Algo::Sha256, b"racy");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let name = name.clone();
            handles.push(tokio::spawn(async move {
                store.put(&name, b"racy").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let (bytes, _) = store.get(&name).await.unwrap();
        assert_eq!(bytes, b"racy");
    }
}
