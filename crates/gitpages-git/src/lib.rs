//! Git tree fetch (§4.2 "Git import").
//!
//! The wire protocol itself is an external collaborator — the core only
//! consumes an abstract "fetch branch, give me a tree of `(path →
//! blob-hash, data)`" interface. [`GitTreeSource`] is that interface;
//! [`CliGitTreeSource`] is the one concrete implementation this crate
//! supplies, shelling out to the system `git` binary with a `blob:none`
//! partial clone so that blob payloads are only ever pulled for paths the
//! caller actually asks for.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("git command timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// The tip tree of a branch: its commit hash and a flat list of
/// `(path, git_hash)` pairs, with no blob data fetched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitTree {
    pub commit: String,
    /// `(path, git_blob_hash)`, directories omitted.
    pub entries: Vec<(String, String)>,
}

/// Bytes accounted for while fetching requested blobs: how much was already
/// present in the local partial-clone object store versus pulled from the
/// promisor remote over the wire (§8 testable statistic).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub local_bytes: u64,
    pub wire_bytes: u64,
}

#[async_trait]
pub trait GitTreeSource: Send + Sync {
    /// Lists the tip tree of `branch` without fetching any blob payloads.
    async fn list_tree(&self, repo_url: &str, branch: &str) -> Result<GitTree>;

    /// Fetches the blob payloads for exactly the given git hashes, returning
    /// their bytes and statistics on where those bytes came from.
    async fn fetch_blobs(
        &self,
        repo_url: &str,
        branch: &str,
        hashes: &[String],
    ) -> Result<(HashMap<String, Vec<u8>>, FetchStats)>;
}

/// Ported from the synchronous subprocess-timeout helper this workspace
/// used for CLI invocations; re-expressed with `tokio::process` so it
/// doesn't block a server worker thread.
async fn run_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>)> {
    run_with_timeout_env(program, args, working_dir, &[], timeout).await
}

async fn run_with_timeout_env(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    env: &[(&str, &str)],
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .envs(env.iter().copied())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let run = async {
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let (_, _, status) = tokio::join!(
            stdout.read_to_end(&mut out_buf),
            stderr.read_to_end(&mut err_buf),
            child.wait(),
        );
        (out_buf, err_buf, status)
    };

    match tokio::time::timeout(timeout, run).await {
        Ok((out, err, status)) => {
            let status = status?;
            if status.success() {
                Ok((out, err))
            } else {
                Err(GitError::CommandFailed(format!(
                    "{program} {args:?} exited with {status}: {}",
                    String::from_utf8_lossy(&err)
                )))
            }
        }
        Err(_) => {
            let _ = child.start_kill();
            Err(GitError::Timeout(timeout))
        }
    }
}

/// Shells out to `git`, preferring a `--filter=blob:none` partial clone so
/// blob payloads stay lazy until [`GitTreeSource::fetch_blobs`] asks for
/// them by hash.
pub struct CliGitTreeSource {
    workdir_root: PathBuf,
    command_timeout: Duration,
}

impl CliGitTreeSource {
    pub fn new(workdir_root: impl Into<PathBuf>) -> Self {
        CliGitTreeSource {
            workdir_root: workdir_root.into(),
            command_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn checkout_dir(&self, repo_url: &str, branch: &str) -> PathBuf {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(repo_url.as_bytes());
        hasher.update(b"\0");
        hasher.update(branch.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.workdir_root.join(&digest[..16])
    }

    async fn ensure_clone(&self, repo_url: &str, branch: &str) -> Result<PathBuf> {
        let dir = self.checkout_dir(repo_url, branch);
        if tokio::fs::try_exists(dir.join(".git")).await.unwrap_or(false) {
            run_with_timeout(
                "git",
                &["fetch", "--filter=blob:none", "--depth=1", "origin", branch],
                &dir,
                self.command_timeout,
            )
            .await?;
            run_with_timeout(
                "git",
                &["reset", "--hard", "FETCH_HEAD"],
                &dir,
                self.command_timeout,
            )
            .await?;
            return Ok(dir);
        }

        tokio::fs::create_dir_all(&dir).await?;
        run_with_timeout(
            "git",
            &[
                "clone",
                "--filter=blob:none",
                "--no-checkout",
                "--depth=1",
                "--branch",
                branch,
                repo_url,
                dir.to_str().expect("utf8 checkout path"),
            ],
            &self.workdir_root,
            self.command_timeout,
        )
        .await?;
        Ok(dir)
    }
}

#[async_trait]
impl GitTreeSource for CliGitTreeSource {
    async fn list_tree(&self, repo_url: &str, branch: &str) -> Result<GitTree> {
        let dir = self.ensure_clone(repo_url, branch).await?;

        let (commit_out, _) =
            run_with_timeout("git", &["rev-parse", "HEAD"], &dir, self.command_timeout).await?;
        let commit = String::from_utf8_lossy(&commit_out).trim().to_string();

        let (tree_out, _) = run_with_timeout(
            "git",
            &["ls-tree", "-r", "--full-tree", &commit],
            &dir,
            self.command_timeout,
        )
        .await?;

        let mut entries = Vec::new();
        for line in String::from_utf8_lossy(&tree_out).lines() {
            // "<mode> blob <hash>\t<path>"
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };
            let mut fields = meta.split_whitespace();
            let _mode = fields.next();
            let kind = fields.next();
            let hash = fields.next();
            if kind != Some("blob") {
                continue;
            }
            if let Some(hash) = hash {
                entries.push((path.to_string(), hash.to_string()));
            }
        }

        Ok(GitTree { commit, entries })
    }

    async fn fetch_blobs(
        &self,
        repo_url: &str,
        branch: &str,
        hashes: &[String],
    ) -> Result<(HashMap<String, Vec<u8>>, FetchStats)> {
        let dir = self.ensure_clone(repo_url, branch).await?;
        let mut data = HashMap::with_capacity(hashes.len());
        let mut stats = FetchStats::default();

        for hash in hashes {
            // `GIT_NO_LAZY_FETCH=1` makes this check fail instead of
            // silently fetching, so it tells us whether the object is
            // already present in the local partial-clone object store.
            let already_local = run_with_timeout_env(
                "git",
                &["cat-file", "-e", hash],
                &dir,
                &[("GIT_NO_LAZY_FETCH", "1")],
                self.command_timeout,
            )
            .await
            .is_ok();

            let (bytes, _) =
                run_with_timeout("git", &["cat-file", "-p", hash], &dir, self.command_timeout)
                    .await?;
            let len = bytes.len() as u64;
            if already_local {
                stats.local_bytes += len;
            } else {
                stats.wire_bytes += len;
            }
            data.insert(hash.clone(), bytes);
        }

        Ok((data, stats))
    }
}
