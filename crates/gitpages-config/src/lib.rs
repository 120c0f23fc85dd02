//! Configuration file handling for git-pages.
//!
//! The server reads one TOML file at startup (path given on the command
//! line, not discovered by walking up the directory tree — a long-running
//! server doesn't have a notion of "current project" the way a CLI does).
//! Backend credentials are the one thing intentionally *not* in this file:
//! they're sourced from the environment so secrets don't land in a config
//! file that might get checked in (§6).
//!
//! # Example
//!
//! ```
//! use gitpages_config::Config;
//!
//! let config: Config = toml::from_str(r#"
//! [listen]
//! addr = "0.0.0.0:8080"
//!
//! [backend]
//! type = "fs"
//!
//! [backend.fs]
//! root = "/var/lib/git-pages"
//! "#).expect("parse");
//!
//! assert_eq!(config.listen.addr, "0.0.0.0:8080");
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gitpages_duration::{deserialize_duration, serialize_duration};

/// Default configuration file name when none is given explicitly.
pub const CONFIG_FILE: &str = "git-pages.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Checks cross-field invariants that serde defaults alone can't express:
    /// the `[backend.fs]`/`[backend.s3]` subsection matching `backend.type`
    /// must actually be present.
    pub fn validate(&self) -> Result<()> {
        match self.backend.kind {
            BackendKind::Fs if self.backend.fs.is_none() => {
                anyhow::bail!("backend.type = \"fs\" requires a [backend.fs] section")
            }
            BackendKind::S3 if self.backend.s3.is_none() => {
                anyhow::bail!("backend.type = \"s3\" requires a [backend.s3] section")
            }
            _ => {}
        }
        if self.limits.max_inline_file_size > self.limits.max_site_size {
            anyhow::bail!("limits.max_inline_file_size cannot exceed limits.max_site_size");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_addr")]
    pub addr: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            addr: default_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Fs,
    S3,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type", default)]
    pub kind: BackendKind,
    pub fs: Option<FsBackendConfig>,
    pub s3: Option<S3BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsBackendConfig {
    pub root: PathBuf,
}

/// S3-compatible backend settings. Credentials (`GITPAGES_S3_ACCESS_KEY_ID`,
/// `GITPAGES_S3_SECRET_ACCESS_KEY`, or the ambient `aws_config` provider
/// chain) are deliberately not fields here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3BackendConfig {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_site_size")]
    pub max_site_size: u64,
    #[serde(default = "default_max_inline_file_size")]
    pub max_inline_file_size: u64,
    #[serde(default = "default_max_manifest_size")]
    pub max_manifest_size: u64,
    #[serde(default = "default_max_symlink_depth")]
    pub max_symlink_depth: u32,
    #[serde(default)]
    pub allowed_custom_headers: Vec<String>,
    #[serde(
        default = "default_update_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub update_timeout: Duration,
}

fn default_max_site_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_max_inline_file_size() -> u64 {
    1024 * 1024 // 1 MiB
}

fn default_max_manifest_size() -> u64 {
    16 * 1024 * 1024 // 16 MiB
}

fn default_max_symlink_depth() -> u32 {
    8
}

fn default_update_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_site_size: default_max_site_size(),
            max_inline_file_size: default_max_inline_file_size(),
            max_manifest_size: default_max_manifest_size(),
            max_symlink_depth: default_max_symlink_depth(),
            allowed_custom_headers: Vec::new(),
            update_timeout: default_update_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_collect")]
    pub collect: bool,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub include_ips: bool,
}

fn default_collect() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            collect: default_collect(),
            notify_url: None,
            include_ips: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTierConfig {
    pub max_size: u64,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_age: Duration,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub max_stale: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_blob_cache")]
    pub blob: CacheTierConfig,
    #[serde(default = "default_manifest_cache")]
    pub manifest: CacheTierConfig,
}

fn default_blob_cache() -> CacheTierConfig {
    CacheTierConfig {
        max_size: 512 * 1024 * 1024, // 512 MiB of blob bytes
        max_age: Duration::from_secs(3600),
        max_stale: Duration::from_secs(6 * 3600),
    }
}

fn default_manifest_cache() -> CacheTierConfig {
    CacheTierConfig {
        max_size: 8192, // entry-weight, not bytes
        max_age: Duration::from_secs(60),
        max_stale: Duration::from_secs(300),
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            blob: default_blob_cache(),
            manifest: default_manifest_cache(),
        }
    }
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Load configuration from a directory containing [`CONFIG_FILE`], or
/// defaults if the file is absent.
pub fn load_config(dir: &Path) -> Result<Config> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from an explicit file path, or defaults if absent.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let content = toml::to_string_pretty(config).context("failed to serialize config to TOML")?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;
    Ok(())
}
