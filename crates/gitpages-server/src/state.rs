//! Wires a configured backend into the cached/orchestrating layers every
//! handler shares. One `AppState` per process; cheap to clone (everything
//! inside is an `Arc`).

use std::sync::Arc;

use gitpages_audit::AuditService;
use gitpages_cache::{CachedBlobStore, CachedManifestStore};
use gitpages_cas::CasStore;
use gitpages_config::{BackendKind, Config};
use gitpages_serve::{HostPolicy, ServeContext};
use gitpages_storage::{AuditStore, BlobStore, DomainStore, FeatureStore, FsDriver, ManifestStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manifests: Arc<dyn ManifestStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub domains: Arc<dyn DomainStore>,
    pub audit_store: Arc<dyn AuditStore>,
    pub features: Arc<dyn FeatureStore>,
    pub cas: Arc<CasStore>,
    pub audit: Arc<AuditService>,
    pub serve: Arc<ServeContext>,
}

/// Snowflake machine id for audit record ids. A single-process deployment
/// only ever needs one; a multi-instance deployment would thread this
/// through from an operator-assigned id instead.
const MACHINE_ID: u16 = 1;

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let (manifests, blobs, domains, audit_store, features): (
            Arc<dyn ManifestStore>,
            Arc<dyn BlobStore>,
            Arc<dyn DomainStore>,
            Arc<dyn AuditStore>,
            Arc<dyn FeatureStore>,
        ) = match config.backend.kind {
            BackendKind::Fs => {
                let fs = config
                    .backend
                    .fs
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("backend.type = \"fs\" requires [backend.fs]"))?;
                let driver = Arc::new(FsDriver::new(fs.root.clone()));
                let manifests = Arc::new(CachedManifestStore::new(driver.clone(), config.cache.manifest.clone()));
                let blobs = Arc::new(CachedBlobStore::new(driver.clone(), config.cache.blob.clone()));
                (manifests, blobs, driver.clone(), driver.clone(), driver)
            }
            BackendKind::S3 => build_s3_backend(&config).await?,
        };

        let cas = Arc::new(CasStore::new(manifests.clone(), domains.clone()));
        let audit = Arc::new(AuditService::new(
            audit_store.clone(),
            MACHINE_ID,
            config.audit.notify_url.clone(),
        ));
        let serve = Arc::new(ServeContext {
            manifests: manifests.clone(),
            blobs: blobs.clone(),
            max_symlink_depth: config.limits.max_symlink_depth,
            header_allowlist: config.limits.allowed_custom_headers.clone(),
            host_policy: HostPolicy::default(),
        });

        Ok(AppState {
            config: Arc::new(config),
            manifests,
            blobs,
            domains,
            audit_store,
            features,
            cas,
            audit,
            serve,
        })
    }
}

#[cfg(feature = "s3")]
async fn build_s3_backend(
    config: &Config,
) -> anyhow::Result<(
    Arc<dyn ManifestStore>,
    Arc<dyn BlobStore>,
    Arc<dyn DomainStore>,
    Arc<dyn AuditStore>,
    Arc<dyn FeatureStore>,
)> {
    let s3 = config
        .backend
        .s3
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("backend.type = \"s3\" requires [backend.s3]"))?;
    let prefix = s3.prefix.clone().unwrap_or_default();
    let driver = gitpages_storage::s3::S3Driver::from_env(s3.bucket.clone(), prefix).await;
    let driver = Arc::new(driver);
    let manifests = Arc::new(CachedManifestStore::new(driver.clone(), config.cache.manifest.clone()));
    let blobs = Arc::new(CachedBlobStore::new(driver.clone(), config.cache.blob.clone()));
    Ok((manifests, blobs, driver.clone(), driver.clone(), driver))
}

#[cfg(not(feature = "s3"))]
async fn build_s3_backend(
    _config: &Config,
) -> anyhow::Result<(
    Arc<dyn ManifestStore>,
    Arc<dyn BlobStore>,
    Arc<dyn DomainStore>,
    Arc<dyn AuditStore>,
    Arc<dyn FeatureStore>,
)> {
    anyhow::bail!("backend.type = \"s3\" requires building gitpages-server with --features s3")
}
