//! Audit log (§4.6): append-only record of manifest commits/deletes and
//! domain freeze/unfreeze, plus best-effort out-of-process notification.
//!
//! Appending is on the write's critical path — a failed append aborts the
//! mutation it would have recorded (`Error::AuditAppendFailure`). Notifying
//! `notify_url` is not: it runs as a detached background task so a client
//! that disconnects mid-request doesn't cut off delivery, retried with
//! [`gitpages_retry::RetryPolicy::AuditNotify`]'s 1s-to-60s jittered
//! backoff for as long as the process lives.

use std::sync::Arc;

use chrono::Utc;
use gitpages_retry::{RetryExecutor, RetryPolicy};
use gitpages_storage::{AuditStore, SearchAuditOptions};
use gitpages_types::{AuditEventKind, AuditRecord, Error, Manifest, Result, SnowflakeGenerator, SnowflakeId};

/// Orchestrates audit-record append plus (optional) webhook notification.
pub struct AuditService {
    store: Arc<dyn AuditStore>,
    generator: SnowflakeGenerator,
    notify_url: Option<String>,
    http: reqwest::Client,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>, machine_id: u16, notify_url: Option<String>) -> Self {
        AuditService {
            store,
            generator: SnowflakeGenerator::new(machine_id),
            notify_url,
            http: reqwest::Client::new(),
        }
    }

    /// Appends a record for `kind` and, if configured, fires a detached
    /// notification task. Returns the assigned id on success.
    pub async fn record(
        &self,
        kind: AuditEventKind,
        domain: impl Into<String>,
        project: impl Into<String>,
        manifest_snapshot: Option<Manifest>,
        principal: Option<String>,
    ) -> Result<SnowflakeId> {
        let record = AuditRecord {
            id: self.generator.generate(),
            timestamp: Utc::now(),
            kind,
            domain: domain.into(),
            project: project.into(),
            manifest_snapshot: manifest_snapshot.map(Box::new),
            principal,
        };

        self.store
            .append_audit_log(&record)
            .await
            .map_err(|e| Error::AuditAppendFailure(e.to_string()))?;

        self.spawn_notify(record.id);

        Ok(record.id)
    }

    pub async fn query(&self, id: SnowflakeId) -> Result<Option<AuditRecord>> {
        self.store.query_audit_log(id).await
    }

    pub async fn search(&self, opts: SearchAuditOptions) -> Result<Vec<AuditRecord>> {
        self.store.search_audit_log(opts).await
    }

    fn spawn_notify(&self, id: SnowflakeId) {
        let Some(base_url) = self.notify_url.clone() else {
            return;
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            let executor = RetryExecutor::from_policy(RetryPolicy::AuditNotify);
            let url = format!(
                "{base_url}{sep}id={hex}",
                sep = if base_url.contains('?') { "&" } else { "?" },
                hex = id.as_hex(),
            );
            let result = executor
                .run_async(|| {
                    let http = http.clone();
                    let url = url.clone();
                    async move {
                        let resp = http.get(&url).send().await.map_err(|e| e.to_string())?;
                        if resp.status().is_success() {
                            Ok(())
                        } else {
                            Err(format!("notify {url} returned {}", resp.status()))
                        }
                    }
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(audit_id = %id, error = %e, "audit notification exhausted retries");
            }
        });
    }
}
