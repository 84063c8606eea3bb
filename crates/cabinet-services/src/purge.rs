use std::sync::Arc;

use cabinet_core::config::PurgeConfig;
use cabinet_core::{retry, AppError, FileRecord, RetryPolicy};
use cabinet_db::MetadataStore;
use cabinet_storage::keys::tenant_of_key;
use cabinet_storage::Storage;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::interval;

const PURGE_CONCURRENCY: usize = 8;

/// Outcome of one purge pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub scanned: usize,
    pub purged: usize,
    pub failed: usize,
}

/// Delete the blob behind a tombstoned record, then mark the record `Purged`.
///
/// The record stays `Tombstoned` if the blob delete fails, so the next pass
/// picks it up again. Returns false if another worker purged it first.
pub async fn purge_record(
    storage: &dyn Storage,
    store: &dyn MetadataStore,
    policy: &RetryPolicy,
    record: &FileRecord,
) -> Result<bool, AppError> {
    if tenant_of_key(&record.storage_key) != Some(record.tenant_id.as_str()) {
        tracing::error!(
            file_id = %record.id,
            tenant_id = %record.tenant_id,
            "Storage key outside the owning tenant's namespace, refusing to purge"
        );
        return Err(AppError::Internal(
            "Storage key does not belong to the record's tenant".to_string(),
        ));
    }

    retry(policy, "storage.delete", || storage.delete(&record.storage_key)).await?;
    let purged = store.mark_purged(&record.tenant_id, record.id).await?;

    tracing::debug!(
        file_id = %record.id,
        tenant_id = %record.tenant_id,
        purged,
        "Purged file blob"
    );
    Ok(purged)
}

/// Background service that reclaims blobs of tombstoned records.
pub struct PurgeService {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PurgeService {
    pub fn start(
        storage: Arc<dyn Storage>,
        store: Arc<dyn MetadataStore>,
        policy: RetryPolicy,
        config: PurgeConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            Self::worker_loop(storage, store, policy, config, shutdown_rx).await;
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    async fn worker_loop(
        storage: Arc<dyn Storage>,
        store: Arc<dyn MetadataStore>,
        policy: RetryPolicy,
        config: PurgeConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = interval(config.interval);

        tracing::info!(
            interval_secs = config.interval.as_secs(),
            grace_secs = config.grace_period.as_secs(),
            batch_size = config.batch_size,
            "Purge service started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match Self::run_once(&storage, &store, &policy, &config).await {
                        Ok(report) if report.scanned > 0 => {
                            tracing::info!(
                                scanned = report.scanned,
                                purged = report.purged,
                                failed = report.failed,
                                "Purge pass finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Error running purge pass");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Purge service shutting down");
                    break;
                }
            }
        }
    }

    /// Purge one batch of tombstones older than the grace period.
    ///
    /// A record whose purge fails is requeued with a fresh `updated_at`, so it is
    /// retried only after every tombstone that was already due.
    pub async fn run_once(
        storage: &Arc<dyn Storage>,
        store: &Arc<dyn MetadataStore>,
        policy: &RetryPolicy,
        config: &PurgeConfig,
    ) -> Result<PurgeReport, AppError> {
        let grace = chrono::Duration::from_std(config.grace_period)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = chrono::Utc::now() - grace;

        let due = store.list_tombstoned(cutoff, config.batch_size).await?;
        let mut report = PurgeReport {
            scanned: due.len(),
            ..PurgeReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(PURGE_CONCURRENCY));
        let mut handles = Vec::with_capacity(due.len());

        for record in due {
            let storage = storage.clone();
            let store = store.clone();
            let policy = *policy;
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| AppError::Internal("Purge semaphore closed".to_string()))?;

            handles.push(tokio::spawn(async move {
                let result =
                    purge_record(storage.as_ref(), store.as_ref(), &policy, &record).await;
                if result.is_err() {
                    // Requeue behind every other due tombstone.
                    if let Err(e) = store.defer_purge(&record.tenant_id, record.id).await {
                        tracing::warn!(
                            file_id = %record.id,
                            error = %e,
                            "Failed to requeue tombstone after purge failure"
                        );
                    }
                }
                drop(permit);
                (record, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((_, Ok(true))) => report.purged += 1,
                Ok((_, Ok(false))) => {}
                Ok((record, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(
                        file_id = %record.id,
                        tenant_id = %record.tenant_id,
                        error = %e,
                        "Failed to purge file, will retry next pass"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(error = %e, "Purge task panicked");
                }
            }
        }

        Ok(report)
    }

    /// Stop the worker and wait for the current pass to finish.
    pub async fn shutdown(self) {
        if let Err(e) = self.shutdown_tx.send(()).await {
            tracing::warn!(error = %e, "Failed to send shutdown signal to purge service");
        }
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Purge service task ended abnormally");
        }
    }
}
