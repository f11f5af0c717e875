//! Restore engine: scoped temp dir, download, optional decompress,
//! adapter restore, cleanup. Retry policy mirrors backup.rs (§4.7).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::DatabaseAdapter;
use crate::alerts::AlertManager;
use crate::backup::{BackupConfig, ProgressCallback, ProgressEvent};
use crate::compression::{self, CompressionMethod};
use crate::context::{CancelToken, RestoreContext, Status};
use crate::error::{BackupError, Result};
use crate::metrics::{MetricRecord, MetricsCollector, RestoreMetric};
use crate::notifications::NotificationManager;
use crate::storage::StorageBackend;

/// Performs one restore attempt end-to-end.
#[async_trait]
pub trait RestoreStrategy: Send + Sync {
    async fn run(
        &self,
        ctx: &mut RestoreContext,
        adapter: &dyn DatabaseAdapter,
        storage: &dyn StorageBackend,
        cancel: &CancelToken,
    ) -> Result<()>;
}

pub struct FullRestoreStrategy;

#[async_trait]
impl RestoreStrategy for FullRestoreStrategy {
    async fn run(
        &self,
        ctx: &mut RestoreContext,
        adapter: &dyn DatabaseAdapter,
        storage: &dyn StorageBackend,
        cancel: &CancelToken,
    ) -> Result<()> {
        let work_dir = std::env::temp_dir().join(format!("restore-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&work_dir).await?;

        let result = self.run_in(ctx, adapter, storage, cancel, &work_dir).await;
        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        result
    }
}

impl FullRestoreStrategy {
    async fn run_in(
        &self,
        ctx: &mut RestoreContext,
        adapter: &dyn DatabaseAdapter,
        storage: &dyn StorageBackend,
        cancel: &CancelToken,
        work_dir: &std::path::Path,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let download_path = work_dir.join(
            std::path::Path::new(&ctx.backup_file)
                .file_name()
                .ok_or_else(|| BackupError::Config("backup_file has no file name".to_string()))?,
        );
        storage
            .download(&ctx.backup_file, &download_path)
            .await
            .map_err(|e| BackupError::Operation {
                step: "download".to_string(),
                message: e.to_string(),
            })?;
        ctx.download_path = Some(download_path.clone());

        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let restore_path = if let Some(method) = CompressionMethod::from_suffix(&download_path) {
            let target = download_path.with_extension("");
            compression::decompress(&download_path, &target, Some(method))
                .await
                .map_err(|e| BackupError::Operation {
                    step: "decompress".to_string(),
                    message: e.to_string(),
                })?;
            ctx.decompressed_path = Some(target.clone());
            target
        } else {
            download_path.clone()
        };

        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let target_database = ctx
            .target_database
            .clone()
            .unwrap_or_else(|| ctx.instance.id.clone());

        let ok = adapter
            .restore_database(&target_database, &restore_path)
            .await
            .map_err(|e| BackupError::Operation {
                step: "restore".to_string(),
                message: e.to_string(),
            })?;
        if !ok {
            return Err(BackupError::Operation {
                step: "restore".to_string(),
                message: "adapter reported restore failure".to_string(),
            });
        }

        let restored_size = tokio::fs::metadata(&restore_path).await?.len();
        ctx.restored_size = Some(restored_size);

        Ok(())
    }
}

/// Builds an adapter/storage pair for one restore attempt.
#[async_trait]
pub trait RestoreEnvironment: Send + Sync {
    async fn build_adapter(&self) -> Result<Box<dyn DatabaseAdapter>>;
    async fn build_storage(&self) -> Result<Box<dyn StorageBackend>>;
}

/// Retry and lifecycle driver around a [`RestoreStrategy`], mirroring
/// [`crate::backup::BackupExecutor`].
pub struct RestoreExecutor {
    config: BackupConfig,
    strategy: Arc<dyn RestoreStrategy>,
    metrics: Arc<MetricsCollector>,
    alerts: Option<Arc<AlertManager>>,
    notifications: Option<Arc<NotificationManager>>,
}

impl RestoreExecutor {
    pub fn new(config: BackupConfig, strategy: Arc<dyn RestoreStrategy>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            strategy,
            metrics,
            alerts: None,
            notifications: None,
        }
    }

    /// Attach alert evaluation and notification dispatch to the
    /// post-run side-effects, mirroring [`crate::backup::BackupExecutor`].
    pub fn with_alerting(mut self, alerts: Arc<AlertManager>, notifications: Arc<NotificationManager>) -> Self {
        self.alerts = Some(alerts);
        self.notifications = Some(notifications);
        self
    }

    pub async fn execute(
        &self,
        ctx: &mut RestoreContext,
        env: &dyn RestoreEnvironment,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<bool> {
        let emit = |event: ProgressEvent| {
            if let Some(cb) = progress {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(event)));
            }
        };

        emit(ProgressEvent::Started);

        let attempts = self.config.max_retries.max(1);
        let mut last_error: Option<BackupError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                ctx.reset_for_retry();
                emit(ProgressEvent::Retrying { attempt });
                tokio::time::sleep(self.config.retry_delay).await;
            }
            ctx.start();

            if cancel.is_cancelled() {
                ctx.fail("cancelled");
                self.finalize(ctx).await;
                emit(ProgressEvent::Failed {
                    message: "cancelled".to_string(),
                });
                return Err(BackupError::Cancelled);
            }

            let adapter = env.build_adapter().await?;
            let storage = env.build_storage().await?;

            match self.strategy.run(ctx, adapter.as_ref(), storage.as_ref(), cancel).await {
                Ok(()) => {
                    ctx.complete();
                    self.finalize(ctx).await;
                    emit(ProgressEvent::Succeeded);
                    return Ok(true);
                }
                Err(BackupError::Cancelled) => {
                    ctx.fail("cancelled");
                    self.finalize(ctx).await;
                    emit(ProgressEvent::Failed {
                        message: "cancelled".to_string(),
                    });
                    return Err(BackupError::Cancelled);
                }
                Err(e) => last_error = Some(e),
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        ctx.fail(message.clone());
        self.finalize(ctx).await;
        emit(ProgressEvent::Failed { message });
        Ok(false)
    }

    async fn finalize(&self, ctx: &RestoreContext) {
        let duration = ctx
            .duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let metric = RestoreMetric {
            instance: ctx.instance.id.clone(),
            database: ctx.target_database.clone().unwrap_or_else(|| ctx.instance.id.clone()),
            duration_seconds: duration,
            size_bytes: ctx.restored_size.unwrap_or(0),
            success: matches!(ctx.status, Status::Completed),
            timestamp: chrono::Utc::now(),
        };

        self.metrics.record_restore(metric.clone()).await;

        let Some(alerts) = &self.alerts else { return };
        let triggers = alerts.evaluate(&[MetricRecord::Restore(metric)]).await;
        if triggers.is_empty() {
            return;
        }
        let Some(notifications) = &self.notifications else { return };
        for trigger in &triggers {
            let failures = notifications.send_alert(trigger).await;
            if !failures.is_empty() {
                tracing::warn!(rule = %trigger.rule_name, ?failures, "alert notification partially failed");
            }
        }
    }
}

/// Three retries at sixty seconds, per spec.md §4.9's scheduler
/// delegation contract.
pub fn scheduled_restore_config() -> BackupConfig {
    BackupConfig {
        max_retries: 3,
        retry_delay: Duration::from_secs(60),
        policy: crate::backup::AggregationPolicy::BestEffort,
    }
}
