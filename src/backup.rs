//! Backup engine: Context (state, §3) + Strategy (full, the only
//! concrete strategy) + Executor (retry and lifecycle driver).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::DatabaseAdapter;
use crate::alerts::AlertManager;
use crate::compression::{self, CompressionMethod};
use crate::context::{BackupContext, CancelToken, DatabaseOutcome, Status};
use crate::error::{BackupError, Result};
use crate::metrics::{BackupMetric, MetricRecord, MetricsCollector};
use crate::notifications::NotificationManager;
use crate::storage::StorageBackend;

/// Whether a single failed database aborts the whole run or is simply
/// recorded and skipped. Spec.md flags this as an open question; we
/// default to best-effort (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationPolicy {
    AllOrNothing,
    BestEffort,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self::BestEffort
    }
}

/// Executor-level knobs: retry count/delay and the aggregation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub policy: AggregationPolicy,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay: Duration::from_secs(0),
            policy: AggregationPolicy::BestEffort,
        }
    }
}

/// Lifecycle events a caller can observe. Callback panics/errors are
/// suppressed by the executor, never propagated.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started,
    Retrying { attempt: u32 },
    Succeeded,
    Failed { message: String },
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Performs the work of one backup end-to-end against a concrete
/// adapter/storage pair.
#[async_trait]
pub trait BackupStrategy: Send + Sync {
    async fn run(
        &self,
        ctx: &mut BackupContext,
        adapter: &dyn DatabaseAdapter,
        storage: &dyn StorageBackend,
        cancel: &CancelToken,
        policy: AggregationPolicy,
    ) -> Result<bool>;
}

/// Enumerate -> dump -> compress -> upload -> record, per database.
pub struct FullBackupStrategy;

impl FullBackupStrategy {
    /// `<YYYYMMDD_HHMMSS>_<kind>_<db>` with the compression suffix
    /// appended, per the artifact naming convention in spec.md §6.
    fn artifact_name(ctx: &BackupContext, database: &str, extension: &str) -> String {
        let started = ctx.start_time.unwrap_or_else(chrono::Utc::now);
        let kind = match ctx.instance.kind {
            crate::config::DatabaseKind::Mysql => "mysql",
            crate::config::DatabaseKind::Postgresql => "postgresql",
            crate::config::DatabaseKind::Files => "files",
        };
        format!(
            "{}_{kind}_{database}.{extension}",
            started.format("%Y%m%d_%H%M%S")
        )
    }

    fn select_targets(include: &[String], exclude: &[String], available: &[String]) -> Vec<String> {
        let mut targets: Vec<String> = if include.is_empty() {
            available.to_vec()
        } else {
            include
                .iter()
                .filter(|name| available.contains(name))
                .cloned()
                .collect()
        };
        targets.retain(|name| !exclude.contains(name));
        targets.sort();
        targets
    }
}

#[async_trait]
impl BackupStrategy for FullBackupStrategy {
    async fn run(
        &self,
        ctx: &mut BackupContext,
        adapter: &dyn DatabaseAdapter,
        storage: &dyn StorageBackend,
        cancel: &CancelToken,
        policy: AggregationPolicy,
    ) -> Result<bool> {
        let available = adapter
            .databases()
            .await
            .map_err(BackupError::Adapter)?;
        let targets = Self::select_targets(&ctx.instance.include, &ctx.instance.exclude, &available);

        let method = CompressionMethod::from_config_str(&ctx.compression);
        let extension = method.map(CompressionMethod::extension).unwrap_or("sql");

        let mut any_succeeded = false;
        let mut any_failed = false;

        for database in targets.iter() {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let outcome = match self.backup_one(ctx, adapter, storage, database, method, extension).await {
                Ok(outcome) => outcome,
                Err(e) => DatabaseOutcome {
                    database: database.clone(),
                    success: false,
                    raw_size: 0,
                    compressed_size: 0,
                    storage_location: None,
                    error_message: Some(e.to_string()),
                },
            };

            any_succeeded |= outcome.success;
            any_failed |= !outcome.success;
            ctx.outcomes.push(outcome);
        }

        match policy {
            // Every enumerated target must succeed; a single failure
            // (or zero targets found at all) fails the whole run.
            AggregationPolicy::AllOrNothing => Ok(!any_failed && !targets.is_empty()),
            // At least one success is enough; a fleet run tolerates
            // per-database failures. Zero targets means zero successes.
            AggregationPolicy::BestEffort => Ok(any_succeeded),
        }
    }
}

impl FullBackupStrategy {
    async fn backup_one(
        &self,
        ctx: &BackupContext,
        adapter: &dyn DatabaseAdapter,
        storage: &dyn StorageBackend,
        database: &str,
        method: Option<CompressionMethod>,
        extension: &str,
    ) -> Result<DatabaseOutcome> {
        let work_dir = std::env::temp_dir().join(format!("backup-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&work_dir).await?;

        let raw_path = work_dir.join(format!("{database}.sql"));
        let ok = adapter
            .backup_database(database, &raw_path)
            .await
            .map_err(BackupError::Adapter)?;
        if !ok {
            let _ = tokio::fs::remove_dir_all(&work_dir).await;
            return Ok(DatabaseOutcome {
                database: database.to_string(),
                success: false,
                raw_size: 0,
                compressed_size: 0,
                storage_location: None,
                error_message: Some("adapter reported dump failure".to_string()),
            });
        }
        let raw_size = tokio::fs::metadata(&raw_path).await?.len();

        let artifact_name = Self::artifact_name(ctx, database, extension);
        let compressed_path = work_dir.join(&artifact_name);
        compression::compress(&raw_path, &compressed_path, method).await?;
        let compressed_size = tokio::fs::metadata(&compressed_path).await?.len();

        storage.upload(&compressed_path, &artifact_name).await?;

        let _ = tokio::fs::remove_dir_all(&work_dir).await;

        Ok(DatabaseOutcome {
            database: database.to_string(),
            success: true,
            raw_size,
            compressed_size,
            storage_location: Some(artifact_name),
            error_message: None,
        })
    }
}

/// Builds an adapter/storage pair for one attempt; rebuilt on every
/// retry per spec.md §4.6 ("each attempt: build adapter -> build
/// storage -> invoke strategy").
#[async_trait]
pub trait BackupEnvironment: Send + Sync {
    async fn build_adapter(&self) -> Result<Box<dyn DatabaseAdapter>>;
    async fn build_storage(&self) -> Result<Box<dyn StorageBackend>>;
}

/// Retry and lifecycle driver around a [`BackupStrategy`].
pub struct BackupExecutor {
    config: BackupConfig,
    strategy: Arc<dyn BackupStrategy>,
    metrics: Arc<MetricsCollector>,
    alerts: Option<Arc<AlertManager>>,
    notifications: Option<Arc<NotificationManager>>,
}

impl BackupExecutor {
    pub fn new(config: BackupConfig, strategy: Arc<dyn BackupStrategy>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            strategy,
            metrics,
            alerts: None,
            notifications: None,
        }
    }

    /// Attach alert evaluation and notification dispatch to the
    /// post-run side-effects. Without this, `finalize` only records a
    /// metric.
    pub fn with_alerting(mut self, alerts: Arc<AlertManager>, notifications: Arc<NotificationManager>) -> Self {
        self.alerts = Some(alerts);
        self.notifications = Some(notifications);
        self
    }

    pub async fn execute(
        &self,
        ctx: &mut BackupContext,
        env: &dyn BackupEnvironment,
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

            let outcome = self.run_once(ctx, env, cancel).await;

            match outcome {
                Ok(true) => {
                    if ctx.status != Status::Completed {
                        ctx.complete();
                    }
                    self.finalize(ctx).await;
                    emit(ProgressEvent::Succeeded);
                    return Ok(true);
                }
                Ok(false) => {
                    last_error = Some(BackupError::Operation {
                        step: "backup".to_string(),
                        message: "no database succeeded".to_string(),
                    });
                }
                Err(BackupError::Cancelled) => {
                    ctx.fail("cancelled");
                    self.finalize(ctx).await;
                    emit(ProgressEvent::Failed {
                        message: "cancelled".to_string(),
                    });
                    return Err(BackupError::Cancelled);
                }
                Err(e) => {
                    last_error = Some(e);
                }
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

    async fn run_once(
        &self,
        ctx: &mut BackupContext,
        env: &dyn BackupEnvironment,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let adapter = env.build_adapter().await?;
        let storage = env.build_storage().await?;
        self.strategy
            .run(ctx, adapter.as_ref(), storage.as_ref(), cancel, self.config.policy)
            .await
    }

    /// Post-run terminal side-effects: record metric, evaluate alerts,
    /// dispatch notifications. Always run, on both success and failure,
    /// and never propagate — a failure in any of these is logged and
    /// suppressed rather than surfaced to the caller.
    async fn finalize(&self, ctx: &BackupContext) {
        let duration = ctx
            .duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let raw_size: u64 = ctx.outcomes.iter().map(|o| o.raw_size).sum();
        let success = matches!(ctx.status, Status::Completed);

        let metric = BackupMetric {
            instance: ctx.instance.id.clone(),
            database: ctx
                .outcomes
                .iter()
                .map(|o| o.database.clone())
                .collect::<Vec<_>>()
                .join(","),
            duration_seconds: duration,
            size_bytes: raw_size,
            success,
            timestamp: chrono::Utc::now(),
        };

        self.metrics.record_backup(metric.clone()).await;

        let Some(alerts) = &self.alerts else { return };
        let triggers = alerts.evaluate(&[MetricRecord::Backup(metric)]).await;
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
pub fn scheduled_backup_config() -> BackupConfig {
    BackupConfig {
        max_retries: 3,
        retry_delay: Duration::from_secs(60),
        policy: AggregationPolicy::BestEffort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupSystemPaths, DatabaseInstance, DatabaseKind, StorageTarget, TlsSettings};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn instance(include: Vec<String>) -> DatabaseInstance {
        DatabaseInstance {
            id: "mysql-prod".to_string(),
            kind: DatabaseKind::Mysql,
            host: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            credential_id: "db_mysql-prod".to_string(),
            include,
            exclude: vec![],
            enabled: true,
            tls: TlsSettings::default(),
        }
    }

    struct StubAdapter {
        databases: Vec<String>,
        fail_first_n: AtomicU32,
    }

    #[async_trait]
    impl DatabaseAdapter for StubAdapter {
        async fn databases(&self) -> crate::error::AdapterResult<Vec<String>> {
            Ok(self.databases.clone())
        }
        async fn test_connection(&self) -> crate::error::AdapterResult<bool> {
            Ok(true)
        }
        async fn backup_database(&self, _name: &str, out_path: &std::path::Path) -> crate::error::AdapterResult<bool> {
            if self.fail_first_n.load(Ordering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Ok(false);
            }
            tokio::fs::write(out_path, b"-- dump --").await.unwrap();
            Ok(true)
        }
        async fn restore_database(&self, _name: &str, _in_path: &std::path::Path) -> crate::error::AdapterResult<bool> {
            Ok(true)
        }
        fn backup_command(&self, _name: &str, _out_path: &std::path::Path) -> String {
            String::new()
        }
    }

    struct StubEnv {
        databases: Vec<String>,
        fail_first_n: Arc<AtomicU32>,
        storage_dir: PathBuf,
    }

    #[async_trait]
    impl BackupEnvironment for StubEnv {
        async fn build_adapter(&self) -> Result<Box<dyn DatabaseAdapter>> {
            Ok(Box::new(StubAdapter {
                databases: self.databases.clone(),
                fail_first_n: AtomicU32::new(self.fail_first_n.load(Ordering::SeqCst)),
            }))
        }
        async fn build_storage(&self) -> Result<Box<dyn StorageBackend>> {
            Ok(Box::new(crate::storage::local::LocalBackend::new(
                self.storage_dir.clone(),
            )))
        }
    }

    #[tokio::test]
    async fn best_effort_run_with_all_databases_succeeding() {
        let storage_dir = tempdir().unwrap();
        let env = StubEnv {
            databases: vec!["orders".to_string(), "users".to_string()],
            fail_first_n: Arc::new(AtomicU32::new(0)),
            storage_dir: storage_dir.path().to_path_buf(),
        };

        let mut ctx = BackupContext::new(
            instance(vec![]),
            StorageTarget::Local {
                path: storage_dir.path().to_path_buf(),
            },
            BackupSystemPaths::default(),
            "gzip".to_string(),
        );

        let metrics = Arc::new(MetricsCollector::new());
        let executor = BackupExecutor::new(
            BackupConfig::default(),
            Arc::new(FullBackupStrategy),
            metrics.clone(),
        );

        let cancel = CancelToken::new();
        let ok = executor.execute(&mut ctx, &env, &cancel, None).await.unwrap();
        assert!(ok);
        assert_eq!(ctx.status, Status::Completed);
        assert_eq!(ctx.outcomes.len(), 2);
        assert!(ctx.outcomes.iter().all(|o| o.success));
        assert_eq!(metrics.get_backup_metrics().await.len(), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds_and_records_one_metric() {
        let storage_dir = tempdir().unwrap();
        let env = StubEnv {
            databases: vec!["orders".to_string()],
            fail_first_n: Arc::new(AtomicU32::new(1)),
            storage_dir: storage_dir.path().to_path_buf(),
        };

        let mut ctx = BackupContext::new(
            instance(vec![]),
            StorageTarget::Local {
                path: storage_dir.path().to_path_buf(),
            },
            BackupSystemPaths::default(),
            "".to_string(),
        );

        let metrics = Arc::new(MetricsCollector::new());
        let config = BackupConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(0),
            policy: AggregationPolicy::BestEffort,
        };
        let executor = BackupExecutor::new(config, Arc::new(FullBackupStrategy), metrics.clone());

        let cancel = CancelToken::new();
        let ok = executor.execute(&mut ctx, &env, &cancel, None).await.unwrap();
        assert!(ok);
        assert_eq!(metrics.get_backup_metrics().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_run_dispatches_alert_notification() {
        use crate::alerts::{AlertManager, AlertRule, Condition, Operator};
        use crate::notifications::{Channel, NotificationEvent, NotificationManager, Severity};
        use std::sync::atomic::AtomicUsize;

        struct RecordingChannel {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Channel for RecordingChannel {
            async fn send(&self, _event: &NotificationEvent) -> Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn name(&self) -> &str {
                "recording"
            }
        }

        let storage_dir = tempdir().unwrap();
        let env = StubEnv {
            databases: vec!["orders".to_string()],
            fail_first_n: Arc::new(AtomicU32::new(u32::MAX)),
            storage_dir: storage_dir.path().to_path_buf(),
        };

        let mut ctx = BackupContext::new(
            instance(vec![]),
            StorageTarget::Local {
                path: storage_dir.path().to_path_buf(),
            },
            BackupSystemPaths::default(),
            "".to_string(),
        );

        let metrics = Arc::new(MetricsCollector::new());
        let rule = AlertRule {
            name: "any-failure".to_string(),
            description: "Fires whenever a backup reports failure".to_string(),
            severity: Severity::Critical,
            primary: Condition {
                metric_field: "success".to_string(),
                operator: Operator::Equal,
                threshold: 0.0,
            },
            additional: vec![],
            cooldown_seconds: 0,
            enabled: true,
        };
        let alerts = Arc::new(AlertManager::new(vec![rule]));
        let calls = Arc::new(AtomicUsize::new(0));
        let notifications = Arc::new(NotificationManager::new(vec![Box::new(RecordingChannel {
            calls: calls.clone(),
        })]));

        let config = BackupConfig {
            max_retries: 1,
            retry_delay: Duration::from_millis(0),
            policy: AggregationPolicy::BestEffort,
        };
        let executor = BackupExecutor::new(config, Arc::new(FullBackupStrategy), metrics)
            .with_alerting(alerts, notifications);

        let cancel = CancelToken::new();
        let ok = executor.execute(&mut ctx, &env, &cancel, None).await.unwrap();
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_or_nothing_policy_fails_run_on_single_database_failure() {
        let storage_dir = tempdir().unwrap();
        let env = StubEnv {
            databases: vec!["orders".to_string(), "users".to_string()],
            fail_first_n: Arc::new(AtomicU32::new(1)),
            storage_dir: storage_dir.path().to_path_buf(),
        };

        let mut ctx = BackupContext::new(
            instance(vec![]),
            StorageTarget::Local {
                path: storage_dir.path().to_path_buf(),
            },
            BackupSystemPaths::default(),
            "".to_string(),
        );

        let metrics = Arc::new(MetricsCollector::new());
        let config = BackupConfig {
            max_retries: 1,
            retry_delay: Duration::from_millis(0),
            policy: AggregationPolicy::AllOrNothing,
        };
        let executor = BackupExecutor::new(config, Arc::new(FullBackupStrategy), metrics.clone());

        let cancel = CancelToken::new();
        let ok = executor.execute(&mut ctx, &env, &cancel, None).await.unwrap();
        assert!(!ok, "one failed database must fail the whole run under all-or-nothing");
        assert_eq!(ctx.status, Status::Failed);
        assert!(ctx.outcomes.iter().any(|o| !o.success));
    }

    #[tokio::test]
    async fn best_effort_run_with_zero_targets_is_not_a_success() {
        let storage_dir = tempdir().unwrap();
        let env = StubEnv {
            databases: vec![],
            fail_first_n: Arc::new(AtomicU32::new(0)),
            storage_dir: storage_dir.path().to_path_buf(),
        };

        let mut ctx = BackupContext::new(
            instance(vec![]),
            StorageTarget::Local {
                path: storage_dir.path().to_path_buf(),
            },
            BackupSystemPaths::default(),
            "".to_string(),
        );

        let metrics = Arc::new(MetricsCollector::new());
        let config = BackupConfig {
            max_retries: 1,
            retry_delay: Duration::from_millis(0),
            policy: AggregationPolicy::BestEffort,
        };
        let executor = BackupExecutor::new(config, Arc::new(FullBackupStrategy), metrics.clone());

        let cancel = CancelToken::new();
        let ok = executor.execute(&mut ctx, &env, &cancel, None).await.unwrap();
        assert!(!ok, "a run that backs up nothing has zero successes");
        assert_eq!(ctx.status, Status::Failed);
        assert!(ctx.outcomes.is_empty());
    }

    #[tokio::test]
    async fn select_targets_applies_include_and_exclude() {
        let available = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let targets = FullBackupStrategy::select_targets(&[], &["b".to_string()], &available);
        assert_eq!(targets, vec!["a".to_string(), "c".to_string()]);

        let targets = FullBackupStrategy::select_targets(
            &["a".to_string(), "missing".to_string()],
            &[],
            &available,
        );
        assert_eq!(targets, vec!["a".to_string()]);
    }
}
