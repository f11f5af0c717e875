//! Cross-module integration tests: a backup run feeding its own metric
//! into alert evaluation, and the encrypted vault round-tripping through
//! its on-disk envelope.

use async_trait::async_trait;
use backup_engine::adapters::DatabaseAdapter;
use backup_engine::alerts::{AlertManager, AlertRule, Condition, Operator};
use backup_engine::backup::{
    AggregationPolicy, BackupConfig, BackupEnvironment, BackupExecutor, BackupStrategy,
    FullBackupStrategy,
};
use backup_engine::config::{BackupSystemPaths, DatabaseInstance, DatabaseKind, StorageTarget, TlsSettings};
use backup_engine::context::{BackupContext, CancelToken, Status};
use backup_engine::metrics::MetricsCollector;
use backup_engine::notifications::{NotificationManager, Severity};
use backup_engine::storage::local::LocalBackend;
use backup_engine::vault::CredentialVault;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;

struct AlwaysFailsAdapter;

#[async_trait]
impl DatabaseAdapter for AlwaysFailsAdapter {
    async fn databases(&self) -> backup_engine::error::AdapterResult<Vec<String>> {
        Ok(vec!["orders".to_string()])
    }
    async fn test_connection(&self) -> backup_engine::error::AdapterResult<bool> {
        Ok(false)
    }
    async fn backup_database(
        &self,
        _name: &str,
        _out_path: &std::path::Path,
    ) -> backup_engine::error::AdapterResult<bool> {
        Ok(false)
    }
    async fn restore_database(
        &self,
        _name: &str,
        _in_path: &std::path::Path,
    ) -> backup_engine::error::AdapterResult<bool> {
        Ok(false)
    }
    fn backup_command(&self, _name: &str, _out_path: &std::path::Path) -> String {
        String::new()
    }
}

struct FailingEnv {
    storage_dir: PathBuf,
}

#[async_trait]
impl BackupEnvironment for FailingEnv {
    async fn build_adapter(&self) -> backup_engine::error::Result<Box<dyn DatabaseAdapter>> {
        Ok(Box::new(AlwaysFailsAdapter))
    }
    async fn build_storage(&self) -> backup_engine::error::Result<Box<dyn backup_engine::storage::StorageBackend>> {
        Ok(Box::new(LocalBackend::new(self.storage_dir.clone())))
    }
}

fn failing_instance() -> DatabaseInstance {
    DatabaseInstance {
        id: "mysql-prod".to_string(),
        kind: DatabaseKind::Mysql,
        host: "localhost".to_string(),
        port: 3306,
        username: "root".to_string(),
        credential_id: "db_mysql-prod".to_string(),
        include: vec![],
        exclude: vec![],
        enabled: true,
        tls: TlsSettings::default(),
    }
}

/// A failed run that records a `success=0` metric should trip an alert
/// rule watching for exactly that, and the resulting notification
/// dispatch should complete without panicking even with zero channels
/// configured.
#[tokio::test]
async fn failed_backup_trips_alert_and_dispatches_notification() {
    let storage_dir = tempdir().unwrap();
    let env = FailingEnv {
        storage_dir: storage_dir.path().to_path_buf(),
    };

    let mut ctx = BackupContext::new(
        failing_instance(),
        StorageTarget::Local {
            path: storage_dir.path().to_path_buf(),
        },
        BackupSystemPaths::default(),
        "gzip".to_string(),
    );

    let metrics = Arc::new(MetricsCollector::new());
    let alerts = Arc::new(AlertManager::new(vec![AlertRule {
        name: "backup-failed".to_string(),
        description: "any backup run that fails outright".to_string(),
        severity: Severity::Critical,
        primary: Condition {
            metric_field: "success".to_string(),
            operator: Operator::Equal,
            threshold: 0.0,
        },
        additional: vec![],
        cooldown_seconds: 0,
        enabled: true,
    }]));
    let notifications = Arc::new(NotificationManager::new(vec![]));

    let executor = BackupExecutor::new(
        BackupConfig {
            max_retries: 1,
            retry_delay: std::time::Duration::from_secs(0),
            policy: AggregationPolicy::AllOrNothing,
        },
        Arc::new(FullBackupStrategy),
        metrics.clone(),
    )
    .with_alerting(alerts.clone(), notifications);

    let cancel = CancelToken::new();
    let ok = executor.execute(&mut ctx, &env, &cancel, None).await.unwrap();

    assert!(!ok);
    assert_eq!(ctx.status, Status::Failed);
    assert_eq!(metrics.get_backup_metrics().await.len(), 1);
    assert_eq!(alerts.get_active_alerts().await.len(), 1);
}

/// A credential written through one vault handle survives a full
/// save/reload cycle through a second handle over the same file, proving
/// the on-disk envelope round-trips end to end (not just the in-memory
/// cache).
#[tokio::test]
async fn vault_survives_save_and_reload_across_handles() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.json");

    let writer = CredentialVault::new(&path);
    writer.set("db_mysql-prod", "backup_agent", "s3cr3t", "primary mysql instance").await;
    writer.save().await.unwrap();

    let reader = CredentialVault::new(&path);
    assert!(reader.load().await.unwrap());

    let credential = reader.get("db_mysql-prod").await.unwrap();
    assert_eq!(credential.username, "backup_agent");
    assert_eq!(credential.password, "s3cr3t");
    assert_eq!(reader.list().await, vec!["db_mysql-prod".to_string()]);
}
