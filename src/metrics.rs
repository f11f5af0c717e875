//! In-process metrics collection and a Prometheus text-exposition
//! renderer. The HTTP endpoint serving this text is the embedder's job
//! (spec.md scopes only the format, not the transport); this module
//! accumulates per-event records for the query API *and* feeds a
//! `prometheus::Registry` so `render_prometheus` is a thin wrapper
//! around the crate's own `TextEncoder`, not a hand-rolled formatter.

use chrono::{DateTime, Utc};
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One completed backup attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetric {
    pub instance: String,
    pub database: String,
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// One completed restore attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreMetric {
    pub instance: String,
    pub database: String,
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// One scheduler tick's worth of dispatch outcome for a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleMetric {
    pub schedule_name: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// A storage backend capacity sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetric {
    pub backend: String,
    pub total_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Discriminant used by [`MetricsCollector::get_by_type`] and to tag
/// records returned from [`MetricsCollector::in_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Backup,
    Restore,
    Schedule,
    Storage,
}

/// Any one metric record, tagged by kind, as returned by the
/// cross-collection queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MetricRecord {
    Backup(BackupMetric),
    Restore(RestoreMetric),
    Schedule(ScheduleMetric),
    Storage(StorageMetric),
}

impl MetricRecord {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Backup(_) => MetricKind::Backup,
            Self::Restore(_) => MetricKind::Restore,
            Self::Schedule(_) => MetricKind::Schedule,
            Self::Storage(_) => MetricKind::Storage,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Backup(m) => m.timestamp,
            Self::Restore(m) => m.timestamp,
            Self::Schedule(m) => m.timestamp,
            Self::Storage(m) => m.timestamp,
        }
    }

    /// The metric_field this record exposes under `field`, used by the
    /// alert engine's condition evaluation.
    pub fn field(&self, field: &str) -> Option<f64> {
        match (self, field) {
            (Self::Backup(m), "duration_seconds") => Some(m.duration_seconds),
            (Self::Backup(m), "size_bytes") => Some(m.size_bytes as f64),
            (Self::Backup(m), "success") => Some(if m.success { 1.0 } else { 0.0 }),
            (Self::Restore(m), "duration_seconds") => Some(m.duration_seconds),
            (Self::Restore(m), "size_bytes") => Some(m.size_bytes as f64),
            (Self::Restore(m), "success") => Some(if m.success { 1.0 } else { 0.0 }),
            (Self::Schedule(m), "success") => Some(if m.success { 1.0 } else { 0.0 }),
            (Self::Storage(m), "total_bytes") => Some(m.total_bytes as f64),
            _ => None,
        }
    }
}

/// Accumulates metric records. Appends are serialized per-collection by
/// their own `RwLock` write guard, matching the append-order guarantee
/// spec.md §5 requires ("metrics appended in the order their owning
/// context terminated"). Exposition is delegated to a `prometheus`
/// registry kept in step with the accumulated records.
pub struct MetricsCollector {
    backups: RwLock<Vec<BackupMetric>>,
    restores: RwLock<Vec<RestoreMetric>>,
    schedules: RwLock<Vec<ScheduleMetric>>,
    storage: RwLock<Vec<StorageMetric>>,

    registry: Registry,
    backup_duration: GaugeVec,
    backup_size: GaugeVec,
    backup_total: IntCounterVec,
    restore_duration: GaugeVec,
    restore_size: GaugeVec,
    restore_total: IntCounterVec,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let registry = Registry::new();

        let backup_duration = GaugeVec::new(
            Opts::new(
                "vya_backup_duration_seconds",
                "Duration of the most recent backup attempt in seconds.",
            ),
            &["instance", "database"],
        )
        .expect("static metric definition");
        let backup_size = GaugeVec::new(
            Opts::new(
                "vya_backup_size_bytes",
                "Size in bytes of the most recent backup artifact.",
            ),
            &["instance", "database"],
        )
        .expect("static metric definition");
        let backup_total = IntCounterVec::new(
            Opts::new(
                "vya_backup_total",
                "Total number of backup attempts, labeled by outcome.",
            ),
            &["instance", "database", "success"],
        )
        .expect("static metric definition");
        let restore_duration = GaugeVec::new(
            Opts::new(
                "vya_restore_duration_seconds",
                "Duration of the most recent restore attempt in seconds.",
            ),
            &["instance", "database"],
        )
        .expect("static metric definition");
        let restore_size = GaugeVec::new(
            Opts::new(
                "vya_restore_size_bytes",
                "Size in bytes of the most recent restore artifact.",
            ),
            &["instance", "database"],
        )
        .expect("static metric definition");
        let restore_total = IntCounterVec::new(
            Opts::new(
                "vya_restore_total",
                "Total number of restore attempts, labeled by outcome.",
            ),
            &["instance", "database", "success"],
        )
        .expect("static metric definition");

        for collector in [
            Box::new(backup_duration.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(backup_size.clone()),
            Box::new(backup_total.clone()),
            Box::new(restore_duration.clone()),
            Box::new(restore_size.clone()),
            Box::new(restore_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique and registered once");
        }

        Self {
            backups: RwLock::new(Vec::new()),
            restores: RwLock::new(Vec::new()),
            schedules: RwLock::new(Vec::new()),
            storage: RwLock::new(Vec::new()),
            registry,
            backup_duration,
            backup_size,
            backup_total,
            restore_duration,
            restore_size,
            restore_total,
        }
    }

    pub async fn record_backup(&self, metric: BackupMetric) {
        let success = if metric.success { "true" } else { "false" };
        self.backup_duration
            .with_label_values(&[&metric.instance, &metric.database])
            .set(metric.duration_seconds);
        self.backup_size
            .with_label_values(&[&metric.instance, &metric.database])
            .set(metric.size_bytes as f64);
        self.backup_total
            .with_label_values(&[&metric.instance, &metric.database, success])
            .inc();
        self.backups.write().await.push(metric);
    }

    pub async fn record_restore(&self, metric: RestoreMetric) {
        let success = if metric.success { "true" } else { "false" };
        self.restore_duration
            .with_label_values(&[&metric.instance, &metric.database])
            .set(metric.duration_seconds);
        self.restore_size
            .with_label_values(&[&metric.instance, &metric.database])
            .set(metric.size_bytes as f64);
        self.restore_total
            .with_label_values(&[&metric.instance, &metric.database, success])
            .inc();
        self.restores.write().await.push(metric);
    }

    pub async fn record_schedule(&self, metric: ScheduleMetric) {
        self.schedules.write().await.push(metric);
    }

    pub async fn record_storage(&self, metric: StorageMetric) {
        self.storage.write().await.push(metric);
    }

    pub async fn get_backup_metrics(&self) -> Vec<BackupMetric> {
        self.backups.read().await.clone()
    }

    pub async fn get_restore_metrics(&self) -> Vec<RestoreMetric> {
        self.restores.read().await.clone()
    }

    pub async fn get_schedule_metrics(&self) -> Vec<ScheduleMetric> {
        self.schedules.read().await.clone()
    }

    pub async fn get_storage_metrics(&self) -> Vec<StorageMetric> {
        self.storage.read().await.clone()
    }

    /// Every record of a given kind, newest-last (insertion order).
    pub async fn get_by_type(&self, kind: MetricKind) -> Vec<MetricRecord> {
        match kind {
            MetricKind::Backup => self
                .backups
                .read()
                .await
                .iter()
                .cloned()
                .map(MetricRecord::Backup)
                .collect(),
            MetricKind::Restore => self
                .restores
                .read()
                .await
                .iter()
                .cloned()
                .map(MetricRecord::Restore)
                .collect(),
            MetricKind::Schedule => self
                .schedules
                .read()
                .await
                .iter()
                .cloned()
                .map(MetricRecord::Schedule)
                .collect(),
            MetricKind::Storage => self
                .storage
                .read()
                .await
                .iter()
                .cloned()
                .map(MetricRecord::Storage)
                .collect(),
        }
    }

    /// Every record across all four collections whose timestamp falls
    /// in `[start, end]`.
    pub async fn in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<MetricRecord> {
        let mut all = Vec::new();
        for kind in [
            MetricKind::Backup,
            MetricKind::Restore,
            MetricKind::Schedule,
            MetricKind::Storage,
        ] {
            all.extend(self.get_by_type(kind).await);
        }
        all.retain(|r| r.timestamp() >= start && r.timestamp() <= end);
        all
    }

    /// Drop every accumulated record.
    pub async fn clear(&self) {
        self.backups.write().await.clear();
        self.restores.write().await.clear();
        self.schedules.write().await.clear();
        self.storage.write().await.clear();
    }

    /// Render the Prometheus text exposition format for everything
    /// accumulated so far, via the crate's own `TextEncoder` over the
    /// families kept in step by `record_backup`/`record_restore`.
    pub async fn render_prometheus(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .expect("in-memory buffer write cannot fail");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid UTF-8")
    }
}
