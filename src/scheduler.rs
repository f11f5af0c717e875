//! Cron-driven scheduling: file-persisted schedules, a due-set query,
//! and a sequential job executor delegating to the backup engine.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backup::{scheduled_backup_config, BackupEnvironment, BackupExecutor, FullBackupStrategy};
use crate::context::{BackupContext, CancelToken, Status};
use crate::error::{BackupError, Result};
use crate::metrics::{MetricsCollector, ScheduleMetric};

/// A persisted schedule: when to run, against which database, and with
/// which backup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub name: String,
    pub cron_expression: String,
    pub database_id: String,
    pub enabled: bool,
    pub retention_days: u32,
    pub compression: String,
    pub storage_type: String,
    pub storage_location: String,
}

impl Schedule {
    /// Construct a schedule, rejecting a malformed cron expression or a
    /// sub-one-day retention window at construction time rather than
    /// letting it surface later as a silent no-op (spec.md §3).
    pub fn new(
        name: String,
        cron_expression: String,
        database_id: String,
        enabled: bool,
        retention_days: u32,
        compression: String,
        storage_type: String,
        storage_location: String,
    ) -> Result<Self> {
        validate_cron_expression(&cron_expression)?;
        if retention_days < 1 {
            return Err(BackupError::Config(
                "schedule retention_days must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            name,
            cron_expression,
            database_id,
            enabled,
            retention_days,
            compression,
            storage_type,
            storage_location,
        })
    }
}

/// Validate a 5-field cron expression using the same grammar the
/// `cron` crate enforces, so malformed schedules are rejected at
/// construction instead of silently never firing.
fn validate_cron_expression(expr: &str) -> Result<()> {
    // `cron::Schedule` expects a leading seconds field; prepend one so
    // the minute-granularity expressions this module persists validate
    // against the same grammar without changing their on-disk shape.
    let with_seconds = format!("0 {expr}");
    cron::Schedule::from_str(&with_seconds)
        .map(|_| ())
        .map_err(|e| BackupError::Config(format!("malformed cron expression {expr:?}: {e}")))
}

/// One past invocation of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleExecution {
    pub schedule_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Evaluate one cron field term (`*`, `*/n`, `a-b`, `a-b/n`, or a bare
/// number) against `value`.
fn term_matches(term: &str, value: u32, min: u32, max: u32) -> Option<bool> {
    let (range_part, step) = match term.split_once('/') {
        Some((range, step)) => (range, step.parse::<u32>().ok()?),
        None => (term, 1),
    };
    let (lo, hi) = if range_part == "*" {
        (min, max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        (a.parse().ok()?, b.parse().ok()?)
    } else {
        let v = range_part.parse::<u32>().ok()?;
        (v, v)
    };
    if step == 0 || value < lo || value > hi {
        return Some(false);
    }
    Some((value - lo) % step == 0)
}

/// Evaluate a comma-separated cron field against `value`.
fn field_matches(field: &str, value: u32, min: u32, max: u32) -> bool {
    field
        .split(',')
        .map(|term| term_matches(term, value, min, max).unwrap_or(false))
        .any(|matched| matched)
}

/// Standard 5-field cron match (minute hour dom month dow, `0 ≡
/// Sunday`), evaluated in the process's local time zone.
pub fn cron_matches(expr: &str, at: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    let local = at.with_timezone(&Local);
    let minute = local.minute();
    let hour = local.hour();
    let dom = local.day();
    let month = local.month();
    let dow = local.weekday().num_days_from_sunday();

    field_matches(fields[0], minute, 0, 59)
        && field_matches(fields[1], hour, 0, 23)
        && field_matches(fields[2], dom, 1, 31)
        && field_matches(fields[3], month, 1, 12)
        && field_matches(fields[4], dow, 0, 6)
}

fn floor_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at - chrono::Duration::seconds(at.second() as i64) - chrono::Duration::nanoseconds(at.timestamp_subsec_nanos() as i64)
}

/// Whether `expr` fires in the minute containing `now`. Equivalent to
/// seeding a cron iterator at `now - 1 minute` and testing that its
/// next fire equals `floor(now, minute)`, since cron ticks are exactly
/// one minute apart.
pub fn is_due(expr: &str, now: DateTime<Utc>) -> bool {
    cron_matches(expr, floor_to_minute(now))
}

fn schedule_path(config_dir: &std::path::Path, name: &str) -> PathBuf {
    config_dir.join(format!("{name}.json"))
}

/// Persists schedules as one JSON file per schedule under a config
/// directory; writes are atomic (write to a temp file, then rename).
pub struct ScheduleManager {
    config_dir: PathBuf,
    schedules: RwLock<HashMap<String, Schedule>>,
    history: RwLock<HashMap<String, Vec<ScheduleExecution>>>,
}

impl ScheduleManager {
    /// Load every `*.json` schedule already present under `config_dir`.
    pub async fn load(config_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&config_dir).await?;

        let mut schedules = HashMap::new();
        let mut entries = tokio::fs::read_dir(&config_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path).await?;
            let schedule: Schedule = serde_json::from_str(&contents)?;
            schedules.insert(schedule.name.clone(), schedule);
        }

        Ok(Self {
            config_dir,
            schedules: RwLock::new(schedules),
            history: RwLock::new(HashMap::new()),
        })
    }

    async fn persist(&self, schedule: &Schedule) -> Result<()> {
        let json = serde_json::to_string_pretty(schedule)?;
        let target = schedule_path(&self.config_dir, &schedule.name);
        let tmp = target.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    pub async fn create(&self, schedule: Schedule) -> Result<()> {
        if self.schedules.read().await.contains_key(&schedule.name) {
            return Err(BackupError::Config(format!(
                "schedule {} already exists",
                schedule.name
            )));
        }
        validate_cron_expression(&schedule.cron_expression)?;
        if schedule.retention_days < 1 {
            return Err(BackupError::Config(
                "schedule retention_days must be at least 1".to_string(),
            ));
        }
        self.persist(&schedule).await?;
        self.schedules.write().await.insert(schedule.name.clone(), schedule);
        Ok(())
    }

    pub async fn update(&self, schedule: Schedule) -> Result<()> {
        if !self.schedules.read().await.contains_key(&schedule.name) {
            return Err(BackupError::Invariant(format!(
                "schedule {} does not exist",
                schedule.name
            )));
        }
        validate_cron_expression(&schedule.cron_expression)?;
        if schedule.retention_days < 1 {
            return Err(BackupError::Config(
                "schedule retention_days must be at least 1".to_string(),
            ));
        }
        self.persist(&schedule).await?;
        self.schedules.write().await.insert(schedule.name.clone(), schedule);
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = schedule_path(&self.config_dir, name);
        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_file(&path).await?;
        }
        self.schedules.write().await.remove(name);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Schedule> {
        self.schedules.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Schedule> {
        self.schedules.read().await.values().cloned().collect()
    }

    /// All enabled schedules whose cron expression fires in the minute
    /// containing `now`.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<Schedule> {
        self.schedules
            .read()
            .await
            .values()
            .filter(|s| s.enabled && is_due(&s.cron_expression, now))
            .cloned()
            .collect()
    }

    pub async fn record_execution(&self, execution: ScheduleExecution) {
        self.history
            .write()
            .await
            .entry(execution.schedule_name.clone())
            .or_default()
            .push(execution);
    }

    /// Past executions of `name`, newest-first.
    pub async fn history(&self, name: &str, limit: Option<usize>) -> Vec<ScheduleExecution> {
        let history = self.history.read().await;
        let mut entries = history.get(name).cloned().unwrap_or_default();
        entries.reverse();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }
}

/// Resolves a schedule's configuration (database instance, storage
/// target, backup system paths, compression) into a ready-to-run
/// context and environment, applying the schedule's overrides.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn build_context(&self, schedule: &Schedule) -> Result<BackupContext>;
    async fn build_environment(&self, schedule: &Schedule) -> Result<Box<dyn BackupEnvironment>>;
}

type StartCallback = Arc<dyn Fn(&Schedule) + Send + Sync>;
type SuccessCallback = Arc<dyn Fn(&Schedule, &BackupContext) + Send + Sync>;
type FailureCallback = Arc<dyn Fn(&Schedule, &BackupError) + Send + Sync>;

/// Dispatches due schedules sequentially, so two jobs against the same
/// database server never run at once (spec.md §5).
pub struct JobExecutor {
    manager: Arc<ScheduleManager>,
    provider: Arc<dyn ConfigProvider>,
    metrics: Arc<MetricsCollector>,
    on_start: Option<StartCallback>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl JobExecutor {
    pub fn new(manager: Arc<ScheduleManager>, provider: Arc<dyn ConfigProvider>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            manager,
            provider,
            metrics,
            on_start: None,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn on_start(mut self, callback: StartCallback) -> Self {
        self.on_start = Some(callback);
        self
    }

    pub fn on_success(mut self, callback: SuccessCallback) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn on_failure(mut self, callback: FailureCallback) -> Self {
        self.on_failure = Some(callback);
        self
    }

    /// Run every due schedule, one at a time.
    pub async fn execute_due(&self, now: DateTime<Utc>) {
        for schedule in self.manager.due(now).await {
            self.execute_job(&schedule).await;
        }
    }

    pub async fn execute_job(&self, schedule: &Schedule) {
        if let Some(cb) = &self.on_start {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(schedule)));
        }

        let started_at = Utc::now();
        let result = self.run_job(schedule).await;

        let (success, error_message) = match &result {
            Ok(ctx) => (matches!(ctx.status, Status::Completed), ctx.error_message.clone()),
            Err(e) => (false, Some(e.to_string())),
        };

        self.manager
            .record_execution(ScheduleExecution {
                schedule_name: schedule.name.clone(),
                started_at,
                completed_at: Some(Utc::now()),
                success,
                error_message,
            })
            .await;

        self.metrics
            .record_schedule(ScheduleMetric {
                schedule_name: schedule.name.clone(),
                success,
                timestamp: Utc::now(),
            })
            .await;

        match result {
            Ok(ctx) => {
                if let Some(cb) = &self.on_success {
                    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(schedule, &ctx)));
                }
            }
            Err(e) => {
                if let Some(cb) = &self.on_failure {
                    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(schedule, &e)));
                }
            }
        }
    }

    async fn run_job(&self, schedule: &Schedule) -> Result<BackupContext> {
        let mut ctx = self.provider.build_context(schedule).await?;
        let env = self.provider.build_environment(schedule).await?;
        let executor = BackupExecutor::new(
            scheduled_backup_config(),
            Arc::new(FullBackupStrategy),
            self.metrics.clone(),
        );
        let cancel = CancelToken::new();
        executor.execute(&mut ctx, env.as_ref(), &cancel, None).await?;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a UTC instant whose *local* wall-clock fields are
    /// `(y, m, d, h, min)`, so assertions hold regardless of the host's
    /// time zone (cron_matches evaluates fields in local time).
    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono::NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_local_timezone(Local)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn wildcard_matches_every_minute() {
        assert!(cron_matches("* * * * *", at(2026, 7, 28, 3, 17)));
    }

    #[test]
    fn exact_minute_and_hour() {
        assert!(cron_matches("30 2 * * *", at(2026, 7, 28, 2, 30)));
        assert!(!cron_matches("30 2 * * *", at(2026, 7, 28, 2, 31)));
    }

    #[test]
    fn step_values_parse() {
        // every 15 minutes
        assert!(cron_matches("*/15 * * * *", at(2026, 7, 28, 9, 45)));
        assert!(!cron_matches("*/15 * * * *", at(2026, 7, 28, 9, 46)));
    }

    #[test]
    fn range_and_list_values_parse() {
        assert!(cron_matches("0 8-10 * * *", at(2026, 7, 28, 9, 0)));
        assert!(cron_matches("0 1,2,3 * * *", at(2026, 7, 28, 2, 0)));
        assert!(!cron_matches("0 1,2,3 * * *", at(2026, 7, 28, 4, 0)));
    }

    #[test]
    fn malformed_expression_never_matches() {
        assert!(!cron_matches("not a cron", at(2026, 7, 28, 0, 0)));
    }

    #[test]
    fn malformed_cron_rejected_at_construction() {
        let result = Schedule::new(
            "bad".to_string(),
            "not a cron".to_string(),
            "mysql-prod".to_string(),
            true,
            30,
            "gzip".to_string(),
            "local".to_string(),
            "/var/backups".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn zero_retention_days_rejected_at_construction() {
        let result = Schedule::new(
            "bad".to_string(),
            "0 2 * * *".to_string(),
            "mysql-prod".to_string(),
            true,
            0,
            "gzip".to_string(),
            "local".to_string(),
            "/var/backups".to_string(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::load(dir.path().to_path_buf()).await.unwrap();
        manager
            .create(
                Schedule::new(
                    "nightly".to_string(),
                    "0 2 * * *".to_string(),
                    "mysql-prod".to_string(),
                    true,
                    30,
                    "gzip".to_string(),
                    "local".to_string(),
                    "/var/backups".to_string(),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let reloaded = ScheduleManager::load(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reloaded.list().await.len(), 1);
        assert!(reloaded.get("nightly").await.is_some());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::load(dir.path().to_path_buf()).await.unwrap();
        let make = || {
            Schedule::new(
                "nightly".to_string(),
                "0 2 * * *".to_string(),
                "mysql-prod".to_string(),
                true,
                30,
                "gzip".to_string(),
                "local".to_string(),
                "/var/backups".to_string(),
            )
            .unwrap()
        };
        manager.create(make()).await.unwrap();

        let result = manager
            .create(Schedule::new(
                "nightly".to_string(),
                "0 3 * * *".to_string(),
                "postgres-prod".to_string(),
                true,
                7,
                "bzip2".to_string(),
                "local".to_string(),
                "/var/backups".to_string(),
            )
            .unwrap())
            .await;

        assert!(result.is_err());
        // the original schedule must survive the rejected duplicate untouched
        let schedule = manager.get("nightly").await.unwrap();
        assert_eq!(schedule.cron_expression, "0 2 * * *");
        assert_eq!(manager.list().await.len(), 1);
    }

    #[tokio::test]
    async fn due_filters_by_cron_and_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::load(dir.path().to_path_buf()).await.unwrap();
        manager
            .create(
                Schedule::new(
                    "nightly".to_string(),
                    "30 2 * * *".to_string(),
                    "mysql-prod".to_string(),
                    true,
                    30,
                    "gzip".to_string(),
                    "local".to_string(),
                    "/var/backups".to_string(),
                )
                .unwrap(),
            )
            .await
            .unwrap();
        manager
            .create(
                Schedule::new(
                    "disabled".to_string(),
                    "30 2 * * *".to_string(),
                    "mysql-prod".to_string(),
                    false,
                    30,
                    "gzip".to_string(),
                    "local".to_string(),
                    "/var/backups".to_string(),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let now = at(2026, 7, 28, 2, 30).with_timezone(&Local).with_timezone(&Utc);
        let due = manager.due(now).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "nightly");
    }

    #[tokio::test]
    async fn history_returns_newest_first_and_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ScheduleManager::load(dir.path().to_path_buf()).await.unwrap();
        for i in 0..3 {
            manager
                .record_execution(ScheduleExecution {
                    schedule_name: "nightly".to_string(),
                    started_at: Utc::now() + chrono::Duration::seconds(i),
                    completed_at: None,
                    success: true,
                    error_message: None,
                })
                .await;
        }
        let history = manager.history("nightly", Some(2)).await;
        assert_eq!(history.len(), 2);
        assert!(history[0].started_at > history[1].started_at);
    }
}
