//! Backup retention: filename-regex-based age sweeps plus an optional
//! bucketed hourly/daily/weekly/monthly policy.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::storage::{ListFilter, StorageBackend};

/// Matches the artifact naming convention: `<YYYYMMDD>_<HHMMSS>_<kind>_<database>.<ext>`.
fn artifact_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(\d{8})_(\d{6})_(mysql|postgresql|files)_(.+?)\.(sql|gz|zip|tar\.gz)$").unwrap()
    })
}

/// A parsed artifact filename. Files that don't match are not backup
/// artifacts and pass through the sweep untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub database: String,
    pub extension: String,
}

/// Parse `name` against the artifact naming convention. Returns `None`
/// on any mismatch — non-backup files are silently ignored, not errors.
pub fn parse_artifact_name(name: &str) -> Option<ParsedArtifact> {
    let captures = artifact_name_regex().captures(name)?;
    let date = &captures[1];
    let time = &captures[2];
    let naive = NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%Y%m%d%H%M%S").ok()?;
    Some(ParsedArtifact {
        timestamp: DateTime::from_naive_utc_and_offset(naive, Utc),
        kind: captures[3].to_string(),
        database: captures[4].to_string(),
        extension: captures[5].to_string(),
    })
}

/// The richer `<n>h,<n>d,<n>w,<n>m` bucketed policy: an artifact is
/// kept if its age falls within any active bucket's window.
#[derive(Debug, Clone, Default)]
pub struct BucketedPolicy {
    buckets: Vec<(u32, chrono::Duration)>,
}

impl BucketedPolicy {
    /// Parse a comma-separated list of `<n><unit>` terms, where unit is
    /// one of `h` (hour), `d` (day), `w` (week), `m` (30-day month).
    pub fn parse(spec: &str) -> Option<Self> {
        let mut buckets = Vec::new();
        for term in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (count_str, unit) = term.split_at(term.len().checked_sub(1)?);
            let count: u32 = count_str.parse().ok()?;
            let unit_duration = match unit {
                "h" => chrono::Duration::hours(1),
                "d" => chrono::Duration::days(1),
                "w" => chrono::Duration::weeks(1),
                "m" => chrono::Duration::days(30),
                _ => return None,
            };
            buckets.push((count, unit_duration));
        }
        if buckets.is_empty() {
            None
        } else {
            Some(Self { buckets })
        }
    }

    /// True iff `age` falls within any active bucket window (`count *
    /// unit`).
    pub fn should_keep(&self, age: chrono::Duration) -> bool {
        self.buckets
            .iter()
            .any(|(count, unit)| age < *unit * (*count as i32))
    }
}

/// Per-file outcome of a dry or live sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionError {
    pub name: String,
    pub message: String,
}

/// Result of a [`RetentionEngine::cleanup`] call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionStats {
    pub total: u64,
    pub kept: u64,
    pub deleted: u64,
    pub freed_bytes: u64,
    pub errors: Vec<RetentionError>,
}

/// Optional filters narrowing a sweep to one kind/database.
#[derive(Debug, Clone, Default)]
pub struct RetentionFilter {
    pub kind: Option<String>,
    pub database: Option<String>,
}

impl RetentionFilter {
    fn matches(&self, artifact: &ParsedArtifact) -> bool {
        self.kind.as_deref().map(|k| k == artifact.kind).unwrap_or(true)
            && self
                .database
                .as_deref()
                .map(|d| d == artifact.database)
                .unwrap_or(true)
    }
}

/// Age-based retention, the default policy (spec.md §4.8).
pub struct RetentionEngine {
    retention_days: u32,
    bucketed: Option<BucketedPolicy>,
}

impl RetentionEngine {
    pub fn new(retention_days: u32) -> Self {
        Self {
            retention_days,
            bucketed: None,
        }
    }

    /// Use a bucketed policy instead of the flat `retention_days` cutoff.
    pub fn with_bucketed_policy(mut self, policy: BucketedPolicy) -> Self {
        self.bucketed = Some(policy);
        self
    }

    fn is_expired(&self, artifact: &ParsedArtifact, now: DateTime<Utc>) -> bool {
        let age = now - artifact.timestamp;
        match &self.bucketed {
            Some(policy) => !policy.should_keep(age),
            None => artifact.timestamp < now - chrono::Duration::days(self.retention_days as i64),
        }
    }

    /// Sweep every object in `storage` under `filter`. In dry-run mode
    /// nothing is deleted and `freed_bytes` reports the hypothetical
    /// saving. A single file's deletion failure is recorded as an error
    /// and does not abort the sweep.
    pub async fn cleanup(
        &self,
        storage: &dyn StorageBackend,
        filter: &RetentionFilter,
        dry_run: bool,
    ) -> RetentionStats {
        let now = Utc::now();
        let mut stats = RetentionStats::default();

        let names = match storage.list(ListFilter::default()).await {
            Ok(names) => names,
            Err(e) => {
                stats.errors.push(RetentionError {
                    name: String::new(),
                    message: e.to_string(),
                });
                return stats;
            }
        };

        for name in names {
            let artifact = match parse_artifact_name(&name) {
                Some(artifact) => artifact,
                None => continue,
            };
            if !filter.matches(&artifact) {
                continue;
            }

            stats.total += 1;

            if !self.is_expired(&artifact, now) {
                stats.kept += 1;
                continue;
            }

            let size = storage.size(&name).await.unwrap_or(0);

            if dry_run {
                stats.deleted += 1;
                stats.freed_bytes += size;
                continue;
            }

            match storage.delete(&name).await {
                Ok(()) => {
                    stats.deleted += 1;
                    stats.freed_bytes += size;
                }
                Err(e) => {
                    stats.errors.push(RetentionError {
                        name,
                        message: e.to_string(),
                    });
                }
            }
        }

        stats
    }
}
