//! Threshold-based alerting over accumulated metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::metrics::MetricRecord;
use crate::notifications::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
}

impl Operator {
    fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => observed > threshold,
            Self::GreaterOrEqual => observed >= threshold,
            Self::LessThan => observed < threshold,
            Self::LessOrEqual => observed <= threshold,
            Self::Equal => (observed - threshold).abs() < f64::EPSILON,
        }
    }
}

/// One comparison against a metric record's named field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub metric_field: String,
    pub operator: Operator,
    pub threshold: f64,
}

impl Condition {
    fn evaluate(&self, record: &MetricRecord) -> bool {
        match record.field(&self.metric_field) {
            Some(observed) => self.operator.holds(observed, self.threshold),
            None => false,
        }
    }
}

/// A named rule: a primary condition plus any number of additional
/// conditions, all of which must hold for the rule to fire, subject to
/// a per-rule cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub primary: Condition,
    pub additional: Vec<Condition>,
    pub cooldown_seconds: u64,
    pub enabled: bool,
}

/// An emitted alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTrigger {
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub fired_at: DateTime<Utc>,
}

/// Evaluates rules against incoming metric records, tracking per-rule
/// last-fire times to enforce cooldowns. The last-fire map is a short
/// critical section per spec.md §5's shared-resource policy.
pub struct AlertManager {
    rules: Vec<AlertRule>,
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
    history: Mutex<Vec<AlertTrigger>>,
}

impl AlertManager {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            last_fired: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Evaluate every enabled rule against every metric record,
    /// returning the triggers fired by this call (not past ones).
    pub async fn evaluate(&self, metrics: &[MetricRecord]) -> Vec<AlertTrigger> {
        let mut fired = Vec::new();
        let now = Utc::now();

        for record in metrics {
            for rule in self.rules.iter().filter(|r| r.enabled) {
                if !rule.primary.evaluate(record) {
                    continue;
                }
                if !rule.additional.iter().all(|c| c.evaluate(record)) {
                    continue;
                }

                let mut last_fired = self.last_fired.lock().await;
                if let Some(last) = last_fired.get(&rule.name) {
                    let elapsed = (now - *last).num_seconds();
                    if elapsed >= 0 && (elapsed as u64) < rule.cooldown_seconds {
                        continue;
                    }
                }
                last_fired.insert(rule.name.clone(), now);
                drop(last_fired);

                let trigger = AlertTrigger {
                    rule_name: rule.name.clone(),
                    severity: rule.severity,
                    message: format!(
                        "{} breached threshold on field {}",
                        rule.name, rule.primary.metric_field
                    ),
                    fired_at: now,
                };
                self.history.lock().await.push(trigger.clone());
                fired.push(trigger);
            }
        }

        fired
    }

    /// Historical triggers whose rule is still within its cooldown
    /// window relative to now.
    pub async fn get_active_alerts(&self) -> Vec<AlertTrigger> {
        let now = Utc::now();
        let history = self.history.lock().await;
        history
            .iter()
            .filter(|t| {
                let cooldown = self
                    .rules
                    .iter()
                    .find(|r| r.name == t.rule_name)
                    .map(|r| r.cooldown_seconds)
                    .unwrap_or(0);
                let elapsed = (now - t.fired_at).num_seconds();
                elapsed >= 0 && (elapsed as u64) < cooldown
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RestoreMetric;

    fn duration_rule(cooldown_seconds: u64) -> AlertRule {
        AlertRule {
            name: "slow-backup".to_string(),
            description: "Backup duration exceeded the expected window".to_string(),
            severity: Severity::Warning,
            primary: Condition {
                metric_field: "duration_seconds".to_string(),
                operator: Operator::GreaterThan,
                threshold: 60.0,
            },
            additional: vec![],
            cooldown_seconds,
            enabled: true,
        }
    }

    fn record(duration_seconds: f64) -> MetricRecord {
        MetricRecord::Restore(RestoreMetric {
            instance: "pg-prod".to_string(),
            database: "billing".to_string(),
            duration_seconds,
            size_bytes: 1024,
            success: true,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn fires_once_then_respects_cooldown() {
        let manager = AlertManager::new(vec![duration_rule(300)]);

        let first = manager.evaluate(&[record(120.0)]).await;
        assert_eq!(first.len(), 1);

        let second = manager.evaluate(&[record(120.0)]).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn disabled_rule_never_fires() {
        let mut rule = duration_rule(300);
        rule.enabled = false;
        let manager = AlertManager::new(vec![rule]);
        assert!(manager.evaluate(&[record(999.0)]).await.is_empty());
    }

    #[tokio::test]
    async fn below_threshold_does_not_fire() {
        let manager = AlertManager::new(vec![duration_rule(300)]);
        assert!(manager.evaluate(&[record(10.0)]).await.is_empty());
    }

    #[tokio::test]
    async fn additional_conditions_must_all_hold() {
        let mut rule = duration_rule(300);
        rule.additional.push(Condition {
            metric_field: "size_bytes".to_string(),
            operator: Operator::GreaterThan,
            threshold: 10_000_000.0,
        });
        let manager = AlertManager::new(vec![rule]);
        // duration passes, size does not (1024 bytes) -> no trigger
        assert!(manager.evaluate(&[record(120.0)]).await.is_empty());
    }
}
