//! Operator alert log.
//!
//! Failures that end users never see (parked durable writes, a reset the
//! scheduler could not apply) are logged at `error` level and recorded
//! here so the admin console can list and acknowledge them.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Maximum alerts kept in memory; older ones are dropped.
pub const MAX_ALERTS: usize = 500;

/// Severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Notable, no action required.
    Info,
    /// Degraded but self-healing.
    Warning,
    /// Data will diverge until an operator acts.
    Critical,
}

/// What raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    /// A durable write exhausted its retries and was parked.
    DeadLetter,
    /// A durable write could not be persisted to the queue table.
    WriteQueue,
    /// The reset scheduler failed to reset a leaderboard.
    Scheduler,
}

/// A single operator alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Unique alert identifier.
    pub id: Uuid,
    /// Severity of the alert.
    pub severity: AlertSeverity,
    /// Alert category.
    pub category: AlertCategory,
    /// Human-readable message.
    pub message: String,
    /// Whether an operator has acknowledged this alert.
    pub acknowledged: bool,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
}

/// Shared, bounded alert log. Cloning yields another handle to the same log.
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    alerts: Arc<RwLock<VecDeque<Alert>>>,
}

impl AlertLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an alert and emit it as an `error` event.
    pub async fn raise(
        &self,
        severity: AlertSeverity,
        category: AlertCategory,
        message: impl Into<String>,
    ) -> Uuid {
        let alert = Alert {
            id: Uuid::now_v7(),
            severity,
            category,
            message: message.into(),
            acknowledged: false,
            created_at: Utc::now(),
        };
        let id = alert.id;
        tracing::error!(
            alert_id = %id,
            severity = ?severity,
            category = ?category,
            message = %alert.message,
            "Operator alert"
        );

        let mut alerts = self.alerts.write().await;
        alerts.push_front(alert);
        alerts.truncate(MAX_ALERTS);
        id
    }

    /// Up to `limit` alerts, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Alert> {
        self.alerts.read().await.iter().take(limit).cloned().collect()
    }

    /// Number of alerts not yet acknowledged.
    pub async fn unacknowledged(&self) -> usize {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| !a.acknowledged)
            .count()
    }

    /// Mark an alert acknowledged. Returns `false` if no alert has this id.
    pub async fn acknowledge(&self, id: Uuid) -> bool {
        let mut alerts = self.alerts.write().await;
        if let Some(alert) = alerts.iter_mut().find(|a| a.id == id) {
            alert.acknowledged = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newest_first_and_bounded() {
        let log = AlertLog::new();
        for i in 0..(MAX_ALERTS + 5) {
            log.raise(AlertSeverity::Warning, AlertCategory::WriteQueue, format!("alert {i}"))
                .await;
        }
        let all = log.recent(usize::MAX).await;
        assert_eq!(all.len(), MAX_ALERTS);
        assert_eq!(all[0].message, format!("alert {}", MAX_ALERTS + 4));
        assert_eq!(log.recent(3).await.len(), 3);
    }

    #[tokio::test]
    async fn acknowledge_marks_only_that_alert() {
        let log = AlertLog::new();
        let first = log
            .raise(AlertSeverity::Critical, AlertCategory::DeadLetter, "parked")
            .await;
        log.raise(AlertSeverity::Critical, AlertCategory::Scheduler, "reset failed")
            .await;

        assert!(log.acknowledge(first).await);
        assert!(!log.acknowledge(Uuid::now_v7()).await);
        assert_eq!(log.unacknowledged().await, 1);
    }

    #[test]
    fn serializes_with_lowercase_tags() {
        let json = serde_json::to_value(AlertCategory::DeadLetter).unwrap();
        assert_eq!(json, "dead_letter");
        let json = serde_json::to_value(AlertSeverity::Critical).unwrap();
        assert_eq!(json, "critical");
    }
}
