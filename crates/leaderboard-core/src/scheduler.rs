//! Reset scheduler.
//!
//! Once per interval every enabled configuration is checked for a crossed
//! reset boundary. The boundary is measured from `last_reset_at` (or the
//! creation time when never reset) in the service's fixed time zone, and
//! claimed with a compare-and-set so that several service instances reset
//! a leaderboard at most once per boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertCategory, AlertLog, AlertSeverity};
use crate::engine::Leaderboard;
use crate::error::LeaderboardError;

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Enabled configurations inspected.
    pub inspected: usize,
    /// Leaderboards this pass reset.
    pub reset: usize,
    /// Resets that failed.
    pub failed: usize,
}

/// Periodic reset driver.
pub struct ResetScheduler {
    engine: Arc<Leaderboard>,
    alerts: AlertLog,
    time_zone: FixedOffset,
    interval: Duration,
}

impl ResetScheduler {
    /// Create a scheduler computing boundaries in `time_zone`.
    pub const fn new(
        engine: Arc<Leaderboard>,
        alerts: AlertLog,
        time_zone: FixedOffset,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            alerts,
            time_zone,
            interval,
        }
    }

    /// Run one pass at wall-clock time `now`.
    ///
    /// A failure on one leaderboard is alerted and does not stop the pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the enabled configurations cannot be listed.
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<TickReport, LeaderboardError> {
        let configs = self.engine.enabled_configs(cancel).await?;
        let mut report = TickReport {
            inspected: configs.len(),
            ..TickReport::default()
        };

        for config in configs {
            let Some(boundary) =
                config
                    .reset_schedule
                    .due_boundary(config.reset_reference(), now, self.time_zone)
            else {
                continue;
            };
            match self.engine.reset(&config, boundary, cancel).await {
                Ok(true) => report.reset = report.reset.saturating_add(1),
                Ok(false) => {}
                Err(LeaderboardError::Cancelled) => return Err(LeaderboardError::Cancelled),
                Err(e) => {
                    report.failed = report.failed.saturating_add(1);
                    self.alerts
                        .raise(
                            AlertSeverity::Warning,
                            AlertCategory::Scheduler,
                            format!("reset of {} at {boundary} failed: {e}", config.key()),
                        )
                        .await;
                }
            }
        }

        if report.reset > 0 || report.failed > 0 {
            tracing::info!(
                inspected = report.inspected,
                reset = report.reset,
                failed = report.failed,
                "Reset scheduler pass complete"
            );
        }
        Ok(report)
    }

    /// Run [`ResetScheduler::tick`] every interval until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                utc_offset_secs = self.time_zone.local_minus_utc(),
                "Reset scheduler started"
            );
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(Utc::now(), &cancel).await {
                            tracing::warn!(error = %e, "Reset scheduler pass failed");
                        }
                    }
                }
            }
            tracing::info!("Reset scheduler stopped");
        })
    }
}
