use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    clients::{queue::QueueClient, redis::HeartbeatStore},
    models::{
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
        stats::WorkerStats,
    },
};

pub struct HealthChecker {
    queue: Arc<dyn QueueClient>,
    heartbeats: Option<HeartbeatStore>,
    stats: Arc<WorkerStats>,
    stale_after: Duration,
}

impl HealthChecker {
    /// `stale_after` is how long the worker may go without completing a poll
    /// before it is reported unhealthy.
    pub fn new(
        queue: Arc<dyn QueueClient>,
        heartbeats: Option<HeartbeatStore>,
        stats: Arc<WorkerStats>,
        stale_after: Duration,
    ) -> Self {
        Self {
            queue,
            heartbeats,
            stats,
            stale_after,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("notification_queue".to_string(), self.check_queue().await);
        checks.insert("worker".to_string(), self.check_worker());

        if let Some(heartbeats) = &self.heartbeats {
            checks.insert(
                "cache_service".to_string(),
                Self::check_redis(heartbeats).await,
            );
        }

        let status = self.determine_overall_status(&checks);

        HealthCheckResponse {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_queue(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.queue.stats().await {
            Ok(stats) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(
                    response_time_ms = elapsed,
                    depth = stats.depth(),
                    "Queue health check passed"
                );

                if stats.dead_letters > 0 {
                    ServiceHealth::degraded(format!(
                        "{} notifications in the dead-letter queue",
                        stats.dead_letters
                    ))
                } else {
                    ServiceHealth::healthy(elapsed)
                }
            }
            Err(e) => {
                warn!(error = %e, "Queue health check failed");
                ServiceHealth::unhealthy(format!("Queue unreachable: {}", e))
            }
        }
    }

    fn check_worker(&self) -> ServiceHealth {
        let last_poll = self.stats.last_poll_at();

        let health = match last_poll {
            None => ServiceHealth::degraded("Worker has not completed a poll yet".to_string()),
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                let stale_after = chrono::Duration::from_std(self.stale_after)
                    .unwrap_or(chrono::Duration::MAX);

                if age > stale_after {
                    ServiceHealth::unhealthy(format!(
                        "Last poll was {} seconds ago",
                        age.num_seconds()
                    ))
                } else {
                    ServiceHealth::healthy(age.num_milliseconds().max(0) as u64)
                }
            }
        };

        health.with_last_poll(last_poll)
    }

    async fn check_redis(heartbeats: &HeartbeatStore) -> ServiceHealth {
        let start = Instant::now();

        match heartbeats.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Redis health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Redis ping failed");
                // Heartbeats are informational, delivery does not depend on them.
                ServiceHealth::degraded(format!("Ping failed: {}", e))
            }
        }
    }

    fn determine_overall_status(&self, checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let has_unhealthy = checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy);

        let has_degraded = checks
            .values()
            .any(|health| health.status == HealthStatus::Degraded);

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
