use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status::MessageOutcome;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub visible: u64,
    pub in_flight: u64,
    pub delayed: u64,
    pub dead_letters: u64,
}

impl QueueStats {
    pub fn depth(&self) -> u64 {
        self.visible + self.in_flight + self.delayed
    }
}

/// Outcome counts for a single receive cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub failed: usize,
    pub exhausted: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Delivered => self.delivered += 1,
            MessageOutcome::Rejected => self.rejected += 1,
            MessageOutcome::Failed => self.failed += 1,
            MessageOutcome::Exhausted => self.exhausted += 1,
        }
    }
}

/// Running counters of one worker process. Shared with the API server.
#[derive(Debug, Default)]
pub struct WorkerStats {
    polls: AtomicU64,
    poll_errors: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    exhausted: AtomicU64,
    // unix millis, 0 until the first poll
    last_poll_ms: AtomicI64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll(&self, at: DateTime<Utc>) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.last_poll_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, report: &BatchReport) {
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.rejected
            .fetch_add(report.rejected as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        self.exhausted
            .fetch_add(report.exhausted as u64, Ordering::Relaxed);
    }

    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        match self.last_poll_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn snapshot(&self, worker_id: &str) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            worker_id: worker_id.to_string(),
            polls: self.polls.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            last_poll_at: self.last_poll_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub worker_id: String,
    pub polls: u64,
    pub poll_errors: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub failed: u64,
    pub exhausted: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
}
