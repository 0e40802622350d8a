//! In-process counters for the bridge
//!
//! Owned by the dispatcher context rather than a global; one instance per
//! running bridge.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Keep this many handler durations for the average
const MAX_SAMPLES: usize = 1000;

/// Thread-safe counters updated by concurrent handlers
#[derive(Debug)]
pub struct BridgeMetrics {
    messages_received: AtomicU64,
    messages_ignored: AtomicU64,
    devices_updated: AtomicU64,
    tasks_solved: AtomicU64,
    task_updates_unmatched: AtomicU64,
    decode_failures: AtomicU64,
    resolve_failures: AtomicU64,
    mutate_failures: AtomicU64,
    handler_panics: AtomicU64,
    processing_times: Mutex<Vec<u64>>, // in milliseconds
    started: Instant,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            devices_updated: AtomicU64::new(0),
            tasks_solved: AtomicU64::new(0),
            task_updates_unmatched: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            resolve_failures: AtomicU64::new(0),
            mutate_failures: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn device_updated(&self) {
        self.devices_updated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task update by the number of rows it matched
    pub fn task_update_applied(&self, rows: u64) {
        if rows == 0 {
            self.task_updates_unmatched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_solved.fetch_add(rows, Ordering::Relaxed);
        }
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolve_failed(&self) {
        self.resolve_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mutate_failed(&self) {
        self.mutate_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_panicked(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_SAMPLES {
                times.remove(0);
            }
        }
    }

    fn average_processing_ms(&self) -> f64 {
        match self.processing_times.lock() {
            Ok(times) if !times.is_empty() => {
                times.iter().sum::<u64>() as f64 / times.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.started.elapsed().as_secs(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
            devices_updated: self.devices_updated.load(Ordering::Relaxed),
            tasks_solved: self.tasks_solved.load(Ordering::Relaxed),
            task_updates_unmatched: self.task_updates_unmatched.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            mutate_failures: self.mutate_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            avg_processing_ms: self.average_processing_ms(),
        }
    }
}

/// Serializable view of [`BridgeMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub messages_received: u64,
    pub messages_ignored: u64,
    pub devices_updated: u64,
    pub tasks_solved: u64,
    pub task_updates_unmatched: u64,
    pub decode_failures: u64,
    pub resolve_failures: u64,
    pub mutate_failures: u64,
    pub handler_panics: u64,
    pub avg_processing_ms: f64,
}

impl MetricsSnapshot {
    pub fn total_failures(&self) -> u64 {
        self.decode_failures + self.resolve_failures + self.mutate_failures + self.handler_panics
    }
}
