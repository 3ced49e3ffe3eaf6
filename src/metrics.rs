//! Per-endpoint and global request statistics.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// Recent durations kept per aggregate. Bounded so a long-lived collector
/// cannot grow without limit.
const DURATION_WINDOW: usize = 1024;

#[derive(Debug)]
struct Aggregate {
    count: u64,
    success: u64,
    failed: u64,
    durations: VecDeque<Duration>,
}

impl Aggregate {
    fn new() -> Self {
        Self {
            count: 0,
            success: 0,
            failed: 0,
            durations: VecDeque::with_capacity(16),
        }
    }

    fn record(&mut self, duration: Duration, success: bool) {
        self.count += 1;
        if success {
            self.success += 1;
        } else {
            self.failed += 1;
        }
        if self.durations.len() == DURATION_WINDOW {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }

    fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success as f64 / self.count as f64 * 100.0
        }
    }

    fn avg_ms(&self) -> f64 {
        if self.durations.is_empty() {
            return 0.0;
        }
        let total: Duration = self.durations.iter().sum();
        total.as_secs_f64() * 1000.0 / self.durations.len() as f64
    }

    fn min_ms(&self) -> f64 {
        self.durations
            .iter()
            .min()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    fn max_ms(&self) -> f64 {
        self.durations
            .iter()
            .max()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

struct Inner {
    started_at: Instant,
    global: Aggregate,
    by_endpoint: HashMap<String, Aggregate>,
}

/// Collects one record per caller-visible call (after retries resolve),
/// keyed globally and per `"METHOD path"`. Shared across clients via
/// `Arc`; interior mutability keeps the write path single-line for
/// callers.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                started_at: Instant::now(),
                global: Aggregate::new(),
                by_endpoint: HashMap::new(),
            }),
        }
    }

    pub fn record(
        &self,
        endpoint: &str,
        method: &str,
        duration: Duration,
        success: bool,
        status: Option<u16>,
    ) {
        trace!(endpoint, method, ?duration, success, status, "recording request");
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.global.record(duration, success);
        inner
            .by_endpoint
            .entry(format!("{method} {endpoint}"))
            .or_insert_with(Aggregate::new)
            .record(duration, success);
    }

    /// Snapshot of all aggregates.
    pub fn statistics(&self) -> Statistics {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        Statistics {
            uptime_secs: inner.started_at.elapsed().as_secs_f64(),
            requests: RequestTotals {
                total: inner.global.count,
                success: inner.global.success,
                failed: inner.global.failed,
                success_rate: inner.global.success_rate(),
            },
            response_time: ResponseTimes {
                average_ms: inner.global.avg_ms(),
                min_ms: inner.global.min_ms(),
                max_ms: inner.global.max_ms(),
            },
            endpoints: inner
                .by_endpoint
                .iter()
                .map(|(key, agg)| {
                    (
                        key.clone(),
                        EndpointStats {
                            count: agg.count,
                            success: agg.success,
                            failed: agg.failed,
                            success_rate: agg.success_rate(),
                            avg_response_time_ms: agg.avg_ms(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Zero every counter and restart the uptime clock.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.started_at = Instant::now();
        inner.global = Aggregate::new();
        inner.by_endpoint.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub uptime_secs: f64,
    pub requests: RequestTotals,
    pub response_time: ResponseTimes,
    pub endpoints: HashMap<String, EndpointStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestTotals {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseTimes {
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub count: u64,
    pub success: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
}
