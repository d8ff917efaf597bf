//! Per-worker throughput counters and the process-wide registry that
//! external reporters poll.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Build the registry key for one worker's counter:
/// `<role>.<queue>.<worker id>.<kind>`.
pub fn metric_name(role: &str, queue_name: &str, worker_id: &str, kind: &str) -> String {
    format!("{role}.{queue_name}.{worker_id}.{kind}")
}

/// Monotonically increasing throughput counter.
///
/// Cheap to clone; clones share the underlying counter.
#[derive(Clone)]
pub struct Meter {
    count: Arc<AtomicU64>,
    started: Instant,
}

impl Meter {
    fn new() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    pub fn mark(&self) {
        self.mark_n(1);
    }

    pub fn mark_n(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean rate since the meter was registered.
    pub fn rate_per_second(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.count() as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// "Messages confirmed since last read" gauge with read-and-clear semantics.
///
/// `take` atomically claims the accumulated delta, so of two racing readers
/// exactly one observes it; the registry is polled by a single reporter, so
/// in practice reads never race.
#[derive(Clone)]
pub struct ResettingGauge {
    value: Arc<AtomicU64>,
}

impl ResettingGauge {
    fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Return the value accumulated since the previous read and reset it.
    pub fn take(&self) -> u64 {
        self.value.swap(0, Ordering::Relaxed)
    }
}

/// Point-in-time view of one meter, for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub count: u64,
    pub rate_per_second: f64,
}

/// Registry of named counters, shared by all workers in a run.
///
/// Registration is keyed by unique names and append-only; after a worker
/// has its `Meter`/`ResettingGauge` clones, updates touch only the shared
/// atomics, never the registry lock.
#[derive(Default)]
pub struct MetricsRegistry {
    meters: Mutex<BTreeMap<String, Meter>>,
    gauges: Mutex<BTreeMap<String, ResettingGauge>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or register the meter with the given name.
    pub fn meter(&self, name: &str) -> Meter {
        let mut meters = self.meters.lock().expect("meter registry poisoned");
        meters.entry(name.to_string()).or_insert_with(Meter::new).clone()
    }

    /// Look up or register the read-and-clear gauge with the given name.
    pub fn gauge(&self, name: &str) -> ResettingGauge {
        let mut gauges = self.gauges.lock().expect("gauge registry poisoned");
        gauges
            .entry(name.to_string())
            .or_insert_with(ResettingGauge::new)
            .clone()
    }

    /// Snapshot all meters, sorted by name.
    pub fn meter_snapshots(&self) -> Vec<MetricSnapshot> {
        let meters = self.meters.lock().expect("meter registry poisoned");
        meters
            .iter()
            .map(|(name, meter)| MetricSnapshot {
                name: name.clone(),
                count: meter.count(),
                rate_per_second: meter.rate_per_second(),
            })
            .collect()
    }

    /// Read and clear every gauge, sorted by name.
    pub fn take_gauges(&self) -> Vec<(String, u64)> {
        let gauges = self.gauges.lock().expect("gauge registry poisoned");
        gauges
            .iter()
            .map(|(name, gauge)| (name.clone(), gauge.take()))
            .collect()
    }
}
