//! Thread-per-worker orchestration of a test plan.
//!
//! The runner fans a plan out into publisher workers, spawns one named OS
//! thread per worker, starts the console reporter, joins everything, and
//! derives the final per-worker verdict (confirmed sends versus configured
//! message count). Workers are fully independent; a failing worker never
//! affects its siblings, so the runner reports partial completions instead
//! of aborting the run.

use crate::config::{PublisherConfig, TestPlan, WorkloadConfig};
use crate::metrics::MetricsRegistry;
use crate::publisher::PublisherWorker;
use crate::report::ConsoleReporter;
use crate::transport::{LoopbackTransport, Transport};
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Cooperative shutdown signal shared by a run's workers.
///
/// Workers observe it at loop-iteration boundaries and during delay pauses;
/// it never preempts a blocking transport call.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early on cancellation. Returns `false`
    /// if the token was cancelled before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(SLICE);
            thread::sleep(step);
            remaining -= step;
        }
        !self.is_cancelled()
    }
}

/// Final accounting for one worker.
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub id: String,
    pub queue_name: String,
    pub configured: u64,
    pub sent: u64,
}

impl WorkerSummary {
    pub fn is_complete(&self) -> bool {
        self.sent == self.configured
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub workers: Vec<WorkerSummary>,
}

impl RunSummary {
    /// True when every worker confirmed its full configured count.
    pub fn all_complete(&self) -> bool {
        self.workers.iter().all(WorkerSummary::is_complete)
    }

    pub fn total_sent(&self) -> u64 {
        self.workers.iter().map(|w| w.sent).sum()
    }
}

/// Run a plan over the in-process loopback transport.
///
/// This is the broker-less mode used to exercise a plan end to end; wiring
/// in a real protocol binding means calling [`run_plan_with`] with a
/// factory that opens broker sessions instead.
pub fn run_plan(plan: &TestPlan, cancel: CancelToken) -> anyhow::Result<RunSummary> {
    run_plan_with(plan, cancel, |workload| {
        Box::new(LoopbackTransport::new(workload.clone()))
    })
}

/// Run a plan, opening one transport per publisher worker via `open`.
pub fn run_plan_with<F>(
    plan: &TestPlan,
    cancel: CancelToken,
    open: F,
) -> anyhow::Result<RunSummary>
where
    F: Fn(&WorkloadConfig) -> Box<dyn Transport>,
{
    let registry = Arc::new(MetricsRegistry::new());

    let subscriber_count = plan.subscribers().count();
    if subscriber_count > 0 {
        warn!(
            count = subscriber_count,
            "plan declares subscriber workloads; consumption requires an external protocol binding and is not run here"
        );
    }

    let reporter = plan
        .reporting
        .console_enabled
        .then(|| ConsoleReporter::spawn(Arc::clone(&registry), plan.reporting.console_interval));

    let mut joins = Vec::new();
    for publisher in plan.publishers() {
        joins.push(spawn_publisher(publisher, registry.as_ref(), &cancel, &open)?);
    }
    info!(workers = joins.len(), "all publisher workers started");

    let mut summary = RunSummary::default();
    for (workload, handle) in joins {
        let sent = match handle.join() {
            Ok(sent) => sent,
            Err(_) => {
                warn!(publisher = %workload.id, "worker thread panicked");
                0
            }
        };
        summary.workers.push(WorkerSummary {
            id: workload.id,
            queue_name: workload.queue_name,
            configured: workload.message_count,
            sent,
        });
    }

    if let Some(reporter) = reporter {
        reporter.stop();
    }

    for worker in &summary.workers {
        info!(
            publisher = %worker.id,
            queue = %worker.queue_name,
            sent = worker.sent,
            configured = worker.configured,
            complete = worker.is_complete(),
            "worker finished"
        );
    }
    Ok(summary)
}

fn spawn_publisher<F>(
    publisher: &PublisherConfig,
    registry: &MetricsRegistry,
    cancel: &CancelToken,
    open: &F,
) -> anyhow::Result<(WorkloadConfig, thread::JoinHandle<u64>)>
where
    F: Fn(&WorkloadConfig) -> Box<dyn Transport>,
{
    let workload = publisher.workload.clone();
    let transport = open(&workload);
    let worker = PublisherWorker::new(transport, registry, cancel.clone());
    let handle = thread::Builder::new()
        .name(workload.id.clone())
        .spawn(move || worker.run())
        .with_context(|| format!("failed to spawn worker thread for '{}'", workload.id))?;
    Ok((workload, handle))
}
