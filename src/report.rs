//! Periodic console reporting of the metrics registry.
//!
//! The reporter owns the only recurring reads of the registry: meter
//! snapshots are logged as-is, gauges are read-and-clear so each line shows
//! the messages confirmed since the previous poll.

use crate::metrics::MetricsRegistry;
use crate::runner::CancelToken;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// Background thread that logs registry contents at a fixed interval.
pub struct ConsoleReporter {
    stop: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl ConsoleReporter {
    /// Spawn the reporter. It polls until `stop` is called.
    pub fn spawn(registry: Arc<MetricsRegistry>, interval: Duration) -> Self {
        let stop = CancelToken::new();
        let token = stop.clone();
        let handle = thread::Builder::new()
            .name("console-report".to_string())
            .spawn(move || {
                while token.sleep(interval) {
                    report_once(&registry);
                }
                // Final poll so short runs still produce output.
                report_once(&registry);
            });
        match handle {
            Ok(handle) => Self {
                stop,
                handle: Some(handle),
            },
            Err(err) => {
                error!(error = %err, "failed to spawn console reporter");
                Self { stop, handle: None }
            }
        }
    }

    /// Stop the reporter and wait for its final poll.
    pub fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn report_once(registry: &MetricsRegistry) {
    for snapshot in registry.meter_snapshots() {
        info!(
            metric = %snapshot.name,
            count = snapshot.count,
            rate_per_second = snapshot.rate_per_second,
            "meter"
        );
    }
    for (name, since_last) in registry.take_gauges() {
        info!(metric = %name, since_last_read = since_last, "gauge");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_stops_promptly() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.meter("publisher.q.r.meter").mark_n(3);

        let reporter = ConsoleReporter::spawn(Arc::clone(&registry), Duration::from_secs(60));
        reporter.stop();

        // The final poll consumed the gauge delta.
        registry.gauge("publisher.q.r.gauge").record(5);
        let reporter = ConsoleReporter::spawn(Arc::clone(&registry), Duration::from_secs(60));
        reporter.stop();
        assert_eq!(registry.gauge("publisher.q.r.gauge").take(), 0);
    }
}
