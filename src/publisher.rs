//! Publisher workers: the per-worker publish state machine.
//!
//! Every worker runs `Idle → Running → Draining → Closed` on its own OS
//! thread. Simple mode sends straight through the transport and fails fast
//! on the first error. Transactional mode pipelines message construction
//! against transport I/O through an event sequencer: the worker thread
//! builds and enqueues messages, a dispatch thread it owns drains them,
//! drives send/commit on the transport, and performs batch recovery after
//! failures.
//!
//! Counters only move for confirmed work: one mark per simple-mode send,
//! one mark per message in a durably committed batch. Messages resent
//! during recovery are never double-counted.

use crate::config::{WorkloadConfig, RESEND_WAIT_INTERVAL};
use crate::message::Message;
use crate::metrics::{metric_name, Meter, MetricsRegistry, ResettingGauge};
use crate::runner::CancelToken;
use crate::sequencer::{self, EventConsumer, PublishEvent, DEFAULT_CAPACITY};
use crate::transport::{Transport, TransportError};
use std::thread;
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// Retry behavior for transactional batch recovery.
///
/// `max_attempts: None` retries forever, the harness's historical default;
/// setting `max_recovery_attempts` on a workload bounds it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub wait_between: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            wait_between: RESEND_WAIT_INTERVAL,
        }
    }
}

impl RetryPolicy {
    fn for_workload(workload: &WorkloadConfig) -> Self {
        Self {
            max_attempts: workload.max_recovery_attempts,
            ..Self::default()
        }
    }
}

/// Messages sent but not yet committed for one worker.
///
/// A batch either fully commits or is retried as a whole; it is cleared
/// only after a successful commit.
pub struct TransactionBatch {
    messages: Vec<Message>,
    capacity: usize,
}

impl TransactionBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message and hand back a slot reference for the send call.
    pub fn push(&mut self, message: Message) -> &mut Message {
        self.messages.push(message);
        self.messages.last_mut().unwrap()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.messages.iter_mut()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Running,
    Draining,
    Closed,
}

/// One publisher worker, bound to one transport session and one pair of
/// counters in the shared registry.
pub struct PublisherWorker {
    transport: Box<dyn Transport>,
    meter: Meter,
    confirmed: ResettingGauge,
    cancel: CancelToken,
    retry: RetryPolicy,
    sequencer_capacity: usize,
    state: WorkerState,
}

impl PublisherWorker {
    pub fn new(
        transport: Box<dyn Transport>,
        registry: &MetricsRegistry,
        cancel: CancelToken,
    ) -> Self {
        let workload = transport.workload();
        let meter = registry.meter(&metric_name(
            "publisher",
            &workload.queue_name,
            &workload.id,
            "meter",
        ));
        let confirmed = registry.gauge(&metric_name(
            "publisher",
            &workload.queue_name,
            &workload.id,
            "gauge",
        ));
        let retry = RetryPolicy::for_workload(workload);
        Self {
            transport,
            meter,
            confirmed,
            cancel,
            retry,
            sequencer_capacity: DEFAULT_CAPACITY,
            state: WorkerState::Idle,
        }
    }

    /// Run the worker to completion and return the confirmed send count.
    ///
    /// Failures terminate the worker early and are logged, never surfaced;
    /// sibling workers are unaffected.
    pub fn run(mut self) -> u64 {
        self.state = WorkerState::Running;
        if self.transport.workload().transactional {
            self.transactional_publish()
        } else {
            self.simple_publish()
        }
    }

    fn simple_publish(mut self) -> u64 {
        let workload = self.transport.workload().clone();
        info!(
            publisher = %workload.id,
            queue = %workload.queue_name,
            count = workload.message_count,
            "starting publisher"
        );

        let mut sent = 0u64;
        let mut cancelled = false;
        for i in 1..=workload.message_count {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut message = self
                .transport
                .create_message(&format!("{i} Publisher: {}", workload.id));
            message.set_message_id(i.to_string());

            if let Err(error) = self.transport.send(&mut message) {
                error!(
                    publisher = %workload.id,
                    message_id = %message.message_id(),
                    %error,
                    "send failed, stopping publisher"
                );
                break;
            }
            trace!(publisher = %workload.id, %message, "message published");

            sent += 1;
            self.confirmed.record(1);
            self.meter.mark();

            if let Some(delay) = workload.delay_between_messages {
                if !self.cancel.sleep(delay) {
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            // On the cancellation path the session stays open; orderly
            // shutdown belongs to the worker's owner.
            info!(publisher = %workload.id, sent, "publisher cancelled");
        } else {
            self.state = WorkerState::Draining;
            self.close_transport(&workload.id);
        }
        sent
    }

    fn transactional_publish(mut self) -> u64 {
        let workload = self.transport.workload().clone();
        info!(
            publisher = %workload.id,
            queue = %workload.queue_name,
            count = workload.message_count,
            batch_size = workload.transaction_batch_size,
            "starting transactional publisher"
        );

        let (mut producer, consumer) = sequencer::bounded(self.sequencer_capacity);
        let dispatcher = BatchDispatcher {
            transport: self.transport,
            batch: TransactionBatch::new(workload.transaction_batch_size),
            meter: self.meter.clone(),
            confirmed: self.confirmed.clone(),
            retry: self.retry.clone(),
        };
        let handle = match thread::Builder::new()
            .name(format!("{}-dispatch", workload.id))
            .spawn(move || dispatcher.run(consumer))
        {
            Ok(handle) => handle,
            Err(error) => {
                error!(publisher = %workload.id, %error, "failed to spawn dispatch thread");
                return 0;
            }
        };

        for i in 1..=workload.message_count {
            if self.cancel.is_cancelled() {
                info!(publisher = %workload.id, "cancellation requested, draining");
                break;
            }

            let mut message = Message::new(format!("{i} Publisher: {}", workload.id));
            message.set_message_id(i.to_string());
            if producer.publish(message).is_err() {
                error!(publisher = %workload.id, "dispatch side gone, stopping");
                break;
            }

            if let Some(delay) = workload.delay_between_messages {
                // A cancel during the pause is recorded and honored at the
                // next iteration boundary; the in-flight batch still runs
                // its normal commit path.
                self.cancel.sleep(delay);
            }
        }

        self.state = WorkerState::Draining;
        let _ = producer.close();

        match handle.join() {
            Ok(sent) => {
                self.state = WorkerState::Closed;
                sent
            }
            Err(_) => {
                error!(publisher = %workload.id, "dispatch thread panicked");
                0
            }
        }
    }

    fn close_transport(&mut self, id: &str) {
        debug_assert!(
            self.state != WorkerState::Closed,
            "transport must be closed exactly once"
        );
        if let Err(error) = self.transport.close() {
            error!(publisher = %id, %error, "failed to close transport");
        }
        self.state = WorkerState::Closed;
        info!(publisher = %id, "stopped publisher");
    }
}

/// Consuming half of a transactional worker: drains the sequencer, drives
/// the transport, and owns the batch/commit/recovery bookkeeping.
struct BatchDispatcher {
    transport: Box<dyn Transport>,
    batch: TransactionBatch,
    meter: Meter,
    confirmed: ResettingGauge,
    retry: RetryPolicy,
}

impl BatchDispatcher {
    fn run(mut self, consumer: EventConsumer) -> u64 {
        let workload = self.transport.workload().clone();
        let mut sent_total = 0u64;
        let mut aborted = false;

        while let Some(event) = consumer.recv() {
            match event {
                PublishEvent::Publish(message) => {
                    let slot = self.batch.push(message);
                    let send_result = self.transport.send(slot);
                    match send_result {
                        Ok(()) => {
                            trace!(publisher = %workload.id, batch = self.batch.len(), "message enqueued for transaction");
                        }
                        Err(error) => {
                            warn!(
                                publisher = %workload.id,
                                %error,
                                "send failed with batch outstanding, recovering"
                            );
                            if !self.recover_and_confirm(&workload.id, &mut sent_total) {
                                aborted = true;
                                break;
                            }
                            continue;
                        }
                    }
                    if self.batch.is_full()
                        && !self.commit_and_confirm(&workload.id, &mut sent_total)
                    {
                        aborted = true;
                        break;
                    }
                }
                PublishEvent::ClosePublisher => break,
            }
        }

        // Flush the final partial batch once the sequencer has drained.
        if !aborted && !self.batch.is_empty() {
            self.commit_and_confirm(&workload.id, &mut sent_total);
        }

        if let Err(error) = self.transport.close() {
            error!(publisher = %workload.id, %error, "failed to close transport");
        }
        info!(publisher = %workload.id, sent = sent_total, "stopped transactional publisher");
        sent_total
    }

    fn commit_and_confirm(&mut self, id: &str, sent_total: &mut u64) -> bool {
        match self.transport.commit() {
            Ok(()) => {
                self.confirm(sent_total);
                true
            }
            Err(error) => {
                warn!(publisher = %id, %error, "commit failed, recovering batch");
                self.recover_and_confirm(id, sent_total)
            }
        }
    }

    /// Rollback, resend the whole batch in order, and re-commit until a
    /// commit fully succeeds or the attempt bound is hit. Counters move
    /// only on success.
    fn recover_and_confirm(&mut self, id: &str, sent_total: &mut u64) -> bool {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_recover_once() {
                Ok(()) => {
                    info!(publisher = %id, attempt, batch = self.batch.len(), "batch recovered");
                    self.confirm(sent_total);
                    return true;
                }
                Err(error) => {
                    warn!(publisher = %id, attempt, %error, "recovery attempt failed");
                    if let Some(max) = self.retry.max_attempts {
                        if attempt >= max {
                            error!(
                                publisher = %id,
                                attempts = attempt,
                                "recovery attempts exhausted, stopping publisher"
                            );
                            return false;
                        }
                    }
                    thread::sleep(self.retry.wait_between);
                }
            }
        }
    }

    fn try_recover_once(&mut self) -> Result<(), TransportError> {
        self.transport.rollback()?;
        for message in self.batch.iter_mut() {
            self.transport.send(message)?;
        }
        self.transport.commit()
    }

    fn confirm(&mut self, sent_total: &mut u64) {
        let n = self.batch.len() as u64;
        *sent_total += n;
        self.confirmed.record(n);
        self.meter.mark_n(n);
        self.batch.clear();
    }
}
