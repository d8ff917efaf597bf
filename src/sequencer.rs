//! Bounded, ordered hand-off between message construction and transport I/O.
//!
//! A sequencer pipelines one worker's message construction against its
//! transport dispatch without unbounded buffering: events travel in strict
//! FIFO order through a bounded crossbeam channel, and a full channel blocks
//! the producer rather than dropping events. Each worker owns its own
//! sequencer; the channel is the only point the two halves share.

use crate::message::Message;
use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

/// Default number of in-flight events per worker.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One entry in the hand-off channel.
#[derive(Debug)]
pub enum PublishEvent {
    /// A message ready for the transport.
    Publish(Message),
    /// Request to shut the worker's transport down once everything queued
    /// before it has drained.
    ClosePublisher,
}

#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("sequencer closed: no events accepted after ClosePublisher")]
    Closed,

    #[error("consumer side disconnected")]
    Disconnected,
}

/// Create a sequencer with the given capacity.
pub fn bounded(capacity: usize) -> (EventProducer, EventConsumer) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        EventProducer { tx, closed: false },
        EventConsumer { rx },
    )
}

/// Producing half, owned by the worker's construction loop.
pub struct EventProducer {
    tx: Sender<PublishEvent>,
    closed: bool,
}

impl EventProducer {
    /// Enqueue a message, blocking while the channel is full.
    pub fn publish(&mut self, message: Message) -> Result<(), SequencerError> {
        if self.closed {
            return Err(SequencerError::Closed);
        }
        self.tx
            .send(PublishEvent::Publish(message))
            .map_err(|_| SequencerError::Disconnected)
    }

    /// Enqueue the terminal close request. Further publishes are rejected.
    pub fn close(&mut self) -> Result<(), SequencerError> {
        if self.closed {
            return Err(SequencerError::Closed);
        }
        self.closed = true;
        self.tx
            .send(PublishEvent::ClosePublisher)
            .map_err(|_| SequencerError::Disconnected)
    }
}

/// Consuming half, owned by the worker's dispatch loop.
pub struct EventConsumer {
    rx: Receiver<PublishEvent>,
}

impl EventConsumer {
    /// Next event in FIFO order; `None` once the producer is gone. The
    /// returned event owns its message, so dropping it after dispatch frees
    /// the slot's contents.
    pub fn recv(&self) -> Option<PublishEvent> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn message(n: u64) -> Message {
        let mut m = Message::new(format!("{n} Publisher: seq"));
        m.set_message_id(n.to_string());
        m
    }

    #[test]
    fn test_fifo_order_preserved() {
        let (mut producer, consumer) = bounded(8);
        for n in 1..=5 {
            producer.publish(message(n)).unwrap();
        }
        producer.close().unwrap();

        for n in 1..=5u64 {
            match consumer.recv().unwrap() {
                PublishEvent::Publish(m) => assert_eq!(m.message_id(), n.to_string()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(matches!(
            consumer.recv(),
            Some(PublishEvent::ClosePublisher)
        ));
    }

    #[test]
    fn test_close_is_terminal() {
        let (mut producer, _consumer) = bounded(8);
        producer.close().unwrap();
        assert!(matches!(
            producer.publish(message(1)),
            Err(SequencerError::Closed)
        ));
        assert!(matches!(producer.close(), Err(SequencerError::Closed)));
    }

    #[test]
    fn test_full_channel_blocks_until_slot_frees() {
        let (mut producer, consumer) = bounded(1);
        producer.publish(message(1)).unwrap();

        let handle = thread::spawn(move || {
            // Blocks until the consumer drains the first event.
            producer.publish(message(2)).unwrap();
            producer
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        assert!(matches!(consumer.recv(), Some(PublishEvent::Publish(_))));
        let _producer = handle.join().unwrap();
        assert!(matches!(consumer.recv(), Some(PublishEvent::Publish(_))));
    }

    #[test]
    fn test_recv_none_after_producer_dropped() {
        let (producer, consumer) = bounded(4);
        drop(producer);
        assert!(consumer.recv().is_none());
    }
}
