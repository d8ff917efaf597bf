//! The transport port: the seam between the worker engine and a concrete
//! broker protocol binding.
//!
//! The engine treats every transport failure uniformly; the error variants
//! exist for logging and for bindings to map their protocol errors onto,
//! not for the engine to branch on.

use crate::config::WorkloadConfig;
use crate::message::Message;
use chrono::Utc;
use thiserror::Error;
use tracing::trace;

/// Errors surfaced by a protocol binding.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("session already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability the worker engine needs from a broker binding.
///
/// All calls are synchronous from the worker's point of view; their latency
/// is the natural backpressure on the worker loop. `commit` and `rollback`
/// are only meaningful for sessions opened transactionally, and `close`
/// must be called exactly once by the owning worker.
pub trait Transport: Send {
    /// The workload this session was opened for.
    fn workload(&self) -> &WorkloadConfig;

    /// Build a message carrying `body`. Bindings that allocate wire-level
    /// message objects can override this; the default is a plain payload
    /// wrapper.
    fn create_message(&mut self, body: &str) -> Message {
        Message::new(body)
    }

    fn send(&mut self, message: &mut Message) -> Result<(), TransportError>;

    fn commit(&mut self) -> Result<(), TransportError>;

    fn rollback(&mut self) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// A broker-less transport that terminates sends in-process.
///
/// Used for dry runs of a plan and by the test suite; real measurements go
/// through a protocol binding implementing [`Transport`] against an actual
/// broker.
pub struct LoopbackTransport {
    workload: WorkloadConfig,
    uncommitted: u64,
    delivered: u64,
    commits: u64,
    rollbacks: u64,
    closed: bool,
}

impl LoopbackTransport {
    pub fn new(workload: WorkloadConfig) -> Self {
        Self {
            workload,
            uncommitted: 0,
            delivered: 0,
            commits: 0,
            rollbacks: 0,
            closed: false,
        }
    }

    /// Messages visible to a consumer: sent in simple mode or committed in
    /// transactional mode.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }
}

impl Transport for LoopbackTransport {
    fn workload(&self) -> &WorkloadConfig {
        &self.workload
    }

    fn send(&mut self, message: &mut Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        message.set_timestamp(Utc::now());
        if self.workload.transactional {
            self.uncommitted += 1;
        } else {
            self.delivered += 1;
        }
        trace!(message_id = message.message_id(), queue = %self.workload.queue_name, "loopback send");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.delivered += self.uncommitted;
        self.uncommitted = 0;
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.uncommitted = 0;
        self.rollbacks += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionSettings, Destination};

    fn workload(transactional: bool) -> WorkloadConfig {
        WorkloadConfig {
            id: "t".to_string(),
            queue_name: "q".to_string(),
            destination: Destination::Queue,
            message_count: 10,
            parallel_workers: 1,
            transactional,
            transaction_batch_size: 1,
            delay_between_messages: None,
            failover_params: None,
            max_recovery_attempts: None,
            connection: ConnectionSettings {
                hostname: "localhost".to_string(),
                port: 5672,
                username: None,
                password: None,
                client_id: None,
                virtual_host: None,
            },
        }
    }

    #[test]
    fn test_simple_send_delivers_immediately() {
        let mut transport = LoopbackTransport::new(workload(false));
        let mut message = Message::new("1 Publisher: t");
        transport.send(&mut message).unwrap();
        assert_eq!(transport.delivered(), 1);
        assert!(message.timestamp().is_some());
    }

    #[test]
    fn test_transactional_send_needs_commit() {
        let mut transport = LoopbackTransport::new(workload(true));
        let mut message = Message::new("1 Publisher: t");
        transport.send(&mut message).unwrap();
        assert_eq!(transport.delivered(), 0);
        transport.commit().unwrap();
        assert_eq!(transport.delivered(), 1);
        assert_eq!(transport.commits(), 1);
    }

    #[test]
    fn test_rollback_discards_uncommitted() {
        let mut transport = LoopbackTransport::new(workload(true));
        let mut message = Message::new("1 Publisher: t");
        transport.send(&mut message).unwrap();
        transport.rollback().unwrap();
        transport.commit().unwrap();
        assert_eq!(transport.delivered(), 0);
    }

    #[test]
    fn test_double_close_rejected() {
        let mut transport = LoopbackTransport::new(workload(false));
        transport.close().unwrap();
        assert!(matches!(transport.close(), Err(TransportError::Closed)));
    }
}
