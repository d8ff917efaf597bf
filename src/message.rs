//! Message payload wrapper passed from workers to the transport.

use chrono::{DateTime, Utc};

/// A single message produced by a publisher worker.
///
/// Protocol bindings convert this to and from their wire-level message type
/// as needed. The worker assigns the message id (the per-worker sequence
/// number) before handing the message to the transport; the transport stamps
/// the publish timestamp at send time. Once handed over, the message is not
/// touched by the worker again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_id: String,
    body: String,
    timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a message with the given body and no id or timestamp set.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            body: body.into(),
            timestamp: None,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn set_message_id(&mut self, message_id: impl Into<String>) {
        self.message_id = message_id.into();
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Publish timestamp, set by the transport at send time.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = Some(timestamp);
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "message id: {} timestamp: {} content: {}",
            self.message_id,
            self.timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            self.body
        )
    }
}
