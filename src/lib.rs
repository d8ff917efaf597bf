//! brokerload — a configurable load-generation and measurement harness for
//! message-broker protocols.
//!
//! The harness drives many concurrent publisher workers against a broker,
//! optionally with transactional batching, and exposes per-worker
//! throughput counters for external reporting.
//!
//! # Architecture
//!
//! ```text
//!   test plan (YAML)
//!        │
//!        ▼
//! ┌──────────────┐   fan-out   ┌────────────────────────────────────┐
//! │ config::     │ ──────────▶ │ runner: one OS thread per worker   │
//! │ TestPlan     │             └───────────────┬────────────────────┘
//! └──────────────┘                             │
//!                       ┌──────────────────────┼─────────────────────┐
//!                       ▼                      ▼                     ▼
//!               ┌──────────────┐       ┌──────────────┐      ┌──────────────┐
//!               │ publisher    │       │ publisher    │      │ publisher    │
//!               │ worker (id)  │       │ worker (id-1)│  …   │ worker (id-n)│
//!               └──────┬───────┘       └──────┬───────┘      └──────┬───────┘
//!                      │ sequencer (txn mode) │                     │
//!                      ▼                      ▼                     ▼
//!               ┌──────────────┐       ┌──────────────┐      ┌──────────────┐
//!               │ transport    │       │ transport    │      │ transport    │
//!               │ (binding)    │       │ (binding)    │      │ (binding)    │
//!               └──────────────┘       └──────────────┘      └──────────────┘
//!
//!               metrics::MetricsRegistry ◀── meters / gauges from all workers
//! ```
//!
//! Each worker owns one transport session and one meter/gauge pair; the
//! registry is the only state shared across workers. Transactional workers
//! pipeline message construction against transport I/O through a bounded
//! event sequencer and recover failed batches with rollback-resend-commit.
//!
//! Broker protocol bindings implement [`transport::Transport`]; the in-tree
//! [`transport::LoopbackTransport`] terminates sends in-process for dry
//! runs and tests.

pub mod cli;
pub mod config;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod report;
pub mod runner;
pub mod sequencer;
pub mod transport;

pub use config::{ConfigError, PublisherConfig, SubscriberConfig, TestPlan, WorkloadConfig};
pub use message::Message;
pub use metrics::MetricsRegistry;
pub use publisher::PublisherWorker;
pub use runner::{run_plan, run_plan_with, CancelToken, RunSummary};
pub use transport::{LoopbackTransport, Transport, TransportError};
