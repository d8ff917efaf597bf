//! Test-plan configuration: YAML schema, validation, and worker fan-out.
//!
//! A test plan is a single YAML document with broker connection parameters at
//! the top level and up to five workload sections (`topic_publishers`,
//! `queue_publishers`, `topic_subscribers`, `queue_subscribers`,
//! `durable_subscribers`). Parsing is strict: missing required fields or
//! wrong-typed values fail before any worker is started, so a plan never
//! launches partially.
//!
//! Workload entries may override any global connection parameter locally;
//! the override is field-by-field, not all-or-nothing.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Wait between recovery attempts after a failed transactional commit.
pub const RESEND_WAIT_INTERVAL: Duration = Duration::from_millis(1000);

/// Errors raised while loading or validating a test plan.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("workload '{id}': {field} {reason}")]
    InvalidValue {
        id: String,
        field: &'static str,
        reason: String,
    },
}

/// Broker connection parameters after global/workload merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub hostname: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub virtual_host: Option<String>,
}

/// Whether a workload targets a queue or a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Queue,
    Topic,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Queue => write!(f, "queue"),
            Destination::Topic => write!(f, "topic"),
        }
    }
}

/// Resolved settings shared by publisher and subscriber workloads.
///
/// One `WorkloadConfig` describes one worker after fan-out; instances are
/// read-only from the moment the plan is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    pub id: String,
    pub queue_name: String,
    pub destination: Destination,
    pub message_count: u64,
    pub parallel_workers: u32,
    pub transactional: bool,
    pub transaction_batch_size: usize,
    pub delay_between_messages: Option<Duration>,
    pub failover_params: Option<String>,
    /// Bound on transactional recovery attempts. `None` retries forever,
    /// matching the historical behavior of this harness.
    pub max_recovery_attempts: Option<u32>,
    pub connection: ConnectionSettings,
}

/// A publisher workload instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub workload: WorkloadConfig,
}

/// A subscriber workload instance.
///
/// Subscriber consumption itself is driven by an external protocol binding;
/// the plan still parses and fans these out so a complete test description
/// lives in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    pub workload: WorkloadConfig,
    pub subscription_id: Option<String>,
    pub unsubscribe_on_finish: bool,
    pub durable: bool,
}

/// Reporting knobs from the global section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingConfig {
    /// Consumed by subscriber bindings: log progress every N messages.
    pub print_per_messages: Option<u64>,
    pub console_enabled: bool,
    pub console_interval: Duration,
}

/// A fully parsed, validated, fanned-out test plan.
#[derive(Debug, Clone)]
pub struct TestPlan {
    pub global: ConnectionSettings,
    pub reporting: ReportingConfig,
    pub topic_publishers: Vec<PublisherConfig>,
    pub queue_publishers: Vec<PublisherConfig>,
    pub topic_subscribers: Vec<SubscriberConfig>,
    pub queue_subscribers: Vec<SubscriberConfig>,
    pub durable_subscribers: Vec<SubscriberConfig>,
}

impl TestPlan {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let file: PlanFile = serde_yaml::from_str(yaml)?;
        let global = file.connection.resolve();

        let topic_publishers =
            resolve_publishers(&file.topic_publishers, &global, Destination::Topic)?;
        let queue_publishers =
            resolve_publishers(&file.queue_publishers, &global, Destination::Queue)?;
        let topic_subscribers =
            resolve_subscribers(&file.topic_subscribers, &global, Destination::Topic, false)?;
        let queue_subscribers =
            resolve_subscribers(&file.queue_subscribers, &global, Destination::Queue, false)?;
        let durable_subscribers =
            resolve_subscribers(&file.durable_subscribers, &global, Destination::Topic, true)?;

        Ok(TestPlan {
            global,
            reporting: ReportingConfig {
                print_per_messages: file.print_per_messages,
                console_enabled: file.console_report_enable,
                console_interval: Duration::from_secs(
                    file.console_report_update_interval_seconds,
                ),
            },
            topic_publishers,
            queue_publishers,
            topic_subscribers,
            queue_subscribers,
            durable_subscribers,
        })
    }

    /// All publisher worker instances, topics first.
    pub fn publishers(&self) -> impl Iterator<Item = &PublisherConfig> {
        self.topic_publishers.iter().chain(self.queue_publishers.iter())
    }

    /// All subscriber worker instances.
    pub fn subscribers(&self) -> impl Iterator<Item = &SubscriberConfig> {
        self.topic_subscribers
            .iter()
            .chain(self.queue_subscribers.iter())
            .chain(self.durable_subscribers.iter())
    }
}

/// Expansion of `parallel_workers` into independent worker instances.
///
/// The first instance keeps the base id unmodified; clones get `-1` through
/// `-(K-1)` suffixes. Every instance is a deep copy, so mutating one can
/// never affect a sibling.
pub trait WorkerFanOut: Clone {
    fn worker_id(&self) -> &str;
    fn parallel_workers(&self) -> u32;
    fn clone_with_id(&self, id: String) -> Self;
}

impl WorkerFanOut for PublisherConfig {
    fn worker_id(&self) -> &str {
        &self.workload.id
    }

    fn parallel_workers(&self) -> u32 {
        self.workload.parallel_workers
    }

    fn clone_with_id(&self, id: String) -> Self {
        let mut clone = self.clone();
        clone.workload.id = id;
        clone
    }
}

impl WorkerFanOut for SubscriberConfig {
    fn worker_id(&self) -> &str {
        &self.workload.id
    }

    fn parallel_workers(&self) -> u32 {
        self.workload.parallel_workers
    }

    fn clone_with_id(&self, id: String) -> Self {
        let mut clone = self.clone();
        clone.workload.id = id;
        clone
    }
}

/// Expand one workload into its worker instances.
pub fn fan_out<T: WorkerFanOut>(base: T) -> Vec<T> {
    let count = base.parallel_workers();
    let base_id = base.worker_id().to_string();
    let mut instances = Vec::with_capacity(count as usize);
    instances.push(base);
    for n in 1..count {
        let clone = instances[0].clone_with_id(format!("{base_id}-{n}"));
        instances.push(clone);
    }
    instances
}

// ---------------------------------------------------------------------------
// Raw YAML schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(flatten)]
    connection: GlobalConnection,

    #[serde(default)]
    print_per_messages: Option<u64>,
    #[serde(default = "default_true")]
    console_report_enable: bool,
    #[serde(default = "default_console_interval")]
    console_report_update_interval_seconds: u64,

    #[serde(default)]
    topic_publishers: Vec<WorkloadEntry>,
    #[serde(default)]
    queue_publishers: Vec<WorkloadEntry>,
    #[serde(default)]
    topic_subscribers: Vec<SubscriberEntry>,
    #[serde(default)]
    queue_subscribers: Vec<SubscriberEntry>,
    #[serde(default)]
    durable_subscribers: Vec<SubscriberEntry>,
}

#[derive(Debug, Deserialize)]
struct GlobalConnection {
    #[serde(default = "default_hostname")]
    hostname: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default, rename = "virtualhost_name")]
    virtual_host: Option<String>,
}

impl GlobalConnection {
    fn resolve(&self) -> ConnectionSettings {
        ConnectionSettings {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            client_id: self.client_id.clone(),
            virtual_host: self.virtual_host.clone(),
        }
    }
}

/// Per-entry connection overrides; any field set here wins over the global
/// value for this workload only.
#[derive(Debug, Default, Deserialize)]
struct ConnectionOverrides {
    hostname: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    #[serde(rename = "virtualhost_name")]
    virtual_host: Option<String>,
}

impl ConnectionOverrides {
    fn apply(&self, global: &ConnectionSettings) -> ConnectionSettings {
        ConnectionSettings {
            hostname: self.hostname.clone().unwrap_or_else(|| global.hostname.clone()),
            port: self.port.unwrap_or(global.port),
            username: self.username.clone().or_else(|| global.username.clone()),
            password: self.password.clone().or_else(|| global.password.clone()),
            client_id: self.client_id.clone().or_else(|| global.client_id.clone()),
            virtual_host: self
                .virtual_host
                .clone()
                .or_else(|| global.virtual_host.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkloadEntry {
    queue_name: String,
    message_count: u64,
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_parallel_threads")]
    parallel_threads: u32,
    #[serde(default)]
    transaction_enable: bool,
    #[serde(default = "default_transaction_batch_size")]
    transaction_batch_size: usize,
    #[serde(default)]
    delay_between_messages: Option<u64>,
    #[serde(default)]
    failover_params: Option<String>,
    #[serde(default)]
    max_recovery_attempts: Option<u32>,
    #[serde(flatten)]
    overrides: ConnectionOverrides,
}

#[derive(Debug, Deserialize)]
struct SubscriberEntry {
    #[serde(flatten)]
    base: WorkloadEntry,
    #[serde(default, deserialize_with = "opt_string_from_scalar")]
    sub_id: Option<String>,
    #[serde(default)]
    unsubscribe_on_finish: bool,
}

/// Subscription ids in existing plans appear both quoted and bare; accept a
/// YAML string or integer and normalize to a string.
fn opt_string_from_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::Text(t) => t,
        Scalar::Number(n) => n.to_string(),
    }))
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5672
}

fn default_true() -> bool {
    true
}

fn default_console_interval() -> u64 {
    5
}

fn default_parallel_threads() -> u32 {
    1
}

fn default_transaction_batch_size() -> usize {
    1
}

impl WorkloadEntry {
    fn resolve(
        &self,
        global: &ConnectionSettings,
        destination: Destination,
    ) -> Result<WorkloadConfig, ConfigError> {
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if self.parallel_threads < 1 {
            return Err(ConfigError::InvalidValue {
                id,
                field: "parallel_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.transaction_batch_size < 1 {
            return Err(ConfigError::InvalidValue {
                id,
                field: "transaction_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.transaction_enable && self.transaction_batch_size > 1 {
            warn!(
                workload = %id,
                batch_size = self.transaction_batch_size,
                "transaction_batch_size has no effect without transaction_enable"
            );
        }

        Ok(WorkloadConfig {
            id,
            queue_name: self.queue_name.clone(),
            destination,
            message_count: self.message_count,
            parallel_workers: self.parallel_threads,
            transactional: self.transaction_enable,
            transaction_batch_size: self.transaction_batch_size,
            delay_between_messages: self.delay_between_messages.map(Duration::from_millis),
            failover_params: self.failover_params.clone(),
            max_recovery_attempts: self.max_recovery_attempts,
            connection: self.overrides.apply(global),
        })
    }
}

fn resolve_publishers(
    entries: &[WorkloadEntry],
    global: &ConnectionSettings,
    destination: Destination,
) -> Result<Vec<PublisherConfig>, ConfigError> {
    let mut configs = Vec::new();
    for entry in entries {
        let base = PublisherConfig {
            workload: entry.resolve(global, destination)?,
        };
        configs.extend(fan_out(base));
    }
    Ok(configs)
}

fn resolve_subscribers(
    entries: &[SubscriberEntry],
    global: &ConnectionSettings,
    destination: Destination,
    durable: bool,
) -> Result<Vec<SubscriberConfig>, ConfigError> {
    let mut configs = Vec::new();
    for entry in entries {
        let base = SubscriberConfig {
            workload: entry.base.resolve(global, destination)?,
            subscription_id: entry.sub_id.clone(),
            unsubscribe_on_finish: entry.unsubscribe_on_finish,
            durable,
        };
        configs.extend(fan_out(base));
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_plan(extra: &str) -> String {
        format!(
            "hostname: broker.local\nport: 5700\nusername: admin\n{extra}"
        )
    }

    #[test]
    fn test_parse_minimal_publisher() {
        let yaml = minimal_plan(
            "queue_publishers:\n  - queue_name: orders\n    message_count: 100\n    id: pub-a\n",
        );
        let plan = TestPlan::from_yaml(&yaml).unwrap();

        assert_eq!(plan.queue_publishers.len(), 1);
        let workload = &plan.queue_publishers[0].workload;
        assert_eq!(workload.id, "pub-a");
        assert_eq!(workload.queue_name, "orders");
        assert_eq!(workload.message_count, 100);
        assert_eq!(workload.parallel_workers, 1);
        assert!(!workload.transactional);
        assert_eq!(workload.transaction_batch_size, 1);
        assert_eq!(workload.destination, Destination::Queue);
        assert_eq!(workload.connection.hostname, "broker.local");
        assert_eq!(workload.connection.port, 5700);
    }

    #[test]
    fn test_missing_queue_name_fails() {
        let yaml = minimal_plan("queue_publishers:\n  - message_count: 10\n");
        assert!(matches!(
            TestPlan::from_yaml(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_message_count_fails() {
        let yaml = minimal_plan("topic_publishers:\n  - queue_name: orders\n");
        assert!(matches!(
            TestPlan::from_yaml(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_non_boolean_transaction_flag_fails() {
        let yaml = minimal_plan(
            "queue_publishers:\n  - queue_name: orders\n    message_count: 10\n    transaction_enable: \"yes please\"\n",
        );
        assert!(matches!(
            TestPlan::from_yaml(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_non_integer_print_per_messages_fails() {
        let yaml = minimal_plan("print_per_messages: often\n");
        assert!(matches!(
            TestPlan::from_yaml(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_parallel_threads_rejected() {
        let yaml = minimal_plan(
            "queue_publishers:\n  - queue_name: orders\n    message_count: 10\n    parallel_threads: 0\n",
        );
        assert!(matches!(
            TestPlan::from_yaml(&yaml),
            Err(ConfigError::InvalidValue { field: "parallel_threads", .. })
        ));
    }

    #[test]
    fn test_missing_id_gets_random_default() {
        let yaml = minimal_plan(
            "queue_publishers:\n  - queue_name: orders\n    message_count: 10\n  - queue_name: orders\n    message_count: 10\n",
        );
        let plan = TestPlan::from_yaml(&yaml).unwrap();
        assert!(!plan.queue_publishers[0].workload.id.is_empty());
        assert_ne!(
            plan.queue_publishers[0].workload.id,
            plan.queue_publishers[1].workload.id
        );
    }

    #[test]
    fn test_fan_out_ids_and_independence() {
        let yaml = minimal_plan(
            "queue_publishers:\n  - queue_name: orders\n    message_count: 10\n    id: pub\n    parallel_threads: 3\n    delay_between_messages: 5\n",
        );
        let plan = TestPlan::from_yaml(&yaml).unwrap();
        let ids: Vec<&str> = plan
            .queue_publishers
            .iter()
            .map(|p| p.workload.id.as_str())
            .collect();
        assert_eq!(ids, vec!["pub", "pub-1", "pub-2"]);

        // Deep copies: changing one instance leaves its siblings alone.
        let mut instances = plan.queue_publishers.clone();
        instances[1].workload.delay_between_messages = Some(Duration::from_millis(99));
        instances[1].workload.transaction_batch_size = 42;
        assert_eq!(
            instances[0].workload.delay_between_messages,
            Some(Duration::from_millis(5))
        );
        assert_eq!(instances[2].workload.transaction_batch_size, 1);
    }

    #[test]
    fn test_workload_overrides_take_precedence_field_by_field() {
        let yaml = minimal_plan(
            "queue_publishers:\n  - queue_name: orders\n    message_count: 10\n    hostname: other.host\n",
        );
        let plan = TestPlan::from_yaml(&yaml).unwrap();
        let conn = &plan.queue_publishers[0].workload.connection;
        assert_eq!(conn.hostname, "other.host");
        // Unset fields still inherit the global values.
        assert_eq!(conn.port, 5700);
        assert_eq!(conn.username.as_deref(), Some("admin"));
    }

    #[test]
    fn test_subscriber_sections_and_numeric_sub_id() {
        let yaml = minimal_plan(
            "durable_subscribers:\n  - queue_name: events\n    message_count: 50\n    sub_id: 7\n    unsubscribe_on_finish: true\n",
        );
        let plan = TestPlan::from_yaml(&yaml).unwrap();
        let sub = &plan.durable_subscribers[0];
        assert_eq!(sub.subscription_id.as_deref(), Some("7"));
        assert!(sub.unsubscribe_on_finish);
        assert!(sub.durable);
        assert_eq!(sub.workload.destination, Destination::Topic);
    }

    #[test]
    fn test_reporting_defaults() {
        let plan = TestPlan::from_yaml("hostname: h\n").unwrap();
        assert!(plan.reporting.console_enabled);
        assert_eq!(plan.reporting.console_interval, Duration::from_secs(5));
        assert_eq!(plan.reporting.print_per_messages, None);
        assert_eq!(plan.publishers().count(), 0);
        assert_eq!(plan.subscribers().count(), 0);
    }
}
