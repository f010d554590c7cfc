//! Notification fan-out and event publishing.
//!
//! Two delivery paths share one payload shape. The broadcast channel
//! serves in-process subscribers in real time, best-effort: a subscriber
//! that lags far enough simply misses messages. The publisher chain gives
//! events a durable exit (primary, then fallback), with each attempt
//! bounded by a timeout. Neither path is ever allowed to fail the task
//! operation that produced the event; a fully failed publish is logged
//! and reported as dropped.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::task::Task;

/// Per-publisher attempt timeout when none is configured.
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 2;

/// Broadcast channel capacity; subscribers beyond this lag drop messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

const DEFAULT_TOPIC: &str = "task-events";

/// The payload delivered to subscribers and publishers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub task_id: Option<u64>,
    pub data: Value,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskNotification {
    pub fn new(event: &str, task_id: Option<u64>, data: Value, actor: &str) -> Self {
        Self {
            event: event.to_string(),
            task_id,
            actor: actor.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Notification carrying a full task snapshot.
    pub fn for_task(event: &str, task: &Task, actor: &str) -> Self {
        Self::new(event, Some(task.id), task.snapshot(), actor)
    }

    /// Update notification: the new snapshot with the field diff embedded
    /// under `_changes`, so subscribers see both state and delta.
    pub fn for_update(task: &Task, changes: Value, actor: &str) -> Self {
        let mut data = task.snapshot();
        if let Some(map) = data.as_object_mut() {
            map.insert("_changes".to_string(), changes);
        }
        Self::new(crate::audit::event::TASK_UPDATED, Some(task.id), data, actor)
    }

    fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A durable destination for task events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Short name for logs ("jsonl", "webhook", ...).
    fn name(&self) -> &str;

    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}

/// Where a published event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Delivered through the primary publisher.
    Primary,
    /// Primary failed or timed out; the fallback accepted it.
    Fallback,
    /// No publisher accepted it. The operation still succeeds.
    Dropped,
}

/// Result of one `notify` call, for logging only.
#[derive(Debug, Clone, Copy)]
pub struct NotifyReport {
    /// Broadcast receivers the message reached.
    pub receivers: usize,
    pub outcome: PublishOutcome,
}

/// Fan-out hub: one broadcast channel plus an optional publisher chain.
pub struct Notifier {
    sender: broadcast::Sender<TaskNotification>,
    primary: Option<Box<dyn EventPublisher>>,
    fallback: Option<Box<dyn EventPublisher>>,
    timeout: Duration,
    topic: String,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            sender,
            primary: None,
            fallback: None,
            timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }

    pub fn with_primary(mut self, publisher: Box<dyn EventPublisher>) -> Self {
        self.primary = Some(publisher);
        self
    }

    pub fn with_fallback(mut self, publisher: Box<dyn EventPublisher>) -> Self {
        self.fallback = Some(publisher);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Whether a publisher chain is configured at all.
    pub fn has_publishers(&self) -> bool {
        self.primary.is_some() || self.fallback.is_some()
    }

    /// New receiver for the broadcast side. Receivers only see messages
    /// sent after they subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskNotification> {
        self.sender.subscribe()
    }

    /// Deliver a notification to every subscriber and the publisher
    /// chain. Never returns an error; the report says what happened.
    pub async fn notify(&self, notification: TaskNotification) -> NotifyReport {
        // send only errors when nobody is listening, which is fine.
        let receivers = self.sender.send(notification.clone()).unwrap_or(0);
        let payload = notification.payload();

        let outcome = self.publish(&payload).await;
        debug!(
            event = %notification.event,
            receivers,
            outcome = ?outcome,
            "notified"
        );
        NotifyReport { receivers, outcome }
    }

    async fn publish(&self, payload: &Value) -> PublishOutcome {
        if let Some(primary) = &self.primary {
            match self.attempt(primary.as_ref(), payload).await {
                Ok(()) => return PublishOutcome::Primary,
                Err(e) => {
                    warn!(publisher = primary.name(), error = %e, "primary publish failed");
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            match self.attempt(fallback.as_ref(), payload).await {
                Ok(()) => return PublishOutcome::Fallback,
                Err(e) => {
                    warn!(publisher = fallback.name(), error = %e, "fallback publish failed");
                }
            }
        }

        if self.primary.is_some() || self.fallback.is_some() {
            warn!("event dropped: no publisher accepted it");
        }
        PublishOutcome::Dropped
    }

    async fn attempt(&self, publisher: &dyn EventPublisher, payload: &Value) -> Result<()> {
        match tokio::time::timeout(self.timeout, publisher.publish(&self.topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(Error::PublishFailed(format!(
                "{} timed out after {:?}",
                publisher.name(),
                self.timeout
            ))),
        }
    }
}

/// Publisher that appends each event as one JSON line to a local file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EventPublisher for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn publish(&self, _topic: &str, payload: &Value) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(payload)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
