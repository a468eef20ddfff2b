//! Seams the reconcilers depend on instead of the cluster directly
//! (§5 "shared-resource policy", §9 "cron state" design note).
//!
//! Grounded on the teacher's `AgentRepository` trait
//! (`domain/ports.rs`): reconcilers take a trait object/generic bound,
//! never a concrete client, so every reconciler in `services/` is
//! unit-testable against an in-memory fake without a running cluster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

use super::errors::StoreError;

/// A minimal CRUD+list seam over one custom-resource kind, scoped to a
/// single namespace. The production implementation wraps `kube::Api<T>`
/// (see `infrastructure::k8s::store`); tests use an in-memory map.
#[async_trait]
pub trait ResourceStore<T>: Send + Sync
where
    T: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<T>, StoreError>;
    async fn list(&self) -> Result<Vec<T>, StoreError>;
    async fn create(&self, name: &str, object: T) -> Result<(), StoreError>;
    async fn update(&self, name: &str, object: T) -> Result<(), StoreError>;
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// The eight named event-bus topics crossing the controller boundary
/// (spec.md §6). Kept as an explicit enum — not a bare string subject —
/// so a typo in a topic name is a compile error, not a silent drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    AgentRunRequested,
    AgentRunStarted,
    AgentRunCompleted,
    AgentRunFailed,
    ChannelMessageReceived,
    ChannelMessageSend,
    ChannelHealthUpdate,
    ScheduleUpsert,
}

impl Topic {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentRunRequested => "agent.run.requested",
            Self::AgentRunStarted => "agent.run.started",
            Self::AgentRunCompleted => "agent.run.completed",
            Self::AgentRunFailed => "agent.run.failed",
            Self::ChannelMessageReceived => "channel.message.received",
            Self::ChannelMessageSend => "channel.message.send",
            Self::ChannelHealthUpdate => "channel.health.update",
            Self::ScheduleUpsert => "schedule.upsert",
        }
    }
}

/// Publish/subscribe seam over the event bus (spec.md §6). `publish`
/// takes the already-serialized JSON body so the trait stays
/// payload-agnostic; callers build the body with `serde_json::json!` or a
/// typed payload's `Serialize` impl.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: Topic, body: serde_json::Value) -> Result<(), super::errors::SympoziumError>;
}

/// Clock abstraction (§9 "Cron state" design note): every reconciler that
/// makes a time-based decision (schedule fire times, AgentRun deadlines,
/// channel-health staleness) takes `&dyn Clock` instead of calling
/// `Utc::now()` directly, so tests can inject a virtual clock and assert
/// P6/scenario (1)-(2) without `sleep`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
