//! Shared value types used across the custom-resource spec/status pairs.
//!
//! Kept in one module because every reconciler touches these: object
//! references, the `instanceName`/`agentId`/run-name labels the reconcilers
//! key queries on, and the provider/model tuple an `AgentRun` and a
//! `Schedule` both carry.

use serde::{Deserialize, Serialize};

/// Points at another named object in the same namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ObjectRef {
    pub name: String,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One secret reference plus the provider it authenticates, as declared on
/// an Instance's `authRefs` list (spec.md §3, Instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AuthRef {
    pub secret_name: String,
    #[serde(default)]
    pub provider: Option<String>,
}

/// The fully-resolved model configuration an `AgentRun` carries: provider,
/// model id, optional base URL, and the secret that authenticates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ModelSpec {
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub auth_secret_name: String,
}

/// Channel adapter kind. Deliberately an open string rather than a closed
/// enum: channel adapters (Telegram, Slack, Discord, WhatsApp, …) are
/// external processes per spec.md §1, and the core must not need a code
/// change to support a new one.
pub type ChannelType = String;

/// A channel binding declared on an Instance: which external platform, and
/// optionally which secret carries its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ChannelBinding {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub secret_ref: Option<String>,
}

/// Parent-run linkage carried by a sub-agent spawned AgentRun (spec.md §3,
/// AgentRun.spec.parent and §4.5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ParentLink {
    pub parent_run_name: String,
    pub parent_session_key: String,
    pub spawn_depth: u32,
}

/// Cleanup behavior for a terminal AgentRun's Job (spec.md §3, AgentRun).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum CleanupPolicy {
    Delete,
    Keep,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self::Delete
    }
}

/// Recorded token/tool usage for a terminal AgentRun (spec.md §3, AgentRun
/// status.tokenUsage). Fields default to zero when the agent did not
/// report them (spec.md §4.5 tie-breaks).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub tool_calls: u64,
    pub duration_ms: u64,
}

/// Label keys the reconcilers and routers rely on for querying related
/// objects. Centralized so every component spells a label the same way.
pub mod labels {
    pub const INSTANCE: &str = "sympozium.ai/instance";
    pub const AGENT_ID: &str = "sympozium.ai/agent-id";
    pub const RUN_NAME: &str = "sympozium.ai/run-name";
    pub const COMPONENT: &str = "sympozium.ai/component";
    pub const PARENT_RUN: &str = "sympozium.ai/parent-run";
    pub const SPAWN_DEPTH: &str = "sympozium.ai/spawn-depth";
    pub const SCHEDULE: &str = "sympozium.ai/schedule";
    pub const TRIGGER_TYPE: &str = "sympozium.ai/trigger-type";
    pub const SOURCE: &str = "sympozium.ai/source";
    pub const SOURCE_CHANNEL: &str = "sympozium.ai/source-channel";

    pub const COMPONENT_AGENT_RUN: &str = "agent-run";
    pub const SOURCE_CHANNEL_VALUE: &str = "channel";
}

/// Annotation keys used to carry channel reply metadata on an AgentRun
/// (spec.md §4.8).
pub mod annotations {
    pub const REPLY_CHANNEL: &str = "sympozium.ai/reply-channel";
    pub const REPLY_CHAT_ID: &str = "sympozium.ai/reply-chat-id";
    pub const SENDER_ID: &str = "sympozium.ai/sender-id";
    pub const SENDER_NAME: &str = "sympozium.ai/sender-name";
}
