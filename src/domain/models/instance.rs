//! Instance: the agent identity (spec.md §3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::common::{AuthRef, ChannelBinding};

/// Declarative model-agent configuration an Instance binds to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct ModelAgentConfig {
    pub provider: String,
    pub model_id: String,
    pub base_url: Option<String>,
}

/// Memory settings declared on an Instance (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct MemorySettings {
    pub enabled: bool,
    /// Size cap in KB; falls back to the process-wide
    /// `memory-max-kb-default` (spec.md §6) when zero.
    pub size_cap_kb: u32,
    pub seed_system_prompt: Option<String>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            size_cap_kb: 0,
            seed_system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, CustomResource)]
#[kube(
    group = "sympozium.ai",
    version = "v1alpha1",
    kind = "Instance",
    plural = "instances",
    shortname = "inst",
    status = "InstanceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub agent: ModelAgentConfig,
    #[serde(default)]
    pub auth_refs: Vec<AuthRef>,
    #[serde(default)]
    pub channels: Vec<ChannelBinding>,
    #[serde(default)]
    pub skill_refs: Vec<String>,
    #[serde(default)]
    pub policy_ref: Option<String>,
    #[serde(default)]
    pub memory: MemorySettings,
}

/// Connectivity state of one channel binding (spec.md §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ChannelHealthState {
    Unknown,
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl Default for ChannelHealthState {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealth {
    pub channel_type: String,
    pub state: ChannelHealthState,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// Overall Instance readiness (spec.md §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum InstancePhase {
    Pending,
    Ready,
    Degraded,
}

impl Default for InstancePhase {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceStatus {
    pub phase: InstancePhase,
    pub channels: Vec<ChannelHealth>,
    pub active_pod_count: u32,
    pub memory_config_map: Option<String>,
}

impl InstanceStatus {
    /// spec.md §3 invariant: phase Ready implies every declared channel is
    /// Connected or carries a last-error message.
    pub fn is_consistent_with(&self, declared_channel_count: usize) -> bool {
        if self.phase != InstancePhase::Ready {
            return true;
        }
        if self.channels.len() != declared_channel_count {
            return false;
        }
        self.channels.iter().all(|c| {
            c.state == ChannelHealthState::Connected || c.last_error.is_some()
        })
    }

    /// Recompute `phase` from the current channel map: any channel stuck in
    /// Error/Disconnected beyond the threshold demotes the Instance out of
    /// Ready (spec.md §4.4.3).
    pub fn recompute_phase(&mut self, now: DateTime<Utc>, error_threshold: chrono::Duration) {
        let degraded = self.channels.iter().any(|c| {
            matches!(c.state, ChannelHealthState::Error | ChannelHealthState::Disconnected)
                && c.since.is_some_and(|since| now - since > error_threshold)
        });
        self.phase = if degraded {
            InstancePhase::Degraded
        } else if self.channels.iter().all(|c| c.state == ChannelHealthState::Connected) {
            InstancePhase::Ready
        } else {
            InstancePhase::Pending
        };
    }
}

/// Name derived deterministically for an Instance's memory ConfigMap.
pub fn memory_config_map_name(instance_name: &str) -> String {
    format!("{instance_name}-memory")
}

/// Name derived deterministically for the Deployment backing one channel
/// binding on an Instance.
pub fn channel_deployment_name(instance_name: &str, channel_type: &str) -> String {
    format!("{instance_name}-channel-{channel_type}")
}

pub type LabelMap = BTreeMap<String, String>;
