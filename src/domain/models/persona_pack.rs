//! PersonaPack: one bundle fanning out into N Instances/Schedules
//! (spec.md §3, §4.7).

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::common::AuthRef;
use super::instance::ModelAgentConfig;
use super::schedule::ScheduleTriggerType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", untagged)]
pub enum PersonaScheduleTiming {
    IntervalSeconds { interval_seconds: u64 },
    Cron { cron: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersonaScheduleBlock {
    #[serde(rename = "type")]
    pub trigger_type: ScheduleTriggerType,
    #[serde(flatten)]
    pub timing: PersonaScheduleTiming,
    pub task: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    pub display_name: String,
    pub system_prompt: String,
    pub skills: Vec<String>,
    pub tool_policy_override: Option<String>,
    pub schedule: Option<PersonaScheduleBlock>,
    pub memory_seeds: Vec<String>,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, CustomResource)]
#[kube(
    group = "sympozium.ai",
    version = "v1alpha1",
    kind = "PersonaPack",
    plural = "personapacks",
    shortname = "pp",
    status = "PersonaPackStatus",
    namespaced
)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonaPackSpec {
    pub description: String,
    pub category: String,
    pub version: String,
    /// Agent/model configuration applied to every Instance stamped out of
    /// this pack (spec.md §4.7 step 1, "overlaying persona fields ... on
    /// pack-level defaults").
    pub agent: ModelAgentConfig,
    pub personas: Vec<Persona>,
    pub auth_refs: Vec<AuthRef>,
    pub policy_ref: Option<String>,
    pub channel_secrets: BTreeMap<String, String>,
    /// Persona names excluded from fan-out (spec.md §4.7 idempotence /
    /// scenario 3).
    pub excluded_personas: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum PersonaPackPhase {
    Pending,
    Ready,
    Error,
}

impl Default for PersonaPackPhase {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPersonaRecord {
    pub persona_name: String,
    pub instance_name: String,
    pub schedule_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonaPackStatus {
    pub phase: PersonaPackPhase,
    pub persona_count: u32,
    pub installed_count: u32,
    pub installed: Vec<InstalledPersonaRecord>,
    pub error: Option<String>,
}

/// Deterministic child-name derivation (spec.md §4.7 step 1/2).
pub fn instance_name_for(pack_name: &str, persona_name: &str) -> String {
    format!("{pack_name}-{persona_name}")
}

pub fn schedule_name_for(pack_name: &str, persona_name: &str) -> String {
    format!("{pack_name}-{persona_name}-schedule")
}

pub fn seed_config_map_name_for(pack_name: &str, persona_name: &str) -> String {
    format!("{pack_name}-{persona_name}-seed")
}
