//! Schedule: a cron-driven AgentRun producer (spec.md §3, §4.6).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleTriggerType {
    Heartbeat,
    Scheduled,
    Sweep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ConcurrencyPolicy {
    Forbid,
    Allow,
    Replace,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self::Forbid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, CustomResource)]
#[kube(
    group = "sympozium.ai",
    version = "v1alpha1",
    kind = "Schedule",
    plural = "schedules",
    shortname = "sched",
    status = "ScheduleStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    pub instance_ref: String,
    pub cron_expression: String,
    pub task: String,
    #[serde(rename = "type")]
    pub trigger_type: ScheduleTriggerType,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    #[serde(default)]
    pub include_memory: bool,
    #[serde(default)]
    pub suspend: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SchedulePhase {
    Active,
    Suspended,
    Error,
    Pending,
}

impl Default for SchedulePhase {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub phase: SchedulePhase,
    pub total_runs: u64,
    pub last_schedule_time: Option<DateTime<Utc>>,
    pub next_schedule_time: Option<DateTime<Utc>>,
    pub last_run_name: Option<String>,
    pub last_error: Option<String>,
}
