//! Instance Reconciler (spec.md §4.4, C4).
//!
//! Four independent pure concerns, each testable in isolation: the memory
//! ConfigMap seed, the set of channel Deployments to ensure/remove, the
//! merge of a channel-health event into `status.channels`, and the
//! running-pod count derived from sibling AgentRuns.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::domain::models::common::ChannelType;
use crate::domain::models::instance::channel_deployment_name;
use crate::domain::models::{AgentRun, AgentRunPhase, ChannelHealth, ChannelHealthState, Instance, InstanceStatus};

/// Whether a memory ConfigMap should exist for this Instance, and what its
/// seed body should be the first time it's created (§4.4 step 1). The
/// caller only applies the seed on *create*; an existing ConfigMap's body
/// is never reset by this reconciler — only the AgentRun Reconciler's
/// memory round-trip (§4.5.1) mutates it afterward.
pub enum MemoryConfigMapPlan {
    Absent,
    Ensure { seed_body: String },
}

pub fn plan_memory_config_map(instance: &Instance) -> MemoryConfigMapPlan {
    if !instance.spec.memory.enabled {
        return MemoryConfigMapPlan::Absent;
    }
    MemoryConfigMapPlan::Ensure {
        seed_body: instance.spec.memory.seed_system_prompt.clone().unwrap_or_default(),
    }
}

/// Channel Deployments to create/keep and to delete (§4.4 step 2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelDeploymentPlan {
    pub ensure: Vec<ChannelType>,
    pub delete_names: Vec<String>,
}

pub fn plan_channel_deployments(
    instance_name: &str,
    instance: &Instance,
    existing_deployment_names: &[String],
) -> ChannelDeploymentPlan {
    let wanted: Vec<ChannelType> = instance.spec.channels.iter().map(|c| c.channel_type.clone()).collect();
    let wanted_names: HashSet<String> = wanted.iter().map(|t| channel_deployment_name(instance_name, t)).collect();
    let delete_names = existing_deployment_names
        .iter()
        .filter(|n| !wanted_names.contains(*n))
        .cloned()
        .collect();
    ChannelDeploymentPlan { ensure: wanted, delete_names }
}

/// Merge one channel-health observation into `status.channels` (§4.4
/// step 3). `since` only advances when the state actually changes, so a
/// repeated identical health event doesn't reset the error-duration clock
/// used by [`degraded_after`].
pub fn merge_channel_health(
    status: &mut InstanceStatus,
    channel_type: &str,
    new_state: ChannelHealthState,
    message: Option<String>,
    now: DateTime<Utc>,
) {
    if let Some(entry) = status.channels.iter_mut().find(|c| c.channel_type == channel_type) {
        if entry.state != new_state {
            entry.state = new_state;
            entry.since = Some(now);
        }
        entry.last_error = message;
    } else {
        status.channels.push(ChannelHealth {
            channel_type: channel_type.to_string(),
            state: new_state,
            last_error: message,
            since: Some(now),
        });
    }
}

/// Number of sibling AgentRuns for this Instance currently Running
/// (§4.4 step 4).
pub fn active_pod_count(instance_name: &str, runs: &[AgentRun]) -> u32 {
    runs.iter()
        .filter(|r| {
            r.spec.instance_name == instance_name
                && r.status.as_ref().map(|s| s.phase) == Some(AgentRunPhase::Running)
        })
        .count() as u32
}

/// Recompute the full status in one pass given already-fetched related
/// state; `error_threshold` is the duration a channel may sit in
/// Error/Disconnected before it demotes the Instance phase (§4.4 step 3).
pub fn recompute(
    instance_name: &str,
    instance: &Instance,
    mut status: InstanceStatus,
    runs: &[AgentRun],
    now: DateTime<Utc>,
    error_threshold: chrono::Duration,
) -> InstanceStatus {
    status.active_pod_count = active_pod_count(instance_name, runs);
    status.recompute_phase(now, error_threshold);
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::{ChannelBinding, ModelSpec, ParentLink, CleanupPolicy};
    use crate::domain::models::{AgentRunSpec, AgentRunStatus, InstancePhase, InstanceSpec, MemorySettings, ModelAgentConfig};
    use kube::core::ObjectMeta;

    fn instance(memory_enabled: bool, channels: Vec<&str>) -> Instance {
        Instance {
            metadata: ObjectMeta { name: Some("inst-1".to_string()), ..Default::default() },
            spec: InstanceSpec {
                agent: ModelAgentConfig::default(),
                auth_refs: vec![],
                channels: channels.into_iter().map(|t| ChannelBinding { channel_type: t.to_string(), secret_ref: None }).collect(),
                skill_refs: vec![],
                policy_ref: None,
                memory: MemorySettings { enabled: memory_enabled, size_cap_kb: 10, seed_system_prompt: Some("hello".to_string()) },
            },
            status: None,
        }
    }

    fn run(instance_name: &str, phase: AgentRunPhase) -> AgentRun {
        AgentRun {
            metadata: ObjectMeta::default(),
            spec: AgentRunSpec {
                instance_name: instance_name.to_string(),
                agent_id: "a".to_string(),
                session_key: "s".to_string(),
                parent: None::<ParentLink>,
                task: "t".to_string(),
                system_prompt_override: None,
                model: ModelSpec { provider: "p".to_string(), model_id: "m".to_string(), base_url: None, auth_secret_name: "secret".to_string() },
                skill_refs: vec![],
                timeout_seconds: None,
                cleanup_policy: CleanupPolicy::Delete,
            },
            status: Some(AgentRunStatus { phase, ..Default::default() }),
        }
    }

    #[test]
    fn memory_disabled_means_absent_plan() {
        assert!(matches!(plan_memory_config_map(&instance(false, vec![])), MemoryConfigMapPlan::Absent));
    }

    #[test]
    fn memory_enabled_seeds_from_system_prompt() {
        match plan_memory_config_map(&instance(true, vec![])) {
            MemoryConfigMapPlan::Ensure { seed_body } => assert_eq!(seed_body, "hello"),
            MemoryConfigMapPlan::Absent => panic!("expected Ensure"),
        }
    }

    #[test]
    fn removed_channel_binding_schedules_deployment_deletion() {
        let inst = instance(false, vec!["telegram"]);
        let existing = vec![
            channel_deployment_name("inst-1", "telegram"),
            channel_deployment_name("inst-1", "slack"),
        ];
        let plan = plan_channel_deployments("inst-1", &inst, &existing);
        assert_eq!(plan.ensure, vec!["telegram".to_string()]);
        assert_eq!(plan.delete_names, vec![channel_deployment_name("inst-1", "slack")]);
    }

    #[test]
    fn channel_health_merge_tracks_since_on_state_change() {
        let mut status = InstanceStatus::default();
        let t0 = chrono::Utc::now();
        merge_channel_health(&mut status, "telegram", ChannelHealthState::Connecting, None, t0);
        assert_eq!(status.channels[0].since, Some(t0));

        let t1 = t0 + chrono::Duration::seconds(5);
        merge_channel_health(&mut status, "telegram", ChannelHealthState::Connecting, None, t1);
        assert_eq!(status.channels[0].since, Some(t0), "unchanged state must not reset since");

        let t2 = t1 + chrono::Duration::seconds(5);
        merge_channel_health(&mut status, "telegram", ChannelHealthState::Error, Some("boom".to_string()), t2);
        assert_eq!(status.channels[0].since, Some(t2));
        assert_eq!(status.channels[0].last_error, Some("boom".to_string()));
    }

    #[test]
    fn active_pod_count_only_counts_running_for_this_instance() {
        let runs = vec![
            run("inst-1", AgentRunPhase::Running),
            run("inst-1", AgentRunPhase::Succeeded),
            run("inst-2", AgentRunPhase::Running),
        ];
        assert_eq!(active_pod_count("inst-1", &runs), 1);
    }

    #[test]
    fn degraded_channel_demotes_phase_after_threshold() {
        let mut status = InstanceStatus::default();
        let t0 = chrono::Utc::now();
        merge_channel_health(&mut status, "telegram", ChannelHealthState::Error, Some("down".to_string()), t0);
        let inst = instance(false, vec!["telegram"]);
        let recomputed = recompute("inst-1", &inst, status, &[], t0 + chrono::Duration::minutes(10), chrono::Duration::minutes(5));
        assert_eq!(recomputed.phase, InstancePhase::Degraded);
    }
}
