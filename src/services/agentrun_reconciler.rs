//! AgentRun Reconciler (spec.md §4.5, §4.5.1, §4.5.2, C5).
//!
//! As with the other reconcilers, the state-machine decisions are pure
//! functions over already-fetched cluster state; the generic reconcile
//! loop in `main` is the only place that touches a
//! [`crate::domain::ports::ResourceStore`] or [`crate::domain::ports::EventBus`].
//! Pod construction is delegated to [`crate::services::pod_builder`] and
//! admission to [`crate::services::admission_validator`] — this module
//! never re-derives either.

use chrono::{DateTime, Utc};

use crate::domain::memory_markers::{extract_body, truncate_on_boundary, MarkerError};
use crate::domain::models::common::labels;
use crate::domain::models::{AgentRun, AgentRunPhase, AgentRunStatus, Instance, ParentLink};

/// What the reconciler should do next for one AgentRun, given its current
/// status and the state of its pod/Job (already fetched by the caller).
/// Mirrors the transition table in spec.md §4.5 one arm per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    /// Admit via C10/build a pod via C1 and move to Running.
    Admit,
    /// Policy rejected the run before it ever started.
    RejectAdmission { reason: String },
    /// The pod produced a result file; move to Succeeded.
    Complete { result: String },
    /// The pod exited non-zero or crashed; move to Failed.
    Fail { error: String },
    /// The run's deadline passed while still Running.
    TimedOut,
    /// Nothing to do yet (still Pending awaiting admission, or Running
    /// with no terminal signal).
    Wait,
}

/// Observed pod/Job state the reconciler maps onto [`RunAction`] for a
/// Running AgentRun. The caller is responsible for reading these off the
/// cluster (Job status, result file via the IPC bridge, or similar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodObservation {
    StillRunning,
    SucceededWithResult(String),
    FailedWithLogs(String),
}

/// Decide the next action for a Pending run given the admission verdict
/// (spec.md §4.5 row 1-2).
pub fn decide_pending(admission: Result<(), String>) -> RunAction {
    match admission {
        Ok(()) => RunAction::Admit,
        Err(reason) => RunAction::RejectAdmission { reason },
    }
}

/// Decide the next action for a Running run (spec.md §4.5 rows 3-5).
/// `deadline` is `started_at + timeout_seconds`, precomputed by the
/// caller from the spec and status; `None` means no timeout was
/// configured.
pub fn decide_running(observation: &PodObservation, now: DateTime<Utc>, deadline: Option<DateTime<Utc>>) -> RunAction {
    match observation {
        PodObservation::SucceededWithResult(result) => RunAction::Complete { result: result.clone() },
        PodObservation::FailedWithLogs(error) => RunAction::Fail { error: error.clone() },
        PodObservation::StillRunning => {
            if deadline.is_some_and(|d| now >= d) {
                RunAction::TimedOut
            } else {
                RunAction::Wait
            }
        }
    }
}

/// Apply a [`RunAction`] to a status, returning the new status (or the
/// invariant-violation error if the action is illegal from the current
/// phase — this should never happen if the caller dispatches the right
/// `decide_*` function for the current phase, but the check is kept here
/// so a wiring bug fails loudly instead of corrupting status).
pub fn apply(
    status: &mut AgentRunStatus,
    action: &RunAction,
    now: DateTime<Utc>,
) -> Result<(), crate::domain::models::StatusInvariantError> {
    match action {
        RunAction::Admit => {
            status.transition_to(AgentRunPhase::Running, None, None, now)?;
            status.started_at = Some(now);
        }
        RunAction::RejectAdmission { reason } => {
            status.transition_to(AgentRunPhase::Failed, None, Some(reason.clone()), now)?;
        }
        RunAction::Complete { result } => {
            status.transition_to(AgentRunPhase::Succeeded, Some(result.clone()), None, now)?;
        }
        RunAction::Fail { error } => {
            status.transition_to(AgentRunPhase::Failed, None, Some(error.clone()), now)?;
        }
        RunAction::TimedOut => {
            status.transition_to(
                AgentRunPhase::Timeout,
                None,
                Some("deadline exceeded".to_string()),
                now,
            )?;
        }
        RunAction::Wait => {}
    }
    Ok(())
}

/// The memory-ConfigMap patch to apply after a Succeeded run (§4.5.1), or
/// `None` when there is nothing to write: memory disabled on the
/// Instance, no markers present, or malformed markers (which are a
/// logged warning, not an error — spec.md §4.5.1's "ignore the body").
pub fn plan_memory_update(instance: &Instance, result_text: &str) -> Option<String> {
    if !instance.spec.memory.enabled {
        return None;
    }
    match extract_body(result_text) {
        Ok(Some(body)) => {
            let cap_bytes = (instance.spec.memory.size_cap_kb as usize) * 1024;
            Some(truncate_on_boundary(body, cap_bytes).to_string())
        }
        Ok(None) => None,
        Err(_malformed) => None,
    }
}

/// Surface the marker error so the caller can log it, distinct from the
/// "no markers present" case which is silent (§4.5.1).
pub fn memory_marker_warning(result_text: &str) -> Option<MarkerError> {
    extract_body(result_text).err()
}

/// A sub-agent spawn request relayed off `/ipc/spawn/*.json` by the IPC
/// bridge (§4.5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub agent_id: String,
    pub task: String,
    pub session_key: String,
}

/// Why a spawn request was refused before a child AgentRun was created
/// (§4.5.2 "rejected before creation").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnRejection {
    #[error("spawn depth {depth} would exceed policy maximum {max}")]
    DepthExceeded { depth: u32, max: u32 },
    #[error("instance '{instance}' already at concurrency limit {limit}")]
    ConcurrencyLimitReached { instance: String, limit: u32 },
}

/// Build the child AgentRun's parent link and validate it against the
/// Policy's sub-agent limits, or reject (§4.5.2). `running_count` is the
/// number of currently-Running AgentRuns for the parent's Instance,
/// counted by the caller before this decision.
pub fn plan_spawn(
    parent: &AgentRun,
    parent_name: &str,
    max_depth: u32,
    max_concurrent: u32,
    running_count: u32,
) -> Result<ParentLink, SpawnRejection> {
    let parent_depth = parent.spec.parent.as_ref().map(|p| p.spawn_depth).unwrap_or(0);
    let child_depth = parent_depth + 1;
    if child_depth > max_depth {
        return Err(SpawnRejection::DepthExceeded { depth: child_depth, max: max_depth });
    }
    if running_count >= max_concurrent {
        return Err(SpawnRejection::ConcurrencyLimitReached {
            instance: parent.spec.instance_name.clone(),
            limit: max_concurrent,
        });
    }
    Ok(ParentLink {
        parent_run_name: parent_name.to_string(),
        parent_session_key: parent.spec.session_key.clone(),
        spawn_depth: child_depth,
    })
}

/// Label set identifying a child run as belonging to `parent_name`
/// (§4.5.2 "the child is distinguishable by the parent-run label").
pub fn parent_labels(parent_name: &str, spawn_depth: u32) -> Vec<(String, String)> {
    vec![
        (labels::PARENT_RUN.to_string(), parent_name.to_string()),
        (labels::SPAWN_DEPTH.to_string(), spawn_depth.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::{CleanupPolicy, ModelSpec};
    use crate::domain::models::{AgentRunSpec, InstanceSpec, MemorySettings, ModelAgentConfig};
    use kube::core::ObjectMeta;

    fn pending_run(parent: Option<ParentLink>) -> AgentRun {
        AgentRun {
            metadata: ObjectMeta::default(),
            spec: AgentRunSpec {
                instance_name: "inst-1".to_string(),
                agent_id: "a".to_string(),
                session_key: "s".to_string(),
                parent,
                task: "do thing".to_string(),
                system_prompt_override: None,
                model: ModelSpec { provider: "p".to_string(), model_id: "m".to_string(), base_url: None, auth_secret_name: "secret".to_string() },
                skill_refs: vec![],
                timeout_seconds: Some(60),
                cleanup_policy: CleanupPolicy::Delete,
            },
            status: Some(AgentRunStatus::default()),
        }
    }

    fn instance_with_memory(enabled: bool, cap_kb: u32) -> Instance {
        Instance {
            metadata: ObjectMeta { name: Some("inst-1".to_string()), ..Default::default() },
            spec: InstanceSpec {
                agent: ModelAgentConfig::default(),
                auth_refs: vec![],
                channels: vec![],
                skill_refs: vec![],
                policy_ref: None,
                memory: MemorySettings { enabled, size_cap_kb: cap_kb, seed_system_prompt: None },
            },
            status: None,
        }
    }

    #[test]
    fn pending_with_ok_admission_admits() {
        assert_eq!(decide_pending(Ok(())), RunAction::Admit);
    }

    #[test]
    fn pending_with_rejected_admission_fails() {
        assert_eq!(
            decide_pending(Err("no sandbox".to_string())),
            RunAction::RejectAdmission { reason: "no sandbox".to_string() }
        );
    }

    #[test]
    fn running_past_deadline_with_no_terminal_signal_times_out() {
        let now = Utc::now();
        let deadline = now - chrono::Duration::seconds(1);
        assert_eq!(decide_running(&PodObservation::StillRunning, now, Some(deadline)), RunAction::TimedOut);
    }

    #[test]
    fn running_before_deadline_waits() {
        let now = Utc::now();
        let deadline = now + chrono::Duration::minutes(5);
        assert_eq!(decide_running(&PodObservation::StillRunning, now, Some(deadline)), RunAction::Wait);
    }

    #[test]
    fn apply_admit_sets_started_at_and_running() {
        let mut status = AgentRunStatus::default();
        let now = Utc::now();
        apply(&mut status, &RunAction::Admit, now).unwrap();
        assert_eq!(status.phase, AgentRunPhase::Running);
        assert_eq!(status.started_at, Some(now));
    }

    #[test]
    fn apply_complete_is_rejected_from_pending() {
        let mut status = AgentRunStatus::default();
        let result = apply(&mut status, &RunAction::Complete { result: "x".to_string() }, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn memory_update_skipped_when_disabled() {
        let inst = instance_with_memory(false, 10);
        assert_eq!(plan_memory_update(&inst, "<START>new memory<END>"), None);
    }

    #[test]
    fn memory_update_extracts_and_truncates() {
        let inst = instance_with_memory(true, 1);
        let body = "x".repeat(2000);
        let text = format!("<START>{body}<END>");
        let updated = plan_memory_update(&inst, &text).unwrap();
        assert_eq!(updated.len(), 1024);
    }

    #[test]
    fn malformed_markers_produce_no_update_but_a_warning() {
        let inst = instance_with_memory(true, 10);
        let text = "<START> unterminated";
        assert_eq!(plan_memory_update(&inst, text), None);
        assert!(memory_marker_warning(text).is_some());
    }

    #[test]
    fn spawn_within_limits_succeeds() {
        let parent = pending_run(None);
        let link = plan_spawn(&parent, "parent-run", 3, 5, 1).unwrap();
        assert_eq!(link.spawn_depth, 1);
        assert_eq!(link.parent_run_name, "parent-run");
    }

    #[test]
    fn spawn_beyond_depth_is_rejected() {
        let deep_parent = pending_run(Some(ParentLink {
            parent_run_name: "grandparent".to_string(),
            parent_session_key: "s".to_string(),
            spawn_depth: 2,
        }));
        assert_eq!(
            plan_spawn(&deep_parent, "parent-run", 2, 5, 0),
            Err(SpawnRejection::DepthExceeded { depth: 3, max: 2 })
        );
    }

    #[test]
    fn spawn_at_concurrency_limit_is_rejected() {
        let parent = pending_run(None);
        assert_eq!(
            plan_spawn(&parent, "parent-run", 5, 2, 2),
            Err(SpawnRejection::ConcurrencyLimitReached { instance: "inst-1".to_string(), limit: 2 })
        );
    }
}
