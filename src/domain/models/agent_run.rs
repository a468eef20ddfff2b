//! AgentRun: a single agent invocation (spec.md §3, §4.5).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::common::{CleanupPolicy, ModelSpec, ParentLink, TokenUsage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, CustomResource)]
#[kube(
    group = "sympozium.ai",
    version = "v1alpha1",
    kind = "AgentRun",
    plural = "agentruns",
    shortname = "run",
    status = "AgentRunStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunSpec {
    pub instance_name: String,
    pub agent_id: String,
    pub session_key: String,
    #[serde(default)]
    pub parent: Option<ParentLink>,
    pub task: String,
    #[serde(default)]
    pub system_prompt_override: Option<String>,
    pub model: ModelSpec,
    #[serde(default)]
    pub skill_refs: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,
}

/// The AgentRun state machine (spec.md §4.5). Transitions only flow
/// left-to-right through this lattice; see [`AgentRunPhase::is_terminal`]
/// and P1 (Terminality).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum AgentRunPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Timeout,
}

impl AgentRunPhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Timeout)
    }

    /// Whether `self -> next` is a legal transition in the lattice defined
    /// by the table in spec.md §4.5. Terminal phases never transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Timeout)
        )
    }
}

impl Default for AgentRunPhase {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentRunStatus {
    pub phase: AgentRunPhase,
    pub pod_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub token_usage: TokenUsage,
    pub finalizers: Vec<String>,
}

/// Errors describing why a proposed status does not satisfy the
/// invariants in spec.md §3/§8 (P1, P2). Returned by
/// [`AgentRunStatus::validate_transition`] so callers can refuse to
/// persist a bad write rather than silently violating an invariant.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StatusInvariantError {
    #[error("cannot transition from terminal phase {from:?} to {to:?}")]
    TerminalPhaseMutated { from: AgentRunPhase, to: AgentRunPhase },
    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition { from: AgentRunPhase, to: AgentRunPhase },
    #[error("Succeeded status must carry a non-empty result and no error")]
    SucceededExclusivity,
    #[error("Failed/Timeout status must carry a non-empty error and no result")]
    FailedExclusivity,
}

impl AgentRunStatus {
    /// Validate and apply a phase transition in one step (P1, P2).
    pub fn transition_to(
        &mut self,
        next: AgentRunPhase,
        result: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StatusInvariantError> {
        if self.phase.is_terminal() {
            return Err(StatusInvariantError::TerminalPhaseMutated {
                from: self.phase,
                to: next,
            });
        }
        if !self.phase.can_transition_to(next) {
            return Err(StatusInvariantError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        match next {
            AgentRunPhase::Succeeded => {
                if result.as_deref().unwrap_or("").is_empty() || error.is_some() {
                    return Err(StatusInvariantError::SucceededExclusivity);
                }
            }
            AgentRunPhase::Failed | AgentRunPhase::Timeout => {
                if error.as_deref().unwrap_or("").is_empty() || result.is_some() {
                    return Err(StatusInvariantError::FailedExclusivity);
                }
            }
            _ => {}
        }
        self.phase = next;
        self.result = result;
        self.error = error;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

/// Deterministic session key for a channel-originated run (spec.md §4.8).
pub fn channel_session_key(channel: &str, chat_id: &str, monotonic: u64) -> String {
    format!("channel-{channel}-{chat_id}-{monotonic}")
}
