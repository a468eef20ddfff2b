//! Per-concern error enums (spec.md §7 error taxonomy).
//!
//! One `thiserror` enum per failure domain, each exposing
//! `is_transient`/`is_permanent` so the reconcile loop (§5, §7) can decide
//! between a jittered requeue and writing a terminal status without
//! re-deriving that judgment call at every call site.

use thiserror::Error;

/// Errors reading/writing the cluster resource store (§5 "shared-resource
/// policy").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("optimistic-concurrency conflict on {0}")]
    Conflict(String),

    #[error("cluster API request failed: {0}")]
    Request(String),

    #[error("object failed validation: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Transient I/O per §7: conflicts and request failures are retried
    /// with back-off; validation failures are not.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Request(_))
    }

    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors publishing to or consuming from the event bus (§6).
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event bus publish failed: {0}")]
    PublishFailed(String),

    #[error("event bus disconnected")]
    Disconnected,

    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
}

impl EventBusError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::PublishFailed(_) | Self::Disconnected)
    }
}

/// Errors from the pure pod-builder (§4.1). All permanent: a malformed
/// Policy/Instance/SkillPack combination cannot be fixed by retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PodBuilderError {
    #[error("referenced SkillPack '{0}' is not in the enumerated set")]
    MissingSkillPack(String),

    #[error("auth secret reference is empty")]
    MissingAuthSecret,

    #[error("sidecar RBAC rule for SkillPack '{0}' is malformed: {1}")]
    MalformedRbac(String, String),
}

/// Errors from Policy validation/normalization (§4.3, §7 "Validation").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("tool rule references unknown pattern '{0}'")]
    UnknownToolPattern(String),

    #[error("duplicate tool pattern '{0}' in rule list")]
    DuplicateRule(String),

    #[error("sub-agent max-concurrent must be >= 1")]
    InvalidConcurrency,
}

/// Admission-time rejection reasons (§4.10, §7 "Policy rejection", P9).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("sandbox container required by policy but absent")]
    MissingSandboxContainer,

    #[error("sandbox security context does not satisfy policy: {0}")]
    InsecureSandboxContext(String),

    #[error("resource request on container '{container}' exceeds policy cap")]
    ResourceCapExceeded { container: String },

    #[error("volume mount path '{0}' matches a blocked pattern")]
    BlockedMountPath(String),

    #[error("feature-gated sidecar '{0}' present but feature is disabled")]
    FeatureGateDisabled(String),

    #[error("spawn depth {depth} exceeds policy maximum {max}")]
    SpawnDepthExceeded { depth: u32, max: u32 },

    #[error("concurrent running AgentRuns for instance '{instance}' at policy limit {limit}")]
    ConcurrencyLimitExceeded { instance: String, limit: u32 },
}

/// Schedule-engine errors (§4.6, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),
    #[error("schedule '{0}' references unknown instance '{1}'")]
    InstanceNotFound(String, String),
}

/// IPC-directive errors (§4.9, §7 "User error" — these quarantine the
/// file rather than retry).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpcError {
    #[error("malformed IPC directive: {0}")]
    Malformed(String),

    #[error("unknown schedule action '{0}'")]
    UnknownAction(String),

    #[error("schedule name '{0}' is not a valid DNS label")]
    InvalidScheduleName(String),

    #[error("channel '{0}' is not bound on this instance")]
    UnboundChannel(String),
}

/// Channel-router errors (§4.8).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelRouterError {
    #[error("instance '{0}' not found")]
    UnknownInstance(String),

    #[error("instance '{0}' has no auth configured")]
    NoAuthConfigured(String),
}
