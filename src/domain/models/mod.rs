//! Custom-resource spec/status types (spec.md §3) and the small value
//! types shared between them. Framework-agnostic aside from the
//! `kube::CustomResource` derive, which only generates the typed `Api<T>`
//! wrapper and CRD manifest — no cluster I/O lives here.

pub mod agent_run;
pub mod common;
pub mod instance;
pub mod persona_pack;
pub mod policy;
pub mod schedule;
pub mod skill_pack;

pub use agent_run::{AgentRun, AgentRunPhase, AgentRunSpec, AgentRunStatus, StatusInvariantError};
pub use common::{
    annotations, labels, AuthRef, ChannelBinding, ChannelType, CleanupPolicy, ModelSpec,
    ObjectRef, ParentLink, TokenUsage,
};
pub use instance::{
    ChannelHealth, ChannelHealthState, Instance, InstancePhase, InstanceSpec, InstanceStatus,
    MemorySettings, ModelAgentConfig,
};
pub use persona_pack::{
    Persona, PersonaPack, PersonaPackPhase, PersonaPackSpec, PersonaPackStatus,
    PersonaScheduleBlock, PersonaScheduleTiming,
};
pub use policy::{
    DefaultAction, MountPolicy, NetworkMode, Policy, PolicySpec, PolicyStatus, ResourceCaps,
    RuleAction, SandboxPolicy, SecurityContextRequirements, SubAgentPolicy, ToolGating, ToolRule,
};
pub use schedule::{
    ConcurrencyPolicy, Schedule, ScheduleSpec, SchedulePhase, ScheduleStatus, ScheduleTriggerType,
};
pub use skill_pack::{
    RbacRule, SidecarResources, SidecarSpec, SkillEntry, SkillPack, SkillPackPhase,
    SkillPackSpec, SkillPackStatus,
};
