//! Application services.
//!
//! The Sympozium reconcilers (C1-C10) and their supporting pure
//! decision modules, plus the process-wide `Config` and the
//! `BroadcastEventBus` they're built around.

pub mod admission_validator;
pub mod agentrun_reconciler;
pub mod channel_router;
pub mod clock;
pub mod config;
pub mod event_bus;
pub mod instance_reconciler;
pub mod ipc_router;
pub mod personapack_reconciler;
pub mod pod_builder;
pub mod policy_reconciler;
pub mod schedule_engine;
pub mod skillpack_reconciler;

pub use admission_validator::{validate as validate_admission, AdmissionContext};
pub use agentrun_reconciler::{
    apply as apply_run_action, decide_pending, decide_running, parent_labels, plan_memory_update, plan_spawn,
    memory_marker_warning, PodObservation, RunAction, SpawnRejection, SpawnRequest,
};
pub use channel_router::{plan_inbound, plan_outbound, InboundMessage, InboundPlan, OutboundReply};
pub use clock::VirtualClock;
pub use instance_reconciler::{
    active_pod_count, merge_channel_health, plan_channel_deployments, plan_memory_config_map,
    recompute as recompute_instance_status, ChannelDeploymentPlan, MemoryConfigMapPlan,
};
pub use ipc_router::{
    parse_outbound_message, parse_schedule_directive, OutboundMessageDirective, ScheduleAction,
    ScheduleDirective, ScheduleDirectiveEffect,
};
pub use personapack_reconciler::{
    is_ready_for_fanout, plan_fanout, recompute_status as recompute_persona_pack_status, PersonaInstallPlan,
};
pub use pod_builder::{build as build_pod, PodBuildOutput, PodBuilderConfig, RbacObject};
pub use policy_reconciler::{count_bound_instances, reconcile as reconcile_policy};
pub use schedule_engine::{
    active_runs_for_schedule, decide_fire, fire_outcome, interval_seconds_to_cron, is_due, next_fire_after,
    validate_cron, FireDecision, FireOutcome,
};
pub use skillpack_reconciler::{reconcile as reconcile_skill_pack, SkillPackReconcileOutcome};

pub use config::{Config, ConfigError};
pub use event_bus::{BroadcastEventBus, BroadcastEventBusConfig, Envelope};
