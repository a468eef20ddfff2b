//! Wiring between the pure reconcilers in `services/` and the cluster.
//!
//! Each submodule owns exactly one CRD kind's `kube::runtime::Controller`
//! loop (grounded on the agentkernel reference operator's
//! `Controller::new(...).run(reconcile, error_policy, ctx)` shape) plus,
//! for the two long-running routers that have no CRD of their own
//! (Channel Router C8, IPC Router C9), a plain `tokio::spawn`'d loop. No
//! file in this directory re-derives a decision the pure `services::*`
//! functions already make — each reconcile function is a thin translation
//! from "fetch cluster state" to "call the pure function" to "write the
//! result back".

pub mod agentrun;
pub mod channel;
pub mod instance;
pub mod ipc;
pub mod personapack;
pub mod policy;
pub mod schedule;
pub mod skillpack;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use kube::Client;
use tracing::{error, info};

use crate::domain::models::{AgentRun, Instance, PersonaPack, Policy, Schedule, SkillPack};
use crate::domain::ports::{Clock, ResourceStore};
use crate::infrastructure::k8s::{build_client, KubeResourceStore};
use crate::infrastructure::logging::AuditLogger;
use crate::services::{BroadcastEventBus, BroadcastEventBusConfig, Config, PodBuilderConfig};

/// Shared handle every reconcile function and long-running router closes
/// over. One instance is built in `main` and cloned (cheaply, via `Arc`)
/// into each spawned task.
pub struct ControllerContext {
    pub client: Client,
    pub namespace: String,
    pub config: Config,
    pub pod_builder_config: PodBuilderConfig,
    pub clock: Arc<dyn Clock>,
    pub event_bus: Arc<BroadcastEventBus>,
    pub instances: Arc<dyn ResourceStore<Instance>>,
    pub policies: Arc<dyn ResourceStore<Policy>>,
    pub agent_runs: Arc<dyn ResourceStore<AgentRun>>,
    pub skill_packs: Arc<dyn ResourceStore<SkillPack>>,
    pub schedules: Arc<dyn ResourceStore<Schedule>>,
    pub persona_packs: Arc<dyn ResourceStore<PersonaPack>>,
    /// Security-relevant audit trail; `None` when `config.audit_log_path`
    /// is unset (audit logging is opt-in, not required to run).
    pub audit: Option<Arc<AuditLogger>>,
}

impl ControllerContext {
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let client = build_client().await?;
        let namespace = config.namespace.clone();
        let pod_builder_config = PodBuilderConfig {
            memory_max_kb_default: config.memory_max_kb_default,
            ..PodBuilderConfig::default()
        };

        macro_rules! store {
            ($field_manager:literal) => {
                Arc::new(KubeResourceStore::namespaced(client.clone(), &namespace, $field_manager))
            };
        }

        let audit = match &config.audit_log_path {
            Some(path) => Some(Arc::new(AuditLogger::new(path).await?)),
            None => None,
        };

        Ok(Arc::new(Self {
            client: client.clone(),
            namespace,
            pod_builder_config,
            clock: Arc::new(crate::domain::ports::SystemClock),
            event_bus: Arc::new(BroadcastEventBus::new(BroadcastEventBusConfig::default())),
            instances: store!("sympozium-controller"),
            policies: store!("sympozium-controller"),
            agent_runs: store!("sympozium-controller"),
            skill_packs: store!("sympozium-controller"),
            schedules: store!("sympozium-controller"),
            persona_packs: store!("sympozium-controller"),
            audit,
            config,
        }))
    }

    pub fn ipc_base_dir(&self) -> PathBuf {
        self.config.ipc_base_dir.clone()
    }
}

/// Run every reconciler, the two long-running routers, and the admission
/// webhook concurrently; return when the first one exits (they are all
/// meant to run forever, so any exit is treated as a fatal error by the
/// caller per spec.md §5 "Controller shutdown cancels all in-flight
/// reconciles").
pub async fn run(ctx: Arc<ControllerContext>, webhook_addr: String) -> Result<()> {
    info!(namespace = %ctx.namespace, "starting Sympozium controller loops");

    let webhook_state = crate::infrastructure::webhook::WebhookState {
        instances: ctx.instances.clone(),
        policies: ctx.policies.clone(),
        agent_runs: ctx.agent_runs.clone(),
        pod_builder_config: ctx.pod_builder_config.clone(),
        audit: ctx.audit.clone(),
    };

    let results = tokio::join!(
        agentrun::run(ctx.clone()),
        instance::run(ctx.clone()),
        policy::run(ctx.clone()),
        skillpack::run(ctx.clone()),
        schedule::run(ctx.clone()),
        personapack::run(ctx.clone()),
        channel::run(ctx.clone()),
        ipc::run(ctx.clone(), ctx.config.ipc_scan_interval()),
        crate::infrastructure::webhook::serve(webhook_state, &webhook_addr),
    );

    for result in [
        results.0, results.1, results.2, results.3, results.4, results.5, results.6, results.7, results.8,
    ] {
        if let Err(e) = result {
            error!(error = %e, "a controller loop exited with an error");
            return Err(e);
        }
    }
    Ok(())
}
