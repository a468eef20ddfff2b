//! AgentRun controller loop (spec.md §4.5, C5).
//!
//! Watches `AgentRun` directly (so creation/update/delete events drive
//! reconciliation promptly) and the owned `Pod` (so a crash Kubernetes
//! itself observes — eviction, OOMKill — also triggers a requeue). The
//! agent container's own result/error text rides home on its termination
//! message (`terminated.message`, populated from its
//! `terminationMessagePath`): this is the standard Kubernetes-native way
//! to hand a small payload back to a controller without inventing a new
//! side channel, and needs no additional RBAC beyond what C1 already
//! grants the pod's own service account.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Resource, ResourceExt};
use tracing::{error, warn};

use crate::domain::errors::SympoziumError;
use crate::domain::models::{AgentRun, AgentRunPhase, Policy, PolicySpec, SkillPack};
use crate::domain::policy::resolve as resolve_policy;
use crate::domain::ports::{Clock, EventBus, ResourceStore, Topic};
use crate::services::{
    admission_validator::{validate as validate_admission, AdmissionContext},
    agentrun_reconciler::{apply, decide_pending, decide_running, PodObservation, RunAction},
    pod_builder::build as build_pod,
};

use super::ControllerContext;

pub async fn run(ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let runs: Api<AgentRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    Controller::new(runs, WatcherConfig::default())
        .owns(pods, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "agentrun reconcile failed");
            }
        })
        .await;
    Ok(())
}

fn error_policy(_run: Arc<AgentRun>, error: &SympoziumError, _ctx: Arc<ControllerContext>) -> Action {
    error!(error = %error, "agentrun reconciler error");
    Action::requeue(Duration::from_secs(10))
}

async fn reconcile(run: Arc<AgentRun>, ctx: Arc<ControllerContext>) -> Result<Action, SympoziumError> {
    let name = run.name_any();
    let mut status = run.status.clone().unwrap_or_default();
    let now = ctx.clock.now();

    match status.phase {
        AgentRunPhase::Pending => reconcile_pending(&run, &name, &mut status, &ctx, now).await?,
        AgentRunPhase::Running => reconcile_running(&run, &name, &mut status, &ctx, now).await?,
        AgentRunPhase::Succeeded | AgentRunPhase::Failed | AgentRunPhase::Timeout => {
            reconcile_terminal(&run, &name, &ctx).await?;
            return Ok(Action::await_change());
        }
    }

    persist(&ctx, &run, &name, status).await?;
    Ok(Action::requeue(Duration::from_secs(15)))
}

async fn persist(
    ctx: &ControllerContext,
    run: &AgentRun,
    name: &str,
    status: crate::domain::models::agent_run::AgentRunStatus,
) -> Result<(), SympoziumError> {
    let mut updated = run.clone();
    updated.status = Some(status);
    ctx.agent_runs.update(name, updated).await?;
    Ok(())
}

async fn reconcile_pending(
    run: &AgentRun,
    name: &str,
    status: &mut crate::domain::models::agent_run::AgentRunStatus,
    ctx: &ControllerContext,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), SympoziumError> {
    let instance = match ctx.instances.get(&run.spec.instance_name).await? {
        Some(i) => i,
        None => {
            apply(status, &RunAction::RejectAdmission { reason: format!("instance '{}' not found", run.spec.instance_name) }, now)?;
            return Ok(());
        }
    };

    let policy = match &instance.spec.policy_ref {
        Some(policy_name) => ctx.policies.get(policy_name).await?,
        None => None,
    };
    let resolved = match policy.as_ref().map(resolve_policy) {
        Some(Ok(resolved)) => resolved,
        Some(Err(e)) => {
            apply(status, &RunAction::RejectAdmission { reason: e.to_string() }, now)?;
            return Ok(());
        }
        // No policy bound to the instance: fall back to resolving an
        // all-defaults Policy, which is fail-closed (deny-all tool
        // gating) rather than unrestricted.
        None => resolve_policy(&Policy {
            metadata: Default::default(),
            spec: PolicySpec::default(),
            status: None,
        })
        .expect("default PolicySpec always resolves"),
    };

    let skill_packs: Vec<SkillPack> = ctx.skill_packs.list().await?;
    let admission = match build_pod(run, &instance, &resolved, &skill_packs, &ctx.pod_builder_config) {
        Ok(output) => {
            let running_count = running_count_for_instance(ctx, &run.spec.instance_name).await?;
            let admission_ctx = AdmissionContext {
                spawn_depth: run.spec.parent.as_ref().map(|p| p.spawn_depth),
                running_count_for_instance: running_count,
            };
            match validate_admission(&output.pod, &resolved, &admission_ctx) {
                Ok(()) => Ok((output, instance.clone())),
                Err(e) => Err(e.to_string()),
            }
        }
        Err(e) => Err(e.to_string()),
    };

    match admission {
        Ok((output, _instance)) => {
            let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
            pods.create(&PostParams::default(), &output.pod).await?;
            status.pod_name = output.pod.meta().name.clone();
            apply(status, &decide_pending(Ok(())), now)?;
            ctx.event_bus
                .publish(
                    Topic::AgentRunRequested,
                    serde_json::json!({ "agentRunName": name, "instanceName": run.spec.instance_name }),
                )
                .await?;
            ctx.event_bus
                .publish(
                    Topic::AgentRunStarted,
                    serde_json::json!({ "agentRunName": name, "podName": status.pod_name }),
                )
                .await?;
            audit_spawn(ctx, name, &run.spec.instance_name, true, None).await;
        }
        Err(reason) => {
            audit_spawn(ctx, name, &run.spec.instance_name, false, Some(reason.clone())).await;
            apply(status, &decide_pending(Err(reason)), now)?;
        }
    }
    Ok(())
}

async fn audit_spawn(ctx: &ControllerContext, run_name: &str, instance_name: &str, success: bool, reason: Option<String>) {
    if let Some(audit) = &ctx.audit {
        let operation = if success { "agentrun_spawn" } else { "agentrun_rejected" };
        let metadata = reason.map(|reason| serde_json::json!({ "instance": instance_name, "reason": reason }));
        let _ = audit.log_operation(operation, "agentrun-reconciler", Some(run_name), success, metadata).await;
    }
}

async fn reconcile_running(
    run: &AgentRun,
    name: &str,
    status: &mut crate::domain::models::agent_run::AgentRunStatus,
    ctx: &ControllerContext,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), SympoziumError> {
    let deadline = status
        .started_at
        .map(|started| started + chrono::Duration::seconds(run.spec.timeout_seconds.unwrap_or(600) as i64));

    let observation = match &status.pod_name {
        Some(pod_name) => observe_pod(ctx, pod_name).await?,
        None => PodObservation::StillRunning,
    };

    let action = decide_running(&observation, now, deadline);
    if action == RunAction::Wait {
        return Ok(());
    }
    apply(status, &action, now)?;

    match &action {
        RunAction::Complete { .. } => {
            ctx.event_bus
                .publish(
                    Topic::AgentRunCompleted,
                    serde_json::json!({
                        "agentRunName": name,
                        "status": "Succeeded",
                        "response": status.result,
                        "tokenUsage": status.token_usage,
                    }),
                )
                .await?;
        }
        RunAction::Fail { error } | RunAction::RejectAdmission { reason: error } => {
            ctx.event_bus
                .publish(Topic::AgentRunFailed, serde_json::json!({ "agentRunName": name, "error": error }))
                .await?;
        }
        RunAction::TimedOut => {
            if let Some(pod_name) = &status.pod_name {
                let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
                let _ = pods.delete(pod_name, &Default::default()).await;
            }
            ctx.event_bus
                .publish(
                    Topic::AgentRunFailed,
                    serde_json::json!({ "agentRunName": name, "error": "deadline exceeded" }),
                )
                .await?;
        }
        RunAction::Admit | RunAction::Wait => {}
    }
    Ok(())
}

/// Memory round-trip (§4.5.1) and event emission for an already-terminal
/// run, idempotent via the `memory-applied` annotation so a requeue after
/// the terminal write never re-patches the ConfigMap or re-publishes.
async fn reconcile_terminal(run: &AgentRun, name: &str, ctx: &ControllerContext) -> Result<(), SympoziumError> {
    const APPLIED_ANNOTATION: &str = "sympozium.ai/memory-applied";
    let already_applied = run
        .meta()
        .annotations
        .as_ref()
        .is_some_and(|a| a.get(APPLIED_ANNOTATION).map(String::as_str) == Some("true"));
    if already_applied {
        return Ok(());
    }

    if let Some(status) = &run.status {
        if status.phase == AgentRunPhase::Succeeded {
            if let (Some(instance), Some(result)) = (ctx.instances.get(&run.spec.instance_name).await?, status.result.as_deref()) {
                if let Some(body) = crate::services::agentrun_reconciler::plan_memory_update(&instance, result) {
                    patch_memory_config_map(ctx, &run.spec.instance_name, &body).await?;
                }
                if let Some(warning) = crate::services::agentrun_reconciler::memory_marker_warning(result) {
                    warn!(run = %name, error = %warning, "malformed memory markers; memory ConfigMap left untouched");
                }
            }
        }
    }

    let mut updated = run.clone();
    updated
        .meta_mut()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(APPLIED_ANNOTATION.to_string(), "true".to_string());
    ctx.agent_runs.update(name, updated).await?;
    Ok(())
}

async fn patch_memory_config_map(ctx: &ControllerContext, instance_name: &str, body: &str) -> Result<(), SympoziumError> {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::{Patch, PatchParams};

    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let name = crate::domain::models::instance::memory_config_map_name(instance_name);
    let patch = serde_json::json!({ "data": { "body": body } });
    config_maps
        .patch(&name, &PatchParams::apply("sympozium-controller").force(), &Patch::Apply(&patch))
        .await?;
    Ok(())
}

async fn running_count_for_instance(ctx: &ControllerContext, instance_name: &str) -> Result<u32, SympoziumError> {
    let runs = ctx.agent_runs.list().await?;
    Ok(crate::services::instance_reconciler::active_pod_count(instance_name, &runs))
}

/// Read the agent container's termination message off its observed Pod
/// and turn it into a [`PodObservation`], or `StillRunning` while the pod
/// has not terminated yet.
async fn observe_pod(ctx: &ControllerContext, pod_name: &str) -> Result<PodObservation, SympoziumError> {
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let pod = match pods.get(pod_name).await {
        Ok(pod) => pod,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(PodObservation::StillRunning),
        Err(e) => return Err(e.into()),
    };

    let agent_status = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|c| c.name == "agent"));

    let Some(terminated) = agent_status.and_then(|s| s.state.as_ref()).and_then(|s| s.terminated.as_ref()) else {
        return Ok(PodObservation::StillRunning);
    };

    let message = terminated.message.clone().unwrap_or_default();
    if terminated.exit_code == 0 {
        Ok(PodObservation::SucceededWithResult(message))
    } else {
        Ok(PodObservation::FailedWithLogs(if message.is_empty() {
            format!("agent container exited with code {}", terminated.exit_code)
        } else {
            message
        }))
    }
}
