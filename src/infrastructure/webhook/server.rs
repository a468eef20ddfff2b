//! Admission webhook HTTP server (SPEC_FULL.md §4.12).
//!
//! Grounded on the teacher's `infrastructure::mcp::http_server` (an axum
//! `Router` over a `Clone` app-state struct, bound with
//! `tokio::net::TcpListener` + `axum::serve`); generalized from the
//! teacher's single JSON-RPC route to the two-route Kubernetes
//! `AdmissionReview` contract. The handlers only (de)serialize JSON and
//! fetch already-resolved domain state — every decision is made by
//! [`crate::services::admission_validator::validate`], the same function
//! the AgentRun Reconciler (C5) calls, so the webhook and the in-cluster
//! reconciler can never disagree about what a pod is allowed to look like.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use k8s_openapi::api::core::v1::{Container, Pod, ResourceRequirements, VolumeMount};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::domain::models::common::labels;
use crate::domain::models::{AgentRun, AgentRunPhase, Instance, Policy};
use crate::domain::ports::ResourceStore;
use crate::infrastructure::logging::AuditLogger;
use crate::services::admission_validator::{validate, AdmissionContext};
use crate::services::pod_builder::PodBuilderConfig;

use super::types::AdmissionReviewResponse;

/// Shared state for both the `/validate` and `/mutate` handlers: the
/// cluster-backed stores needed to resolve the Policy bound to a pod's
/// Instance, and the same [`PodBuilderConfig`] the Pod Builder (C1) was
/// given, so a mutated default matches what C1 would have produced.
#[derive(Clone)]
pub struct WebhookState {
    pub instances: Arc<dyn ResourceStore<Instance>>,
    pub policies: Arc<dyn ResourceStore<Policy>>,
    pub agent_runs: Arc<dyn ResourceStore<AgentRun>>,
    pub pod_builder_config: PodBuilderConfig,
    pub audit: Option<Arc<AuditLogger>>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/validate", post(handle_validate))
        .route("/mutate", post(handle_mutate))
        .with_state(state)
}

pub async fn serve(state: WebhookState, addr: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("admission webhook listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_validate(
    State(state): State<WebhookState>,
    Json(review): Json<super::types::AdmissionReviewRequest>,
) -> Json<AdmissionReviewResponse> {
    let uid = review.request.uid.clone();

    let pod: Pod = match serde_json::from_value(review.request.object.clone()) {
        Ok(pod) => pod,
        Err(e) => {
            warn!("admission request carried a non-Pod object: {e}");
            return Json(AdmissionReviewResponse::allow(uid));
        }
    };

    if !is_agent_run_pod(&pod) {
        return Json(AdmissionReviewResponse::allow(uid));
    }

    let (policy, instance_name) = match resolve_policy(&state, &pod).await {
        Ok(resolved) => resolved,
        Err(message) => return Json(AdmissionReviewResponse::deny(uid, message)),
    };

    let ctx = AdmissionContext {
        spawn_depth: pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::SPAWN_DEPTH))
            .and_then(|v| v.parse().ok()),
        running_count_for_instance: running_count(&state, &instance_name).await,
    };

    match validate(&pod, &policy, &ctx) {
        Ok(()) => Json(AdmissionReviewResponse::allow(uid)),
        Err(e) => {
            info!("denying pod admission for instance {instance_name}: {e}");
            if let Some(audit) = &state.audit {
                let audit = audit.clone();
                let instance_name = instance_name.clone();
                let reason = e.to_string();
                tokio::spawn(async move {
                    let _ = audit
                        .log_operation("admission_rejected", "admission-webhook", Some(&instance_name), false, Some(json!({ "reason": reason })))
                        .await;
                });
            }
            Json(AdmissionReviewResponse::deny(uid, e.to_string()))
        }
    }
}

async fn handle_mutate(
    State(state): State<WebhookState>,
    Json(review): Json<super::types::AdmissionReviewRequest>,
) -> Json<AdmissionReviewResponse> {
    let uid = review.request.uid.clone();

    let pod: Pod = match serde_json::from_value(review.request.object.clone()) {
        Ok(pod) => pod,
        Err(_) => return Json(AdmissionReviewResponse::allow(uid)),
    };

    if !is_agent_run_pod(&pod) {
        return Json(AdmissionReviewResponse::allow(uid));
    }

    let (policy, _instance_name) = match resolve_policy(&state, &pod).await {
        Ok(resolved) => resolved,
        // A pod with no resolvable Policy is rejected by `/validate`, not
        // mutated here; fall through without a patch and let validation
        // produce the denial.
        Err(_) => return Json(AdmissionReviewResponse::allow(uid)),
    };

    let patch = build_mutation_patch(&pod, &policy, &state.pod_builder_config);
    if patch.as_array().is_some_and(|ops| ops.is_empty()) {
        Json(AdmissionReviewResponse::allow(uid))
    } else {
        Json(AdmissionReviewResponse::patch(uid, &patch))
    }
}

fn is_agent_run_pod(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::COMPONENT))
        .map(|v| v.as_str())
        == Some(labels::COMPONENT_AGENT_RUN)
}

async fn resolve_policy(state: &WebhookState, pod: &Pod) -> Result<(crate::domain::policy::ResolvedPolicy, String), String> {
    let instance_name = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::INSTANCE))
        .cloned()
        .ok_or_else(|| "pod carries no instance label".to_string())?;

    let instance = state
        .instances
        .get(&instance_name)
        .await
        .map_err(|e| format!("failed to load instance {instance_name}: {e}"))?
        .ok_or_else(|| format!("instance {instance_name} not found"))?;

    let policy_name = instance
        .spec
        .policy_ref
        .ok_or_else(|| format!("instance {instance_name} has no policyRef"))?;

    let policy = state
        .policies
        .get(&policy_name)
        .await
        .map_err(|e| format!("failed to load policy {policy_name}: {e}"))?
        .ok_or_else(|| format!("policy {policy_name} not found"))?;

    let resolved = crate::domain::policy::resolve(&policy).map_err(|e| e.to_string())?;
    Ok((resolved, instance_name))
}

async fn running_count(state: &WebhookState, instance_name: &str) -> u32 {
    let runs = match state.agent_runs.list().await {
        Ok(runs) => runs,
        Err(e) => {
            error!("failed to list agent runs while counting concurrency for {instance_name}: {e}");
            return 0;
        }
    };
    runs.iter()
        .filter(|r| r.spec.instance_name == instance_name && r.status.as_ref().map(|s| s.phase) == Some(AgentRunPhase::Running))
        .count() as u32
}

/// Build the RFC 6902 JSON Patch for the admission-time mutations
/// spec.md §4.10's closing paragraph assigns to the webhook: default
/// resource limits, IPC-bridge sidecar injection, a network-mode label
/// the cluster's NetworkPolicy selects on, and a completion-TTL
/// annotation for the cleanup reconciler.
fn build_mutation_patch(pod: &Pod, policy: &crate::domain::policy::ResolvedPolicy, config: &PodBuilderConfig) -> Value {
    let mut ops = Vec::new();
    let spec = pod.spec.as_ref();
    let containers = spec.map(|s| s.containers.as_slice()).unwrap_or(&[]);

    let caps = policy.resource_caps();
    for (index, container) in containers.iter().enumerate() {
        if container.resources.as_ref().and_then(|r| r.limits.as_ref()).is_none() {
            ops.push(json!({
                "op": "add",
                "path": format!("/spec/containers/{index}/resources"),
                "value": default_resources(&caps),
            }));
        }
    }

    if !containers.iter().any(|c| c.name == "ipc-bridge") {
        ops.push(json!({
            "op": "add",
            "path": "/spec/containers/-",
            "value": bridge_container(config),
        }));
    }

    let network_label_present = pod
        .metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key("sympozium.ai/network-mode"));
    if !network_label_present {
        let mode = network_mode_label(policy.sandbox.network_mode);
        if pod.metadata.labels.is_some() {
            ops.push(json!({
                "op": "add",
                "path": "/metadata/labels/sympozium.ai~1network-mode",
                "value": mode,
            }));
        } else {
            ops.push(json!({
                "op": "add",
                "path": "/metadata/labels",
                "value": { "sympozium.ai/network-mode": mode },
            }));
        }
    }

    let ttl_annotation_present = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key("sympozium.ai/ttl-seconds-after-finished"));
    if !ttl_annotation_present {
        const DEFAULT_TTL_SECONDS: &str = "300";
        if pod.metadata.annotations.is_some() {
            ops.push(json!({
                "op": "add",
                "path": "/metadata/annotations/sympozium.ai~1ttl-seconds-after-finished",
                "value": DEFAULT_TTL_SECONDS,
            }));
        } else {
            ops.push(json!({
                "op": "add",
                "path": "/metadata/annotations",
                "value": { "sympozium.ai/ttl-seconds-after-finished": DEFAULT_TTL_SECONDS },
            }));
        }
    }

    Value::Array(ops)
}

fn default_resources(caps: &crate::domain::models::ResourceCaps) -> ResourceRequirements {
    let mut limits = std::collections::BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(format!("{}m", caps.cpu_millicores)));
    limits.insert("memory".to_string(), Quantity(format!("{}Mi", caps.memory_mb)));
    ResourceRequirements { limits: Some(limits.clone()), requests: Some(limits), ..Default::default() }
}

fn bridge_container(config: &PodBuilderConfig) -> Container {
    Container {
        name: "ipc-bridge".to_string(),
        image: Some(config.ipc_bridge_image.clone()),
        volume_mounts: Some(vec![VolumeMount {
            name: "ipc".to_string(),
            mount_path: "/ipc".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn network_mode_label(mode: crate::domain::models::NetworkMode) -> &'static str {
    use crate::domain::models::NetworkMode;
    match mode {
        NetworkMode::None => "none",
        NetworkMode::Restricted => "restricted",
        NetworkMode::Unrestricted => "unrestricted",
    }
}
