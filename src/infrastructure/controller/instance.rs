//! Instance controller loop (spec.md §4.4, C4).
//!
//! Owns two kinds of child resource the pure [`crate::services::instance_reconciler`]
//! never touches directly: the memory seed `ConfigMap` and one channel-bridge
//! `Deployment` per bound channel. Both are plain `kube::Api<T>` objects
//! (not [`crate::domain::ports::ResourceStore`]s — Sympozium has no CRD for
//! either), applied with the same server-side-apply pattern
//! `infrastructure::k8s::store` uses for CRDs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::ResourceExt;
use tracing::{error, warn};

use crate::domain::errors::SympoziumError;
use crate::domain::models::common::labels;
use crate::domain::models::instance::{channel_deployment_name, memory_config_map_name};
use crate::domain::models::Instance;
use crate::domain::ports::ResourceStore;
use crate::services::instance_reconciler::{
    plan_channel_deployments, plan_memory_config_map, recompute, MemoryConfigMapPlan,
};

use super::ControllerContext;

fn degraded_threshold() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

pub async fn run(ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let instances: Api<Instance> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    Controller::new(instances, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "instance reconcile failed");
            }
        })
        .await;
    Ok(())
}

fn error_policy(_inst: Arc<Instance>, error: &SympoziumError, _ctx: Arc<ControllerContext>) -> Action {
    error!(error = %error, "instance reconciler error");
    Action::requeue(Duration::from_secs(15))
}

async fn reconcile(inst: Arc<Instance>, ctx: Arc<ControllerContext>) -> Result<Action, SympoziumError> {
    let name = inst.name_any();
    let now = ctx.clock.now();

    ensure_memory_config_map(&ctx, &name, &inst).await?;
    ensure_channel_deployments(&ctx, &name, &inst).await?;

    let runs = ctx.agent_runs.list().await?;
    let status = recompute(&name, &inst, inst.status.clone().unwrap_or_default(), &runs, now, degraded_threshold());

    let mut updated = (*inst).clone();
    updated.status = Some(status);
    ctx.instances.update(&name, updated).await?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

async fn ensure_memory_config_map(ctx: &ControllerContext, instance_name: &str, inst: &Instance) -> Result<(), SympoziumError> {
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let name = memory_config_map_name(instance_name);

    match plan_memory_config_map(inst) {
        MemoryConfigMapPlan::Absent => {
            let _ = config_maps.delete(&name, &DeleteParams::default()).await;
        }
        MemoryConfigMapPlan::Ensure { seed_body } => {
            let already_exists = match config_maps.get(&name).await {
                Ok(_) => true,
                Err(kube::Error::Api(e)) if e.code == 404 => false,
                Err(e) => return Err(e.into()),
            };
            if !already_exists {
                let mut data = BTreeMap::new();
                data.insert("body".to_string(), seed_body);
                let config_map = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        labels: Some(instance_labels(instance_name)),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                config_maps
                    .patch(&name, &PatchParams::apply("sympozium-controller").force(), &Patch::Apply(&config_map))
                    .await?;
            }
        }
    }
    Ok(())
}

async fn ensure_channel_deployments(ctx: &ControllerContext, instance_name: &str, inst: &Instance) -> Result<(), SympoziumError> {
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let existing: Vec<String> = deployments
        .list(&ListParams::default().labels(&format!("{}={}", labels::INSTANCE, instance_name)))
        .await?
        .into_iter()
        .filter_map(|d| d.metadata.name)
        .collect();

    let plan = plan_channel_deployments(instance_name, inst, &existing);

    for channel_type in &plan.ensure {
        let name = channel_deployment_name(instance_name, channel_type);
        let deployment = build_channel_deployment(&name, instance_name, channel_type, ctx);
        deployments
            .patch(&name, &PatchParams::apply("sympozium-controller").force(), &Patch::Apply(&deployment))
            .await?;
    }
    for name in &plan.delete_names {
        let _ = deployments.delete(name, &DeleteParams::default()).await;
    }
    Ok(())
}

fn build_channel_deployment(name: &str, instance_name: &str, channel_type: &str, ctx: &ControllerContext) -> Deployment {
    let mut pod_labels = instance_labels(instance_name);
    pod_labels.insert(labels::COMPONENT.to_string(), "channel-bridge".to_string());
    pod_labels.insert("sympozium.ai/channel-type".to_string(), channel_type.to_string());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(pod_labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(pod_labels), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "channel-bridge".to_string(),
                        image: Some(ctx.pod_builder_config.channel_bridge_image.clone()),
                        env: Some(vec![
                            EnvVar {
                                name: "SYMPOZIUM_INSTANCE_NAME".to_string(),
                                value: Some(instance_name.to_string()),
                                value_from: None,
                            },
                            EnvVar {
                                name: "SYMPOZIUM_CHANNEL_TYPE".to_string(),
                                value: Some(channel_type.to_string()),
                                value_from: None,
                            },
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn instance_labels(instance_name: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(labels::INSTANCE.to_string(), instance_name.to_string());
    map
}
