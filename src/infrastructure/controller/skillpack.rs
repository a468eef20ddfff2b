//! SkillPack controller loop (spec.md §4.2, C2).
//!
//! Owns the content `ConfigMap` the Pod Builder (C1) mounts into the
//! sandbox container. Not a `ResourceStore` (no CRD), applied directly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::ResourceExt;
use tracing::{error, warn};

use crate::domain::errors::SympoziumError;
use crate::domain::models::SkillPack;
use crate::domain::ports::ResourceStore;
use crate::services::skillpack_reconciler::reconcile as reconcile_skillpack;

use super::ControllerContext;

pub async fn run(ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let packs: Api<SkillPack> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    Controller::new(packs, WatcherConfig::default())
        .owns(config_maps, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "skillpack reconcile failed");
            }
        })
        .await;
    Ok(())
}

fn error_policy(_pack: Arc<SkillPack>, error: &SympoziumError, _ctx: Arc<ControllerContext>) -> Action {
    error!(error = %error, "skillpack reconciler error");
    Action::requeue(Duration::from_secs(30))
}

async fn reconcile(pack: Arc<SkillPack>, ctx: Arc<ControllerContext>) -> Result<Action, SympoziumError> {
    let name = pack.name_any();
    let outcome = reconcile_skillpack(&name, &pack);

    if let Some(data) = outcome.config_map_data.clone() {
        apply_content_config_map(&ctx, &outcome.status.content_config_map, data).await?;
    }

    let mut updated = (*pack).clone();
    updated.status = Some(outcome.status);
    ctx.skill_packs.update(&name, updated).await?;

    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn apply_content_config_map(
    ctx: &ControllerContext,
    config_map_name: &Option<String>,
    data: BTreeMap<String, String>,
) -> Result<(), SympoziumError> {
    let Some(name) = config_map_name else { return Ok(()) };
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let config_map = ConfigMap {
        metadata: ObjectMeta { name: Some(name.clone()), ..Default::default() },
        data: Some(data),
        ..Default::default()
    };
    config_maps
        .patch(name, &PatchParams::apply("sympozium-controller").force(), &Patch::Apply(&config_map))
        .await?;
    Ok(())
}
