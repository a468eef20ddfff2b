//! PersonaPack controller loop (spec.md §4.7, C7).
//!
//! Fans a pack out into one Instance (and, for personas that carry a
//! schedule block, one Schedule and/or seed `ConfigMap`) per persona,
//! grounded on the same "diff the pure plan against what currently
//! exists, delete what fell out" shape the Instance Reconciler (C4) uses
//! for its channel-bridge Deployments. Instances and Schedules are real
//! CRDs with their own `ResourceStore`, so they are created/updated
//! through `ctx.instances`/`ctx.schedules` rather than a raw `kube::Api`;
//! only the optional per-persona seed `ConfigMap` goes through
//! server-side apply directly, the same way C4's memory `ConfigMap` does.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Resource, ResourceExt};
use tracing::{error, warn};

use crate::domain::errors::SympoziumError;
use crate::domain::models::{Instance, PersonaPack, PersonaPackStatus, Schedule, ScheduleSpec};
use crate::domain::ports::ResourceStore;
use crate::services::personapack_reconciler::{is_ready_for_fanout, plan_fanout, recompute_status, PersonaInstallPlan};

use super::ControllerContext;

/// Label marking an Instance/Schedule as owned by a PersonaPack's
/// fan-out, used to find what to delete when a persona is removed or
/// excluded (spec.md §4.7 "Idempotence").
const OWNER_LABEL: &str = "sympozium.ai/persona-pack";

pub async fn run(ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let packs: Api<PersonaPack> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    Controller::new(packs, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "personapack reconcile failed");
            }
        })
        .await;
    Ok(())
}

fn error_policy(_pack: Arc<PersonaPack>, error: &SympoziumError, _ctx: Arc<ControllerContext>) -> Action {
    error!(error = %error, "personapack reconciler error");
    Action::requeue(Duration::from_secs(30))
}

async fn reconcile(pack: Arc<PersonaPack>, ctx: Arc<ControllerContext>) -> Result<Action, SympoziumError> {
    let name = pack.name_any();

    if !is_ready_for_fanout(&pack.spec) {
        persist(&ctx, &pack, &name, recompute_status(&pack.spec, &[])).await?;
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    let plan = plan_fanout(&name, &pack.spec);

    for install in &plan {
        ensure_instance(&ctx, &name, install).await?;
        if let (Some(schedule_name), Some(schedule_spec)) = (&install.schedule_name, &install.schedule_spec) {
            ensure_schedule(&ctx, &name, schedule_name, schedule_spec.clone()).await?;
        }
        if let (Some(config_map_name), Some(data)) = (&install.seed_config_map_name, &install.seed_config_map_data) {
            ensure_seed_config_map(&ctx, config_map_name, data.clone()).await?;
        }
    }

    delete_removed_children(&ctx, &name, &plan).await?;

    let status = recompute_status(&pack.spec, &plan);
    persist(&ctx, &pack, &name, status).await?;
    Ok(Action::requeue(Duration::from_secs(60)))
}

async fn persist(ctx: &ControllerContext, pack: &PersonaPack, name: &str, status: PersonaPackStatus) -> Result<(), SympoziumError> {
    let mut updated = pack.clone();
    updated.status = Some(status);
    ctx.persona_packs.update(name, updated).await?;
    Ok(())
}

async fn ensure_instance(ctx: &ControllerContext, pack_name: &str, install: &PersonaInstallPlan) -> Result<(), SympoziumError> {
    let existing = ctx.instances.get(&install.instance_name).await?;
    let mut instance = existing.clone().unwrap_or(Instance { metadata: Default::default(), spec: install.instance_spec.clone(), status: None });
    instance.meta_mut().name = Some(install.instance_name.clone());
    instance.spec = install.instance_spec.clone();
    instance.meta_mut().labels.get_or_insert_with(Default::default).insert(OWNER_LABEL.to_string(), pack_name.to_string());

    if existing.is_some() {
        ctx.instances.update(&install.instance_name, instance).await?;
    } else {
        ctx.instances.create(&install.instance_name, instance).await?;
    }
    Ok(())
}

async fn ensure_schedule(
    ctx: &ControllerContext,
    pack_name: &str,
    schedule_name: &str,
    spec: ScheduleSpec,
) -> Result<(), SympoziumError> {
    let existing = ctx.schedules.get(schedule_name).await?;
    let mut schedule = existing.clone().unwrap_or(Schedule { metadata: Default::default(), spec: spec.clone(), status: None });
    schedule.meta_mut().name = Some(schedule_name.to_string());
    schedule.spec = spec;
    schedule.meta_mut().labels.get_or_insert_with(Default::default).insert(OWNER_LABEL.to_string(), pack_name.to_string());

    if existing.is_some() {
        ctx.schedules.update(schedule_name, schedule).await?;
    } else {
        ctx.schedules.create(schedule_name, schedule).await?;
    }
    Ok(())
}

async fn ensure_seed_config_map(ctx: &ControllerContext, name: &str, data: BTreeMap<String, String>) -> Result<(), SympoziumError> {
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let config_map = ConfigMap {
        metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
        data: Some(data),
        ..Default::default()
    };
    config_maps
        .patch(name, &PatchParams::apply("sympozium-controller").force(), &Patch::Apply(&config_map))
        .await?;
    Ok(())
}

/// Delete every owned Instance/Schedule that is no longer in the plan —
/// covers both a persona being added to `excludedPersonas` and one being
/// removed from the pack outright (spec.md §4.7 "Idempotence").
async fn delete_removed_children(ctx: &ControllerContext, pack_name: &str, plan: &[PersonaInstallPlan]) -> Result<(), SympoziumError> {
    let wanted_instances: Vec<&str> = plan.iter().map(|p| p.instance_name.as_str()).collect();
    let wanted_schedules: Vec<&str> = plan.iter().filter_map(|p| p.schedule_name.as_deref()).collect();

    for instance in ctx.instances.list().await? {
        let owned_by_this_pack = instance.meta().labels.as_ref().and_then(|l| l.get(OWNER_LABEL)).map(String::as_str) == Some(pack_name);
        let name = instance.name_any();
        if owned_by_this_pack && !wanted_instances.contains(&name.as_str()) {
            ctx.instances.delete(&name).await?;
        }
    }

    for schedule in ctx.schedules.list().await? {
        let owned_by_this_pack = schedule.meta().labels.as_ref().and_then(|l| l.get(OWNER_LABEL)).map(String::as_str) == Some(pack_name);
        let name = schedule.name_any();
        if owned_by_this_pack && !wanted_schedules.contains(&name.as_str()) {
            ctx.schedules.delete(&name).await?;
        }
    }
    Ok(())
}
