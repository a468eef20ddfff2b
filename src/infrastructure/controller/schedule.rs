//! Schedule controller loop (spec.md §4.6, C6).
//!
//! Watches `Schedule` and the `AgentRun`s it owns (so a fired run's own
//! completion, which changes `active_runs_for_schedule`'s result, triggers
//! a requeue promptly rather than waiting for the next tick).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, DeleteParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Resource, ResourceExt};
use tracing::{error, warn};

use crate::domain::errors::SympoziumError;
use crate::domain::models::common::{labels, CleanupPolicy, ModelSpec};
use crate::domain::models::{AgentRun, AgentRunSpec, Schedule, SchedulePhase};
use crate::domain::ports::ResourceStore;
use crate::services::schedule_engine::{active_runs_for_schedule, decide_fire, fire_outcome, is_due, next_fire_after, FireDecision};

use super::ControllerContext;

pub async fn run(ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let schedules: Api<Schedule> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let runs: Api<AgentRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    Controller::new(schedules, WatcherConfig::default())
        .owns(runs, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "schedule reconcile failed");
            }
        })
        .await;
    Ok(())
}

fn error_policy(_sched: Arc<Schedule>, error: &SympoziumError, _ctx: Arc<ControllerContext>) -> Action {
    error!(error = %error, "schedule reconciler error");
    Action::requeue(Duration::from_secs(10))
}

async fn reconcile(sched: Arc<Schedule>, ctx: Arc<ControllerContext>) -> Result<Action, SympoziumError> {
    let name = sched.name_any();
    let now = ctx.clock.now();
    let mut status = sched.status.clone().unwrap_or_default();

    if sched.spec.suspend {
        status.phase = SchedulePhase::Suspended;
        persist(&ctx, &sched, &name, status).await?;
        return Ok(Action::requeue(ctx.config.scheduler_tick()));
    }

    let after = status.last_schedule_time.unwrap_or_else(|| sched.meta().creation_timestamp.clone().map(|t| t.0).unwrap_or(now));

    let due = match is_due(&sched.spec.cron_expression, after, now) {
        Ok(due) => due,
        Err(e) => {
            status.phase = SchedulePhase::Error;
            status.last_error = Some(e.to_string());
            persist(&ctx, &sched, &name, status).await?;
            return Ok(Action::requeue(ctx.config.scheduler_tick()));
        }
    };

    if !due {
        status.phase = SchedulePhase::Active;
        let next = next_fire_after(&sched.spec.cron_expression, after)?;
        status.next_schedule_time = next;
        persist(&ctx, &sched, &name, status).await?;
        return Ok(Action::requeue(ctx.config.scheduler_tick()));
    }

    let runs = ctx.agent_runs.list().await?;
    let active: Vec<String> = active_runs_for_schedule(&name, &runs)
        .into_iter()
        .filter_map(|r| r.meta().name.clone())
        .collect();
    let decision = decide_fire(sched.spec.concurrency_policy, &active);

    let created_run_name = match &decision {
        FireDecision::Skip => None,
        FireDecision::CreateRun => Some(create_fired_run(&ctx, &name, &sched, now).await?),
        FireDecision::ReplaceAndCreateRun { runs_to_delete } => {
            let run_api: Api<AgentRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
            for victim in runs_to_delete {
                let _ = run_api.delete(victim, &DeleteParams::default()).await;
            }
            Some(create_fired_run(&ctx, &name, &sched, now).await?)
        }
    };

    let next = next_fire_after(&sched.spec.cron_expression, now)?;
    let outcome = fire_outcome(now, created_run_name, next);
    status.phase = SchedulePhase::Active;
    status.total_runs += outcome.total_runs_delta;
    status.last_schedule_time = Some(outcome.last_schedule_time);
    status.last_run_name = outcome.last_run_name.or(status.last_run_name);
    status.next_schedule_time = outcome.next_schedule_time;
    status.last_error = None;

    persist(&ctx, &sched, &name, status).await?;
    Ok(Action::requeue(ctx.config.scheduler_tick()))
}

async fn persist(ctx: &ControllerContext, sched: &Schedule, name: &str, status: crate::domain::models::schedule::ScheduleStatus) -> Result<(), SympoziumError> {
    let mut updated = sched.clone();
    updated.status = Some(status);
    ctx.schedules.update(name, updated).await?;
    Ok(())
}

async fn create_fired_run(
    ctx: &ControllerContext,
    schedule_name: &str,
    sched: &Schedule,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<String, SympoziumError> {
    let instance = ctx
        .instances
        .get(&sched.spec.instance_ref)
        .await?
        .ok_or_else(|| crate::domain::error::ScheduleError::InstanceNotFound(schedule_name.to_string(), sched.spec.instance_ref.clone()))?;

    let auth_secret_name = instance
        .spec
        .auth_refs
        .first()
        .map(|a| a.secret_name.clone())
        .unwrap_or_default();

    let run_name = format!("{}-{}", schedule_name, now.timestamp());
    let spec = AgentRunSpec {
        instance_name: sched.spec.instance_ref.clone(),
        agent_id: sched.spec.instance_ref.clone(),
        session_key: run_name.clone(),
        parent: None,
        task: sched.spec.task.clone(),
        system_prompt_override: None,
        model: ModelSpec {
            provider: instance.spec.agent.provider.clone(),
            model_id: instance.spec.agent.model_id.clone(),
            base_url: instance.spec.agent.base_url.clone(),
            auth_secret_name,
        },
        skill_refs: instance.spec.skill_refs.clone(),
        timeout_seconds: None,
        cleanup_policy: CleanupPolicy::Delete,
    };

    let mut run = AgentRun {
        metadata: Default::default(),
        spec,
        status: None,
    };
    run.meta_mut().name = Some(run_name.clone());
    run.meta_mut().labels.get_or_insert_with(Default::default).insert(labels::SCHEDULE.to_string(), schedule_name.to_string());
    run.meta_mut().labels.get_or_insert_with(Default::default).insert(labels::TRIGGER_TYPE.to_string(), format!("{:?}", sched.spec.trigger_type));

    ctx.agent_runs.create(&run_name, run).await?;
    Ok(run_name)
}
