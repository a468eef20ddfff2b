//! Policy controller loop (spec.md §4.3, C3).
//!
//! Has no owned children — it only recomputes `PolicyStatus` from the
//! Policy's own spec plus a snapshot of Instances that reference it, so
//! watching just `Policy` (no `.owns(...)`) is enough.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::ResourceExt;
use tracing::{error, warn};

use crate::domain::errors::SympoziumError;
use crate::domain::models::Policy;
use crate::domain::ports::ResourceStore;
use crate::services::policy_reconciler::reconcile as reconcile_policy;

use super::ControllerContext;

pub async fn run(ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let policies: Api<Policy> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    Controller::new(policies, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "policy reconcile failed");
            }
        })
        .await;
    Ok(())
}

fn error_policy(_policy: Arc<Policy>, error: &SympoziumError, _ctx: Arc<ControllerContext>) -> Action {
    error!(error = %error, "policy reconciler error");
    Action::requeue(Duration::from_secs(30))
}

async fn reconcile(policy: Arc<Policy>, ctx: Arc<ControllerContext>) -> Result<Action, SympoziumError> {
    let name = policy.name_any();
    let instances = ctx.instances.list().await?;
    let status = reconcile_policy(&name, &policy, &instances);

    let mut updated = (*policy).clone();
    updated.status = Some(status);
    ctx.policies.update(&name, updated).await?;

    Ok(Action::requeue(Duration::from_secs(60)))
}
