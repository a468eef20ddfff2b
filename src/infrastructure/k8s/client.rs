//! `kube::Client` bootstrap.
//!
//! Grounded on the teacher's `infrastructure/database` connection-pool
//! setup: one fallible async constructor, called once from `main`, the
//! resulting handle cloned cheaply into every reconciler context.

use anyhow::{Context, Result};
use kube::Client;

/// Build a `kube::Client` from the in-cluster service account or, when
/// running outside a cluster, the local kubeconfig — whichever
/// `kube::Config::infer` finds first.
pub async fn build_client() -> Result<Client> {
    let config = kube::Config::infer()
        .await
        .context("failed to infer kube config from in-cluster env or kubeconfig")?;
    Client::try_from(config).context("failed to build kube client")
}
