//! Cluster-facing infrastructure: the `kube::Client` bootstrap and the
//! `ResourceStore<T>` implementation backed by `kube::Api<T>` (domain
//! ports, §9 "Cron state" design note on keeping reconcilers
//! trait-bound instead of client-bound).

pub mod client;
pub mod fake_store;
pub mod store;

pub use client::build_client;
pub use fake_store::InMemoryStore;
pub use store::KubeResourceStore;
