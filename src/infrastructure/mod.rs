//! Infrastructure layer
//!
//! Adapters over external dependencies: the cluster (`kube::Api`-backed
//! `ResourceStore<T>` and client bootstrap), structured logging and the
//! audit trail, and the admission webhook server.

pub mod controller;
pub mod k8s;
pub mod logging;
pub mod webhook;
