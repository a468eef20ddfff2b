//! Sympozium - Kubernetes-resident control plane for ephemeral
//! sandboxed LLM-agent pods.
//!
//! Declarative `Instance`/`AgentRun`/`Policy`/`SkillPack`/`Schedule`/
//! `PersonaPack` custom resources (`domain::models`) are turned into
//! running pods by a set of per-kind reconcile loops
//! (`infrastructure::controller`) backed by pure decision functions
//! (`services::*_reconciler`, `services::pod_builder`, ...). An
//! admission webhook (`infrastructure::webhook`) defaults and validates
//! those resources on write.

pub mod domain;
pub mod infrastructure;
pub mod services;
