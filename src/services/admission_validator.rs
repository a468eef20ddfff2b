//! Admission Validator (spec.md §4.10, §9, C10).
//!
//! Pure decision function shared by the webhook adapter
//! (`infrastructure::webhook`) and the AgentRun Reconciler (C5) — per §9
//! "a single resolved-Policy function ... should feed both; do not
//! re-derive rules in two places." Neither caller re-implements rule
//! checking; both call [`validate`] over the same [`ResolvedPolicy`] the
//! Pod Builder used to construct the pod.

use k8s_openapi::api::core::v1::Pod;

use crate::domain::error::AdmissionError;
use crate::domain::models::common::labels;
use crate::domain::policy::ResolvedPolicy;

/// Everything the validator needs about the would-be admission beyond the
/// pod spec itself: the parent/depth label pair (if any) and the current
/// count of Running AgentRuns for the Instance this pod belongs to.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext {
    pub spawn_depth: Option<u32>,
    pub running_count_for_instance: u32,
}

/// Validate a pod template against the Policy it was built for (§4.10
/// rules 1-6, run in the listed order so the first violation always wins
/// deterministically). Mutation (default limits, bridge injection, TTL)
/// is the admission webhook's job, not this pure check's (§4.10 closing
/// paragraph) — see `infrastructure::webhook` for that side.
pub fn validate(pod: &Pod, policy: &ResolvedPolicy, ctx: &AdmissionContext) -> Result<(), AdmissionError> {
    let spec = pod.spec.as_ref();
    let containers = spec.map(|s| s.containers.as_slice()).unwrap_or(&[]);

    if policy.sandbox.required {
        let sandbox = containers.iter().find(|c| c.name == "sandbox");
        let sandbox = sandbox.ok_or(AdmissionError::MissingSandboxContainer)?;
        let sc = sandbox.security_context.as_ref();
        let req = &policy.sandbox.security_context;
        let satisfied = sc.is_some_and(|sc| {
            let drops_all_capabilities = sc
                .capabilities
                .as_ref()
                .and_then(|c| c.drop.as_ref())
                .is_some_and(|d| d.iter().any(|c| c == "ALL"));
            sc.read_only_root_filesystem.unwrap_or(false) == req.read_only_root_filesystem
                && sc.run_as_non_root.unwrap_or(false) == req.run_as_non_root
                && (!req.drop_all_capabilities || drops_all_capabilities)
        });
        if !satisfied {
            return Err(AdmissionError::InsecureSandboxContext(
                "sandbox security context does not match policy".to_string(),
            ));
        }
    }

    let caps = policy.resource_caps();
    for container in containers {
        if let Some(resources) = &container.resources {
            if let Some(limits) = &resources.limits {
                if exceeds(limits.get("cpu").map(|q| q.0.as_str()), &format!("{}m", caps.cpu_millicores)) {
                    return Err(AdmissionError::ResourceCapExceeded { container: container.name.clone() });
                }
                if exceeds(limits.get("memory").map(|q| q.0.as_str()), &format!("{}Mi", caps.memory_mb)) {
                    return Err(AdmissionError::ResourceCapExceeded { container: container.name.clone() });
                }
            }
        }
    }

    for container in containers {
        if let Some(mounts) = &container.volume_mounts {
            for mount in mounts {
                if policy.is_mount_blocked(&mount.mount_path) {
                    return Err(AdmissionError::BlockedMountPath(mount.mount_path.clone()));
                }
            }
        }
    }

    if containers.iter().any(|c| c.name == "skill-browser") && !policy.feature_enabled("browser") {
        return Err(AdmissionError::FeatureGateDisabled("browser".to_string()));
    }

    if let Some(depth) = ctx.spawn_depth {
        if depth > policy.sub_agent.max_depth {
            return Err(AdmissionError::SpawnDepthExceeded { depth, max: policy.sub_agent.max_depth });
        }
    }

    let instance_name = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::INSTANCE))
        .cloned()
        .unwrap_or_default();
    if ctx.running_count_for_instance >= policy.sub_agent.max_concurrent {
        return Err(AdmissionError::ConcurrencyLimitExceeded {
            instance: instance_name,
            limit: policy.sub_agent.max_concurrent,
        });
    }

    Ok(())
}

/// Compare a Quantity string (e.g. `"500m"`, `"512Mi"`) against the cap of
/// the same unit. Quantities here are always produced by the Pod Builder
/// in this exact `<int><suffix>` shape, so a numeric-prefix comparison is
/// sufficient without pulling in a full Quantity-arithmetic crate.
fn exceeds(actual: Option<&str>, cap: &str) -> bool {
    let Some(actual) = actual else { return false };
    let parse = |s: &str| -> Option<u64> { s.trim_end_matches(|c: char| c.is_alphabetic()).parse().ok() };
    match (parse(actual), parse(cap)) {
        (Some(a), Some(c)) => a > c,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        DefaultAction, MountPolicy, NetworkMode as NM, SandboxPolicy, SecurityContextRequirements, SubAgentPolicy,
    };
    use k8s_openapi::api::core::v1::{
        Capabilities, Container, PodSpec, ResourceRequirements, SecurityContext, VolumeMount,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    fn policy(sandbox_required: bool, max_concurrent: u32, max_depth: u32) -> ResolvedPolicy {
        ResolvedPolicy {
            default_action: DefaultAction::Deny,
            rules: vec![],
            sub_agent: SubAgentPolicy { max_depth, max_concurrent, max_children_per_agent: 5, allow_cross_agent: false, require_sandbox: sandbox_required },
            sandbox: SandboxPolicy {
                required: sandbox_required,
                network_mode: NM::Restricted,
                security_context: SecurityContextRequirements::default(),
                resource_caps: Default::default(),
            },
            mounts: MountPolicy::default(),
            feature_gates: Default::default(),
        }
    }

    fn pod_without_sandbox() -> Pod {
        Pod {
            metadata: ObjectMeta::default(),
            spec: Some(PodSpec { containers: vec![Container { name: "agent".to_string(), ..Default::default() }], ..Default::default() }),
            status: None,
        }
    }

    fn pod_with_sandbox(req: &SecurityContextRequirements) -> Pod {
        Pod {
            metadata: ObjectMeta::default(),
            spec: Some(PodSpec {
                containers: vec![
                    Container { name: "agent".to_string(), ..Default::default() },
                    Container {
                        name: "sandbox".to_string(),
                        security_context: Some(SecurityContext {
                            read_only_root_filesystem: Some(req.read_only_root_filesystem),
                            run_as_non_root: Some(req.run_as_non_root),
                            capabilities: Some(Capabilities { drop: Some(vec!["ALL".to_string()]), ..Default::default() }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: None,
        }
    }

    fn ctx() -> AdmissionContext {
        AdmissionContext { spawn_depth: None, running_count_for_instance: 0 }
    }

    #[test]
    fn sandbox_required_without_container_is_rejected() {
        let pol = policy(true, 5, 1);
        let pod = pod_without_sandbox();
        assert_eq!(validate(&pod, &pol, &ctx()), Err(AdmissionError::MissingSandboxContainer));
    }

    #[test]
    fn sandbox_required_with_correct_container_passes() {
        let pol = policy(true, 5, 1);
        let pod = pod_with_sandbox(&pol.sandbox.security_context);
        assert!(validate(&pod, &pol, &ctx()).is_ok());
    }

    #[test]
    fn resource_cap_exceeded_is_rejected() {
        let mut pol = policy(false, 5, 1);
        pol.sandbox.resource_caps.cpu_millicores = 100;
        let mut limits = BTreeMap::new();
        limits.insert("cpu".to_string(), Quantity("500m".to_string()));
        let pod = Pod {
            metadata: ObjectMeta::default(),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "agent".to_string(),
                    resources: Some(ResourceRequirements { limits: Some(limits), ..Default::default() }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        };
        assert_eq!(validate(&pod, &pol, &ctx()), Err(AdmissionError::ResourceCapExceeded { container: "agent".to_string() }));
    }

    #[test]
    fn blocked_mount_path_is_rejected() {
        let mut pol = policy(false, 5, 1);
        pol.mounts.blocked_path_patterns = vec!["/etc/*".to_string()];
        let pod = Pod {
            metadata: ObjectMeta::default(),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "agent".to_string(),
                    volume_mounts: Some(vec![VolumeMount {
                        name: "workspace".to_string(),
                        mount_path: "/etc/shadow".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        };
        assert_eq!(validate(&pod, &pol, &ctx()), Err(AdmissionError::BlockedMountPath("/etc/shadow".to_string())));
    }

    #[test]
    fn spawn_depth_beyond_policy_maximum_is_rejected() {
        let pol = policy(false, 5, 1);
        let pod = pod_without_sandbox();
        let deep_ctx = AdmissionContext { spawn_depth: Some(2), running_count_for_instance: 0 };
        assert_eq!(validate(&pod, &pol, &deep_ctx), Err(AdmissionError::SpawnDepthExceeded { depth: 2, max: 1 }));
    }

    #[test]
    fn concurrency_at_policy_limit_is_rejected() {
        let pol = policy(false, 3, 5);
        let pod = pod_without_sandbox();
        let busy_ctx = AdmissionContext { spawn_depth: None, running_count_for_instance: 3 };
        assert_eq!(
            validate(&pod, &pol, &busy_ctx),
            Err(AdmissionError::ConcurrencyLimitExceeded { instance: String::new(), limit: 3 })
        );
    }
}
