//! Pod Builder (spec.md §4.1, C1).
//!
//! Pure, deterministic: no I/O, no async, no clock. Given a fully-loaded
//! `AgentRun`/`Instance`/[`ResolvedPolicy`]/`SkillPack` set it returns the
//! pod template plus every auxiliary object the run needs. The reconciler
//! (C5) is the only caller that ever talks to the cluster; this module
//! never imports `kube::Api`.
//!
//! Grounded on the sandbox-pod construction in the agentkernel operator
//! reference (`Container`/`PodSpec`/`SecurityContext` struct literals with
//! `..Default::default()`), generalized from one fixed sandbox container to
//! the agent/bridge/sandbox/sidecar composition contract in §4.1.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, Container, EmptyDirVolumeSource, EnvFromSource, EnvVar,
    Pod, PodSpec, PodSecurityContext, ProjectedVolumeSource,
    ResourceRequirements, SeccompProfile, SecretEnvSource, SecurityContext, ServiceAccount,
    Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule as K8sPolicyRule, Role, RoleBinding, RoleRef,
    Subject,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::domain::error::PodBuilderError;
use crate::domain::models::{
    common::labels,
    instance::memory_config_map_name,
    skill_pack::content_config_map_name as skillpack_content_config_map_name,
    AgentRun, Instance, NetworkMode, SkillPack,
};
use crate::domain::policy::ResolvedPolicy;

const IPC_VOLUME: &str = "ipc";
const WORKSPACE_VOLUME: &str = "workspace";
const SKILLS_VOLUME: &str = "skills";
const MEMORY_VOLUME: &str = "memory";
const TASK_VOLUME: &str = "task";

const IPC_MOUNT_PATH: &str = "/ipc";
const WORKSPACE_MOUNT_PATH: &str = "/workspace";
const SKILLS_MOUNT_PATH: &str = "/skills";
const MEMORY_MOUNT_PATH: &str = "/memory";
const TASK_MOUNT_PATH: &str = "/ipc/input";

const AGENT_CONTAINER: &str = "agent";
const BRIDGE_CONTAINER: &str = "ipc-bridge";
const SANDBOX_CONTAINER: &str = "sandbox";

/// Knobs the builder needs but that don't belong on any CRD: the bridge
/// sidecar image and the process-wide memory default (spec.md §6
/// "Configuration surface"). Supplied by the caller so this module stays
/// pure over its arguments.
#[derive(Debug, Clone)]
pub struct PodBuilderConfig {
    pub ipc_bridge_image: String,
    pub memory_max_kb_default: u32,
    pub seccomp_profile_type: String,
    /// Image for the per-channel bridge Deployment the Instance Reconciler
    /// (C4) ensures one of per bound channel (spec.md §4.4 step 2). Lives
    /// here rather than on a new config struct since it's the same kind of
    /// "image this controller needs but no CRD names" knob as
    /// `ipc_bridge_image`.
    pub channel_bridge_image: String,
}

impl Default for PodBuilderConfig {
    fn default() -> Self {
        Self {
            ipc_bridge_image: "sympozium/ipc-bridge:latest".to_string(),
            memory_max_kb_default: 256,
            seccomp_profile_type: "RuntimeDefault".to_string(),
            channel_bridge_image: "sympozium/channel-bridge:latest".to_string(),
        }
    }
}

/// A namespaced Role+RoleBinding, or a cluster-scoped ClusterRole+Binding,
/// emitted for one sidecar's declared RBAC (§4.1 "Per-sidecar RBAC").
#[derive(Debug, Clone)]
pub enum RbacObject {
    Namespaced { role: Role, binding: RoleBinding },
    Cluster { role: ClusterRole, binding: ClusterRoleBinding },
}

/// Everything the pod builder produces for one AgentRun.
#[derive(Debug, Clone)]
pub struct PodBuildOutput {
    pub pod: Pod,
    pub task_config_map: ConfigMap,
    pub service_account: ServiceAccount,
    pub rbac: Vec<RbacObject>,
    pub network_policy: NetworkPolicy,
}

/// Deterministic names for a run's auxiliary resources; exposed so the
/// reconciler and the admission validator can refer to the same object
/// without recomputing the builder's internal naming scheme.
pub fn service_account_name(run_name: &str) -> String {
    format!("{run_name}-sa")
}

pub fn task_config_map_name(run_name: &str) -> String {
    format!("{run_name}-task")
}

pub fn network_policy_name(run_name: &str) -> String {
    format!("{run_name}-netpol")
}

fn rbac_role_name(run_name: &str, skill_pack_name: &str) -> String {
    format!("{run_name}-{skill_pack_name}-role")
}

fn rbac_binding_name(run_name: &str, skill_pack_name: &str) -> String {
    format!("{run_name}-{skill_pack_name}-binding")
}

fn sidecar_container_name(skill_pack_name: &str) -> String {
    format!("skill-{skill_pack_name}")
}

/// Build the pod and its auxiliary objects for one AgentRun.
///
/// `skill_packs` must contain exactly the SkillPacks named by
/// `run.spec.skill_refs`, in any order; a missing entry is a
/// [`PodBuilderError::MissingSkillPack`].
pub fn build(
    run: &AgentRun,
    instance: &Instance,
    policy: &ResolvedPolicy,
    skill_packs: &[SkillPack],
    config: &PodBuilderConfig,
) -> Result<PodBuildOutput, PodBuilderError> {
    let run_name = run.meta().name.clone().unwrap_or_default();
    let namespace = run.meta().namespace.clone();

    if run.spec.model.auth_secret_name.trim().is_empty() {
        return Err(PodBuilderError::MissingAuthSecret);
    }

    let resolved_skill_packs = resolve_skill_packs(run, skill_packs)?;

    let mut pod_labels = BTreeMap::new();
    pod_labels.insert(labels::INSTANCE.to_string(), run.spec.instance_name.clone());
    pod_labels.insert(labels::AGENT_ID.to_string(), run.spec.agent_id.clone());
    pod_labels.insert(labels::RUN_NAME.to_string(), run_name.clone());
    pod_labels.insert(labels::COMPONENT.to_string(), labels::COMPONENT_AGENT_RUN.to_string());
    if let Some(parent) = &run.spec.parent {
        pod_labels.insert(labels::PARENT_RUN.to_string(), parent.parent_run_name.clone());
        pod_labels.insert(labels::SPAWN_DEPTH.to_string(), parent.spawn_depth.to_string());
    }

    let mut pod_annotations = BTreeMap::new();
    if instance.spec.memory.enabled {
        pod_annotations.insert(
            "sympozium.ai/memory-config-map".to_string(),
            memory_config_map_name(&instance.meta().name.clone().unwrap_or_default()),
        );
    }

    let owner_ref = run
        .controller_owner_ref(&())
        .expect("AgentRun carries a name at build time");

    let task_cm = build_task_config_map(&run_name, &namespace, &pod_labels, &owner_ref, &run.spec.task);
    let service_account = build_service_account(&run_name, &namespace, &pod_labels, &owner_ref);

    let mut rbac = Vec::new();
    for (skill_pack_name, sidecar) in &resolved_skill_packs {
        if let Some(sidecar) = sidecar {
            rbac.extend(build_sidecar_rbac(
                &run_name,
                &namespace,
                skill_pack_name,
                sidecar,
                &service_account,
                &pod_labels,
                &owner_ref,
            )?);
        }
    }

    let config_map_volume_projections = resolved_skill_packs
        .iter()
        .map(|(name, _)| VolumeProjection {
            config_map: Some(k8s_openapi::api::core::v1::ConfigMapProjection {
                name: skillpack_content_config_map_name(name),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let mut volumes = vec![
        Volume {
            name: IPC_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: WORKSPACE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: TASK_VOLUME.to_string(),
            config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                name: task_config_map_name(&run_name),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if !config_map_volume_projections.is_empty() {
        volumes.push(Volume {
            name: SKILLS_VOLUME.to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(config_map_volume_projections),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    if instance.spec.memory.enabled {
        volumes.push(Volume {
            name: MEMORY_VOLUME.to_string(),
            config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                name: memory_config_map_name(&instance.meta().name.clone().unwrap_or_default()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let agent_container = build_agent_container(
        run,
        policy,
        !resolved_skill_packs.is_empty(),
        instance.spec.memory.enabled,
    );
    let bridge_container = build_bridge_container(config);

    let mut containers = vec![agent_container, bridge_container];
    if policy.sandbox.required {
        containers.push(build_sandbox_container(policy));
    }
    for (skill_pack_name, sidecar) in &resolved_skill_packs {
        if let Some(sidecar) = sidecar {
            containers.push(build_sidecar_container(skill_pack_name, sidecar));
        }
    }

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(run_name.clone()),
            namespace: namespace.clone(),
            labels: Some(pod_labels.clone()),
            annotations: if pod_annotations.is_empty() { None } else { Some(pod_annotations) },
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers,
            restart_policy: Some("Never".to_string()),
            service_account_name: Some(service_account_name(&run_name)),
            automount_service_account_token: Some(!rbac.is_empty()),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(policy.sandbox.security_context.run_as_non_root),
                ..Default::default()
            }),
            volumes: Some(volumes),
            ..Default::default()
        }),
        status: None,
    };

    let network_policy = build_network_policy(&run_name, &namespace, &pod_labels, &owner_ref, policy.sandbox.network_mode);

    Ok(PodBuildOutput {
        pod,
        task_config_map: task_cm,
        service_account,
        rbac,
        network_policy,
    })
}

fn resolve_skill_packs<'a>(
    run: &AgentRun,
    skill_packs: &'a [SkillPack],
) -> Result<Vec<(String, Option<&'a crate::domain::models::SidecarSpec>)>, PodBuilderError> {
    run.spec
        .skill_refs
        .iter()
        .map(|name| {
            skill_packs
                .iter()
                .find(|sp| sp.meta().name.as_deref() == Some(name.as_str()))
                .map(|sp| (name.clone(), sp.spec.sidecar.as_ref()))
                .ok_or_else(|| PodBuilderError::MissingSkillPack(name.clone()))
        })
        .collect()
}

fn build_task_config_map(
    run_name: &str,
    namespace: &Option<String>,
    pod_labels: &BTreeMap<String, String>,
    owner_ref: &OwnerReference,
    task: &str,
) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert("task".to_string(), task.to_string());
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(task_config_map_name(run_name)),
            namespace: namespace.clone(),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

fn build_service_account(
    run_name: &str,
    namespace: &Option<String>,
    pod_labels: &BTreeMap<String, String>,
    owner_ref: &OwnerReference,
) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(service_account_name(run_name)),
            namespace: namespace.clone(),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn to_k8s_rule(rule: &crate::domain::models::RbacRule) -> K8sPolicyRule {
    K8sPolicyRule {
        api_groups: Some(rule.api_groups.clone()),
        resources: Some(rule.resources.clone()),
        verbs: rule.verbs.clone(),
        ..Default::default()
    }
}

fn build_sidecar_rbac(
    run_name: &str,
    namespace: &Option<String>,
    skill_pack_name: &str,
    sidecar: &crate::domain::models::SidecarSpec,
    service_account: &ServiceAccount,
    pod_labels: &BTreeMap<String, String>,
    owner_ref: &OwnerReference,
) -> Result<Vec<RbacObject>, PodBuilderError> {
    let mut objects = Vec::new();
    let subject = Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account.metadata.name.clone().unwrap_or_default(),
        namespace: namespace.clone(),
        ..Default::default()
    };

    if !sidecar.namespaced_rbac.is_empty() {
        for rule in &sidecar.namespaced_rbac {
            if rule.verbs.is_empty() {
                return Err(PodBuilderError::MalformedRbac(
                    skill_pack_name.to_string(),
                    "rule has no verbs".to_string(),
                ));
            }
        }
        let role_name = rbac_role_name(run_name, skill_pack_name);
        let role = Role {
            metadata: ObjectMeta {
                name: Some(role_name.clone()),
                namespace: namespace.clone(),
                labels: Some(pod_labels.clone()),
                owner_references: Some(vec![owner_ref.clone()]),
                ..Default::default()
            },
            rules: Some(sidecar.namespaced_rbac.iter().map(to_k8s_rule).collect()),
        };
        let binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some(rbac_binding_name(run_name, skill_pack_name)),
                namespace: namespace.clone(),
                labels: Some(pod_labels.clone()),
                owner_references: Some(vec![owner_ref.clone()]),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: role_name,
            },
            subjects: Some(vec![subject.clone()]),
        };
        objects.push(RbacObject::Namespaced { role, binding });
    }

    if !sidecar.cluster_rbac.is_empty() {
        for rule in &sidecar.cluster_rbac {
            if rule.verbs.is_empty() {
                return Err(PodBuilderError::MalformedRbac(
                    skill_pack_name.to_string(),
                    "cluster rule has no verbs".to_string(),
                ));
            }
        }
        let role_name = format!("{}-cluster", rbac_role_name(run_name, skill_pack_name));
        let role = ClusterRole {
            metadata: ObjectMeta {
                name: Some(role_name.clone()),
                labels: Some(pod_labels.clone()),
                owner_references: Some(vec![owner_ref.clone()]),
                ..Default::default()
            },
            rules: Some(sidecar.cluster_rbac.iter().map(to_k8s_rule).collect()),
            ..Default::default()
        };
        let binding = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(format!("{}-cluster", rbac_binding_name(run_name, skill_pack_name))),
                labels: Some(pod_labels.clone()),
                owner_references: Some(vec![owner_ref.clone()]),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: role_name,
            },
            subjects: Some(vec![subject]),
        };
        objects.push(RbacObject::Cluster { role, binding });
    }

    Ok(objects)
}

fn resource_requirements(caps: crate::domain::models::ResourceCaps) -> ResourceRequirements {
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(format!("{}m", caps.cpu_millicores)));
    limits.insert("memory".to_string(), Quantity(format!("{}Mi", caps.memory_mb)));
    ResourceRequirements {
        limits: Some(limits.clone()),
        requests: Some(limits),
        ..Default::default()
    }
}

fn security_context_for(policy: &ResolvedPolicy) -> SecurityContext {
    let req = &policy.sandbox.security_context;
    SecurityContext {
        read_only_root_filesystem: Some(req.read_only_root_filesystem),
        run_as_non_root: Some(req.run_as_non_root),
        allow_privilege_escalation: Some(req.allow_privilege_escalation),
        capabilities: if req.drop_all_capabilities {
            Some(Capabilities { drop: Some(vec!["ALL".to_string()]), ..Default::default() })
        } else {
            None
        },
        seccomp_profile: if req.seccomp_profile_required {
            Some(SeccompProfile { type_: "RuntimeDefault".to_string(), ..Default::default() })
        } else {
            None
        },
        ..Default::default()
    }
}

fn build_agent_container(
    run: &AgentRun,
    policy: &ResolvedPolicy,
    has_skills: bool,
    memory_enabled: bool,
) -> Container {
    let mut volume_mounts = vec![
        VolumeMount { name: IPC_VOLUME.to_string(), mount_path: IPC_MOUNT_PATH.to_string(), ..Default::default() },
        VolumeMount { name: WORKSPACE_VOLUME.to_string(), mount_path: WORKSPACE_MOUNT_PATH.to_string(), ..Default::default() },
        VolumeMount { name: TASK_VOLUME.to_string(), mount_path: TASK_MOUNT_PATH.to_string(), read_only: Some(true), ..Default::default() },
    ];
    if has_skills {
        volume_mounts.push(VolumeMount {
            name: SKILLS_VOLUME.to_string(),
            mount_path: SKILLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    if memory_enabled {
        volume_mounts.push(VolumeMount {
            name: MEMORY_VOLUME.to_string(),
            mount_path: MEMORY_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let env = vec![
        EnvVar { name: "SYMPOZIUM_PROVIDER".to_string(), value: Some(run.spec.model.provider.clone()), ..Default::default() },
        EnvVar { name: "SYMPOZIUM_MODEL_ID".to_string(), value: Some(run.spec.model.model_id.clone()), ..Default::default() },
    ];

    Container {
        name: AGENT_CONTAINER.to_string(),
        image: Some(format!("sympozium/agent-{}:latest", run.spec.model.provider)),
        env: Some(env),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: run.spec.model.auth_secret_name.clone(),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(volume_mounts),
        security_context: if policy.sandbox.required { Some(security_context_for(policy)) } else { None },
        resources: if policy.sandbox.required { Some(resource_requirements(policy.resource_caps())) } else { None },
        ..Default::default()
    }
}

fn build_bridge_container(config: &PodBuilderConfig) -> Container {
    Container {
        name: BRIDGE_CONTAINER.to_string(),
        image: Some(config.ipc_bridge_image.clone()),
        volume_mounts: Some(vec![VolumeMount {
            name: IPC_VOLUME.to_string(),
            mount_path: IPC_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn build_sandbox_container(policy: &ResolvedPolicy) -> Container {
    Container {
        name: SANDBOX_CONTAINER.to_string(),
        image: Some("sympozium/sandbox:latest".to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), "sleep infinity".to_string()]),
        volume_mounts: Some(vec![
            VolumeMount { name: IPC_VOLUME.to_string(), mount_path: IPC_MOUNT_PATH.to_string(), ..Default::default() },
            VolumeMount { name: WORKSPACE_VOLUME.to_string(), mount_path: WORKSPACE_MOUNT_PATH.to_string(), ..Default::default() },
        ]),
        security_context: Some(security_context_for(policy)),
        resources: Some(resource_requirements(policy.resource_caps())),
        ..Default::default()
    }
}

fn build_sidecar_container(skill_pack_name: &str, sidecar: &crate::domain::models::SidecarSpec) -> Container {
    let mut volume_mounts = vec![VolumeMount {
        name: IPC_VOLUME.to_string(),
        mount_path: IPC_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    if sidecar.mount_workspace {
        volume_mounts.push(VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: WORKSPACE_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }
    Container {
        name: sidecar_container_name(skill_pack_name),
        image: Some(sidecar.image.clone()),
        volume_mounts: Some(volume_mounts),
        resources: Some({
            let mut limits = BTreeMap::new();
            limits.insert("cpu".to_string(), Quantity(format!("{}m", sidecar.resources.cpu_millicores)));
            limits.insert("memory".to_string(), Quantity(format!("{}Mi", sidecar.resources.memory_mb)));
            ResourceRequirements { limits: Some(limits), ..Default::default() }
        }),
        ..Default::default()
    }
}

fn build_network_policy(
    run_name: &str,
    namespace: &Option<String>,
    pod_labels: &BTreeMap<String, String>,
    owner_ref: &OwnerReference,
    mode: NetworkMode,
) -> NetworkPolicy {
    let mut selector = BTreeMap::new();
    selector.insert(labels::RUN_NAME.to_string(), run_name.to_string());

    let egress = match mode {
        NetworkMode::None => Some(vec![]),
        NetworkMode::Restricted => Some(vec![NetworkPolicyEgressRule {
            to: Some(vec![NetworkPolicyPeer {
                pod_selector: Some(LabelSelector::default()),
                ..Default::default()
            }]),
            ports: Some(vec![
                NetworkPolicyPort { port: Some(IntOrString::Int(53)), protocol: Some("UDP".to_string()), ..Default::default() },
                NetworkPolicyPort { port: Some(IntOrString::Int(53)), protocol: Some("TCP".to_string()), ..Default::default() },
            ]),
        }]),
        NetworkMode::Unrestricted => Some(vec![NetworkPolicyEgressRule { to: None, ports: None }]),
    };

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(network_policy_name(run_name)),
            namespace: namespace.clone(),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector { match_labels: Some(selector), ..Default::default() },
            policy_types: Some(vec!["Egress".to_string()]),
            egress,
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::{AuthRef, ChannelBinding, ModelSpec, ParentLink};
    use crate::domain::models::{
        DefaultAction, MountPolicy, NetworkMode, RuleAction, SandboxPolicy, SecurityContextRequirements,
        SkillEntry, SkillPackSpec, SubAgentPolicy, ToolGating,
    };
    use crate::domain::models::{AgentRunSpec, InstanceSpec, MemorySettings, ModelAgentConfig};
    use kube::core::ObjectMeta as KubeObjectMeta;

    fn test_run(skill_refs: Vec<String>, parent: Option<ParentLink>) -> AgentRun {
        AgentRun {
            metadata: KubeObjectMeta {
                name: Some("run-1".to_string()),
                namespace: Some("sympozium-system".to_string()),
                ..Default::default()
            },
            spec: AgentRunSpec {
                instance_name: "inst-1".to_string(),
                agent_id: "agent-1".to_string(),
                session_key: "session-1".to_string(),
                parent,
                task: "do the thing".to_string(),
                system_prompt_override: None,
                model: ModelSpec {
                    provider: "anthropic".to_string(),
                    model_id: "claude".to_string(),
                    base_url: None,
                    auth_secret_name: "anthropic-key".to_string(),
                },
                skill_refs,
                timeout_seconds: None,
                cleanup_policy: Default::default(),
            },
            status: None,
        }
    }

    fn test_instance(memory_enabled: bool) -> Instance {
        Instance {
            metadata: KubeObjectMeta {
                name: Some("inst-1".to_string()),
                namespace: Some("sympozium-system".to_string()),
                ..Default::default()
            },
            spec: InstanceSpec {
                agent: ModelAgentConfig { provider: "anthropic".to_string(), model_id: "claude".to_string(), base_url: None },
                auth_refs: vec![AuthRef { secret_name: "anthropic-key".to_string(), provider: None }],
                channels: vec![],
                skill_refs: vec![],
                policy_ref: None,
                memory: MemorySettings { enabled: memory_enabled, size_cap_kb: 10, seed_system_prompt: None },
            },
            status: None,
        }
    }

    fn lenient_policy(sandbox_required: bool) -> ResolvedPolicy {
        ResolvedPolicy {
            default_action: DefaultAction::Deny,
            rules: vec![],
            sub_agent: SubAgentPolicy::default(),
            sandbox: SandboxPolicy {
                required: sandbox_required,
                network_mode: NetworkMode::Restricted,
                security_context: SecurityContextRequirements::default(),
                resource_caps: Default::default(),
            },
            mounts: MountPolicy::default(),
            feature_gates: Default::default(),
        }
    }

    #[test]
    fn composes_agent_and_bridge_only_without_sandbox_or_skills() {
        let run = test_run(vec![], None);
        let instance = test_instance(false);
        let policy = lenient_policy(false);
        let out = build(&run, &instance, &policy, &[], &PodBuilderConfig::default()).unwrap();
        let containers = &out.pod.spec.unwrap().containers;
        assert_eq!(containers.len(), 2);
        assert!(containers.iter().any(|c| c.name == AGENT_CONTAINER));
        assert!(containers.iter().any(|c| c.name == BRIDGE_CONTAINER));
    }

    #[test]
    fn sandbox_required_adds_sandbox_container() {
        let run = test_run(vec![], None);
        let instance = test_instance(false);
        let policy = lenient_policy(true);
        let out = build(&run, &instance, &policy, &[], &PodBuilderConfig::default()).unwrap();
        let containers = out.pod.spec.unwrap().containers;
        assert!(containers.iter().any(|c| c.name == SANDBOX_CONTAINER));
        let agent = containers.iter().find(|c| c.name == AGENT_CONTAINER).unwrap();
        assert!(agent.security_context.as_ref().unwrap().read_only_root_filesystem.unwrap());
    }

    #[test]
    fn missing_skill_pack_is_an_error() {
        let run = test_run(vec!["nonexistent".to_string()], None);
        let instance = test_instance(false);
        let policy = lenient_policy(false);
        assert_eq!(
            build(&run, &instance, &policy, &[], &PodBuilderConfig::default()),
            Err(PodBuilderError::MissingSkillPack("nonexistent".to_string()))
        );
    }

    #[test]
    fn empty_auth_secret_is_rejected() {
        let mut run = test_run(vec![], None);
        run.spec.model.auth_secret_name = String::new();
        let instance = test_instance(false);
        let policy = lenient_policy(false);
        assert_eq!(build(&run, &instance, &policy, &[], &PodBuilderConfig::default()), Err(PodBuilderError::MissingAuthSecret));
    }

    #[test]
    fn sidecar_with_rbac_emits_role_and_binding() {
        let skill_pack = SkillPack {
            metadata: KubeObjectMeta { name: Some("git-tools".to_string()), namespace: Some("sympozium-system".to_string()), ..Default::default() },
            spec: SkillPackSpec {
                skills: vec![SkillEntry { name: "clone".to_string(), description: "clone a repo".to_string(), binary_requirements: vec![], content: "...".to_string() }],
                sidecar: Some(crate::domain::models::SidecarSpec {
                    image: "sympozium/git-sidecar:latest".to_string(),
                    resources: Default::default(),
                    namespaced_rbac: vec![crate::domain::models::RbacRule {
                        api_groups: vec!["".to_string()],
                        resources: vec!["pods".to_string()],
                        verbs: vec!["get".to_string()],
                    }],
                    cluster_rbac: vec![],
                    mount_workspace: true,
                }),
                runtime_image_hint: None,
            },
            status: None,
        };
        let run = test_run(vec!["git-tools".to_string()], None);
        let instance = test_instance(false);
        let policy = lenient_policy(false);
        let out = build(&run, &instance, &policy, std::slice::from_ref(&skill_pack), &PodBuilderConfig::default()).unwrap();
        assert_eq!(out.rbac.len(), 1);
        assert!(matches!(out.rbac[0], RbacObject::Namespaced { .. }));
        let containers = out.pod.spec.unwrap().containers;
        assert!(containers.iter().any(|c| c.name == "skill-git-tools"));
    }

    #[test]
    fn parent_link_adds_parent_labels() {
        let parent = ParentLink { parent_run_name: "run-0".to_string(), parent_session_key: "s0".to_string(), spawn_depth: 1 };
        let run = test_run(vec![], Some(parent));
        let instance = test_instance(false);
        let policy = lenient_policy(false);
        let out = build(&run, &instance, &policy, &[], &PodBuilderConfig::default()).unwrap();
        let meta = out.pod.metadata;
        let pod_labels = meta.labels.unwrap();
        assert_eq!(pod_labels.get(labels::PARENT_RUN), Some(&"run-0".to_string()));
        assert_eq!(pod_labels.get(labels::SPAWN_DEPTH), Some(&"1".to_string()));
    }

    #[test]
    fn memory_enabled_mounts_memory_volume() {
        let run = test_run(vec![], None);
        let instance = test_instance(true);
        let policy = lenient_policy(false);
        let out = build(&run, &instance, &policy, &[], &PodBuilderConfig::default()).unwrap();
        let volumes = out.pod.spec.unwrap().volumes.unwrap();
        assert!(volumes.iter().any(|v| v.name == MEMORY_VOLUME));
    }

    #[test]
    fn network_mode_none_is_deny_all_egress() {
        let run = test_run(vec![], None);
        let instance = test_instance(false);
        let mut policy = lenient_policy(false);
        policy.sandbox.network_mode = NetworkMode::None;
        let out = build(&run, &instance, &policy, &[], &PodBuilderConfig::default()).unwrap();
        let egress = out.network_policy.spec.unwrap().egress.unwrap();
        assert!(egress.is_empty());
    }
}
