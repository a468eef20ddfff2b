//! Policy: declarative capability grants (spec.md §3, §4.3).

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DefaultAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RuleAction {
    Allow,
    Deny,
    Ask,
}

/// One ordered tool-gating rule. `tool_pattern` may be a literal tool name
/// or a `group:*` wildcard (spec.md §4.3 normalization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolRule {
    pub tool_pattern: String,
    pub action: RuleAction,
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolGating {
    pub default_action: DefaultAction,
    #[serde(default)]
    pub rules: Vec<ToolRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubAgentPolicy {
    pub max_depth: u32,
    pub max_concurrent: u32,
    pub max_children_per_agent: u32,
    pub allow_cross_agent: bool,
    pub require_sandbox: bool,
}

impl Default for SubAgentPolicy {
    fn default() -> Self {
        Self {
            max_depth: 0,
            max_concurrent: 1,
            max_children_per_agent: 0,
            allow_cross_agent: false,
            require_sandbox: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum NetworkMode {
    None,
    Restricted,
    Unrestricted,
}

impl Default for NetworkMode {
    fn default() -> Self {
        Self::Restricted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityContextRequirements {
    pub read_only_root_filesystem: bool,
    pub run_as_non_root: bool,
    pub drop_all_capabilities: bool,
    pub seccomp_profile_required: bool,
    pub allow_privilege_escalation: bool,
}

impl Default for SecurityContextRequirements {
    fn default() -> Self {
        Self {
            read_only_root_filesystem: true,
            run_as_non_root: true,
            drop_all_capabilities: true,
            seccomp_profile_required: true,
            allow_privilege_escalation: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCaps {
    pub cpu_millicores: u32,
    pub memory_mb: u32,
}

impl Default for ResourceCaps {
    fn default() -> Self {
        Self { cpu_millicores: 500, memory_mb: 512 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct SandboxPolicy {
    pub required: bool,
    pub network_mode: NetworkMode,
    pub security_context: SecurityContextRequirements,
    pub resource_caps: ResourceCaps,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            required: false,
            network_mode: NetworkMode::Restricted,
            security_context: SecurityContextRequirements::default(),
            resource_caps: ResourceCaps::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum WorkspaceAccessMode {
    ReadOnly,
    ReadWrite,
}

impl Default for WorkspaceAccessMode {
    fn default() -> Self {
        Self::ReadWrite
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MountPolicy {
    pub workspace_access_mode: WorkspaceAccessMode,
    pub blocked_path_patterns: Vec<String>,
    pub additional_mount_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, CustomResource)]
#[kube(
    group = "sympozium.ai",
    version = "v1alpha1",
    kind = "Policy",
    plural = "policies",
    shortname = "pol",
    status = "PolicyStatus",
    namespaced
)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicySpec {
    pub tool_gating: ToolGatingOrDefault,
    pub sub_agent: SubAgentPolicy,
    pub sandbox: SandboxPolicy,
    pub mounts: MountPolicy,
    pub feature_gates: BTreeMap<String, bool>,
}

/// `ToolGating` has no sensible `Default` beyond "deny everything", which
/// is exactly the fail-closed default a capability envelope wants.
pub type ToolGatingOrDefault = ToolGating;

impl Default for ToolGating {
    fn default() -> Self {
        Self { default_action: DefaultAction::Deny, rules: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyStatus {
    pub bound_instance_count: u32,
    pub valid: bool,
    pub validation_error: Option<String>,
}
