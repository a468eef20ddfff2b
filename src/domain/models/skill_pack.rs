//! SkillPack: bundled skill content plus an optional capability sidecar
//! (spec.md §3, §4.2).

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkillEntry {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub binary_requirements: Vec<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RbacRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct SidecarResources {
    pub cpu_millicores: u32,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    pub image: String,
    #[serde(default)]
    pub resources: SidecarResources,
    #[serde(default)]
    pub namespaced_rbac: Vec<RbacRule>,
    #[serde(default)]
    pub cluster_rbac: Vec<RbacRule>,
    #[serde(default)]
    pub mount_workspace: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema, CustomResource)]
#[kube(
    group = "sympozium.ai",
    version = "v1alpha1",
    kind = "SkillPack",
    plural = "skillpacks",
    shortname = "skp",
    status = "SkillPackStatus",
    namespaced
)]
#[serde(default, rename_all = "camelCase")]
pub struct SkillPackSpec {
    pub skills: Vec<SkillEntry>,
    pub sidecar: Option<SidecarSpec>,
    pub runtime_image_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SkillPackPhase {
    Pending,
    Ready,
    Error,
}

impl Default for SkillPackPhase {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct SkillPackStatus {
    pub phase: SkillPackPhase,
    pub content_config_map: Option<String>,
    pub error: Option<String>,
}

/// Name derived deterministically for a SkillPack's content ConfigMap.
pub fn content_config_map_name(skillpack_name: &str) -> String {
    format!("{skillpack_name}-content")
}
