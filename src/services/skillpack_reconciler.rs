//! SkillPack Reconciler (spec.md §4.2, C2).
//!
//! Pure validation + ConfigMap-data materialization; the caller (the
//! generic reconcile loop in `main`) is the only part of the system that
//! actually talks to a [`crate::domain::ports::ResourceStore`].

use std::collections::{BTreeMap, HashSet};

use crate::domain::models::skill_pack::content_config_map_name;
use crate::domain::models::{SkillPack, SkillPackPhase, SkillPackStatus};

/// Result of reconciling one SkillPack generation: the status to write,
/// and (on success) the data the content ConfigMap should carry.
pub struct SkillPackReconcileOutcome {
    pub status: SkillPackStatus,
    pub config_map_data: Option<BTreeMap<String, String>>,
}

pub fn reconcile(pack_name: &str, pack: &SkillPack) -> SkillPackReconcileOutcome {
    match validate(pack) {
        Ok(data) => SkillPackReconcileOutcome {
            status: SkillPackStatus {
                phase: SkillPackPhase::Ready,
                content_config_map: Some(content_config_map_name(pack_name)),
                error: None,
            },
            config_map_data: Some(data),
        },
        Err(message) => SkillPackReconcileOutcome {
            status: SkillPackStatus {
                phase: SkillPackPhase::Error,
                content_config_map: None,
                error: Some(message),
            },
            config_map_data: None,
        },
    }
}

fn validate(pack: &SkillPack) -> Result<BTreeMap<String, String>, String> {
    let mut seen = HashSet::new();
    let mut data = BTreeMap::new();
    for skill in &pack.spec.skills {
        if skill.name.trim().is_empty() {
            return Err("skill name must not be empty".to_string());
        }
        if !seen.insert(skill.name.clone()) {
            return Err(format!("duplicate skill name '{}'", skill.name));
        }
        if skill.content.trim().is_empty() {
            return Err(format!("skill '{}' has empty content", skill.name));
        }
        data.insert(skill.name.clone(), skill.content.clone());
    }
    if let Some(sidecar) = &pack.spec.sidecar {
        for rule in sidecar.namespaced_rbac.iter().chain(sidecar.cluster_rbac.iter()) {
            if rule.verbs.is_empty() {
                return Err("sidecar RBAC rule declares no verbs".to_string());
            }
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SkillEntry;
    use kube::core::ObjectMeta;

    fn pack(skills: Vec<SkillEntry>) -> SkillPack {
        SkillPack {
            metadata: ObjectMeta { name: Some("skp-1".to_string()), ..Default::default() },
            spec: crate::domain::models::SkillPackSpec { skills, sidecar: None, runtime_image_hint: None },
            status: None,
        }
    }

    #[test]
    fn valid_pack_becomes_ready_with_content_map() {
        let p = pack(vec![SkillEntry { name: "clone".to_string(), description: "d".to_string(), binary_requirements: vec![], content: "do it".to_string() }]);
        let out = reconcile("skp-1", &p);
        assert_eq!(out.status.phase, SkillPackPhase::Ready);
        assert_eq!(out.status.content_config_map, Some("skp-1-content".to_string()));
        assert_eq!(out.config_map_data.unwrap().get("clone"), Some(&"do it".to_string()));
    }

    #[test]
    fn duplicate_skill_name_is_error() {
        let p = pack(vec![
            SkillEntry { name: "clone".to_string(), description: "d".to_string(), binary_requirements: vec![], content: "a".to_string() },
            SkillEntry { name: "clone".to_string(), description: "d".to_string(), binary_requirements: vec![], content: "b".to_string() },
        ]);
        let out = reconcile("skp-1", &p);
        assert_eq!(out.status.phase, SkillPackPhase::Error);
        assert!(out.config_map_data.is_none());
    }

    #[test]
    fn empty_content_is_error() {
        let p = pack(vec![SkillEntry { name: "clone".to_string(), description: "d".to_string(), binary_requirements: vec![], content: "   ".to_string() }]);
        let out = reconcile("skp-1", &p);
        assert_eq!(out.status.phase, SkillPackPhase::Error);
    }
}
