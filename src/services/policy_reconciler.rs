//! Policy Reconciler (spec.md §4.3, C3).
//!
//! Normalization and rule validation live in [`crate::domain::policy`];
//! this module only wires that pure resolution into the status write and
//! counts bound Instances. The resolved form is never persisted as a
//! separate object (§4.3) — the Pod Builder and Admission Validator call
//! [`crate::domain::policy::resolve`] directly.

use crate::domain::models::{Instance, Policy, PolicyStatus};
use crate::domain::policy::resolve;

pub fn reconcile(policy_name: &str, policy: &Policy, instances: &[Instance]) -> PolicyStatus {
    let bound_instance_count = count_bound_instances(policy_name, instances);
    match resolve(policy) {
        Ok(_) => PolicyStatus { bound_instance_count, valid: true, validation_error: None },
        Err(e) => PolicyStatus { bound_instance_count, valid: false, validation_error: Some(e.to_string()) },
    }
}

pub fn count_bound_instances(policy_name: &str, instances: &[Instance]) -> u32 {
    instances
        .iter()
        .filter(|i| i.spec.policy_ref.as_deref() == Some(policy_name))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{InstanceSpec, MemorySettings, ModelAgentConfig};
    use kube::core::ObjectMeta;

    fn instance(policy_ref: Option<&str>) -> Instance {
        Instance {
            metadata: ObjectMeta::default(),
            spec: InstanceSpec {
                agent: ModelAgentConfig::default(),
                auth_refs: vec![],
                channels: vec![],
                skill_refs: vec![],
                policy_ref: policy_ref.map(str::to_string),
                memory: MemorySettings::default(),
            },
            status: None,
        }
    }

    #[test]
    fn counts_only_instances_referencing_this_policy() {
        let instances = vec![instance(Some("p1")), instance(Some("p2")), instance(Some("p1")), instance(None)];
        assert_eq!(count_bound_instances("p1", &instances), 2);
    }

    #[test]
    fn valid_policy_reports_valid() {
        let policy = Policy { metadata: ObjectMeta::default(), spec: Default::default(), status: None };
        let status = reconcile("p1", &policy, &[]);
        assert!(status.valid);
        assert!(status.validation_error.is_none());
    }

    #[test]
    fn invalid_policy_reports_error() {
        let mut policy = Policy { metadata: ObjectMeta::default(), spec: Default::default(), status: None };
        policy.spec.sub_agent.max_concurrent = 0;
        let status = reconcile("p1", &policy, &[]);
        assert!(!status.valid);
        assert!(status.validation_error.is_some());
    }
}
