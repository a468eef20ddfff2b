//! Policy resolution (spec.md §4.3, §9).
//!
//! "The same Policy is interpreted twice... a single resolved-Policy
//! function, pure over Policy plus AgentRun, should feed both" — this
//! module is that function. [`crate::services::pod_builder`] and
//! [`crate::services::admission_validator`] both call [`resolve`]; neither
//! re-derives tool-gating or sandbox rules on its own.

use std::collections::BTreeMap;

use super::error::PolicyError;
use super::models::{DefaultAction, MountPolicy, Policy, ResourceCaps, RuleAction, SandboxPolicy, SubAgentPolicy, ToolRule};

/// A Policy after normalization: rules sorted for deterministic
/// evaluation, `group:*` patterns expanded, defaults filled in
/// (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub default_action: DefaultAction,
    pub rules: Vec<ToolRule>,
    pub sub_agent: SubAgentPolicy,
    pub sandbox: SandboxPolicy,
    pub mounts: MountPolicy,
    pub feature_gates: BTreeMap<String, bool>,
}

/// Known tool groups a `group:*` pattern may expand against. This is the
/// fixed catalogue spec.md §4.3 calls out by name ("notably `group:*`");
/// an unrecognized group is a validation error rather than a silent
/// no-op, matching the "fail closed" posture of the tool-gating model.
const KNOWN_GROUPS: &[&str] = &["fs", "shell", "network", "git", "browser", "mcp"];

fn pattern_is_group_wildcard(pattern: &str) -> bool {
    pattern.starts_with("group:") && pattern.ends_with(":*")
}

fn validate_pattern(pattern: &str) -> Result<(), PolicyError> {
    if pattern_is_group_wildcard(pattern) {
        let group = &pattern["group:".len()..pattern.len() - ":*".len()];
        if !KNOWN_GROUPS.contains(&group) {
            return Err(PolicyError::UnknownToolPattern(pattern.to_string()));
        }
    }
    Ok(())
}

/// Validate and normalize a Policy into its resolved form (§4.3).
///
/// Rules are sorted by pattern so that evaluation order is deterministic
/// independent of how the user authored them; the first matching rule
/// after sorting always wins the same way across controller restarts.
pub fn resolve(policy: &Policy) -> Result<ResolvedPolicy, PolicyError> {
    let spec = &policy.spec;

    let mut seen = std::collections::HashSet::new();
    for rule in &spec.tool_gating.rules {
        validate_pattern(&rule.tool_pattern)?;
        if !seen.insert(rule.tool_pattern.clone()) {
            return Err(PolicyError::DuplicateRule(rule.tool_pattern.clone()));
        }
    }

    if spec.sub_agent.max_concurrent == 0 {
        return Err(PolicyError::InvalidConcurrency);
    }

    let mut rules = spec.tool_gating.rules.clone();
    rules.sort_by(|a, b| a.tool_pattern.cmp(&b.tool_pattern));

    Ok(ResolvedPolicy {
        default_action: spec.tool_gating.default_action,
        rules,
        sub_agent: spec.sub_agent,
        sandbox: spec.sandbox.clone(),
        mounts: spec.mounts.clone(),
        feature_gates: spec.feature_gates.clone(),
    })
}

impl ResolvedPolicy {
    /// Evaluate a concrete tool name against the ordered rule list,
    /// falling back to `default_action` when nothing matches.
    pub fn decide_tool(&self, tool_name: &str) -> RuleAction {
        for rule in &self.rules {
            if rule_matches(&rule.tool_pattern, tool_name) {
                return rule.action;
            }
        }
        match self.default_action {
            DefaultAction::Allow => RuleAction::Allow,
            DefaultAction::Deny => RuleAction::Deny,
        }
    }

    pub fn resource_caps(&self) -> ResourceCaps {
        self.sandbox.resource_caps
    }

    pub fn is_mount_blocked(&self, path: &str) -> bool {
        self.mounts
            .blocked_path_patterns
            .iter()
            .any(|pattern| glob_match(pattern, path))
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.feature_gates.get(name).copied().unwrap_or(false)
    }
}

fn rule_matches(pattern: &str, tool_name: &str) -> bool {
    if pattern_is_group_wildcard(pattern) {
        // Group membership is resolved by the tool-dispatch layer outside
        // this core (spec.md §1 non-goal: agent inner loop is a black
        // box); here we only recognize the literal group tag embedded in
        // the tool name as `group/tool`, e.g. "fs/read_file".
        let group = &pattern["group:".len()..pattern.len() - ":*".len()];
        return tool_name
            .split_once('/')
            .is_some_and(|(g, _)| g == group);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return tool_name.starts_with(prefix);
    }
    pattern == tool_name
}

/// Minimal glob matcher for `*`-suffixed/prefixed blocked-path patterns
/// (spec.md §4.10 rule 3). Exact match, prefix `*`, or suffix `*`.
fn glob_match(pattern: &str, path: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        return path.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    pattern == path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Policy, PolicySpec, ToolGating, ToolRule};

    fn policy_with_rules(rules: Vec<ToolRule>) -> Policy {
        Policy {
            metadata: Default::default(),
            spec: PolicySpec {
                tool_gating: ToolGating {
                    default_action: DefaultAction::Deny,
                    rules,
                },
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn default_deny_when_no_rule_matches() {
        let policy = policy_with_rules(vec![]);
        let resolved = resolve(&policy).unwrap();
        assert_eq!(resolved.decide_tool("fs/read_file"), RuleAction::Deny);
    }

    #[test]
    fn exact_rule_wins_over_default() {
        let policy = policy_with_rules(vec![ToolRule {
            tool_pattern: "fs/read_file".to_string(),
            action: RuleAction::Allow,
            conditions: vec![],
        }]);
        let resolved = resolve(&policy).unwrap();
        assert_eq!(resolved.decide_tool("fs/read_file"), RuleAction::Allow);
        assert_eq!(resolved.decide_tool("fs/write_file"), RuleAction::Deny);
    }

    #[test]
    fn group_wildcard_expands() {
        let policy = policy_with_rules(vec![ToolRule {
            tool_pattern: "group:fs:*".to_string(),
            action: RuleAction::Allow,
            conditions: vec![],
        }]);
        let resolved = resolve(&policy).unwrap();
        assert_eq!(resolved.decide_tool("fs/read_file"), RuleAction::Allow);
        assert_eq!(resolved.decide_tool("shell/exec"), RuleAction::Deny);
    }

    #[test]
    fn unknown_group_is_rejected() {
        let policy = policy_with_rules(vec![ToolRule {
            tool_pattern: "group:bogus:*".to_string(),
            action: RuleAction::Allow,
            conditions: vec![],
        }]);
        assert_eq!(
            resolve(&policy),
            Err(PolicyError::UnknownToolPattern("group:bogus:*".to_string()))
        );
    }

    #[test]
    fn duplicate_pattern_is_rejected() {
        let rule = ToolRule {
            tool_pattern: "fs/read_file".to_string(),
            action: RuleAction::Allow,
            conditions: vec![],
        };
        let policy = policy_with_rules(vec![rule.clone(), rule]);
        assert_eq!(
            resolve(&policy),
            Err(PolicyError::DuplicateRule("fs/read_file".to_string()))
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut policy = policy_with_rules(vec![]);
        policy.spec.sub_agent.max_concurrent = 0;
        assert_eq!(resolve(&policy), Err(PolicyError::InvalidConcurrency));
    }

    #[test]
    fn rules_are_sorted_deterministically() {
        let policy = policy_with_rules(vec![
            ToolRule { tool_pattern: "z".to_string(), action: RuleAction::Allow, conditions: vec![] },
            ToolRule { tool_pattern: "a".to_string(), action: RuleAction::Deny, conditions: vec![] },
        ]);
        let resolved = resolve(&policy).unwrap();
        assert_eq!(resolved.rules[0].tool_pattern, "a");
        assert_eq!(resolved.rules[1].tool_pattern, "z");
    }

    #[test]
    fn blocked_mount_path_suffix_glob() {
        let mut policy = policy_with_rules(vec![]);
        policy.spec.mounts.blocked_path_patterns = vec!["/etc/*".to_string()];
        let resolved = resolve(&policy).unwrap();
        assert!(resolved.is_mount_blocked("/etc/shadow"));
        assert!(!resolved.is_mount_blocked("/workspace/shadow"));
    }
}
