//! PersonaPack Reconciler (spec.md §4.7, C7).
//!
//! Composes Instance/Schedule/seed-ConfigMap specs from a PersonaPack's
//! personas, overlaying each persona's fields on the pack-level defaults.
//! Cron conversion is delegated to
//! [`crate::services::schedule_engine::interval_seconds_to_cron`] so the
//! conversion rule lives in exactly one place.

use std::collections::{BTreeMap, HashSet};

use crate::domain::models::common::{AuthRef, ChannelBinding};
use crate::domain::models::instance::{InstanceSpec, MemorySettings, ModelAgentConfig};
use crate::domain::models::persona_pack::{
    instance_name_for, schedule_name_for, seed_config_map_name_for, InstalledPersonaRecord, Persona,
    PersonaPackSpec, PersonaPackStatus, PersonaScheduleTiming,
};
use crate::domain::models::schedule::{ConcurrencyPolicy, ScheduleSpec};
use crate::services::schedule_engine::interval_seconds_to_cron;

/// One persona's composed child resources, ready to be created with an
/// owner reference to the pack (spec.md §4.7 steps 1-4).
pub struct PersonaInstallPlan {
    pub persona_name: String,
    pub instance_name: String,
    pub instance_spec: InstanceSpec,
    pub schedule_name: Option<String>,
    pub schedule_spec: Option<ScheduleSpec>,
    pub seed_config_map_name: Option<String>,
    pub seed_config_map_data: Option<BTreeMap<String, String>>,
}

/// Whether the pack has progressed past Phase 1 (spec.md §4.7 "If the
/// PersonaPack has no auth references set, do nothing except
/// status-phase Pending").
pub fn is_ready_for_fanout(spec: &PersonaPackSpec) -> bool {
    !spec.auth_refs.is_empty()
}

/// Compute the fan-out plan for every non-excluded persona (spec.md §4.7
/// Phase 2). Excluded or pack-absent personas are simply not present in
/// the returned plan — the caller diffs this against what currently
/// exists (owned children) to find what to delete, giving idempotence
/// and exclusion-set/removal handling for free (spec.md §4.7
/// "Idempotence").
pub fn plan_fanout(pack_name: &str, spec: &PersonaPackSpec) -> Vec<PersonaInstallPlan> {
    let excluded: HashSet<&str> = spec.excluded_personas.iter().map(String::as_str).collect();
    spec.personas
        .iter()
        .filter(|p| !excluded.contains(p.name.as_str()))
        .map(|persona| plan_one(pack_name, spec, persona))
        .collect()
}

fn plan_one(pack_name: &str, spec: &PersonaPackSpec, persona: &Persona) -> PersonaInstallPlan {
    let instance_name = instance_name_for(pack_name, &persona.name);
    let instance_spec = compose_instance_spec(spec, persona);

    let (schedule_name, schedule_spec) = match &persona.schedule {
        Some(block) => {
            let cron_expression = match &block.timing {
                PersonaScheduleTiming::Cron { cron } => cron.clone(),
                PersonaScheduleTiming::IntervalSeconds { interval_seconds } => {
                    interval_seconds_to_cron(*interval_seconds)
                }
            };
            let name = schedule_name_for(pack_name, &persona.name);
            (
                Some(name),
                Some(ScheduleSpec {
                    instance_ref: instance_name.clone(),
                    cron_expression,
                    task: block.task.clone(),
                    trigger_type: block.trigger_type,
                    concurrency_policy: ConcurrencyPolicy::Forbid,
                    include_memory: instance_spec.memory.enabled,
                    suspend: false,
                }),
            )
        }
        None => (None, None),
    };

    let (seed_config_map_name, seed_config_map_data) = if persona.memory_seeds.is_empty() {
        (None, None)
    } else {
        let mut data = BTreeMap::new();
        data.insert("seed.md".to_string(), persona.memory_seeds.join("\n\n"));
        (Some(seed_config_map_name_for(pack_name, &persona.name)), Some(data))
    };

    PersonaInstallPlan {
        persona_name: persona.name.clone(),
        instance_name,
        instance_spec,
        schedule_name,
        schedule_spec,
        seed_config_map_name,
        seed_config_map_data,
    }
}

fn compose_instance_spec(spec: &PersonaPackSpec, persona: &Persona) -> InstanceSpec {
    InstanceSpec {
        agent: spec.agent.clone(),
        auth_refs: spec.auth_refs.clone(),
        channels: persona
            .channels
            .iter()
            .map(|c| ChannelBinding { channel_type: c.clone(), secret_ref: spec.channel_secrets.get(c).cloned() })
            .collect(),
        skill_refs: persona.skills.clone(),
        policy_ref: persona.tool_policy_override.clone().or_else(|| spec.policy_ref.clone()),
        memory: MemorySettings {
            enabled: !persona.memory_seeds.is_empty(),
            size_cap_kb: 0,
            seed_system_prompt: Some(persona.system_prompt.clone()),
        },
    }
}

/// Recompute the pack's status from its spec and the plan just applied
/// (spec.md §4.7 step 5).
pub fn recompute_status(spec: &PersonaPackSpec, plan: &[PersonaInstallPlan]) -> PersonaPackStatus {
    use crate::domain::models::persona_pack::PersonaPackPhase;

    let phase = if !is_ready_for_fanout(spec) {
        PersonaPackPhase::Pending
    } else {
        PersonaPackPhase::Ready
    };

    PersonaPackStatus {
        phase,
        persona_count: spec.personas.len() as u32,
        installed_count: plan.len() as u32,
        installed: plan
            .iter()
            .map(|p| InstalledPersonaRecord {
                persona_name: p.persona_name.clone(),
                instance_name: p.instance_name.clone(),
                schedule_name: p.schedule_name.clone(),
            })
            .collect(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::persona_pack::{Persona, PersonaScheduleBlock, PersonaScheduleTiming};
    use crate::domain::models::schedule::ScheduleTriggerType;

    fn pack(personas: Vec<Persona>, excluded: Vec<&str>) -> PersonaPackSpec {
        PersonaPackSpec {
            description: "d".to_string(),
            category: "c".to_string(),
            version: "1".to_string(),
            agent: ModelAgentConfig { provider: "anthropic".to_string(), model_id: "m".to_string(), base_url: None },
            personas,
            auth_refs: vec![AuthRef { secret_name: "s".to_string(), provider: Some("anthropic".to_string()) }],
            policy_ref: Some("default-policy".to_string()),
            channel_secrets: BTreeMap::new(),
            excluded_personas: excluded.into_iter().map(str::to_string).collect(),
        }
    }

    fn persona(name: &str) -> Persona {
        Persona {
            name: name.to_string(),
            display_name: name.to_string(),
            system_prompt: "be helpful".to_string(),
            skills: vec![],
            tool_policy_override: None,
            schedule: None,
            memory_seeds: vec![],
            channels: vec![],
        }
    }

    #[test]
    fn pack_without_auth_refs_is_not_ready() {
        let mut spec = pack(vec![persona("a")], vec![]);
        spec.auth_refs.clear();
        assert!(!is_ready_for_fanout(&spec));
    }

    #[test]
    fn excluded_persona_is_absent_from_the_plan() {
        let spec = pack(vec![persona("a"), persona("b")], vec!["b"]);
        let plan = plan_fanout("pack-1", &spec);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].persona_name, "a");
    }

    #[test]
    fn instance_name_is_deterministic() {
        let spec = pack(vec![persona("a")], vec![]);
        let plan = plan_fanout("pack-1", &spec);
        assert_eq!(plan[0].instance_name, "pack-1-a");
    }

    #[test]
    fn persona_with_interval_schedule_gets_converted_cron() {
        let mut p = persona("a");
        p.schedule = Some(PersonaScheduleBlock {
            trigger_type: ScheduleTriggerType::Heartbeat,
            timing: PersonaScheduleTiming::IntervalSeconds { interval_seconds: 300 },
            task: "check in".to_string(),
        });
        let spec = pack(vec![p], vec![]);
        let plan = plan_fanout("pack-1", &spec);
        let schedule = plan[0].schedule_spec.as_ref().unwrap();
        assert_eq!(schedule.cron_expression, "0 */5 * * * *");
        assert_eq!(plan[0].schedule_name, Some("pack-1-a-schedule".to_string()));
    }

    #[test]
    fn persona_with_memory_seeds_gets_seed_config_map() {
        let mut p = persona("a");
        p.memory_seeds = vec!["seed one".to_string(), "seed two".to_string()];
        let spec = pack(vec![p], vec![]);
        let plan = plan_fanout("pack-1", &spec);
        assert_eq!(plan[0].seed_config_map_name, Some("pack-1-a-seed".to_string()));
        assert!(plan[0].instance_spec.memory.enabled);
    }

    #[test]
    fn reconciling_twice_produces_the_same_plan() {
        let spec = pack(vec![persona("a")], vec![]);
        let first = plan_fanout("pack-1", &spec);
        let second = plan_fanout("pack-1", &spec);
        assert_eq!(first[0].instance_name, second[0].instance_name);
        assert_eq!(first[0].instance_spec, second[0].instance_spec);
    }
}
