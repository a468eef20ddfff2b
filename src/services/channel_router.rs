//! Channel Router (spec.md §4.8, C8).
//!
//! Pure request/response shaping for the long-running task that
//! subscribes to `channel.message.received` and `agent.run.completed`.
//! Session-key monotonic counters and the actual event-bus subscription
//! loop live in the caller (`main`); this module only decides what an
//! inbound message becomes and what an outbound reply looks like.

use crate::domain::error::ChannelRouterError;
use crate::domain::models::agent_run::channel_session_key;
use crate::domain::models::common::{annotations, labels, CleanupPolicy, ModelSpec};
use crate::domain::models::{AgentRun, AgentRunPhase, AgentRunSpec, Instance};

/// The decoded payload of a `channel.message.received` event (spec.md
/// §4.8 "decode").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub instance_name: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
}

/// An AgentRun ready to be created, with the labels/annotations that let
/// the completion side of the router find its way back to the channel.
pub struct InboundPlan {
    pub run_name: String,
    pub spec: AgentRunSpec,
    pub labels: Vec<(String, String)>,
    pub annotations: Vec<(String, String)>,
}

/// Build the AgentRun for an inbound channel message (spec.md §4.8 "On
/// inbound message"). `monotonic` is a per-process counter the caller
/// maintains (e.g. an `AtomicU64`) so repeated messages in the same chat
/// get distinct session keys.
pub fn plan_inbound(msg: &InboundMessage, instance: &Instance, monotonic: u64) -> Result<InboundPlan, ChannelRouterError> {
    let auth_secret_name = instance
        .spec
        .auth_refs
        .first()
        .map(|a| a.secret_name.clone())
        .ok_or_else(|| ChannelRouterError::NoAuthConfigured(msg.instance_name.clone()))?;

    let session_key = channel_session_key(&msg.channel, &msg.chat_id, monotonic);
    let run_name = format!("{}-{}", msg.instance_name, &session_key);

    let spec = AgentRunSpec {
        instance_name: msg.instance_name.clone(),
        agent_id: msg.instance_name.clone(),
        session_key,
        parent: None,
        task: msg.text.clone(),
        system_prompt_override: None,
        model: ModelSpec {
            provider: instance.spec.agent.provider.clone(),
            model_id: instance.spec.agent.model_id.clone(),
            base_url: instance.spec.agent.base_url.clone(),
            auth_secret_name,
        },
        skill_refs: instance.spec.skill_refs.clone(),
        timeout_seconds: None,
        cleanup_policy: CleanupPolicy::Delete,
    };

    Ok(InboundPlan {
        run_name,
        spec,
        labels: vec![
            (labels::SOURCE.to_string(), labels::SOURCE_CHANNEL_VALUE.to_string()),
            (labels::SOURCE_CHANNEL.to_string(), msg.channel.clone()),
        ],
        annotations: vec![
            (annotations::REPLY_CHANNEL.to_string(), msg.channel.clone()),
            (annotations::REPLY_CHAT_ID.to_string(), msg.chat_id.clone()),
            (annotations::SENDER_ID.to_string(), msg.sender_id.clone()),
            (annotations::SENDER_NAME.to_string(), msg.sender_name.clone()),
        ],
    })
}

/// The `channel.message.send` payload to publish for a completed run
/// (spec.md §4.8 "On completed run"), or `None` if the run was not
/// channel-originated (no `source=channel` label).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub channel: String,
    pub chat_id: String,
    pub text: String,
}

/// Decide the outbound reply for a completed AgentRun, reading its
/// labels/annotations and terminal status (spec.md §4.8 "On completed
/// run"). Returns `Ok(None)` for a run this router should ignore.
pub fn plan_outbound(run: &AgentRun) -> Result<Option<OutboundReply>, ChannelRouterError> {
    let is_channel_origin = run
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::SOURCE))
        .map(|v| v.as_str())
        == Some(labels::SOURCE_CHANNEL_VALUE);
    if !is_channel_origin {
        return Ok(None);
    }

    let annotations = run.metadata.annotations.as_ref();
    let (Some(channel), Some(chat_id)) = (
        annotations.and_then(|a| a.get(annotations::REPLY_CHANNEL)).cloned(),
        annotations.and_then(|a| a.get(annotations::REPLY_CHAT_ID)).cloned(),
    ) else {
        return Ok(None);
    };

    let status = run.status.as_ref();
    let text = match status.map(|s| s.phase) {
        Some(AgentRunPhase::Succeeded) => status.and_then(|s| s.result.clone()).unwrap_or_default(),
        Some(AgentRunPhase::Failed) | Some(AgentRunPhase::Timeout) => {
            let error = status.and_then(|s| s.error.clone()).unwrap_or_default();
            format!("Sorry, something went wrong: {error}")
        }
        _ => return Ok(None),
    };

    Ok(Some(OutboundReply { channel, chat_id, text }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::AuthRef;
    use crate::domain::models::{AgentRunStatus, InstanceSpec, MemorySettings, ModelAgentConfig};
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    fn instance_with_auth(has_auth: bool) -> Instance {
        Instance {
            metadata: ObjectMeta { name: Some("inst-1".to_string()), ..Default::default() },
            spec: InstanceSpec {
                agent: ModelAgentConfig { provider: "anthropic".to_string(), model_id: "m".to_string(), base_url: None },
                auth_refs: if has_auth { vec![AuthRef { secret_name: "sec".to_string(), provider: None }] } else { vec![] },
                channels: vec![],
                skill_refs: vec![],
                policy_ref: None,
                memory: MemorySettings::default(),
            },
            status: None,
        }
    }

    fn inbound() -> InboundMessage {
        InboundMessage {
            channel: "telegram".to_string(),
            instance_name: "inst-1".to_string(),
            chat_id: "chat-42".to_string(),
            sender_id: "user-1".to_string(),
            sender_name: "Alice".to_string(),
            text: "hello".to_string(),
        }
    }

    #[test]
    fn inbound_without_auth_is_rejected() {
        let err = plan_inbound(&inbound(), &instance_with_auth(false), 0).unwrap_err();
        assert_eq!(err, ChannelRouterError::NoAuthConfigured("inst-1".to_string()));
    }

    #[test]
    fn inbound_carries_source_labels_and_reply_annotations() {
        let plan = plan_inbound(&inbound(), &instance_with_auth(true), 7).unwrap();
        assert!(plan.labels.contains(&(labels::SOURCE.to_string(), "channel".to_string())));
        assert!(plan.annotations.contains(&(annotations::REPLY_CHAT_ID.to_string(), "chat-42".to_string())));
        assert_eq!(plan.spec.session_key, "channel-telegram-chat-42-7");
    }

    fn run_with(labels: Option<BTreeMap<String, String>>, annotations: Option<BTreeMap<String, String>>, status: Option<AgentRunStatus>) -> AgentRun {
        AgentRun {
            metadata: ObjectMeta { labels, annotations, ..Default::default() },
            spec: AgentRunSpec {
                instance_name: "inst-1".to_string(),
                agent_id: "a".to_string(),
                session_key: "s".to_string(),
                parent: None,
                task: "t".to_string(),
                system_prompt_override: None,
                model: ModelSpec { provider: "p".to_string(), model_id: "m".to_string(), base_url: None, auth_secret_name: "sec".to_string() },
                skill_refs: vec![],
                timeout_seconds: None,
                cleanup_policy: CleanupPolicy::Delete,
            },
            status,
        }
    }

    #[test]
    fn non_channel_run_is_ignored() {
        let run = run_with(None, None, Some(AgentRunStatus { phase: AgentRunPhase::Succeeded, result: Some("ok".to_string()), ..Default::default() }));
        assert_eq!(plan_outbound(&run).unwrap(), None);
    }

    #[test]
    fn succeeded_channel_run_replies_with_result() {
        let mut labels = BTreeMap::new();
        labels.insert(super::labels::SOURCE.to_string(), "channel".to_string());
        let mut annotations = BTreeMap::new();
        annotations.insert(super::annotations::REPLY_CHANNEL.to_string(), "telegram".to_string());
        annotations.insert(super::annotations::REPLY_CHAT_ID.to_string(), "chat-42".to_string());
        let run = run_with(
            Some(labels),
            Some(annotations),
            Some(AgentRunStatus { phase: AgentRunPhase::Succeeded, result: Some("done!".to_string()), ..Default::default() }),
        );
        let reply = plan_outbound(&run).unwrap().unwrap();
        assert_eq!(reply, OutboundReply { channel: "telegram".to_string(), chat_id: "chat-42".to_string(), text: "done!".to_string() });
    }

    #[test]
    fn failed_channel_run_replies_with_rendered_error() {
        let mut labels = BTreeMap::new();
        labels.insert(super::labels::SOURCE.to_string(), "channel".to_string());
        let mut annotations = BTreeMap::new();
        annotations.insert(super::annotations::REPLY_CHANNEL.to_string(), "telegram".to_string());
        annotations.insert(super::annotations::REPLY_CHAT_ID.to_string(), "chat-42".to_string());
        let run = run_with(
            Some(labels),
            Some(annotations),
            Some(AgentRunStatus { phase: AgentRunPhase::Failed, error: Some("boom".to_string()), ..Default::default() }),
        );
        let reply = plan_outbound(&run).unwrap().unwrap();
        assert!(reply.text.contains("boom"));
    }
}
