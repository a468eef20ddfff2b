//! Channel Router (spec.md §4.8, C8).
//!
//! Unlike every other submodule in this directory, the Channel Router has
//! no CRD of its own to run a `kube::runtime::Controller` over — it is a
//! plain `tokio::spawn`'d loop subscribing to the shared
//! [`crate::services::BroadcastEventBus`], grounded on the same
//! subscribe-and-loop shape the bus's own doctest uses. Every decision
//! (what an inbound message becomes, what a completed run replies with)
//! is made by the pure [`crate::services::channel_router`] functions; this
//! file only decodes envelopes, creates the resulting `AgentRun`, and
//! re-publishes the outbound reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, warn};

use crate::domain::errors::SympoziumError;
use crate::domain::ports::{EventBus, ResourceStore, Topic};
use crate::services::channel_router::{plan_inbound, plan_outbound, InboundMessage};

use super::ControllerContext;

/// Wire shape of a `channel.message.received` event body (published by
/// the per-channel bridge Deployment C4 ensures one of per bound
/// channel).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelMessageReceivedBody {
    channel: String,
    instance_name: String,
    chat_id: String,
    sender_id: String,
    sender_name: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct RunNameBody {
    #[serde(rename = "agentRunName")]
    agent_run_name: String,
}

pub async fn run(ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    let mut rx = ctx.event_bus.subscribe();
    let monotonic = AtomicU64::new(0);

    loop {
        let envelope = match rx.recv().await {
            Ok(envelope) => envelope,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "channel router lagged behind the event bus, some events were dropped");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                error!("event bus closed, channel router exiting");
                return Ok(());
            }
        };

        let result = if envelope.topic == Topic::ChannelMessageReceived.as_str() {
            handle_inbound(&ctx, envelope.body, &monotonic).await
        } else if envelope.topic == Topic::AgentRunCompleted.as_str() || envelope.topic == Topic::AgentRunFailed.as_str() {
            handle_run_terminal(&ctx, envelope.body).await
        } else {
            continue;
        };

        if let Err(e) = result {
            warn!(error = %e, topic = envelope.topic, "channel router failed to process event");
        }
    }
}

async fn handle_inbound(ctx: &ControllerContext, body: serde_json::Value, monotonic: &AtomicU64) -> Result<(), SympoziumError> {
    let decoded: ChannelMessageReceivedBody = serde_json::from_value(body)
        .map_err(|e| crate::domain::error::EventBusError::MalformedPayload(e.to_string()))?;

    let Some(instance) = ctx.instances.get(&decoded.instance_name).await? else {
        warn!(instance = %decoded.instance_name, "inbound channel message for unknown instance, dropping");
        return Ok(());
    };

    let msg = InboundMessage {
        channel: decoded.channel,
        instance_name: decoded.instance_name,
        chat_id: decoded.chat_id,
        sender_id: decoded.sender_id,
        sender_name: decoded.sender_name,
        text: decoded.text,
    };

    let sequence = monotonic.fetch_add(1, Ordering::SeqCst);
    let plan = match plan_inbound(&msg, &instance, sequence) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(instance = %msg.instance_name, error = %e, "rejecting inbound channel message");
            return Ok(());
        }
    };

    let mut run = crate::domain::models::AgentRun {
        metadata: Default::default(),
        spec: plan.spec,
        status: None,
    };
    run.metadata.name = Some(plan.run_name.clone());
    let run_labels = run.metadata.labels.get_or_insert_with(Default::default);
    for (key, value) in plan.labels {
        run_labels.insert(key, value);
    }
    let run_annotations = run.metadata.annotations.get_or_insert_with(Default::default);
    for (key, value) in plan.annotations {
        run_annotations.insert(key, value);
    }

    ctx.agent_runs.create(&plan.run_name, run).await?;
    Ok(())
}

async fn handle_run_terminal(ctx: &ControllerContext, body: serde_json::Value) -> Result<(), SympoziumError> {
    let decoded: RunNameBody = serde_json::from_value(body)
        .map_err(|e| crate::domain::error::EventBusError::MalformedPayload(e.to_string()))?;

    let Some(run) = ctx.agent_runs.get(&decoded.agent_run_name).await? else {
        return Ok(());
    };

    let Some(reply) = plan_outbound(&run)? else {
        return Ok(());
    };

    ctx.event_bus
        .publish(
            Topic::ChannelMessageSend,
            serde_json::json!({ "channel": reply.channel, "chatId": reply.chat_id, "text": reply.text }),
        )
        .await?;
    Ok(())
}
