//! Schedule and Memory IPC Routers (spec.md §4.9, C9).
//!
//! Like the Channel Router (C8), this is a plain scan-and-act loop rather
//! than a `kube::runtime::Controller` — there is no IPC CRD. Each bound
//! instance's `/ipc` volume is mirrored, out of process, into a
//! per-instance directory under [`ControllerContext::ipc_base_dir`] (see
//! `services::config::Config::ipc_base_dir`'s doc comment and DESIGN.md
//! for the mirroring assumption); this loop wakes on a fixed interval,
//! scans `<base>/<instance>/schedules/*.json` and
//! `<base>/<instance>/messages/*.json`, applies the validated directive,
//! and deletes the file — or, if it fails to parse, moves it to
//! `<base>/<instance>/errors/` so a malformed file is never retried
//! forever (spec.md §4.9 "IPC files are processed at-most-once").

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::errors::SympoziumError;
use crate::domain::models::{ConcurrencyPolicy, Schedule, ScheduleSpec, ScheduleTriggerType};
use crate::domain::ports::{EventBus, ResourceStore, Topic};
use crate::services::ipc_router::{parse_outbound_message, parse_schedule_directive, ScheduleDirectiveEffect};

use super::ControllerContext;

pub async fn run(ctx: Arc<ControllerContext>, scan_interval: Duration) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(scan_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = scan_once(&ctx).await {
            warn!(error = %e, "ipc router scan failed");
        }
    }
}

async fn scan_once(ctx: &ControllerContext) -> Result<(), SympoziumError> {
    let base = ctx.ipc_base_dir();
    let mut instance_dirs = match tokio::fs::read_dir(&base).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = instance_dirs.next_entry().await? {
        if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let instance_name = entry.file_name().to_string_lossy().into_owned();
        let instance_dir = entry.path();

        if let Err(e) = scan_schedules(ctx, &instance_name, &instance_dir).await {
            warn!(instance = %instance_name, error = %e, "ipc schedule scan failed for instance");
        }
        if let Err(e) = scan_messages(ctx, &instance_name, &instance_dir).await {
            warn!(instance = %instance_name, error = %e, "ipc message scan failed for instance");
        }
    }
    Ok(())
}

async fn scan_schedules(ctx: &ControllerContext, instance_name: &str, instance_dir: &Path) -> Result<(), SympoziumError> {
    let dir = instance_dir.join("schedules");
    for path in list_json_files(&dir).await? {
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read IPC schedule file, leaving for next scan");
                continue;
            }
        };

        match parse_schedule_directive(&body) {
            Ok(effect) => {
                apply_schedule_effect(ctx, instance_name, effect).await?;
                let _ = tokio::fs::remove_file(&path).await;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "quarantining malformed IPC schedule directive");
                quarantine(instance_dir, &path).await;
            }
        }
    }
    Ok(())
}

async fn scan_messages(ctx: &ControllerContext, instance_name: &str, instance_dir: &Path) -> Result<(), SympoziumError> {
    let dir = instance_dir.join("messages");
    let Some(instance) = ctx.instances.get(instance_name).await? else {
        return Ok(());
    };
    let bound_channels: Vec<String> = instance.spec.channels.iter().map(|c| c.channel_type.clone()).collect();

    for path in list_json_files(&dir).await? {
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read IPC message file, leaving for next scan");
                continue;
            }
        };

        match parse_outbound_message(&body, &bound_channels) {
            Ok(directive) => {
                ctx.event_bus
                    .publish(
                        Topic::ChannelMessageSend,
                        serde_json::json!({ "channel": directive.channel, "chatId": directive.chat_id, "text": directive.text }),
                    )
                    .await?;
                let _ = tokio::fs::remove_file(&path).await;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "quarantining malformed IPC message directive");
                quarantine(instance_dir, &path).await;
            }
        }
    }
    Ok(())
}

async fn apply_schedule_effect(ctx: &ControllerContext, instance_name: &str, effect: ScheduleDirectiveEffect) -> Result<(), SympoziumError> {
    match effect {
        ScheduleDirectiveEffect::Upsert { name, cron_expression, task } => {
            let schedule_name = ipc_schedule_name(instance_name, &name);
            let spec = ScheduleSpec {
                instance_ref: instance_name.to_string(),
                cron_expression,
                task,
                trigger_type: ScheduleTriggerType::Scheduled,
                concurrency_policy: ConcurrencyPolicy::Forbid,
                include_memory: false,
                suspend: false,
            };
            match ctx.schedules.get(&schedule_name).await? {
                Some(mut existing) => {
                    existing.spec = spec;
                    ctx.schedules.update(&schedule_name, existing).await?;
                }
                None => {
                    let schedule = Schedule { metadata: Default::default(), spec, status: None };
                    ctx.schedules.create(&schedule_name, schedule).await?;
                }
            }
        }
        ScheduleDirectiveEffect::Suspend { name } => set_suspend(ctx, instance_name, &name, true).await?,
        ScheduleDirectiveEffect::Resume { name } => set_suspend(ctx, instance_name, &name, false).await?,
        ScheduleDirectiveEffect::Delete { name } => {
            let schedule_name = ipc_schedule_name(instance_name, &name);
            let _ = ctx.schedules.delete(&schedule_name).await;
        }
    }
    Ok(())
}

async fn set_suspend(ctx: &ControllerContext, instance_name: &str, name: &str, suspend: bool) -> Result<(), SympoziumError> {
    let schedule_name = ipc_schedule_name(instance_name, name);
    if let Some(mut existing) = ctx.schedules.get(&schedule_name).await? {
        existing.spec.suspend = suspend;
        ctx.schedules.update(&schedule_name, existing).await?;
    }
    Ok(())
}

/// Schedules created by an agent's own IPC directives are namespaced
/// under their owning instance so two instances can each use the
/// unqualified name `"heartbeat"` without colliding.
fn ipc_schedule_name(instance_name: &str, directive_name: &str) -> String {
    format!("{instance_name}-{directive_name}")
}

async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, SympoziumError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    Ok(files)
}

async fn quarantine(instance_dir: &Path, path: &Path) {
    let errors_dir = instance_dir.join("errors");
    if tokio::fs::create_dir_all(&errors_dir).await.is_err() {
        return;
    }
    if let Some(file_name) = path.file_name() {
        let _ = tokio::fs::rename(path, errors_dir.join(file_name)).await;
    }
}
