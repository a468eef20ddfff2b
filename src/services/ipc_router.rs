//! Schedule and Memory IPC Routers (spec.md §4.9, C9).
//!
//! Pure parsing/validation for the two directive kinds an agent may drop
//! under `/ipc`. The caller owns the filesystem scan, at-most-once
//! delete-after-consume semantics, and quarantine-on-error moves (spec.md
//! §4.9 "IPC files are processed at-most-once"); this module only turns
//! JSON bytes into a validated decision or a [`IpcError`].

use serde::{Deserialize, Serialize};

use crate::domain::error::IpcError;
use crate::services::schedule_engine::validate_cron;

/// One `/ipc/schedules/*.json` directive (spec.md §4.9 item 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDirective {
    pub name: String,
    pub action: ScheduleAction,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    Create,
    Update,
    Suspend,
    Resume,
    Delete,
}

/// The validated effect of a schedule directive, ready for the caller to
/// apply against a Schedule resource owned by the Instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDirectiveEffect {
    Upsert { name: String, cron_expression: String, task: String },
    Suspend { name: String },
    Resume { name: String },
    Delete { name: String },
}

/// Parse and validate a schedule-directive JSON body (spec.md §4.9 item
/// 1: "validates (cron well-formed; name matches DNS label)").
pub fn parse_schedule_directive(body: &str) -> Result<ScheduleDirectiveEffect, IpcError> {
    let directive: ScheduleDirective =
        serde_json::from_str(body).map_err(|e| IpcError::Malformed(e.to_string()))?;

    if !is_dns_label(&directive.name) {
        return Err(IpcError::InvalidScheduleName(directive.name));
    }

    match directive.action {
        ScheduleAction::Create | ScheduleAction::Update => {
            let cron_expression = directive
                .schedule
                .ok_or_else(|| IpcError::Malformed("create/update directive missing 'schedule'".to_string()))?;
            validate_cron(&cron_expression).map_err(|e| IpcError::Malformed(e.to_string()))?;
            let task = directive
                .task
                .ok_or_else(|| IpcError::Malformed("create/update directive missing 'task'".to_string()))?;
            Ok(ScheduleDirectiveEffect::Upsert { name: directive.name, cron_expression, task })
        }
        ScheduleAction::Suspend => Ok(ScheduleDirectiveEffect::Suspend { name: directive.name }),
        ScheduleAction::Resume => Ok(ScheduleDirectiveEffect::Resume { name: directive.name }),
        ScheduleAction::Delete => Ok(ScheduleDirectiveEffect::Delete { name: directive.name }),
    }
}

/// RFC 1123 DNS label: lowercase alphanumeric and `-`, not starting or
/// ending with `-`, 1-63 characters.
fn is_dns_label(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    let valid_chars = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    valid_chars && bytes[0] != b'-' && bytes[bytes.len() - 1] != b'-'
}

/// One `/ipc/messages/*.json` directive (spec.md §4.9 item 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessageDirective {
    pub channel: String,
    pub chat_id: String,
    pub text: String,
}

/// Parse and validate an outbound-message directive, checking the
/// Instance has the named channel bound (spec.md §4.9 item 2) — the
/// caller supplies the Instance's bound channel set since this module
/// stays free of `ResourceStore` access.
pub fn parse_outbound_message(body: &str, bound_channels: &[String]) -> Result<OutboundMessageDirective, IpcError> {
    let directive: OutboundMessageDirective =
        serde_json::from_str(body).map_err(|e| IpcError::Malformed(e.to_string()))?;
    if !bound_channels.iter().any(|c| c == &directive.channel) {
        return Err(IpcError::UnboundChannel(directive.channel));
    }
    Ok(directive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_directive_with_valid_cron_upserts() {
        let body = r#"{"name":"nightly-digest","action":"create","schedule":"0 0 * * *","task":"summarize"}"#;
        let effect = parse_schedule_directive(body).unwrap();
        assert_eq!(
            effect,
            ScheduleDirectiveEffect::Upsert {
                name: "nightly-digest".to_string(),
                cron_expression: "0 0 * * *".to_string(),
                task: "summarize".to_string(),
            }
        );
    }

    #[test]
    fn invalid_dns_label_name_is_rejected() {
        let body = r#"{"name":"Not_Valid","action":"suspend"}"#;
        assert_eq!(
            parse_schedule_directive(body),
            Err(IpcError::InvalidScheduleName("Not_Valid".to_string()))
        );
    }

    #[test]
    fn create_without_cron_is_malformed() {
        let body = r#"{"name":"nightly-digest","action":"create","task":"summarize"}"#;
        assert!(matches!(parse_schedule_directive(body), Err(IpcError::Malformed(_))));
    }

    #[test]
    fn suspend_resume_delete_need_no_schedule_field() {
        for action in ["suspend", "resume", "delete"] {
            let body = format!(r#"{{"name":"nightly-digest","action":"{action}"}}"#);
            assert!(parse_schedule_directive(&body).is_ok());
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(parse_schedule_directive("not json"), Err(IpcError::Malformed(_))));
    }

    #[test]
    fn outbound_message_on_unbound_channel_is_rejected() {
        let body = r#"{"channel":"slack","chatId":"c1","text":"hi"}"#;
        assert_eq!(
            parse_outbound_message(body, &["telegram".to_string()]),
            Err(IpcError::UnboundChannel("slack".to_string()))
        );
    }

    #[test]
    fn outbound_message_on_bound_channel_passes() {
        let body = r#"{"channel":"telegram","chatId":"c1","text":"hi"}"#;
        let directive = parse_outbound_message(body, &["telegram".to_string()]).unwrap();
        assert_eq!(directive.text, "hi");
    }
}
