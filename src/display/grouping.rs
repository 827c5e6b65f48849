//! Group an event log by agent for display.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::events::{EventName, parse_event_name};
use crate::progress::agents::{canonical_agent_id, display_name, display_order};
use crate::stream::EventEnvelope;

/// Phase that marks a group complete when emitted under the canonical id.
pub const RESULT_PHASE: &str = "result";

pub const DEFAULT_TRUNCATE_LEN: usize = 50;

/// One agent event, as persisted in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: i64,
    /// Emitting agent id, possibly an aliased child.
    pub event: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AgentEvent {
    /// Convert a live composite envelope; other envelopes have no agent.
    pub fn from_envelope(envelope: &EventEnvelope) -> Option<Self> {
        match parse_event_name(&envelope.name) {
            EventName::Scoped {
                agent_id, activity, ..
            } => Some(Self {
                id: i64::try_from(envelope.sequence).unwrap_or(i64::MAX),
                event: agent_id.to_string(),
                phase: Some(activity.to_string()),
                message: envelope.message().map(str::to_string),
            }),
            EventName::Status => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentGroup {
    pub agent_id: String,
    pub display_name: String,
    pub events: Vec<AgentEvent>,
    pub status: GroupStatus,
    pub event_count: usize,
}

pub fn group_events_by_agent(events: &[AgentEvent]) -> Vec<AgentGroup> {
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: HashMap<&str, Vec<AgentEvent>> = HashMap::new();
    for event in events {
        let agent_id = canonical_agent_id(&event.event);
        grouped
            .entry(agent_id)
            .or_insert_with(|| {
                order.push(agent_id);
                Vec::new()
            })
            .push(event.clone());
    }

    let mut groups: Vec<AgentGroup> = order
        .into_iter()
        .map(|agent_id| {
            let events = grouped.remove(agent_id).unwrap_or_default();
            let completed = events
                .iter()
                .any(|e| e.event == agent_id && e.phase.as_deref() == Some(RESULT_PHASE));
            AgentGroup {
                agent_id: agent_id.to_string(),
                display_name: display_name(agent_id),
                event_count: events.len(),
                events,
                status: if completed {
                    GroupStatus::Completed
                } else {
                    GroupStatus::Running
                },
            }
        })
        .collect();
    // stable: equal orders keep first-seen order
    groups.sort_by_key(|group| display_order(&group.agent_id));
    groups
}

/// Shorten to `max_len` characters, appending `...`. Returns whether it was cut.
pub fn truncate_message(message: &str, max_len: usize) -> (String, bool) {
    if message.chars().count() <= max_len {
        return (message.to_string(), false);
    }
    let cut: String = message.chars().take(max_len).collect();
    (format!("{cut}..."), true)
}
