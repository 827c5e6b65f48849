//! Event classification.
//!
//! Bare names are control signals, the aggregation result or status lines.
//! Composite names follow `<scope>:<agent_id>:<activity>`, split on exactly
//! two colons. Anything else is treated as a status event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::agents::{AGGREGATOR_AGENT, AgentRef, TrackedAgents};
use crate::stream::EventEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName<'a> {
    Status,
    Scoped {
        scope: &'a str,
        agent_id: &'a str,
        activity: &'a str,
    },
}

pub fn parse_event_name(name: &str) -> EventName<'_> {
    let mut parts = name.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(scope), Some(agent_id), Some(activity), None)
            if !scope.is_empty() && !agent_id.is_empty() && !activity.is_empty() =>
        {
            EventName::Scoped {
                scope,
                agent_id,
                activity,
            }
        }
        _ => EventName::Status,
    }
}

/// Agent lifecycle step named by the last segment of a composite event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Activity {
    PromptStart,
    ModelRequest,
    ToolCall,
    ToolResult,
    Result,
    Complete,
    Status,
    Other(String),
}

impl Activity {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "prompt_start" | "prompt.start" => Activity::PromptStart,
            "model_request" | "model.request" => Activity::ModelRequest,
            "tool_call" | "tool.call" => Activity::ToolCall,
            "tool_result" | "tool.result" => Activity::ToolResult,
            "result" => Activity::Result,
            "complete" => Activity::Complete,
            "status" => Activity::Status,
            other => Activity::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Activity::PromptStart => "prompt_start",
            Activity::ModelRequest => "model_request",
            Activity::ToolCall => "tool_call",
            Activity::ToolResult => "tool_result",
            Activity::Result => "result",
            Activity::Complete => "complete",
            Activity::Status => "status",
            Activity::Other(other) => other,
        }
    }
}

impl From<String> for Activity {
    fn from(raw: String) -> Self {
        Activity::parse(&raw)
    }
}

impl From<Activity> for String {
    fn from(activity: Activity) -> Self {
        activity.as_str().to_string()
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Connected,
    Progress,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedEvent {
    pub scope: String,
    pub agent: AgentRef,
    pub activity: Activity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    Control(ControlSignal),
    Aggregated,
    /// Status line, owned by a codebase when one can be determined.
    Status { scope: Option<String> },
    Scoped(ScopedEvent),
}

pub fn classify(envelope: &EventEnvelope, tracked: &TrackedAgents) -> EventClass {
    match envelope.name.as_str() {
        "connected" => return EventClass::Control(ControlSignal::Connected),
        "progress" => return EventClass::Control(ControlSignal::Progress),
        "done" => return EventClass::Control(ControlSignal::Done),
        "error" => return EventClass::Control(ControlSignal::Error),
        "aggregated" | "result" => return EventClass::Aggregated,
        _ => {}
    }

    match parse_event_name(&envelope.name) {
        EventName::Scoped {
            scope,
            agent_id,
            activity,
        } => {
            if agent_id == AGGREGATOR_AGENT {
                return EventClass::Aggregated;
            }
            let activity = Activity::parse(activity);
            if activity == Activity::Status {
                return EventClass::Status {
                    scope: Some(scope.to_string()),
                };
            }
            EventClass::Scoped(ScopedEvent {
                scope: scope.to_string(),
                agent: tracked.resolve(agent_id),
                activity,
            })
        }
        EventName::Status => EventClass::Status {
            scope: envelope
                .payload
                .get("codebase")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(name: &str, payload: Value) -> EventEnvelope {
        EventEnvelope::new(0, name, payload)
    }

    #[test]
    fn test_parse_composite_name() {
        assert_eq!(
            parse_event_name("api:project_configuration_agent:tool_call"),
            EventName::Scoped {
                scope: "api",
                agent_id: "project_configuration_agent",
                activity: "tool_call"
            }
        );
    }

    #[test]
    fn test_wrong_segment_count_is_status() {
        assert_eq!(parse_event_name("api:agent"), EventName::Status);
        assert_eq!(parse_event_name("a:b:c:d"), EventName::Status);
        assert_eq!(parse_event_name("status"), EventName::Status);
        assert_eq!(parse_event_name("api::tool_call"), EventName::Status);
    }

    #[test]
    fn test_control_signals() {
        let tracked = TrackedAgents::default();
        assert_eq!(
            classify(&envelope("connected", json!({})), &tracked),
            EventClass::Control(ControlSignal::Connected)
        );
        assert_eq!(
            classify(&envelope("done", json!({})), &tracked),
            EventClass::Control(ControlSignal::Done)
        );
        assert_eq!(
            classify(&envelope("error", json!("boom")), &tracked),
            EventClass::Control(ControlSignal::Error)
        );
    }

    #[test]
    fn test_aggregation_bare_and_agent_forms() {
        let tracked = TrackedAgents::default();
        assert_eq!(
            classify(&envelope("aggregated", json!({})), &tracked),
            EventClass::Aggregated
        );
        assert_eq!(
            classify(&envelope("result", json!({})), &tracked),
            EventClass::Aggregated
        );
        assert_eq!(
            classify(
                &envelope("acme/widgets:aggregated_final_summary_agent:agent_md_output", json!({})),
                &tracked
            ),
            EventClass::Aggregated
        );
    }

    #[test]
    fn test_status_scope_from_payload_or_name() {
        let tracked = TrackedAgents::default();
        assert_eq!(
            classify(
                &envelope("status", json!({"codebase": "api", "message": "Analysis complete"})),
                &tracked
            ),
            EventClass::Status {
                scope: Some("api".to_string())
            }
        );
        assert_eq!(
            classify(&envelope("api:orchestrator:status", json!("working")), &tracked),
            EventClass::Status {
                scope: Some("api".to_string())
            }
        );
        assert_eq!(
            classify(&envelope("heartbeat", json!(null)), &tracked),
            EventClass::Status { scope: None }
        );
    }

    #[test]
    fn test_scoped_event_resolves_agent() {
        let tracked = TrackedAgents::default();
        let class = classify(
            &envelope("web:dependency_guide_agent_item:complete", json!({})),
            &tracked,
        );
        match class {
            EventClass::Scoped(event) => {
                assert_eq!(event.scope, "web");
                assert_eq!(event.activity, Activity::Complete);
                assert_eq!(event.agent.tracked_id(), Some("dependency_guide_agent"));
            }
            other => panic!("Expected scoped event, got {:?}", other),
        }
    }

    #[test]
    fn test_activity_round_trips_through_string() {
        let encoded = serde_json::to_string(&Activity::Other("thinking".into())).unwrap();
        assert_eq!(encoded, "\"thinking\"");
        let decoded: Activity = serde_json::from_str("\"tool_result\"").unwrap();
        assert_eq!(decoded, Activity::ToolResult);
    }

    #[test]
    fn test_dotted_activity_names() {
        assert_eq!(Activity::parse("tool.call"), Activity::ToolCall);
        assert_eq!(Activity::parse("prompt.start").as_str(), "prompt_start");
    }
}
