//! Replay backend for local runs and tests.
//!
//! A fixture describes one repository run: per codebase, the agent events
//! to emit and the final document. The server streams it as SSE and can
//! answer snapshot requests with the same data.

pub mod server;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::display::AgentEvent;
use crate::progress::TrackedAgents;
use crate::progress::agents::AGGREGATOR_AGENT;

pub use server::{MockConfig, MockServer, build_router, serve};

/// Activities emitted per agent when a codebase lists no events.
const DEFAULT_ACTIVITIES: [&str; 4] = ["prompt.start", "tool.call", "result", "complete"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureEvent {
    pub agent: String,
    pub activity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureCodebase {
    #[serde(default)]
    pub events: Vec<FixtureEvent>,
    /// Final document; sent as a JSON string in the aggregated event.
    /// A string value is sent as-is.
    #[serde(default)]
    pub document: Option<Value>,
    /// Status line emitted after the agent events.
    #[serde(default)]
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub repository_owner_name: String,
    pub repository_name: String,
    pub codebases: BTreeMap<String, FixtureCodebase>,
    /// Omit the aggregated event, leaving the run unfinished.
    #[serde(default)]
    pub skip_aggregation: bool,
}

/// One named SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    pub event: String,
    pub data: Value,
}

impl ReplayFrame {
    fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

impl FixtureCodebase {
    pub fn events_or_default(&self) -> Vec<FixtureEvent> {
        if !self.events.is_empty() {
            return self.events.clone();
        }
        TrackedAgents::default()
            .iter()
            .flat_map(|agent| {
                DEFAULT_ACTIVITIES.iter().map(move |activity| FixtureEvent {
                    agent: agent.to_string(),
                    activity: activity.to_string(),
                    message: Some(format!("{agent} {activity}")),
                })
            })
            .collect()
    }
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture {}", path.display()))
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.repository_owner_name, self.repository_name)
    }

    pub fn matches(&self, owner: &str, repo: &str) -> bool {
        self.repository_owner_name == owner && self.repository_name == repo
    }

    /// Selected codebases in fixture order; empty selection means all.
    fn selected<'a>(&'a self, codebase_ids: &'a [String]) -> impl Iterator<Item = (&'a String, &'a FixtureCodebase)> {
        self.codebases
            .iter()
            .filter(move |(id, _)| codebase_ids.is_empty() || codebase_ids.contains(id))
    }

    /// Frames of a full run: connected, agent events, aggregated, done.
    pub fn frames(&self, codebase_ids: &[String]) -> Vec<ReplayFrame> {
        let mut frames = vec![ReplayFrame::new(
            "connected",
            json!({"message": format!("streaming {}", self.repository())}),
        )];
        let mut documents = serde_json::Map::new();

        for (id, codebase) in self.selected(codebase_ids) {
            for event in codebase.events_or_default() {
                frames.push(ReplayFrame::new(
                    format!("{id}:{}:{}", event.agent, event.activity),
                    json!({"message": event.message}),
                ));
            }
            if let Some(message) = &codebase.status_message {
                frames.push(ReplayFrame::new(
                    "status",
                    json!({"codebase": id, "message": message}),
                ));
            }
            if let Some(document) = &codebase.document {
                documents.insert(id.clone(), Value::String(document_text(document)));
            }
        }

        if !self.skip_aggregation {
            frames.push(ReplayFrame::new(
                "aggregated",
                json!({"repository": self.repository(), "codebases": documents}),
            ));
        }
        frames.push(ReplayFrame::new("done", json!({"message": "done"})));
        frames
    }

    /// The snapshot a backend would have stored after this run.
    pub fn snapshot(&self, created_at: &str) -> Value {
        let mut next_id = 0i64;
        let mut codebases = Vec::new();
        let mut documents = serde_json::Map::new();

        for (id, codebase) in &self.codebases {
            let events: Vec<AgentEvent> = codebase
                .events_or_default()
                .into_iter()
                .filter(|event| event.agent != AGGREGATOR_AGENT)
                .map(|event| {
                    next_id += 1;
                    AgentEvent {
                        id: next_id,
                        event: event.agent,
                        phase: Some(event.activity),
                        message: event.message,
                    }
                })
                .collect();
            codebases.push(json!({
                "codebase_name": id,
                "progress": 100.0,
                "events": events,
            }));
            if let Some(document) = &codebase.document {
                documents.insert(id.clone(), Value::String(document_text(document)));
            }
        }

        json!({
            "repository_name": self.repository_name,
            "repository_owner_name": self.repository_owner_name,
            "repository_workflow_run_id": uuid::Uuid::new_v4().to_string(),
            "status": if self.skip_aggregation { "RUNNING" } else { "COMPLETED" },
            "events": {"overall_progress": 100.0, "codebases": codebases},
            "agent_md_output": {"repository": self.repository(), "codebases": documents},
            "overall_progress": 100.0,
            "created_at": created_at,
            "modified_at": created_at,
        })
    }
}

/// Documents given as strings are sent verbatim, malformed or not.
fn document_text(document: &Value) -> String {
    match document {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PersistedSnapshot;

    fn fixture() -> Fixture {
        serde_json::from_value(json!({
            "repository_owner_name": "acme",
            "repository_name": "widgets",
            "codebases": {
                "api": {
                    "events": [
                        {"agent": "project_configuration_agent", "activity": "tool.call", "message": "scan"},
                        {"agent": "project_configuration_agent", "activity": "complete"}
                    ],
                    "document": {"project_configuration": {"config_files": []}}
                },
                "web": {"status_message": "web analysis complete"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_frames_full_run() {
        let frames = fixture().frames(&[]);
        let names: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();

        assert_eq!(names.first(), Some(&"connected"));
        assert_eq!(names[1], "api:project_configuration_agent:tool.call");
        assert_eq!(names[2], "api:project_configuration_agent:complete");
        // web has no events listed: 4 agents x 4 default activities
        assert_eq!(names.iter().filter(|n| n.starts_with("web:")).count(), 16);
        assert!(names.contains(&"status"));
        assert_eq!(names[names.len() - 2], "aggregated");
        assert_eq!(names.last(), Some(&"done"));

        let aggregated = &frames[frames.len() - 2].data;
        assert!(aggregated["codebases"]["api"].is_string());
        assert!(aggregated["codebases"].get("web").is_none());
    }

    #[test]
    fn test_frames_respect_selection() {
        let frames = fixture().frames(&["api".to_string()]);
        assert!(!frames.iter().any(|f| f.event.starts_with("web:")));
    }

    #[test]
    fn test_skip_aggregation() {
        let mut fixture = fixture();
        fixture.skip_aggregation = true;
        let frames = fixture.frames(&[]);
        assert!(!frames.iter().any(|f| f.event == "aggregated"));
        assert_eq!(frames.last().unwrap().event, "done");
    }

    #[test]
    fn test_snapshot_decodes_as_persisted_snapshot() {
        let value = fixture().snapshot("2026-01-01T00:00:00Z");
        let snapshot: PersistedSnapshot = serde_json::from_value(value).unwrap();

        assert_eq!(snapshot.repository_owner_name, "acme");
        assert_eq!(snapshot.codebase_names(), vec!["api", "web"]);
        assert_eq!(snapshot.events.codebases[0].events[0].id, 1);
        assert!(snapshot.artifact().codebases.contains_key("api"));
    }
}
