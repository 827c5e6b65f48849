use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::display::{GroupStatus, group_events_by_agent};
use crate::events::{Activity, ControlSignal};
use crate::progress::{
    AggregatedArtifact, AgentStatus, Applied, CodebaseProgress, MatrixSettings, PersistedSnapshot,
    ProgressMatrix, TrackedAgents,
};
use crate::stream::EventEnvelope;

/// (owner, repository) pair identifying one generation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionKey {
    pub owner: String,
    pub repo: String,
}

impl SessionKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Everything known about one repository's generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSession {
    pub key: SessionKey,
    pub codebase_ids: Vec<String>,
    pub matrix: ProgressMatrix,
    pub is_complete: bool,
    pub artifact: Option<AggregatedArtifact>,
    #[serde(skip)]
    pub existing_snapshot: Option<PersistedSnapshot>,
    pub is_rerunning: bool,
    pub connection: ConnectionState,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl GenerationSession {
    pub fn new(key: SessionKey, tracked: TrackedAgents, settings: MatrixSettings) -> Self {
        Self {
            key,
            codebase_ids: Vec::new(),
            matrix: ProgressMatrix::new(tracked, settings),
            is_complete: false,
            artifact: None,
            existing_snapshot: None,
            is_rerunning: false,
            connection: ConnectionState::Disconnected,
            error: None,
            started_at: None,
        }
    }

    /// Same key and settings, nothing else.
    pub fn blank(&self) -> Self {
        Self {
            key: self.key.clone(),
            codebase_ids: Vec::new(),
            matrix: self.matrix.cleared(),
            is_complete: false,
            artifact: None,
            existing_snapshot: None,
            is_rerunning: false,
            connection: ConnectionState::Disconnected,
            error: None,
            started_at: None,
        }
    }

    pub fn overall_percent(&self) -> f64 {
        self.matrix.overall_percent()
    }

    pub fn has_existing_snapshot(&self) -> bool {
        self.existing_snapshot.is_some()
    }

    /// Reset derived state and seed the matrix for a fresh live run.
    pub fn begin_live(&mut self, codebase_ids: &[String], at: DateTime<Utc>) {
        self.clear_derived();
        self.matrix.seed(codebase_ids, at);
        self.codebase_ids = codebase_ids.to_vec();
        self.connection = ConnectionState::Connecting;
        self.started_at = Some(at);
    }

    /// Drop the loaded snapshot and every derived value ahead of a rerun.
    pub fn begin_rerun(&mut self) {
        self.existing_snapshot = None;
        self.clear_derived();
        self.is_rerunning = true;
    }

    fn clear_derived(&mut self) {
        self.matrix = self.matrix.cleared();
        self.is_complete = false;
        self.artifact = None;
        self.error = None;
    }

    pub fn apply(&mut self, envelope: &EventEnvelope) -> Applied {
        if self.connection == ConnectionState::Connecting {
            self.connection = ConnectionState::Connected;
        }

        let applied = self.matrix.apply(envelope);
        match &applied {
            Applied::Aggregated => {
                let artifact = AggregatedArtifact::from_payload(&envelope.payload);
                info!(
                    session = %self.key,
                    codebases = artifact.codebases.len(),
                    skipped = artifact.skipped.len(),
                    "Aggregated artifact received"
                );
                self.artifact = Some(artifact);
                self.is_complete = true;
                self.is_rerunning = false;
            }
            Applied::Control(ControlSignal::Error) => {
                let message = envelope
                    .message()
                    .unwrap_or("server reported an error")
                    .to_string();
                self.record_error(message);
            }
            Applied::Control(ControlSignal::Done) => {
                debug!(session = %self.key, "Server signalled done");
            }
            _ => {}
        }
        applied
    }

    /// Record an error reported by the server. The channel stays open, so
    /// later events (including aggregation) are still applied.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(session = %self.key, error = %message, "Server reported an error");
        self.error = Some(message);
        self.matrix.mark_transport_error();
    }

    /// Record a transport failure. Completed work is kept.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(session = %self.key, error = %message, "Generation channel failed");
        self.error = Some(message);
        self.matrix.mark_transport_error();
        self.connection = ConnectionState::Closed;
        self.is_rerunning = false;
    }

    pub fn mark_closed(&mut self) {
        if self.connection.is_live() {
            self.connection = ConnectionState::Closed;
        }
        self.is_rerunning = false;
    }

    /// Populate from a stored snapshot without touching any channel.
    pub fn hydrate(&mut self, snapshot: PersistedSnapshot, at: DateTime<Utc>) {
        let mut matrix = self.matrix.cleared();
        for stored in &snapshot.events.codebases {
            let mut codebase = CodebaseProgress::new(&stored.codebase_name, matrix.tracked(), at);
            for group in group_events_by_agent(&stored.events) {
                let Some(agent) = codebase.agents.get_mut(&group.agent_id) else {
                    continue;
                };
                agent.events = group
                    .events
                    .iter()
                    .filter_map(|event| serde_json::to_value(event).ok())
                    .collect();
                agent.last_activity = group
                    .events
                    .last()
                    .and_then(|event| event.phase.as_deref())
                    .map(Activity::parse);
                match group.status {
                    GroupStatus::Completed => agent.complete(),
                    GroupStatus::Running => agent.status = AgentStatus::Running,
                }
            }
            matrix.insert_codebase(codebase);
        }
        matrix.mark_terminal();

        self.matrix = matrix;
        self.codebase_ids = snapshot.codebase_names();
        self.artifact = Some(snapshot.artifact());
        self.is_complete = true;
        self.is_rerunning = false;
        self.error = None;
        self.started_at = Some(at);
        info!(
            session = %self.key,
            codebases = self.codebase_ids.len(),
            status = ?snapshot.status,
            "Session hydrated from snapshot"
        );
        self.existing_snapshot = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CodebaseStatus;
    use serde_json::json;

    fn session() -> GenerationSession {
        GenerationSession::new(
            SessionKey::new("acme", "widgets"),
            TrackedAgents::new([
                "project_configuration_agent",
                "development_workflow_agent",
                "business_logic_domain_agent",
            ]),
            MatrixSettings::default(),
        )
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot() -> PersistedSnapshot {
        serde_json::from_value(json!({
            "repository_name": "widgets",
            "repository_owner_name": "acme",
            "status": "COMPLETED",
            "events": {"codebases": [
                {"codebase_name": "api", "progress": 100, "events": [
                    {"id": 1, "event": "project_configuration_agent", "phase": "tool_call"},
                    {"id": 2, "event": "project_configuration_agent", "phase": "result"},
                    {"id": 3, "event": "development_workflow_agent", "phase": "tool_call"}
                ]}
            ]},
            "agent_md_output": {"codebases": {"api": {"project_configuration": {"config_files": []}}}},
            "created_at": "2026-01-01T00:00:00Z",
            "modified_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_per_agent_completion_is_not_session_completion() {
        let mut s = session();
        s.begin_live(&ids(&["api", "web"]), Utc::now());
        for codebase in ["api", "web"] {
            for agent in s.matrix.tracked().clone().iter() {
                s.apply(&EventEnvelope::new(
                    0,
                    format!("{codebase}:{agent}:complete"),
                    json!({}),
                ));
            }
        }
        assert_eq!(s.overall_percent(), 100.0);
        assert!(!s.is_complete);

        s.apply(&EventEnvelope::new(
            9,
            "aggregated",
            json!({"repository": "acme/widgets", "codebases": {"api": "{}", "web": "{broken"}}),
        ));
        assert!(s.is_complete);
        let artifact = s.artifact.as_ref().unwrap();
        assert!(artifact.codebases.contains_key("api"));
        assert!(!artifact.codebases.contains_key("web"));
    }

    #[test]
    fn test_first_event_marks_connected() {
        let mut s = session();
        s.begin_live(&ids(&["api"]), Utc::now());
        assert_eq!(s.connection, ConnectionState::Connecting);
        s.apply(&EventEnvelope::new(0, "connected", json!({})));
        assert_eq!(s.connection, ConnectionState::Connected);
    }

    #[test]
    fn test_error_event_records_error_and_keeps_channel() {
        let mut s = session();
        s.begin_live(&ids(&["api"]), Utc::now());
        s.apply(&EventEnvelope::new(0, "api:project_configuration_agent:tool_call", json!({})));
        s.apply(&EventEnvelope::new(1, "error", json!({"message": "worker crashed"})));

        assert_eq!(s.error.as_deref(), Some("worker crashed"));
        assert_eq!(s.connection, ConnectionState::Connected);
        let api = s.matrix.codebase("api").unwrap();
        assert_eq!(api.status, CodebaseStatus::Error);

        s.apply(&EventEnvelope::new(
            2,
            "aggregated",
            json!({"repository": "acme/widgets", "codebases": {"api": "{}"}}),
        ));
        assert!(s.is_complete);
        assert!(s.artifact.is_some());
        assert_eq!(s.error.as_deref(), Some("worker crashed"));

        s.mark_closed();
        assert_eq!(s.connection, ConnectionState::Closed);
    }

    #[test]
    fn test_hydrate_sets_complete_and_artifact() {
        let mut s = session();
        s.hydrate(snapshot(), Utc::now());

        assert!(s.is_complete);
        assert_eq!(s.overall_percent(), 100.0);
        assert!(s.has_existing_snapshot());
        assert!(s.artifact.as_ref().unwrap().codebases.contains_key("api"));
        let api = s.matrix.codebase("api").unwrap();
        assert_eq!(
            api.agent("project_configuration_agent").unwrap().status,
            AgentStatus::Completed
        );
        assert_eq!(
            api.agent("development_workflow_agent").unwrap().status,
            AgentStatus::Running
        );
        assert_eq!(s.connection, ConnectionState::Disconnected);
    }

    #[test]
    fn test_rerun_clears_to_blank_values() {
        let mut s = session();
        s.hydrate(snapshot(), Utc::now());
        s.begin_rerun();

        let blank = session();
        assert!(s.artifact.is_none());
        assert_eq!(s.overall_percent(), blank.overall_percent());
        assert!(!s.is_complete);
        assert!(!s.has_existing_snapshot());
        assert!(s.is_rerunning);
        assert_eq!(s.matrix.codebase_count(), 0);
    }
}
