//! Agent/codebase progress matrix.
//!
//! Folded one envelope at a time. For the same starting matrix, replaying
//! the same log always yields the same result.
//!
//! Agent transitions:
//!
//! ```text
//! idle ──activity──> running ──complete──> completed
//!   │                   │
//!   └──transport error──┴──────────────> error
//! ```
//!
//! `completed` and `error` are terminal. Only a `complete` under the tracked
//! agent's own id completes it; aliased children can only mark it running.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::events::{Activity, ControlSignal, EventClass, ScopedEvent, classify};
use crate::progress::agents::{AgentRef, TrackedAgents};
use crate::stream::EventEnvelope;

pub const DEFAULT_COMPLETION_MARKER: &str = "complete";
pub const DEFAULT_EVENT_LOG_LIMIT: usize = 1000;
pub const DEFAULT_EVENT_LOG_RETAIN: usize = 800;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSettings {
    /// Case-insensitive substring of a status message that marks its
    /// codebase complete.
    pub completion_marker: String,
    pub event_log_limit: usize,
    pub event_log_retain: usize,
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
            event_log_limit: DEFAULT_EVENT_LOG_LIMIT,
            event_log_retain: DEFAULT_EVENT_LOG_RETAIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodebaseStatus {
    #[default]
    Initializing,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentProgress {
    pub agent_id: String,
    pub status: AgentStatus,
    pub last_activity: Option<Activity>,
    pub events: Vec<Value>,
    pub progress_percent: f64,
}

impl AgentProgress {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Idle,
            last_activity: None,
            events: Vec::new(),
            progress_percent: 0.0,
        }
    }

    fn observe(&mut self, activity: &Activity, payload: &Value, may_complete: bool) {
        self.events.push(payload.clone());
        self.last_activity = Some(activity.clone());
        if self.status.is_terminal() {
            return;
        }
        if *activity == Activity::Complete && may_complete {
            self.complete();
        } else {
            self.status = AgentStatus::Running;
        }
    }

    pub fn complete(&mut self) {
        self.status = AgentStatus::Completed;
        self.progress_percent = 100.0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodebaseProgress {
    pub codebase_id: String,
    pub agents: BTreeMap<String, AgentProgress>,
    pub overall_percent: f64,
    pub status: CodebaseStatus,
    pub events: Vec<EventEnvelope>,
    pub started_at: DateTime<Utc>,
    /// Set by the status escape hatch or aggregation; every tracked agent
    /// then counts as completed.
    pub forced_complete: bool,
}

impl CodebaseProgress {
    pub fn new(codebase_id: impl Into<String>, tracked: &TrackedAgents, started_at: DateTime<Utc>) -> Self {
        Self {
            codebase_id: codebase_id.into(),
            agents: tracked
                .iter()
                .map(|id| (id.to_string(), AgentProgress::new(id)))
                .collect(),
            overall_percent: 0.0,
            status: CodebaseStatus::Initializing,
            events: Vec::new(),
            started_at,
            forced_complete: false,
        }
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentProgress> {
        self.agents.get(agent_id)
    }

    pub fn completed_agents(&self, tracked: &TrackedAgents) -> usize {
        tracked
            .iter()
            .filter(|id| {
                self.agents
                    .get(*id)
                    .is_some_and(|agent| agent.status == AgentStatus::Completed)
            })
            .count()
    }

    fn effective_completed(&self, tracked: &TrackedAgents) -> usize {
        if self.forced_complete {
            tracked.len()
        } else {
            self.completed_agents(tracked)
        }
    }

    pub fn force_complete(&mut self) {
        self.forced_complete = true;
        self.status = CodebaseStatus::Completed;
        self.overall_percent = 100.0;
    }

    fn begin_processing(&mut self) {
        if self.status == CodebaseStatus::Initializing {
            self.status = CodebaseStatus::Processing;
        }
    }

    fn recompute(&mut self, tracked: &TrackedAgents) {
        let completed = self.effective_completed(tracked);
        self.overall_percent = percent(completed, tracked.len());
        if !tracked.is_empty() && completed == tracked.len() {
            self.status = CodebaseStatus::Completed;
        }
    }
}

/// What applying one envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Control(ControlSignal),
    Aggregated,
    Agent { codebase: String, agent: String },
    CodebaseCompleted { codebase: String },
    /// Recorded in the logs only.
    Logged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressMatrix {
    #[serde(skip)]
    tracked: TrackedAgents,
    #[serde(skip)]
    settings: MatrixSettings,
    codebases: BTreeMap<String, CodebaseProgress>,
    #[serde(skip)]
    events: Vec<EventEnvelope>,
    overall_percent: f64,
    terminal: bool,
}

impl ProgressMatrix {
    pub fn new(tracked: TrackedAgents, settings: MatrixSettings) -> Self {
        Self {
            tracked,
            settings,
            codebases: BTreeMap::new(),
            events: Vec::new(),
            overall_percent: 0.0,
            terminal: false,
        }
    }

    /// A blank matrix with the same tracked set and settings.
    pub fn cleared(&self) -> Self {
        Self::new(self.tracked.clone(), self.settings.clone())
    }

    /// Pre-populate codebases with every tracked agent idle.
    pub fn seed(&mut self, codebase_ids: &[String], at: DateTime<Utc>) {
        for id in codebase_ids {
            self.codebase_entry(id, at);
        }
        self.recompute();
    }

    pub fn insert_codebase(&mut self, codebase: CodebaseProgress) {
        self.codebases.insert(codebase.codebase_id.clone(), codebase);
        self.recompute();
    }

    pub fn tracked(&self) -> &TrackedAgents {
        &self.tracked
    }

    pub fn settings(&self) -> &MatrixSettings {
        &self.settings
    }

    pub fn codebases(&self) -> impl Iterator<Item = &CodebaseProgress> {
        self.codebases.values()
    }

    pub fn codebase(&self, id: &str) -> Option<&CodebaseProgress> {
        self.codebases.get(id)
    }

    pub fn codebase_count(&self) -> usize {
        self.codebases.len()
    }

    /// Session event log, most recent last.
    pub fn events(&self) -> &[EventEnvelope] {
        &self.events
    }

    pub fn overall_percent(&self) -> f64 {
        self.overall_percent
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn apply(&mut self, envelope: &EventEnvelope) -> Applied {
        self.record(envelope);
        match classify(envelope, &self.tracked) {
            EventClass::Control(signal) => Applied::Control(signal),
            EventClass::Aggregated => {
                self.mark_terminal();
                Applied::Aggregated
            }
            EventClass::Status { scope } => self.apply_status(scope, envelope),
            EventClass::Scoped(event) => self.apply_scoped(event, envelope),
        }
    }

    /// Authoritative terminal signal: every codebase and the session go to 100.
    pub fn mark_terminal(&mut self) {
        self.terminal = true;
        for codebase in self.codebases.values_mut() {
            codebase.force_complete();
        }
        self.overall_percent = 100.0;
    }

    /// Running agents and unfinished codebases go to `error`; completed work
    /// is kept.
    pub fn mark_transport_error(&mut self) {
        for codebase in self.codebases.values_mut() {
            for agent in codebase.agents.values_mut() {
                if agent.status == AgentStatus::Running {
                    agent.status = AgentStatus::Error;
                }
            }
            if codebase.status != CodebaseStatus::Completed {
                codebase.status = CodebaseStatus::Error;
            }
        }
        self.recompute();
    }

    pub fn force_complete(&mut self, codebase_id: &str) -> bool {
        let Some(codebase) = self.codebases.get_mut(codebase_id) else {
            return false;
        };
        codebase.force_complete();
        self.recompute();
        true
    }

    fn apply_status(&mut self, scope: Option<String>, envelope: &EventEnvelope) -> Applied {
        let Some(scope) = scope else {
            debug!(event = %envelope.name, "Status event without codebase");
            return Applied::Logged;
        };
        let marker = self.settings.completion_marker.to_lowercase();
        let codebase = self.codebase_entry(&scope, envelope.received_at);
        codebase.events.push(envelope.clone());

        let completes = !marker.is_empty()
            && envelope
                .message()
                .is_some_and(|message| message.to_lowercase().contains(&marker));
        if !completes {
            return Applied::Logged;
        }
        codebase.force_complete();
        self.recompute();
        debug!(codebase = %scope, "Codebase completed by status message");
        Applied::CodebaseCompleted { codebase: scope }
    }

    fn apply_scoped(&mut self, event: ScopedEvent, envelope: &EventEnvelope) -> Applied {
        let tracked = self.tracked.clone();
        let codebase = self.codebase_entry(&event.scope, envelope.received_at);
        codebase.events.push(envelope.clone());
        codebase.begin_processing();

        let (agent_id, may_complete) = match &event.agent {
            AgentRef::Tracked { id } => (id.clone(), true),
            AgentRef::Aliased { parent, .. } => (parent.clone(), false),
            AgentRef::Other { id } => {
                debug!(codebase = %event.scope, agent = %id, "Event from untracked agent");
                return Applied::Logged;
            }
        };

        codebase
            .agents
            .entry(agent_id.clone())
            .or_insert_with(|| AgentProgress::new(agent_id.clone()))
            .observe(&event.activity, &envelope.payload, may_complete);
        codebase.recompute(&tracked);
        self.recompute();

        Applied::Agent {
            codebase: event.scope,
            agent: agent_id,
        }
    }

    fn codebase_entry(&mut self, id: &str, at: DateTime<Utc>) -> &mut CodebaseProgress {
        let tracked = &self.tracked;
        self.codebases
            .entry(id.to_string())
            .or_insert_with(|| CodebaseProgress::new(id, tracked, at))
    }

    fn record(&mut self, envelope: &EventEnvelope) {
        self.events.push(envelope.clone());
        if self.events.len() > self.settings.event_log_limit {
            let excess = self.events.len() - self.settings.event_log_retain;
            self.events.drain(..excess);
        }
    }

    fn recompute(&mut self) {
        if self.terminal {
            self.overall_percent = 100.0;
            return;
        }
        let slots = self.codebases.len() * self.tracked.len();
        let completed: usize = self
            .codebases
            .values()
            .map(|codebase| codebase.effective_completed(&self.tracked))
            .sum();
        self.overall_percent = percent(completed, slots);
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (100.0 * done as f64 / total as f64).clamp(0.0, 100.0)
}
