//! Persisted snapshot of a finished (or interrupted) generation run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::artifact::AggregatedArtifact;
use crate::display::AgentEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SnapshotStatus {
    Running,
    #[default]
    Completed,
    #[serde(alias = "FAILED")]
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCodebase {
    pub codebase_name: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub events: Vec<AgentEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEvents {
    #[serde(default)]
    pub overall_progress: Option<f64>,
    #[serde(default)]
    pub codebases: Vec<SnapshotCodebase>,
}

/// Stored per-codebase documents, each a JSON string or an object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredAgentMdOutput {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub codebases: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub repository_name: String,
    pub repository_owner_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_workflow_run_id: Option<String>,
    #[serde(default)]
    pub status: SnapshotStatus,
    #[serde(default)]
    pub events: SnapshotEvents,
    #[serde(default)]
    pub agent_md_output: StoredAgentMdOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event_at: Option<String>,
    pub created_at: String,
    pub modified_at: String,
}

impl PersistedSnapshot {
    /// Recorded overall progress: the top-level column, then the events
    /// blob, then the mean of per-codebase values.
    pub fn recorded_progress(&self) -> f64 {
        let recorded = self
            .overall_progress
            .or(self.events.overall_progress)
            .filter(|p| !p.is_nan())
            .or_else(|| average_progress(&self.events.codebases));
        normalize_progress(recorded)
    }

    pub fn artifact(&self) -> AggregatedArtifact {
        AggregatedArtifact::from_documents(
            self.agent_md_output.repository.clone(),
            &self.agent_md_output.codebases,
        )
    }

    pub fn codebase_names(&self) -> Vec<String> {
        self.events
            .codebases
            .iter()
            .map(|c| c.codebase_name.clone())
            .collect()
    }
}

/// Clamp to [0, 100]; absent or NaN is 0.
pub fn normalize_progress(progress: Option<f64>) -> f64 {
    match progress {
        Some(p) if !p.is_nan() => p.clamp(0.0, 100.0),
        _ => 0.0,
    }
}

fn average_progress(codebases: &[SnapshotCodebase]) -> Option<f64> {
    let valid: Vec<f64> = codebases
        .iter()
        .filter_map(|c| c.progress)
        .filter(|p| !p.is_nan())
        .collect();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}
