//! Aggregated AGENTS.md artifact.
//!
//! The aggregation event carries one document per codebase. Older backends
//! send each document as a JSON string, newer ones as an object; both are
//! accepted. A document that does not decode to an object is dropped and the
//! rest of the artifact is kept.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMdOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub programming_language_metadata: Option<LanguageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_configuration: Option<ProjectConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub development_workflow: Option<DevelopmentWorkflow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_guide: Option<DependencyGuide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_logic_domain: Option<BusinessLogicDomain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<UsageStatistics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageMetadata {
    #[serde(default)]
    pub primary_language: Option<String>,
    #[serde(default)]
    pub package_manager: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub path: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfiguration {
    #[serde(default)]
    pub config_files: Vec<ConfigFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentCommand {
    pub kind: String,
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentWorkflow {
    #[serde(default)]
    pub commands: Vec<DevelopmentCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub usage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGuide {
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModelFile {
    pub path: String,
    #[serde(default)]
    pub responsibility: Option<String>,
}

/// Either a plain summary or a description with its core files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusinessLogicDomain {
    Summary(String),
    Detailed {
        #[serde(default)]
        description: String,
        #[serde(default)]
        data_models: Vec<DataModelFile>,
    },
}

impl BusinessLogicDomain {
    pub fn description(&self) -> &str {
        match self {
            BusinessLogicDomain::Summary(text) => text,
            BusinessLogicDomain::Detailed { description, .. } => description,
        }
    }

    pub fn data_models(&self) -> &[DataModelFile] {
        match self {
            BusinessLogicDomain::Summary(_) => &[],
            BusinessLogicDomain::Detailed { data_models, .. } => data_models,
        }
    }
}

/// Token usage reported by the generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStatistics {
    pub requests: u64,
    pub tool_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: Option<f64>,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document is a {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Decode one per-codebase document from either encoding.
pub fn parse_document(raw: &Value) -> Result<AgentMdOutput, DocumentError> {
    let decoded;
    let value = match raw {
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text)?;
            &decoded
        }
        other => other,
    };
    if !value.is_object() {
        return Err(DocumentError::NotAnObject(json_kind(value)));
    }
    Ok(AgentMdOutput::deserialize(value)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedArtifact {
    pub repository: Option<String>,
    pub codebases: BTreeMap<String, AgentMdOutput>,
    /// Codebases whose document could not be decoded.
    pub skipped: Vec<String>,
}

impl AggregatedArtifact {
    /// Build from an aggregation payload `{repository, codebases: {...}}`.
    pub fn from_payload(payload: &Value) -> Self {
        let repository = payload
            .get("repository")
            .and_then(Value::as_str)
            .map(str::to_string);
        match payload.get("codebases").and_then(Value::as_object) {
            Some(documents) => Self::from_documents(repository, documents),
            None => {
                warn!("Aggregation payload has no codebases object");
                Self {
                    repository,
                    ..Self::default()
                }
            }
        }
    }

    pub fn from_documents<'a>(
        repository: Option<String>,
        documents: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) -> Self {
        let mut artifact = Self {
            repository,
            ..Self::default()
        };
        for (codebase, raw) in documents {
            match parse_document(raw) {
                Ok(document) => {
                    artifact.codebases.insert(codebase.clone(), document);
                }
                Err(e) => {
                    warn!(codebase = %codebase, error = %e, "Dropping undecodable codebase document");
                    artifact.skipped.push(codebase.clone());
                }
            }
        }
        artifact
    }

    pub fn is_empty(&self) -> bool {
        self.codebases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "programming_language_metadata": {"primary_language": "python", "package_manager": "uv"},
            "project_configuration": {"config_files": [{"path": "pyproject.toml", "purpose": "build"}]},
            "development_workflow": {"commands": [
                {"kind": "test", "command": "uv run pytest", "config_files": []}
            ]},
            "business_logic_domain": {
                "description": "Ingests repositories",
                "data_models": [{"path": "src/models.py", "responsibility": "ORM"}]
            }
        })
    }

    #[test]
    fn test_accepts_string_and_object_documents() {
        let payload = json!({
            "repository": "acme/widgets",
            "codebases": {
                "api": document().to_string(),
                "web": document(),
            }
        });
        let artifact = AggregatedArtifact::from_payload(&payload);

        assert_eq!(artifact.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(artifact.codebases.len(), 2);
        assert_eq!(artifact.codebases["api"], artifact.codebases["web"]);
        let api = &artifact.codebases["api"];
        assert_eq!(
            api.programming_language_metadata
                .as_ref()
                .and_then(|m| m.primary_language.as_deref()),
            Some("python")
        );
        assert!(artifact.skipped.is_empty());
    }

    #[test]
    fn test_malformed_document_is_skipped() {
        let payload = json!({
            "repository": "acme/widgets",
            "codebases": {
                "api": document(),
                "broken": "{not json",
                "scalar": "\"just text\"",
                "list": [],
            }
        });
        let artifact = AggregatedArtifact::from_payload(&payload);

        assert_eq!(artifact.codebases.keys().collect::<Vec<_>>(), ["api"]);
        let mut skipped = artifact.skipped.clone();
        skipped.sort();
        assert_eq!(skipped, ["broken", "list", "scalar"]);
    }

    #[test]
    fn test_business_logic_summary_form() {
        let raw = json!({"business_logic_domain": "Billing and invoicing"});
        let doc = parse_document(&raw).unwrap();
        let domain = doc.business_logic_domain.unwrap();
        assert_eq!(domain.description(), "Billing and invoicing");
        assert!(domain.data_models().is_empty());
    }

    #[test]
    fn test_sparse_document_decodes() {
        let doc = parse_document(&json!({})).unwrap();
        assert_eq!(doc, AgentMdOutput::default());
    }

    #[test]
    fn test_statistics_default_missing_counters() {
        let doc = parse_document(&json!({"statistics": {"requests": 4, "total_tokens": 900}})).unwrap();
        let stats = doc.statistics.unwrap();
        assert_eq!(stats.requests, 4);
        assert_eq!(stats.tool_calls, 0);
        assert!(stats.estimated_cost_usd.is_none());
    }

    #[test]
    fn test_payload_without_codebases() {
        let artifact = AggregatedArtifact::from_payload(&json!({"repository": "a/b"}));
        assert!(artifact.is_empty());
        assert_eq!(artifact.repository.as_deref(), Some("a/b"));
    }
}
