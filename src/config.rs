//! Layered configuration: `.agentmd/progress.toml` -> environment -> CLI.
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:8001"
//!
//! [stream]
//! max_chunks = 500
//! event_names = ["connected", "progress", "result", "aggregated", "error", "done", "status"]
//! channel_capacity = 256
//!
//! [progress]
//! tracked_agents = ["project_configuration_agent", "development_workflow_agent",
//!                   "dependency_guide_agent", "business_logic_domain_agent"]
//! completion_marker = "complete"
//! event_log_limit = 1000
//! event_log_retain = 800
//! ```
//!
//! When the project has no config file, the user-level file under the
//! platform config directory (`agentmd/progress.toml`) is used instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::progress::agents::TrackedAgents;
use crate::progress::matrix::{
    DEFAULT_COMPLETION_MARKER, DEFAULT_EVENT_LOG_LIMIT, DEFAULT_EVENT_LOG_RETAIN, MatrixSettings,
};
use crate::session::SessionSettings;
use crate::stream::bridge::{DEFAULT_CHANNEL_CAPACITY, default_event_names};
use crate::stream::{EventFilter, StreamOptions};

pub const CONFIG_DIR: &str = ".agentmd";
pub const CONFIG_FILE: &str = "progress.toml";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8001";

pub const ENV_BASE_URL: &str = "AGENTMD_BASE_URL";
pub const ENV_MAX_CHUNKS: &str = "AGENTMD_MAX_CHUNKS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSection {
    /// Retain only the most recent N events per channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunks: Option<usize>,
    #[serde(default = "default_event_names")]
    pub event_names: Vec<String>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            max_chunks: None,
            event_names: default_event_names(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSection {
    #[serde(default = "default_tracked_agents")]
    pub tracked_agents: Vec<String>,
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    #[serde(default = "default_event_log_limit")]
    pub event_log_limit: usize,
    #[serde(default = "default_event_log_retain")]
    pub event_log_retain: usize,
}

fn default_tracked_agents() -> Vec<String> {
    TrackedAgents::default().iter().map(str::to_string).collect()
}

fn default_completion_marker() -> String {
    DEFAULT_COMPLETION_MARKER.to_string()
}

fn default_event_log_limit() -> usize {
    DEFAULT_EVENT_LOG_LIMIT
}

fn default_event_log_retain() -> usize {
    DEFAULT_EVENT_LOG_RETAIN
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            tracked_agents: default_tracked_agents(),
            completion_marker: default_completion_marker(),
            event_log_limit: default_event_log_limit(),
            event_log_retain: default_event_log_retain(),
        }
    }
}

/// Contents of `progress.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub progress: ProgressSection,
}

impl ProgressToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Project file, else the user-level file, else defaults.
    pub fn load_or_default(project_dir: &Path) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let candidates = [Some(project_config_path(project_dir)), user_config_path()];
        for path in candidates.into_iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Loading config");
                return Ok((Self::load(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every problem with the file; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.server.base_url.trim().is_empty() {
            problems.push("server.base_url must not be empty".to_string());
        }
        if self.stream.max_chunks == Some(0) {
            problems.push("stream.max_chunks must be at least 1".to_string());
        }
        if self.stream.channel_capacity == 0 {
            problems.push("stream.channel_capacity must be at least 1".to_string());
        }
        if self.progress.tracked_agents.is_empty() {
            problems.push("progress.tracked_agents must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for agent in &self.progress.tracked_agents {
            if !seen.insert(agent) {
                problems.push(format!("progress.tracked_agents lists '{agent}' twice"));
            }
        }
        if self.progress.event_log_retain > self.progress.event_log_limit {
            problems.push(format!(
                "progress.event_log_retain ({}) exceeds event_log_limit ({})",
                self.progress.event_log_retain, self.progress.event_log_limit
            ));
        }
        problems
    }
}

pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentmd").join(CONFIG_FILE))
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub max_chunks: Option<usize>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// File the values came from, if any.
    pub source: Option<PathBuf>,
    pub base_url: String,
    pub session: SessionSettings,
}

impl Config {
    pub fn resolve(project_dir: &Path, overrides: &Overrides) -> Result<Self, ConfigError> {
        let (toml, source) = ProgressToml::load_or_default(project_dir)?;
        let mut config = Self::from_toml(project_dir, toml, overrides, |name| {
            std::env::var(name).ok()
        })?;
        config.source = source;
        Ok(config)
    }

    /// Apply environment and CLI layers over a parsed file.
    pub fn from_toml(
        project_dir: &Path,
        mut toml: ProgressToml,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(base_url) = env(ENV_BASE_URL) {
            toml.server.base_url = base_url;
        }
        if let Some(raw) = env(ENV_MAX_CHUNKS) {
            let parsed = raw.trim().parse::<usize>().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_MAX_CHUNKS} must be a positive integer, got '{raw}'"))
            })?;
            toml.stream.max_chunks = Some(parsed);
        }
        if let Some(base_url) = &overrides.base_url {
            toml.server.base_url = base_url.clone();
        }
        if let Some(max_chunks) = overrides.max_chunks {
            toml.stream.max_chunks = Some(max_chunks);
        }

        let problems = toml.validate();
        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems.join("; ")));
        }

        let session = SessionSettings {
            tracked: TrackedAgents::new(toml.progress.tracked_agents),
            matrix: MatrixSettings {
                completion_marker: toml.progress.completion_marker,
                event_log_limit: toml.progress.event_log_limit,
                event_log_retain: toml.progress.event_log_retain,
            },
            stream: StreamOptions {
                enabled: true,
                max_chunks: toml.stream.max_chunks,
                filter: EventFilter::new(toml.stream.event_names),
                channel_capacity: toml.stream.channel_capacity,
            },
        };

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            source: None,
            base_url: toml.server.base_url.trim_end_matches('/').to_string(),
            session,
        })
    }
}
