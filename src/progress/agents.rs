//! Agent registry, alias table and the tracked agent set.

use serde::{Deserialize, Serialize};

pub const PROJECT_CONFIGURATION_AGENT: &str = "project_configuration_agent";
pub const DEVELOPMENT_WORKFLOW_AGENT: &str = "development_workflow_agent";
pub const DEPENDENCY_GUIDE_AGENT: &str = "dependency_guide_agent";
pub const BUSINESS_LOGIC_DOMAIN_AGENT: &str = "business_logic_domain_agent";

/// Agent id of the repository-level aggregation step.
pub const AGGREGATOR_AGENT: &str = "aggregated_final_summary_agent";

/// Display order for agents missing from the registry.
pub const UNREGISTERED_ORDER: u32 = 999;

struct RegistryEntry {
    id: &'static str,
    display_name: &'static str,
    order: u32,
}

static AGENT_REGISTRY: &[RegistryEntry] = &[
    RegistryEntry {
        id: PROJECT_CONFIGURATION_AGENT,
        display_name: "Project Configuration",
        order: 1,
    },
    RegistryEntry {
        id: DEVELOPMENT_WORKFLOW_AGENT,
        display_name: "Development Workflow",
        order: 2,
    },
    RegistryEntry {
        id: DEPENDENCY_GUIDE_AGENT,
        display_name: "Dependency Guide",
        order: 3,
    },
    RegistryEntry {
        id: BUSINESS_LOGIC_DOMAIN_AGENT,
        display_name: "Business Logic Domain",
        order: 4,
    },
];

/// Child agent ids whose events belong to a parent agent.
static AGENT_ALIASES: &[(&str, &str)] = &[("dependency_guide_agent_item", DEPENDENCY_GUIDE_AGENT)];

fn registry_entry(id: &str) -> Option<&'static RegistryEntry> {
    AGENT_REGISTRY.iter().find(|entry| entry.id == id)
}

/// Parent of an aliased child id.
pub fn alias_parent(id: &str) -> Option<&'static str> {
    AGENT_ALIASES
        .iter()
        .find(|(child, _)| *child == id)
        .map(|(_, parent)| *parent)
}

/// Resolve an alias to its parent; other ids are returned unchanged.
pub fn canonical_agent_id(id: &str) -> &str {
    alias_parent(id).unwrap_or(id)
}

pub fn display_name(id: &str) -> String {
    registry_entry(id)
        .map(|entry| entry.display_name.to_string())
        .unwrap_or_else(|| humanize(id))
}

pub fn display_order(id: &str) -> u32 {
    registry_entry(id).map_or(UNREGISTERED_ORDER, |entry| entry.order)
}

/// `snake_case_id` -> `Snake Case Id`.
pub fn humanize(id: &str) -> String {
    id.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// How an agent id relates to the tracked set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentRef {
    Tracked { id: String },
    Aliased { child: String, parent: String },
    Other { id: String },
}

impl AgentRef {
    /// The id as it appeared on the wire.
    pub fn raw_id(&self) -> &str {
        match self {
            AgentRef::Tracked { id } | AgentRef::Other { id } => id,
            AgentRef::Aliased { child, .. } => child,
        }
    }

    /// The tracked agent this id contributes to, if any.
    pub fn tracked_id(&self) -> Option<&str> {
        match self {
            AgentRef::Tracked { id } => Some(id),
            AgentRef::Aliased { parent, .. } => Some(parent),
            AgentRef::Other { .. } => None,
        }
    }
}

/// The agents whose completion counts toward progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedAgents(Vec<String>);

impl TrackedAgents {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut tracked: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into();
            if !tracked.contains(&id) {
                tracked.push(id);
            }
        }
        Self(tracked)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|tracked| tracked == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn resolve(&self, id: &str) -> AgentRef {
        if self.contains(id) {
            return AgentRef::Tracked { id: id.to_string() };
        }
        match alias_parent(id) {
            Some(parent) if self.contains(parent) => AgentRef::Aliased {
                child: id.to_string(),
                parent: parent.to_string(),
            },
            _ => AgentRef::Other { id: id.to_string() },
        }
    }
}

impl Default for TrackedAgents {
    fn default() -> Self {
        Self::new(AGENT_REGISTRY.iter().map(|entry| entry.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tracked_set_is_registry_order() {
        let tracked = TrackedAgents::default();
        let ids: Vec<&str> = tracked.iter().collect();
        assert_eq!(
            ids,
            [
                PROJECT_CONFIGURATION_AGENT,
                DEVELOPMENT_WORKFLOW_AGENT,
                DEPENDENCY_GUIDE_AGENT,
                BUSINESS_LOGIC_DOMAIN_AGENT
            ]
        );
    }

    #[test]
    fn test_duplicates_collapse() {
        let tracked = TrackedAgents::new(["a", "b", "a"]);
        assert_eq!(tracked.len(), 2);
    }

    #[test]
    fn test_resolve_tracked_alias_and_other() {
        let tracked = TrackedAgents::default();
        assert_eq!(
            tracked.resolve(DEPENDENCY_GUIDE_AGENT),
            AgentRef::Tracked {
                id: DEPENDENCY_GUIDE_AGENT.to_string()
            }
        );
        let aliased = tracked.resolve("dependency_guide_agent_item");
        assert_eq!(aliased.tracked_id(), Some(DEPENDENCY_GUIDE_AGENT));
        assert_eq!(aliased.raw_id(), "dependency_guide_agent_item");
        assert_eq!(tracked.resolve("mystery_agent").tracked_id(), None);
    }

    #[test]
    fn test_alias_to_untracked_parent_is_other() {
        let tracked = TrackedAgents::new([PROJECT_CONFIGURATION_AGENT]);
        assert!(matches!(
            tracked.resolve("dependency_guide_agent_item"),
            AgentRef::Other { .. }
        ));
    }

    #[test]
    fn test_display_names_and_order() {
        assert_eq!(display_name(DEVELOPMENT_WORKFLOW_AGENT), "Development Workflow");
        assert_eq!(display_order(PROJECT_CONFIGURATION_AGENT), 1);
        assert_eq!(display_name("code_review_agent"), "Code Review Agent");
        assert_eq!(display_order("code_review_agent"), UNREGISTERED_ORDER);
    }

    #[test]
    fn test_humanize_skips_empty_words() {
        assert_eq!(humanize("__weird__id"), "Weird Id");
        assert_eq!(humanize(""), "");
    }

    #[test]
    fn test_canonical_agent_id() {
        assert_eq!(canonical_agent_id("dependency_guide_agent_item"), DEPENDENCY_GUIDE_AGENT);
        assert_eq!(canonical_agent_id("anything_else"), "anything_else");
    }
}
