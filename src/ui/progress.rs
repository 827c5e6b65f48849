use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::display::{AgentEvent, AgentGroup, DEFAULT_TRUNCATE_LEN, group_events_by_agent, truncate_message};
use crate::progress::CodebaseStatus;
use crate::session::{ConnectionState, GenerationSession};
use crate::ui::icons::{CROSS, PROGRESS, SNAPSHOT, SPARKLE, codebase_icon, group_icon};

/// UI output mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    /// Progress bars per codebase
    #[default]
    Full,
    /// One line per change
    Minimal,
    /// JSON lines on stdout
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

/// Renderable view of one codebase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodebaseLine {
    pub codebase_id: String,
    pub status: CodebaseStatus,
    pub percent: f64,
    pub completed_agents: usize,
    pub tracked_agents: usize,
    pub last_event: Option<String>,
}

/// Renderable view of a session; emitted as-is in JSON mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressLine {
    pub session: String,
    pub overall_percent: f64,
    pub is_complete: bool,
    pub connection: ConnectionState,
    pub from_snapshot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub codebases: Vec<CodebaseLine>,
}

impl ProgressLine {
    pub fn from_session(session: &GenerationSession) -> Self {
        let tracked = session.matrix.tracked();
        Self {
            session: session.key.to_string(),
            overall_percent: session.overall_percent(),
            is_complete: session.is_complete,
            connection: session.connection,
            from_snapshot: session.has_existing_snapshot(),
            error: session.error.clone(),
            codebases: session
                .matrix
                .codebases()
                .map(|codebase| CodebaseLine {
                    codebase_id: codebase.codebase_id.clone(),
                    status: codebase.status,
                    percent: codebase.overall_percent,
                    completed_agents: if codebase.forced_complete {
                        tracked.len()
                    } else {
                        codebase.completed_agents(tracked)
                    },
                    tracked_agents: tracked.len(),
                    last_event: codebase.events.last().map(|event| event.name.clone()),
                })
                .collect(),
        }
    }
}

/// Agent groups per codebase, from the loaded snapshot when there is one.
pub fn summary_groups(session: &GenerationSession) -> Vec<(String, Vec<AgentGroup>)> {
    if let Some(snapshot) = &session.existing_snapshot {
        return snapshot
            .events
            .codebases
            .iter()
            .map(|codebase| {
                (
                    codebase.codebase_name.clone(),
                    group_events_by_agent(&codebase.events),
                )
            })
            .collect();
    }
    session
        .matrix
        .codebases()
        .map(|codebase| {
            let events: Vec<AgentEvent> = codebase
                .events
                .iter()
                .filter_map(AgentEvent::from_envelope)
                .collect();
            (codebase.codebase_id.clone(), group_events_by_agent(&events))
        })
        .collect()
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: &'a ProgressLine,
    groups: BTreeMap<String, Vec<AgentGroup>>,
}

/// Terminal renderer for a generation session.
///
/// Call [`GenerationUi::render`] on every session update and
/// [`GenerationUi::finish`] once the channel is closed.
pub struct GenerationUi {
    mode: UiMode,
    verbose: bool,
    multi: MultiProgress,
    overall: ProgressBar,
    codebase_bars: Mutex<BTreeMap<String, ProgressBar>>,
    last: Mutex<Option<ProgressLine>>,
    term: Term,
}

impl GenerationUi {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let overall = if mode == UiMode::Full {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(bar_style("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}"));
            bar.set_prefix("Overall");
            bar.set_message("Connecting...");
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            mode,
            verbose,
            multi,
            overall,
            codebase_bars: Mutex::new(BTreeMap::new()),
            last: Mutex::new(None),
            term: Term::stdout(),
        }
    }

    /// Redraw from the current session state. Unchanged states are skipped.
    pub fn render(&self, session: &GenerationSession) {
        let line = ProgressLine::from_session(session);
        let previous = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_ref() == Some(&line) {
                return;
            }
            last.replace(line.clone())
        };

        match self.mode {
            UiMode::Json => self.render_json(&line),
            UiMode::Minimal => self.render_minimal(&line, previous.as_ref()),
            UiMode::Full => self.render_full(&line),
        }
    }

    fn render_json(&self, line: &ProgressLine) {
        if let Ok(json) = serde_json::to_string(line) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn render_minimal(&self, line: &ProgressLine, previous: Option<&ProgressLine>) {
        for codebase in &line.codebases {
            let before = previous.and_then(|p| {
                p.codebases
                    .iter()
                    .find(|c| c.codebase_id == codebase.codebase_id)
            });
            if before.is_some_and(|b| b.status == codebase.status && b.percent == codebase.percent) {
                continue;
            }
            let _ = writeln!(&self.term, "{}", minimal_line(codebase));
        }
        if previous.is_none_or(|p| p.overall_percent != line.overall_percent) {
            let _ = writeln!(&self.term, "overall {:.1}%", line.overall_percent);
        }
        if let Some(error) = &line.error
            && previous.is_none_or(|p| p.error.as_ref() != Some(error))
        {
            let _ = writeln!(&self.term, "error: {}", error);
        }
    }

    fn render_full(&self, line: &ProgressLine) {
        self.overall.set_position(line.overall_percent.round() as u64);
        self.overall.set_message(overall_message(line));

        let mut bars = self
            .codebase_bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for codebase in &line.codebases {
            let bar = bars.entry(codebase.codebase_id.clone()).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(codebase.tracked_agents as u64));
                bar.set_style(bar_style("  {prefix:.bold} [{bar:30.green/white}] {pos}/{len} {msg}"));
                bar.set_prefix(format!("[{}]", codebase.codebase_id));
                bar.enable_steady_tick(Duration::from_millis(100));
                if self.verbose {
                    self.print_line(format!(
                        "  {} Codebase {} started",
                        style("▶").cyan(),
                        style(&codebase.codebase_id).yellow()
                    ));
                }
                bar
            });
            bar.set_position(codebase.completed_agents as u64);

            let activity = codebase
                .last_event
                .as_deref()
                .map(|name| truncate_message(name, DEFAULT_TRUNCATE_LEN).0)
                .unwrap_or_default();
            bar.set_message(format!(
                "{}{} {}",
                codebase_icon(codebase.status),
                status_label(codebase.status),
                style(activity).dim()
            ));
            if matches!(codebase.status, CodebaseStatus::Completed | CodebaseStatus::Error)
                && !bar.is_finished()
            {
                bar.finish();
            }
        }
    }

    /// Close all bars and print the per-agent summary.
    pub fn finish(&self, session: &GenerationSession) {
        self.render(session);
        let line = ProgressLine::from_session(session);
        let groups = summary_groups(session);

        if self.mode == UiMode::Json {
            let summary = SummaryLine {
                summary: &line,
                groups: groups.into_iter().collect(),
            };
            if let Ok(json) = serde_json::to_string(&summary) {
                let _ = writeln!(&self.term, "{}", json);
            }
            return;
        }

        if self.mode == UiMode::Full {
            for bar in self
                .codebase_bars
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
            {
                if !bar.is_finished() {
                    bar.abandon();
                }
            }
            self.overall.finish_with_message(overall_message(&line));
        }

        self.print_line("");
        let header = if line.from_snapshot {
            format!("{}Loaded from snapshot: {}", SNAPSHOT, style(&line.session).bold())
        } else {
            format!("{}Generation summary: {}", PROGRESS, style(&line.session).bold())
        };
        self.print_line(header);
        for (codebase, agent_groups) in &groups {
            self.print_line(format!("  {}", style(codebase).yellow().bold()));
            if agent_groups.is_empty() {
                self.print_line(format!("    {}", style("no agent events").dim()));
            }
            for group in agent_groups {
                self.print_line(format!(
                    "    {}{} {}",
                    group_icon(group.status),
                    group.display_name,
                    style(format!("({} events)", group.event_count)).dim()
                ));
                if self.verbose {
                    for event in &group.events {
                        let message = event.message.as_deref().unwrap_or_default();
                        let (short, _) = truncate_message(message, DEFAULT_TRUNCATE_LEN);
                        self.print_line(format!(
                            "      {} {} {}",
                            style("→").dim(),
                            event.phase.as_deref().unwrap_or("-"),
                            style(short).dim()
                        ));
                    }
                }
            }
        }

        if let Some(error) = &line.error {
            self.print_line(format!("{}{}", CROSS, style(error).red()));
        } else if line.is_complete {
            self.print_line(format!(
                "{}{}",
                SPARKLE,
                style("Documentation generated").green().bold()
            ));
        } else {
            self.print_line(format!(
                "{} {:.1}%",
                style("Channel closed before aggregation at").yellow(),
                line.overall_percent
            ));
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.mode == UiMode::Full {
            if self.multi.println(msg.as_ref()).is_err() {
                eprintln!("{}", msg.as_ref());
            }
        } else {
            let _ = writeln!(&self.term, "{}", msg.as_ref());
        }
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

fn status_label(status: CodebaseStatus) -> &'static str {
    match status {
        CodebaseStatus::Initializing => "initializing",
        CodebaseStatus::Processing => "processing",
        CodebaseStatus::Completed => "completed",
        CodebaseStatus::Error => "error",
    }
}

fn overall_message(line: &ProgressLine) -> String {
    if let Some(error) = &line.error {
        return format!("{}", style(error).red());
    }
    if line.is_complete {
        return format!("{}", style("complete").green());
    }
    match line.connection {
        ConnectionState::Connecting => "connecting...".to_string(),
        ConnectionState::Connected => format!("{} codebases", line.codebases.len()),
        ConnectionState::Closed => "closed".to_string(),
        ConnectionState::Disconnected => String::new(),
    }
}

fn minimal_line(codebase: &CodebaseLine) -> String {
    format!(
        "{} {} {}/{} ({:.1}%)",
        codebase.codebase_id,
        status_label(codebase.status),
        codebase.completed_agents,
        codebase.tracked_agents,
        codebase.percent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::GroupStatus;
    use crate::progress::{MatrixSettings, PersistedSnapshot, TrackedAgents};
    use crate::session::SessionKey;
    use crate::stream::EventEnvelope;
    use chrono::Utc;
    use serde_json::json;

    fn live_session() -> GenerationSession {
        let mut session = GenerationSession::new(
            SessionKey::new("acme", "widgets"),
            TrackedAgents::default(),
            MatrixSettings::default(),
        );
        session.begin_live(&["api".to_string(), "web".to_string()], Utc::now());
        session.apply(&EventEnvelope::new(0, "connected", json!({})));
        session.apply(&EventEnvelope::new(
            1,
            "api:project_configuration_agent:tool.call",
            json!({"message": "reading Cargo.toml"}),
        ));
        session.apply(&EventEnvelope::new(
            2,
            "api:project_configuration_agent:complete",
            json!({}),
        ));
        session.apply(&EventEnvelope::new(
            3,
            "api:dependency_guide_agent_item:tool.call",
            json!({}),
        ));
        session
    }

    #[test]
    fn test_ui_mode_from_str() {
        assert_eq!("json".parse::<UiMode>().unwrap(), UiMode::Json);
        assert_eq!("MINIMAL".parse::<UiMode>().unwrap(), UiMode::Minimal);
        assert_eq!("anything".parse::<UiMode>().unwrap(), UiMode::Full);
    }

    #[test]
    fn test_progress_line_from_live_session() {
        let line = ProgressLine::from_session(&live_session());

        assert_eq!(line.session, "acme/widgets");
        assert_eq!(line.connection, ConnectionState::Connected);
        assert!(!line.is_complete);
        assert!(!line.from_snapshot);
        assert_eq!(line.codebases.len(), 2);

        let api = &line.codebases[0];
        assert_eq!(api.codebase_id, "api");
        assert_eq!(api.status, CodebaseStatus::Processing);
        assert_eq!(api.completed_agents, 1);
        assert_eq!(api.tracked_agents, 4);
        assert_eq!(
            api.last_event.as_deref(),
            Some("api:dependency_guide_agent_item:tool.call")
        );
        assert_eq!(line.codebases[1].status, CodebaseStatus::Initializing);
        assert_eq!(line.overall_percent, 12.5);
    }

    #[test]
    fn test_progress_line_json_shape() {
        let value = serde_json::to_value(ProgressLine::from_session(&live_session())).unwrap();
        assert_eq!(value["connection"], "connected");
        assert_eq!(value["codebases"][0]["status"], "processing");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_summary_groups_from_live_events() {
        let groups = summary_groups(&live_session());
        assert_eq!(groups.len(), 2);

        let (name, api) = &groups[0];
        assert_eq!(name, "api");
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].agent_id, "project_configuration_agent");
        assert_eq!(api[0].event_count, 2);
        // only a canonical result phase completes a group
        assert_eq!(api[0].status, GroupStatus::Running);
        assert_eq!(api[1].agent_id, "dependency_guide_agent");
        assert!(groups[1].1.is_empty());
    }

    #[test]
    fn test_summary_groups_prefer_snapshot() {
        let snapshot: PersistedSnapshot = serde_json::from_value(json!({
            "repository_name": "widgets",
            "repository_owner_name": "acme",
            "status": "COMPLETED",
            "events": {"codebases": [{"codebase_name": "core", "events": [
                {"id": 1, "event": "development_workflow_agent", "phase": "result"}
            ]}]},
            "agent_md_output": {"codebases": {}},
            "created_at": "2026-01-01T00:00:00Z",
            "modified_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        let mut session = live_session();
        session.hydrate(snapshot, Utc::now());

        let groups = summary_groups(&session);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "core");
        assert_eq!(groups[0].1[0].status, GroupStatus::Completed);
    }

    #[test]
    fn test_minimal_line_format() {
        let line = ProgressLine::from_session(&live_session());
        assert_eq!(minimal_line(&line.codebases[0]), "api processing 1/4 (25.0%)");
    }

    #[test]
    fn test_overall_message_prefers_error() {
        let mut session = live_session();
        session.fail("connection reset");
        let line = ProgressLine::from_session(&session);
        assert!(overall_message(&line).contains("connection reset"));
    }
}
