//! Offline replay command: `agentmd-progress replay`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use agentmd_progress::config::Config;
use agentmd_progress::progress::markdown::render_all;
use agentmd_progress::session::{GenerationSession, SessionKey};
use agentmd_progress::stream::read_recording;
use agentmd_progress::ui::{GenerationUi, UiMode};

pub fn cmd_replay(
    config: &Config,
    recording: &Path,
    codebases: &[String],
    ui: UiMode,
    markdown: bool,
    verbose: bool,
) -> Result<()> {
    let events = read_recording(recording)
        .with_context(|| format!("Failed to load recording {}", recording.display()))?;
    info!(events = events.len(), path = %recording.display(), "Replaying recording");

    let name = recording
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let mut session = GenerationSession::new(
        SessionKey::new("replay", name),
        config.session.tracked.clone(),
        config.session.matrix.clone(),
    );
    session.begin_live(codebases, Utc::now());

    let renderer = GenerationUi::new(ui, verbose);
    for envelope in &events {
        if !config.session.stream.filter.accepts(&envelope.name) {
            continue;
        }
        session.apply(envelope);
        renderer.render(&session);
    }
    session.mark_closed();
    renderer.finish(&session);

    if markdown {
        match &session.artifact {
            Some(artifact) => print!("{}", render_all(artifact, None)),
            None => anyhow::bail!("Recording has no aggregated event"),
        }
    }
    Ok(())
}
