//! Stored snapshot command: `agentmd-progress snapshot`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use agentmd_progress::config::Config;
use agentmd_progress::display::group_events_by_agent;
use agentmd_progress::progress::markdown::render_all;
use agentmd_progress::session::{GenerationBackend, HttpBackend, SessionKey};
use agentmd_progress::ui::icons::{DOCUMENT, SNAPSHOT, group_icon};

pub async fn cmd_snapshot(
    config: &Config,
    owner: &str,
    repo: &str,
    markdown: bool,
    output: Option<&Path>,
) -> Result<()> {
    let backend = HttpBackend::new(&config.base_url);
    let key = SessionKey::new(owner, repo);

    let Some(snapshot) = backend
        .fetch_snapshot(&key)
        .await
        .with_context(|| format!("Failed to fetch snapshot for {}", key))?
    else {
        anyhow::bail!("No snapshot stored for {}", key);
    };

    let artifact = snapshot.artifact();
    if markdown || output.is_some() {
        let rendered = render_all(&artifact, None);
        match output {
            Some(path) => {
                std::fs::write(path, &rendered)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("{}Wrote {}", DOCUMENT, path.display());
            }
            None => print!("{}", rendered),
        }
        return Ok(());
    }

    println!();
    println!("{}Snapshot for {}", SNAPSHOT, style(&key).bold());
    println!("  status:   {:?}", snapshot.status);
    println!("  progress: {:.1}%", snapshot.recorded_progress());
    println!("  created:  {}", snapshot.created_at);
    println!("  modified: {}", snapshot.modified_at);
    if let Some(run_id) = &snapshot.repository_workflow_run_id {
        println!("  run:      {}", run_id);
    }
    println!();

    for codebase in &snapshot.events.codebases {
        let documented = artifact.codebases.contains_key(&codebase.codebase_name);
        println!(
            "  {} {}",
            style(&codebase.codebase_name).yellow().bold(),
            if documented {
                style("(documented)").green()
            } else {
                style("(no document)").dim()
            }
        );
        for group in group_events_by_agent(&codebase.events) {
            println!(
                "    {}{} {}",
                group_icon(group.status),
                group.display_name,
                style(format!("({} events)", group.event_count)).dim()
            );
        }
    }
    if !artifact.skipped.is_empty() {
        println!();
        println!(
            "  {} {}",
            style("Skipped malformed documents:").yellow(),
            artifact.skipped.join(", ")
        );
    }
    println!();
    Ok(())
}
