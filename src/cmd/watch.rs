//! Live progress command: `agentmd-progress watch`.

use std::sync::Arc;

use anyhow::Result;
use console::style;
use tracing::{info, warn};

use agentmd_progress::config::Config;
use agentmd_progress::errors::SessionError;
use agentmd_progress::session::{HttpBackend, SessionKey, SessionRegistry, Transition};
use agentmd_progress::stream::{HttpTransport, StreamCache};
use agentmd_progress::ui::{GenerationUi, UiMode};

pub struct WatchArgs {
    pub owner: String,
    pub repo: String,
    pub codebases: Vec<String>,
    pub ui: UiMode,
    pub rerun: bool,
    pub verbose: bool,
}

pub async fn cmd_watch(config: &Config, args: WatchArgs) -> Result<()> {
    let backend = Arc::new(HttpBackend::new(&config.base_url));
    let cache = StreamCache::new(Arc::new(HttpTransport::new()));
    let registry = SessionRegistry::new(backend, cache, config.session.clone());
    let key = SessionKey::new(&args.owner, &args.repo);
    let renderer = GenerationUi::new(args.ui, args.verbose);

    let transition = if args.rerun {
        registry.start_rerun(&key, &args.codebases).await
    } else {
        match registry.load_snapshot(&key).await {
            Transition::Applied => {
                info!(session = %key, "Showing stored snapshot");
                if let Some(session) = registry.snapshot(&key).await {
                    renderer.finish(&session);
                }
                if args.ui != UiMode::Json {
                    println!(
                        "{}",
                        style("Run with --rerun to regenerate.").dim()
                    );
                }
                return Ok(());
            }
            Transition::Rejected(SessionError::SnapshotUnavailable { message, .. }) => {
                warn!(session = %key, error = %message, "Snapshot unavailable, connecting live");
                registry.connect(&key, &args.codebases).await
            }
            Transition::Rejected(_) => registry.connect(&key, &args.codebases).await,
        }
    };
    if let Transition::Rejected(reason) = transition {
        anyhow::bail!("Could not start generation: {}", reason);
    }

    let Some(mut updates) = registry.updates(&key).await else {
        anyhow::bail!("Session {} disappeared", key);
    };

    loop {
        if let Some(session) = registry.snapshot(&key).await {
            renderer.render(&session);
            if !session.connection.is_live() {
                break;
            }
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(session = %key, "Interrupted, closing channel");
                break;
            }
        }
    }

    let final_state = registry.snapshot(&key).await;
    registry.disconnect(&key).await;

    let Some(session) = final_state else {
        anyhow::bail!("Session {} disappeared", key);
    };
    renderer.finish(&session);

    if let Some(error) = &session.error {
        anyhow::bail!("Generation failed: {}", error);
    }
    Ok(())
}
