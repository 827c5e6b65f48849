//! Configuration view and validation commands: `agentmd-progress config`.

use std::path::Path;

use anyhow::Result;

use agentmd_progress::config::{Config, Overrides, ProgressToml, project_config_path};

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    overrides: &Overrides,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = project_config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Progress Configuration");
            println!("======================");
            println!();

            let (toml, source) = ProgressToml::load_or_default(project_dir)?;
            match &source {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No progress.toml found, using defaults"),
            }
            println!();
            print_toml(&toml);

            println!("Effective values (with env/CLI overrides):");
            let config = Config::resolve(project_dir, overrides)?;
            println!("  base_url = \"{}\"", config.base_url);
            match config.session.stream.max_chunks {
                Some(max) => println!("  max_chunks = {}", max),
                None => println!("  max_chunks = unbounded"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let (toml, source) = ProgressToml::load_or_default(project_dir)?;
            if source.is_none() {
                println!("No progress.toml found. Using defaults (valid).");
                return Ok(());
            }

            let problems = toml.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                println!();
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("progress.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            ProgressToml::default().save(&config_path)?;

            println!("Created progress.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] base_url");
            println!("  - [stream] max_chunks, event_names, channel_capacity");
            println!("  - [progress] tracked_agents, completion_marker, event log bounds");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &ProgressToml) {
    println!("[server]");
    println!("  base_url = \"{}\"", toml.server.base_url);
    println!();

    println!("[stream]");
    if let Some(max) = toml.stream.max_chunks {
        println!("  max_chunks = {}", max);
    }
    println!("  event_names = [{}]", quoted(&toml.stream.event_names));
    println!("  channel_capacity = {}", toml.stream.channel_capacity);
    println!();

    println!("[progress]");
    println!("  tracked_agents = [{}]", quoted(&toml.progress.tracked_agents));
    println!("  completion_marker = \"{}\"", toml.progress.completion_marker);
    println!("  event_log_limit = {}", toml.progress.event_log_limit);
    println!("  event_log_retain = {}", toml.progress.event_log_retain);
    println!();
}

fn quoted(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("\"{}\"", v))
        .collect::<Vec<_>>()
        .join(", ")
}
