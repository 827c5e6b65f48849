//! Render an aggregated artifact as an AGENTS.md document.

use super::artifact::{AgentMdOutput, AggregatedArtifact};

pub const DEFAULT_TITLE: &str = "Agents Documentation";

#[derive(Default)]
struct Markdown {
    out: String,
}

impl Markdown {
    fn heading(&mut self, level: usize, text: &str) {
        self.block(&format!("{} {}", "#".repeat(level), text));
    }

    fn paragraph(&mut self, text: &str) {
        self.block(text);
    }

    fn bullets<I: IntoIterator<Item = String>>(&mut self, items: I) {
        let lines: Vec<String> = items.into_iter().map(|item| format!("- {item}")).collect();
        self.block(&lines.join("\n"));
    }

    fn numbered<I: IntoIterator<Item = String>>(&mut self, items: I) {
        let lines: Vec<String> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {item}", i + 1))
            .collect();
        self.block(&lines.join("\n"));
    }

    fn rule(&mut self) {
        self.block("---");
    }

    fn block(&mut self, text: &str) {
        if !self.out.is_empty() {
            self.out.push_str("\n\n");
        }
        self.out.push_str(text);
    }

    fn finish(mut self) -> String {
        self.out.push('\n');
        self.out
    }
}

/// One codebase as a standalone document.
pub fn render_codebase(document: &AgentMdOutput, title: Option<&str>) -> String {
    let mut md = Markdown::default();
    md.heading(1, title.unwrap_or(DEFAULT_TITLE));
    write_sections(&mut md, document, 2);
    md.finish()
}

/// Every codebase of the artifact, separated by horizontal rules.
pub fn render_all(artifact: &AggregatedArtifact, title: Option<&str>) -> String {
    let mut md = Markdown::default();
    md.heading(1, title.unwrap_or(DEFAULT_TITLE));
    for (i, (name, document)) in artifact.codebases.iter().enumerate() {
        if i > 0 {
            md.rule();
        }
        md.heading(2, &format!("Codebase: {name}"));
        write_sections(&mut md, document, 3);
    }
    md.finish()
}

fn write_sections(md: &mut Markdown, doc: &AgentMdOutput, level: usize) {
    let language = doc.programming_language_metadata.as_ref();
    md.heading(level, "Programming Language Metadata");
    md.bullets([
        format!(
            "Primary Language: {}",
            language
                .and_then(|m| m.primary_language.as_deref())
                .unwrap_or("Unknown")
        ),
        format!(
            "Package Manager: {}",
            language
                .and_then(|m| m.package_manager.as_deref())
                .unwrap_or("Unknown")
        ),
    ]);

    md.heading(level, "Project Configuration");
    let config_files = doc
        .project_configuration
        .as_ref()
        .map(|c| c.config_files.as_slice())
        .unwrap_or_default();
    if config_files.is_empty() {
        md.paragraph("No configuration files detected.");
    } else {
        md.bullets(
            config_files
                .iter()
                .map(|f| format!("{} - {}", f.path, f.purpose)),
        );
    }

    md.heading(level, "Development Workflow");
    let mut by_kind: Vec<(&str, Vec<String>)> = Vec::new();
    for command in doc
        .development_workflow
        .iter()
        .flat_map(|w| w.commands.iter())
    {
        let line = match command.description.as_deref() {
            Some(description) if !description.is_empty() => {
                format!("{} - {}", command.command, description)
            }
            _ => command.command.clone(),
        };
        match by_kind.iter_mut().find(|(kind, _)| *kind == command.kind) {
            Some((_, lines)) => lines.push(line),
            None => by_kind.push((&command.kind, vec![line])),
        }
    }
    for (kind, lines) in by_kind {
        md.heading(level + 1, &kind.replace('_', " ").to_uppercase());
        md.numbered(lines);
    }

    md.heading(level, "Dependency Guide");
    let dependencies = doc
        .dependency_guide
        .as_ref()
        .map(|g| g.dependencies.as_slice())
        .unwrap_or_default();
    if dependencies.is_empty() {
        md.paragraph("No dependency guide entries available.");
    } else {
        md.bullets(dependencies.iter().map(|d| {
            if d.usage.is_empty() {
                format!("**{}** - {}", d.name, d.purpose)
            } else {
                format!("**{}** - {}\n\n  {}", d.name, d.purpose, d.usage)
            }
        }));
    }

    md.heading(level, "Business Logic Domain");
    if let Some(domain) = &doc.business_logic_domain {
        if !domain.description().is_empty() {
            md.paragraph(domain.description());
        }
        if !domain.data_models().is_empty() {
            md.heading(level + 1, "Core Files");
            md.bullets(domain.data_models().iter().map(|m| match &m.responsibility {
                Some(responsibility) => format!("{} - {}", m.path, responsibility),
                None => m.path.clone(),
            }));
        }
    }
}
