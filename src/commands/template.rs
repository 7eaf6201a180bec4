use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use super::OutputFormat;
use crate::auth::AdminAuth;
use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, RefreshOutcome};
use crate::error::ExitError;
use crate::template::{IngestReport, StructureSummary};

#[derive(Debug, Args)]
pub struct TemplateArgs {
    /// Config file (TOML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Template source, overrides the config file
    #[arg(long)]
    pub source: Option<String>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub source: String,
    pub target_pixels: usize,
    pub structures: Vec<StructureSummary>,
    pub versions: BTreeMap<String, i64>,
    pub ingest: IngestReport,
}

impl TemplateArgs {
    /// Fetch the template now, bypassing the refresh interval, and summarize it.
    pub fn execute(&self) -> anyhow::Result<()> {
        let format = OutputFormat::resolve(self.format);
        let cwd = std::env::current_dir().context("reading current directory")?;
        let (mut config, _) = ServerConfig::resolve(self.config.as_deref(), &cwd)?;
        if let Some(source) = &self.source {
            config.template.source.clone_from(source);
        }

        let coordinator = Coordinator::new(&config.coordinator_options(), AdminAuth::disabled());
        let source = config.template_source();
        let outcome = coordinator
            .refresh_template(&source, true)
            .with_context(|| format!("loading template from {}", config.template.source))?;
        let RefreshOutcome::Refreshed(template) = outcome else {
            return Err(ExitError::Other("forced refresh was skipped".into()).into());
        };

        let summary = TemplateSummary {
            source: config.template.source.clone(),
            target_pixels: template.len(),
            structures: template.structures().to_vec(),
            versions: template.versions().clone(),
            ingest: template.report().clone(),
        };

        match format {
            OutputFormat::Pretty => print_pretty(&summary),
            OutputFormat::Text => print_text(&summary),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        }
        Ok(())
    }
}

fn print_pretty(summary: &TemplateSummary) {
    println!("=== Target template ===\n");
    println!("Source:  {}", summary.source);
    println!("Pixels:  {}", summary.target_pixels);
    println!();

    println!("Structures:");
    let width = summary
        .structures
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0);
    for s in &summary.structures {
        println!(
            "  {:<width$}  weight {:>8}  {:>7} px",
            s.name, s.weight, s.pixels
        );
    }

    if !summary.versions.is_empty() {
        println!("\nMinimum worker versions:");
        for (platform, version) in &summary.versions {
            println!("  {platform}: {version}");
        }
    }

    let ingest = &summary.ingest;
    if ingest.skipped_structures + ingest.skipped_pixels + ingest.duplicate_pixels > 0 {
        println!(
            "\nSkipped: {} structures, {} pixels; {} duplicate pixels resolved",
            ingest.skipped_structures, ingest.skipped_pixels, ingest.duplicate_pixels
        );
    }
}

fn print_text(summary: &TemplateSummary) {
    println!(
        "template  source={}  pixels={}  structures={}",
        summary.source,
        summary.target_pixels,
        summary.structures.len()
    );
    for s in &summary.structures {
        println!("structure  {}  weight={}  pixels={}", s.name, s.weight, s.pixels);
    }
    for (platform, version) in &summary.versions {
        println!("version  {platform}  {version}");
    }
    let ingest = &summary.ingest;
    println!(
        "skipped  structures={}  pixels={}  duplicates={}",
        ingest.skipped_structures, ingest.skipped_pixels, ingest.duplicate_pixels
    );
}
