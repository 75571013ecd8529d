//! # Configuration Commands
//!
//! Validate and convert instance config files.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use cachekeeper_core::cache::InstanceConfig;
use cachekeeper_core::config::{ConfigFormat, ConfigRegistry, ExportOptions};

use super::load_config_file;

/// Arguments for `validate`
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Config file (json, yaml, toml or env)
    pub file: PathBuf,

    /// Override the format guessed from the extension
    #[arg(long)]
    pub format: Option<ConfigFormat>,

    /// Memory budget in bytes for the cross-instance rule
    #[arg(long)]
    pub memory_budget: Option<usize>,
}

/// Arguments for `export`
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Source config file; the built-in presets are used when omitted
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Target format
    #[arg(long, short, default_value = "json")]
    pub format: ConfigFormat,

    /// Write to a file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Compact JSON, no header comments
    #[arg(long)]
    pub compact: bool,
}

/// Apply every config to a scratch registry and report per instance
pub async fn handle_validate(args: ValidateArgs, json: bool) -> Result<()> {
    let set = load_config_file(&args.file, args.format).await?;
    if set.is_empty() {
        bail!("{} defines no instances", args.file.display());
    }

    let mut registry = ConfigRegistry::new();
    if let Some(budget) = args.memory_budget {
        registry = registry.with_memory_budget(budget);
    }
    let applied = registry.apply_configs(set.clone()).await;

    let reports: Vec<_> = set
        .values()
        .map(|config| registry.validate_config(config, None))
        .collect();
    registry.shutdown().await;

    if json {
        let output = serde_json::json!({
            "applied": applied.applied,
            "rejected": applied.rejected,
            "reports": reports,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for report in &reports {
            let mark = if report.valid { "ok" } else { "INVALID" };
            println!("{:<16} {:<8} {}", report.instance, mark, report.summary());
            for suggestion in report.suggestions() {
                println!("{:<16} hint     {}", "", suggestion);
            }
        }
    }

    if !applied.is_clean() {
        bail!("{} instance(s) rejected: {}", applied.rejected.len(), applied.rejected_names().join(", "));
    }
    Ok(())
}

/// Convert a config file (or the presets) to another format
pub async fn handle_export(args: ExportArgs) -> Result<()> {
    let registry = ConfigRegistry::new();
    match &args.config {
        Some(path) => {
            let set = load_config_file(path, None).await?;
            let report = registry.apply_configs(set).await;
            if !report.is_clean() {
                bail!("Invalid instances in {}: {}", path.display(), report.rejected_names().join(", "));
            }
        }
        None => {
            for preset in [InstanceConfig::user(), InstanceConfig::session(), InstanceConfig::api()] {
                registry.register_instance(preset).await?;
            }
        }
    }

    let options = ExportOptions {
        pretty: !args.compact,
        header: !args.compact,
    };
    let text = registry.export_configs(args.format, &options)?;
    registry.shutdown().await;

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} config to {}", args.format, path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}
