//! # Run Command
//!
//! Build a cache system from a config file, start monitoring and analytics,
//! and keep it alive until Ctrl-C or the requested duration elapses.
//! The config file is polled for changes and reloaded through the debounced reloader.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use clap::Args;
use tracing::{debug, info, warn};

use cachekeeper_core::cache::InstanceConfig;
use cachekeeper_core::config::{ConfigFormat, ConfigReloader, DEFAULT_ENV_PREFIX};
use cachekeeper_core::event_bus::{ConsoleSink, EventFilter, FileSink};
use cachekeeper_core::events::EventSeverity;
use cachekeeper_core::monitor::MonitorConfig;
use cachekeeper_core::CacheSystem;

use super::load_config_file;

/// Arguments for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file; the built-in presets are used when omitted
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Override the format guessed from the extension
    #[arg(long)]
    pub format: Option<ConfigFormat>,

    /// Prefix for environment overrides (PREFIX_INSTANCE_FIELD)
    #[arg(long, default_value = DEFAULT_ENV_PREFIX)]
    pub env_prefix: String,

    /// Skip environment overrides
    #[arg(long)]
    pub no_env: bool,

    /// Monitor sampling interval in seconds
    #[arg(long, default_value_t = 30)]
    pub tick_secs: u64,

    /// Performance report interval in seconds
    #[arg(long, default_value_t = 300)]
    pub report_secs: u64,

    /// Append every event as a JSON line to this file
    #[arg(long)]
    pub events_file: Option<PathBuf>,

    /// Seconds between config file change checks (0 disables watching)
    #[arg(long, default_value_t = 2)]
    pub watch_secs: u64,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

pub async fn handle_run(args: RunArgs, json: bool) -> Result<()> {
    let instances: Vec<InstanceConfig> = match &args.config {
        Some(path) => load_config_file(path, args.format).await?.into_values().collect(),
        None => vec![InstanceConfig::user(), InstanceConfig::session(), InstanceConfig::api()],
    };

    let monitor = MonitorConfig::default()
        .with_tick_interval(Duration::from_secs(args.tick_secs.max(1)))
        .with_report_interval(Duration::from_secs(args.report_secs.max(1)));

    let mut builder = CacheSystem::builder()
        .with_instances(instances)
        .with_monitor_config(monitor)
        .with_sink(
            "console",
            Arc::new(ConsoleSink::new()),
            EventFilter::new().with_min_severity(EventSeverity::Warning),
        );
    if let Some(path) = &args.events_file {
        builder = builder.with_sink("file", Arc::new(FileSink::new(path)), EventFilter::new());
    }
    if !args.no_env {
        builder = builder.with_env_overrides(Some(args.env_prefix.as_str()));
    }

    let system = builder.build().await?;
    system.start();
    info!(instances = ?system.registry().instance_types(), "Cache system running");

    let watcher = match (&args.config, args.watch_secs) {
        (Some(path), secs) if secs > 0 => Some(tokio::spawn(watch_config(
            system.reloader().clone(),
            path.clone(),
            Duration::from_secs(secs),
        ))),
        _ => None,
    };

    match args.duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C, stopping");
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.abort();
    }

    print_status(&system, json)?;
    system.shutdown().await;
    Ok(())
}

/// Poll the file's modification time and hand changes to the reloader
async fn watch_config(reloader: ConfigReloader, path: PathBuf, every: Duration) {
    let mut last = modified(&path).await;
    let mut timer = tokio::time::interval(every);
    timer.tick().await;

    loop {
        timer.tick().await;
        let current = modified(&path).await;
        if current.is_some() && current != last {
            debug!(path = %path.display(), "Config file changed");
            last = current;
            // applied after the debounce; the outcome is published as config_reloaded
            let _ = reloader.on_config_file_changed(path.clone());
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

fn print_status(system: &CacheSystem, json: bool) -> Result<()> {
    let status = system.status();
    let metrics = system.monitor().all_latest_metrics();

    if json {
        let output = serde_json::json!({
            "status": status,
            "metrics": metrics,
            "alerts": system.monitor().active_alerts(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("instances:     {}", status.instances.join(", "));
    println!("active alerts: {}", status.active_alerts);
    println!("events:        {}", status.events.total_published);
    for m in metrics {
        println!(
            "  {:<16} size {}/{}  hit rate {:.1}%  response {:.2}ms",
            m.instance,
            m.size,
            m.max_size,
            m.hit_rate * 100.0,
            m.response_time_ms
        );
    }
    Ok(())
}
