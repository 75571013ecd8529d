//! Config hot reload.
//!
//! File watching itself lives outside the core: the watcher calls
//! [`ConfigReloader::on_config_file_changed`] for every change notification.
//! Notifications inside the debounce window coalesce and only the last one
//! triggers a load, validation and apply.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::formats::{ConfigFormat, ConfigSet};
use super::registry::{ApplyReport, ConfigRegistry};
use crate::error::{CacheError, Result};
use crate::event_bus::EventBus;
use crate::events::{EventPayload, EventSeverity};

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Reads a config file into a config set
#[async_trait]
pub trait ConfigFileLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<ConfigSet>;
}

/// Loader that reads the file with tokio and parses it with a formatter
///
/// The format is fixed or guessed from the file extension.
#[derive(Debug, Default, Clone)]
pub struct FormattedFileLoader {
    format: Option<ConfigFormat>,
}

impl FormattedFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(format: ConfigFormat) -> Self {
        Self {
            format: Some(format),
        }
    }
}

#[async_trait]
impl ConfigFileLoader for FormattedFileLoader {
    async fn load(&self, path: &Path) -> Result<ConfigSet> {
        let format = self
            .format
            .or_else(|| ConfigFormat::from_path(path))
            .ok_or_else(|| {
                CacheError::configuration(format!(
                    "Cannot determine config format of {}",
                    path.display()
                ))
            })?;

        let text = tokio::fs::read_to_string(path).await?;
        format.formatter().import(&text)
    }
}

struct ReloaderInner {
    registry: Arc<ConfigRegistry>,
    loader: Arc<dyn ConfigFileLoader>,
    bus: Option<Arc<EventBus>>,
    debounce: Duration,
    generation: AtomicU64,
}

/// Debounced config reloader
#[derive(Clone)]
pub struct ConfigReloader {
    inner: Arc<ReloaderInner>,
}

impl std::fmt::Debug for ConfigReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigReloader")
            .field("debounce", &self.inner.debounce)
            .finish()
    }
}

impl ConfigReloader {
    pub fn new(registry: Arc<ConfigRegistry>) -> Self {
        Self::with_loader(registry, Arc::new(FormattedFileLoader::new()))
    }

    pub fn with_loader(registry: Arc<ConfigRegistry>, loader: Arc<dyn ConfigFileLoader>) -> Self {
        Self {
            inner: Arc::new(ReloaderInner {
                registry,
                loader,
                bus: None,
                debounce: DEFAULT_DEBOUNCE,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Builder-style options; only valid before the reloader is cloned
    fn inner_mut(&mut self) -> Option<&mut ReloaderInner> {
        Arc::get_mut(&mut self.inner)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.debounce = debounce;
        }
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        if let Some(inner) = self.inner_mut() {
            inner.bus = Some(bus);
        }
        self
    }

    /// Notify the reloader that `path` changed
    ///
    /// The returned task resolves to `None` when a later notification superseded
    /// this one, and to the apply outcome otherwise.
    pub fn on_config_file_changed(&self, path: impl Into<PathBuf>) -> JoinHandle<Option<ApplyReport>> {
        let path = path.into();
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let inner = self.inner.clone();

        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if inner.generation.load(Ordering::Acquire) != generation {
                debug!(path = %path.display(), "Config change superseded");
                return None;
            }

            match inner.reload(&path).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Config reload failed");
                    None
                }
            }
        })
    }

    /// Load and apply `path` immediately
    pub async fn reload_now(&self, path: &Path) -> Result<ApplyReport> {
        self.inner.reload(path).await
    }
}

impl ReloaderInner {
    async fn reload(&self, path: &Path) -> Result<ApplyReport> {
        let set = self.loader.load(path).await?;
        let report = self.registry.apply_configs(set).await;

        info!(
            path = %path.display(),
            applied = report.applied.len(),
            rejected = report.rejected.len(),
            "Config reloaded"
        );

        if let Some(bus) = &self.bus {
            let severity = if report.is_clean() {
                EventSeverity::Info
            } else {
                EventSeverity::Warning
            };
            bus.emit(
                "reloader",
                severity,
                format!("reloaded {}", path.display()),
                EventPayload::ConfigReloaded {
                    path: path.display().to_string(),
                    applied: report.applied.clone(),
                    rejected: report.rejected_names(),
                },
            );
        }
        Ok(report)
    }
}
