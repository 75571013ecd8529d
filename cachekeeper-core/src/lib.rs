//! # Cachekeeper Core Library
//!
//! In-process cache lifecycle management.
//!
//! This library manages a set of named cache instances (user / session / api or
//! custom), each with a capacity limit, a default TTL and periodic expiry sweeps.
//! On top of the stores it provides config validation and hot reload, performance
//! monitoring with alerts, trend analysis with anomaly detection, bulk operations
//! and prewarming, and a typed event bus.
//!
//! ## Architecture
//!
//! - **Cache**: Bounded TTL stores with LRU fallback eviction and hit-rate accounting
//! - **Config**: Instance registry, validation rules, JSON / YAML / TOML / env import and export, reload
//! - **Monitor**: Periodic sampling, threshold alerts and performance reports
//! - **Analytics**: Metric time series, trend prediction, anomaly detection and tuning advice
//! - **Batch**: Bulk get / set / delete and immediate / priority / adaptive prewarming
//! - **Event Bus**: Synchronous listeners plus async sinks (console / file / webhook / mail)
//! - **System**: Container that wires the components together
//!
//! ## Example
//!
//! ```rust,no_run
//! use cachekeeper_core::cache::InstanceConfig;
//! use cachekeeper_core::CacheSystem;
//!
//! # async fn example() -> cachekeeper_core::Result<()> {
//! let system = CacheSystem::builder()
//!     .with_instance(InstanceConfig::api())
//!     .build()
//!     .await?;
//! system.start();
//! system.handle("api")?.set("GET /health", b"ok".to_vec(), None).await?;
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod error;

// Cache module - bounded TTL stores
pub mod cache;

// Configuration module - instance registry, validation, formats and reload
pub mod config;

// Scheduler module - periodic background tasks
pub mod scheduler;

// Events module - domain events
pub mod events;

// Event bus module - listeners, sinks and history
pub mod event_bus;

// Monitor module - sampling, alerts and performance reports
pub mod monitor;

// Analytics module - trends, anomalies and recommendations
pub mod analytics;

// Batch module - bulk operations and prewarming
pub mod batch;

// Telemetry module - tracing subscriber setup
pub mod telemetry;

// System module - component container
pub mod system;

pub use cache::{CacheStore, InstanceConfig, StoreStats};
pub use config::{ConfigRegistry, InstanceHandle, ValidationReport};
pub use error::{CacheError, Result};
pub use event_bus::{EventBus, EventFilter};
pub use events::{CacheEvent, EventPayload, EventSeverity, EventType};
pub use system::{CacheSystem, CacheSystemBuilder, SystemStatus};
