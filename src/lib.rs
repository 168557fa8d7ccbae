//! vmmig-exporter - Prometheus exporter for OpenShift Virtualization
//!
//! Polls the KubeVirt and Forklift APIs of a cluster on a fixed interval and
//! republishes virtual machine counts, statuses and migration durations as
//! Prometheus metrics.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐     ┌───────────────────┐
//!  cluster API ◀───│  Collector   │────▶│  ExporterMetrics  │◀─── GET /metrics
//!                  │ (Scheduler)  │     │    (registry)     │     (server)
//!                  └──────────────┘     └───────────────────┘
//! ```
//!
//! The scheduler task and the HTTP server share nothing but the registry.
//!
//! # Modules
//!
//! - [`adapters`] - Implementations of the virtualization API port
//! - [`collector`] - Collection routines and the polling loop
//! - [`config`] - Process configuration
//! - [`domain`] - Value objects and ports
//! - [`error`] - Error types
//! - [`metrics`] - Published metric families
//! - [`server`] - Prometheus exposition endpoint

pub mod adapters;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use adapters::{InMemoryVirtualizationApi, KubevirtApiClient};
pub use collector::{Collector, CollectorConfig, Scheduler};
pub use config::ExporterConfig;
pub use error::{Error, Result};
pub use metrics::ExporterMetrics;
