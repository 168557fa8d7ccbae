//! Exporter configuration
//!
//! Immutable per-process values assembled once from the command line.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Interval between two collection cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Address the exposition endpoint listens on.
pub const METRICS_ADDR: &str = "0.0.0.0:8080";

/// Placeholder printed wherever the bearer token would appear.
const MASKED: &str = "***";

/// Configuration for the exporter
#[derive(Clone)]
pub struct ExporterConfig {
    /// Bearer token for the cluster API
    pub token: String,

    /// Cluster API base URL, without trailing slash
    pub server_url: String,

    /// Namespaces whose virtual machines are counted and reported
    pub namespaces: Vec<String>,

    /// Sleep between collection cycles
    pub poll_interval: Duration,

    /// Skip TLS certificate verification on the cluster API
    pub insecure_skip_tls_verify: bool,

    /// Remove status series for VMs that changed status or disappeared
    pub prune_stale_statuses: bool,

    /// Exposition endpoint bind address
    pub metrics_addr: SocketAddr,
}

impl ExporterConfig {
    /// Validate raw startup parameters into a configuration.
    ///
    /// Empty namespace entries (e.g. `a,,b` or a trailing comma) are dropped;
    /// an empty token, URL or namespace list is rejected.
    pub fn new(
        token: impl Into<String>,
        server_url: impl Into<String>,
        namespaces: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::Config("--token must not be empty".into()));
        }

        let server_url = server_url.into().trim().trim_end_matches('/').to_string();
        if server_url.is_empty() {
            return Err(Error::Config("--server-url must not be empty".into()));
        }
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "--server-url must start with http:// or https://, got {}",
                server_url
            )));
        }

        let namespaces: Vec<String> = namespaces
            .into_iter()
            .map(|ns| ns.as_ref().trim().to_string())
            .filter(|ns| !ns.is_empty())
            .collect();
        if namespaces.is_empty() {
            return Err(Error::Config(
                "--namespaces must list at least one namespace".into(),
            ));
        }

        let metrics_addr = METRICS_ADDR
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid metrics address: {}", e)))?;

        Ok(Self {
            token,
            server_url,
            namespaces,
            poll_interval: DEFAULT_POLL_INTERVAL,
            insecure_skip_tls_verify: false,
            prune_stale_statuses: false,
            metrics_addr,
        })
    }

    pub fn with_insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    pub fn with_prune_stale_statuses(mut self, prune: bool) -> Self {
        self.prune_stale_statuses = prune;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = addr;
        self
    }

    /// The token as it may appear in logs.
    pub fn masked_token(&self) -> &'static str {
        MASKED
    }
}

impl fmt::Debug for ExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterConfig")
            .field("token", &MASKED)
            .field("server_url", &self.server_url)
            .field("namespaces", &self.namespaces)
            .field("poll_interval", &self.poll_interval)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("prune_stale_statuses", &self.prune_stale_statuses)
            .field("metrics_addr", &self.metrics_addr)
            .finish()
    }
}
