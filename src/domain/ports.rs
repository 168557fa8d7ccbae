//! Domain Ports (Port/Adapter Pattern)
//!
//! The collectors depend only on [`VirtualizationApi`]; the HTTP client and
//! the in-memory fake in `adapters` implement it.
//!
//! ```text
//! ┌───────────────┐     ┌─────────────────────┐     ┌──────────────────────┐
//! │   Collector   │────▶│  VirtualizationApi  │◀────│  KubevirtApiClient   │
//! │  (routines)   │     │       (port)        │     │ InMemoryVirtualApi   │
//! └───────────────┘     └─────────────────────┘     └──────────────────────┘
//! ```

use async_trait::async_trait;

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// One virtual machine as seen in a namespace listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSnapshot {
    /// `metadata.name`
    pub name: String,
    /// `status.printableStatus`, e.g. `Running` or `Stopped`
    pub status: String,
}

impl VmSnapshot {
    pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
        }
    }
}

/// One VM entry inside a migration's status block.
///
/// Timestamps are kept as the raw RFC3339 strings the API returned; parsing
/// is left to the collector so a bad value only affects this entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigratedVm {
    pub name: String,
    pub started: Option<String>,
    pub completed: Option<String>,
    /// Set when the platform reports the migration of this VM as failed
    pub error: Option<String>,
}

impl MigratedVm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn started(mut self, ts: impl Into<String>) -> Self {
        self.started = Some(ts.into());
        self
    }

    pub fn completed(mut self, ts: impl Into<String>) -> Self {
        self.completed = Some(ts.into());
        self
    }

    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.error = Some(reason.into());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// One migration plan run and the VMs it moved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationSnapshot {
    /// `metadata.name`, empty if the API omitted it
    pub name: String,
    /// Target namespace from the migration status block
    pub namespace: String,
    pub vms: Vec<MigratedVm>,
}

impl MigrationSnapshot {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            vms: Vec::new(),
        }
    }

    pub fn with_vm(mut self, vm: MigratedVm) -> Self {
        self.vms.push(vm);
        self
    }
}

// =============================================================================
// Virtualization API Port
// =============================================================================

/// Port for reading virtual machines and migrations from the cluster.
///
/// Implementations must be cheap to call repeatedly; the scheduler calls
/// them on every cycle with no caching in between.
#[async_trait]
pub trait VirtualizationApi: Send + Sync {
    /// List the virtual machines of one namespace.
    async fn list_virtual_machines(&self, namespace: &str) -> Result<Vec<VmSnapshot>>;

    /// List all migrations, cluster-wide.
    async fn list_migrations(&self) -> Result<Vec<MigrationSnapshot>>;
}
