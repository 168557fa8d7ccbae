//! Infrastructure Adapters
//!
//! Implementations of the [`VirtualizationApi`](crate::domain::ports::VirtualizationApi)
//! port.
//!
//! - [`KubevirtApiClient`] talks to a real cluster API server over HTTPS.
//! - [`InMemoryVirtualizationApi`] serves scripted responses.
//!
//! # Usage
//!
//! ```ignore
//! use vmmig_exporter::adapters::KubevirtApiClient;
//! use vmmig_exporter::domain::ports::VirtualizationApi;
//!
//! let api = KubevirtApiClient::new(&config)?;
//! let vms = api.list_virtual_machines("migrationlab").await?;
//! ```

mod in_memory;
mod kubevirt;

pub use in_memory::InMemoryVirtualizationApi;
pub use kubevirt::KubevirtApiClient;
