//! Domain Layer
//!
//! Value objects describing what the cluster reports about virtual machines
//! and migrations, and the port through which collectors read them.
//!
//! # Usage
//!
//! ```ignore
//! use vmmig_exporter::domain::ports::VirtualizationApi;
//!
//! async fn running<A: VirtualizationApi>(api: &A, ns: &str) -> Result<usize> {
//!     let vms = api.list_virtual_machines(ns).await?;
//!     Ok(vms.iter().filter(|vm| vm.status == "Running").count())
//! }
//! ```

pub mod ports;

pub use ports::{MigratedVm, MigrationSnapshot, VirtualizationApi, VmSnapshot};
