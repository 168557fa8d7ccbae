//! In-memory Virtualization API
//!
//! A scripted `VirtualizationApi` used by tests and local dry runs. Each
//! namespace (and the migration collection) either returns a fixed list or
//! fails with a given HTTP status.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::ports::{MigrationSnapshot, VirtualizationApi, VmSnapshot};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Scripted<T> {
    Ok(T),
    Status(u16),
}

/// Scripted, thread-safe implementation of the virtualization port.
#[derive(Debug, Default)]
pub struct InMemoryVirtualizationApi {
    namespaces: RwLock<HashMap<String, Scripted<Vec<VmSnapshot>>>>,
    migrations: RwLock<Option<Scripted<Vec<MigrationSnapshot>>>>,
    vm_calls: AtomicUsize,
    migration_calls: AtomicUsize,
}

impl InMemoryVirtualizationApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the VM list returned for `namespace`.
    pub fn set_virtual_machines(&self, namespace: &str, vms: Vec<VmSnapshot>) {
        self.namespaces
            .write()
            .insert(namespace.to_string(), Scripted::Ok(vms));
    }

    /// Make listings of `namespace` fail with `status`.
    pub fn fail_namespace(&self, namespace: &str, status: u16) {
        self.namespaces
            .write()
            .insert(namespace.to_string(), Scripted::Status(status));
    }

    /// Replace the migration list.
    pub fn set_migrations(&self, migrations: Vec<MigrationSnapshot>) {
        *self.migrations.write() = Some(Scripted::Ok(migrations));
    }

    /// Make migration listings fail with `status`.
    pub fn fail_migrations(&self, status: u16) {
        *self.migrations.write() = Some(Scripted::Status(status));
    }

    /// Number of VM listings served so far, failed ones included.
    pub fn vm_calls(&self) -> usize {
        self.vm_calls.load(Ordering::Relaxed)
    }

    /// Number of migration listings served so far, failed ones included.
    pub fn migration_calls(&self) -> usize {
        self.migration_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VirtualizationApi for InMemoryVirtualizationApi {
    async fn list_virtual_machines(&self, namespace: &str) -> Result<Vec<VmSnapshot>> {
        self.vm_calls.fetch_add(1, Ordering::Relaxed);

        // Unknown namespaces behave like the API server: an empty list.
        match self.namespaces.read().get(namespace) {
            Some(Scripted::Ok(vms)) => Ok(vms.clone()),
            Some(Scripted::Status(status)) => Err(Error::UnexpectedStatus {
                resource: format!("virtualmachines in {}", namespace),
                status: *status,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn list_migrations(&self) -> Result<Vec<MigrationSnapshot>> {
        self.migration_calls.fetch_add(1, Ordering::Relaxed);

        match &*self.migrations.read() {
            Some(Scripted::Ok(migrations)) => Ok(migrations.clone()),
            Some(Scripted::Status(status)) => Err(Error::UnexpectedStatus {
                resource: "migrations".to_string(),
                status: *status,
            }),
            None => Ok(Vec::new()),
        }
    }
}
