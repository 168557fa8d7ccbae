//! Collection Engine
//!
//! The three collection routines and the cycle that runs them. Each routine
//! is one read through the `VirtualizationApi` port followed by metric
//! writes; a failing routine only skips its own update.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::ExporterConfig;
use crate::domain::ports::{MigratedVm, VirtualizationApi};
use crate::error::{Error, Result};
use crate::metrics::ExporterMetrics;

/// Routine label values for `vmmig_exporter_collection_errors_total`.
pub const ROUTINE_VM_COUNT: &str = "vm_count";
pub const ROUTINE_VM_STATUS: &str = "vm_status";
pub const ROUTINE_MIGRATION_TIME: &str = "migration_time";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Namespaces visited on every cycle, in order
    pub namespaces: Vec<String>,

    /// Remove status series for VMs that changed status or disappeared
    pub prune_stale_statuses: bool,
}

impl From<&ExporterConfig> for CollectorConfig {
    fn from(config: &ExporterConfig) -> Self {
        Self {
            namespaces: config.namespaces.clone(),
            prune_stale_statuses: config.prune_stale_statuses,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one migration duration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// VM entries whose duration was written
    pub recorded: usize,
    /// VM entries without a usable start/completion pair
    pub skipped: usize,
    /// Failed VM entries seen for the first time
    pub failed: usize,
}

/// Outcome of one full collection cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Routine runs that completed
    pub succeeded: usize,
    /// Routine runs that could not read the cluster API
    pub failed: usize,
    /// `None` if the migration listing failed
    pub migrations: Option<MigrationReport>,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

// =============================================================================
// Collector
// =============================================================================

/// (namespace, migration, vm, started)
type FailureKey = (String, String, String, String);

fn failure_key(migration: &str, namespace: &str, vm: &MigratedVm) -> FailureKey {
    (
        namespace.to_string(),
        migration.to_string(),
        vm.name.clone(),
        vm.started.clone().unwrap_or_default(),
    )
}

/// Runs the collection routines against the cluster and writes the results
/// into the shared metrics.
pub struct Collector {
    api: Arc<dyn VirtualizationApi>,
    metrics: Arc<ExporterMetrics>,
    config: CollectorConfig,
    /// namespace -> vm -> last published status; only kept when pruning
    published_statuses: DashMap<String, HashMap<String, String>>,
    counted_failures: DashSet<FailureKey>,
    last_cycle: RwLock<Option<CycleReport>>,
}

impl Collector {
    pub fn new(
        api: Arc<dyn VirtualizationApi>,
        metrics: Arc<ExporterMetrics>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            api,
            metrics,
            config,
            published_statuses: DashMap::new(),
            counted_failures: DashSet::new(),
            last_cycle: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ExporterMetrics> {
        &self.metrics
    }

    /// Report of the most recent completed cycle.
    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().clone()
    }

    /// Set the VM count gauge of `namespace` to the number of listed VMs.
    #[instrument(skip(self))]
    pub async fn collect_vm_count(&self, namespace: &str) -> Result<usize> {
        debug!("Fetching virtual machine count");

        let vms = self.api.list_virtual_machines(namespace).await?;
        let count = vms.len();
        self.metrics.set_vm_count(namespace, count);

        debug!(count, "Updated virtual machine count");
        Ok(count)
    }

    /// Publish one status series per VM in `namespace` and return the
    /// name to status map.
    #[instrument(skip(self))]
    pub async fn collect_vm_statuses(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        debug!("Fetching virtual machine names and statuses");

        let vms = self.api.list_virtual_machines(namespace).await?;
        let mut statuses = BTreeMap::new();

        for vm in vms {
            if vm.name.is_empty() {
                warn!(status = %vm.status, "Skipping virtual machine without a name");
                continue;
            }
            self.metrics.set_vm_status(namespace, &vm.name, &vm.status);
            statuses.insert(vm.name, vm.status);
        }

        if self.config.prune_stale_statuses {
            self.prune_statuses(namespace, &statuses);
        }

        debug!(vms = statuses.len(), "Updated virtual machine statuses");
        Ok(statuses)
    }

    fn prune_statuses(&self, namespace: &str, current: &BTreeMap<String, String>) {
        let previous = self
            .published_statuses
            .insert(
                namespace.to_string(),
                current
                    .iter()
                    .map(|(vm, status)| (vm.clone(), status.clone()))
                    .collect(),
            )
            .unwrap_or_default();

        for (vm, old_status) in previous {
            if current.get(&vm) == Some(&old_status) {
                continue;
            }
            if self.metrics.remove_vm_status(namespace, &vm, &old_status) {
                debug!(vm = %vm, status = %old_status, "Removed stale status series");
            }
        }
    }

    /// Publish the duration of every completed VM migration, cluster-wide.
    #[instrument(skip(self))]
    pub async fn collect_migration_durations(&self) -> Result<MigrationReport> {
        debug!("Fetching migrations");

        let migrations = self.api.list_migrations().await?;
        let mut report = MigrationReport::default();
        let mut listed_failures = HashSet::new();

        for migration in &migrations {
            for vm in &migration.vms {
                if vm.is_failed() {
                    let key = failure_key(&migration.name, &migration.namespace, vm);
                    if self.count_failure(key.clone(), &migration.namespace, vm) {
                        report.failed += 1;
                    }
                    listed_failures.insert(key);
                }

                match migrated_vm_duration(vm) {
                    Ok(EntryDuration::Finished(seconds)) => {
                        debug!(
                            vm = %vm.name,
                            namespace = %migration.namespace,
                            seconds,
                            "Migration duration"
                        );
                        self.metrics
                            .set_migration_duration(&migration.namespace, &vm.name, seconds);
                        report.recorded += 1;
                    }
                    Ok(EntryDuration::Running) => {
                        debug!(vm = %vm.name, "Migration still running, skipping");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        warn!(vm = %vm.name, error = %e, "Skipping migration entry");
                        report.skipped += 1;
                    }
                }
            }
        }

        // Only remember failures that are still listed
        self.counted_failures.retain(|key| listed_failures.contains(key));

        Ok(report)
    }

    /// Number of failed entries remembered from the latest listing.
    pub fn tracked_failures(&self) -> usize {
        self.counted_failures.len()
    }

    /// Returns true the first time a given failed entry is seen.
    fn count_failure(&self, key: FailureKey, namespace: &str, vm: &MigratedVm) -> bool {
        if !self.counted_failures.insert(key) {
            return false;
        }

        warn!(
            vm = %vm.name,
            namespace = %namespace,
            reason = vm.error.as_deref().unwrap_or_default(),
            "Virtual machine migration failed"
        );
        self.metrics.inc_failed_migrations(namespace);
        true
    }

    /// Run every routine once: count then status per namespace, then
    /// migration durations.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut succeeded = 0;
        let mut failed = 0;

        for namespace in &self.config.namespaces {
            match self.collect_vm_count(namespace).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    failed += 1;
                    self.record_failure(ROUTINE_VM_COUNT, &e);
                }
            }

            match self.collect_vm_statuses(namespace).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    failed += 1;
                    self.record_failure(ROUTINE_VM_STATUS, &e);
                }
            }
        }

        let migrations = match self.collect_migration_durations().await {
            Ok(report) => {
                succeeded += 1;
                Some(report)
            }
            Err(e) => {
                failed += 1;
                self.record_failure(ROUTINE_MIGRATION_TIME, &e);
                None
            }
        };

        let report = CycleReport {
            succeeded,
            failed,
            migrations,
            elapsed: started.elapsed(),
            finished_at: Utc::now(),
        };

        if failed > 0 {
            info!(succeeded, failed, "Collection cycle finished with errors");
        } else {
            debug!(succeeded, elapsed = ?report.elapsed, "Collection cycle finished");
        }

        *self.last_cycle.write() = Some(report.clone());
        report
    }

    fn record_failure(&self, routine: &'static str, error: &Error) {
        warn!(routine, error = %error, "Collection routine failed");
        self.metrics.inc_collection_errors(routine);
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Durations
// =============================================================================

/// Seconds between two RFC3339 timestamps.
pub fn migration_duration_seconds(vm_name: &str, started: &str, completed: &str) -> Result<f64> {
    let started_at = parse_timestamp(vm_name, "started", started)?;
    let completed_at = parse_timestamp(vm_name, "completed", completed)?;

    Ok((completed_at - started_at).num_milliseconds() as f64 / 1000.0)
}

/// What one VM entry of a migration contributes to the duration gauge.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDuration {
    /// Both timestamps parsed; signed seconds from start to completion
    Finished(f64),
    /// Started and not yet completed
    Running,
}

/// Classify one VM entry.
///
/// Only a started, unfailed entry with no `completed` field is still
/// running. Every other gap (no start, empty completion, failed without a
/// completion) is an error for the caller to warn about.
pub fn migrated_vm_duration(vm: &MigratedVm) -> Result<EntryDuration> {
    let started = match vm.started.as_deref() {
        Some(ts) if !ts.is_empty() => ts,
        _ => {
            return Err(Error::MissingTimestamp {
                vm_name: vm.name.clone(),
                field: "started",
            })
        }
    };

    let completed = match vm.completed.as_deref() {
        None if !vm.is_failed() => return Ok(EntryDuration::Running),
        None | Some("") => {
            return Err(Error::MissingTimestamp {
                vm_name: vm.name.clone(),
                field: "completed",
            })
        }
        Some(ts) => ts,
    };

    let seconds = migration_duration_seconds(&vm.name, started, completed)?;
    if seconds < 0.0 {
        warn!(
            vm = %vm.name,
            started,
            completed,
            seconds,
            "Migration completed before it started, clocks may be skewed"
        );
    }

    Ok(EntryDuration::Finished(seconds))
}

fn parse_timestamp(vm_name: &str, field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| Error::TimestampParse {
            vm_name: vm_name.to_string(),
            field,
            value: value.to_string(),
            source,
        })
}
