//! Exporter Metrics Registry
//!
//! Owns a private `prometheus::Registry` with the metric families the
//! exporter publishes. One instance is created at startup and shared behind
//! an `Arc` between the scheduler (writer) and the HTTP server (reader);
//! the metric vectors synchronize internally so no extra locking is needed.

use prometheus::{
    CounterVec, Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::debug;

use crate::error::{Error, Result};

pub const VM_COUNT: &str = "virtual_machine_count_total";
pub const VM_STATUS: &str = "virtual_machine_status";
pub const FAILED_MIGRATIONS: &str = "failed_migrations_total";
pub const MIGRATION_TIME: &str = "virtual_machine_migration_time_seconds";
pub const COLLECTION_ERRORS: &str = "vmmig_exporter_collection_errors_total";

/// The metric families published on `/metrics`.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    vm_count: GaugeVec,
    vm_status: GaugeVec,
    failed_migrations: CounterVec,
    migration_time: GaugeVec,
    collection_errors: IntCounterVec,
}

impl ExporterMetrics {
    /// Create the metric families in a fresh registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the metric families and register them into `registry`.
    ///
    /// Fails with [`Error::MetricsRegistration`] if any family is already
    /// registered there.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let vm_count = GaugeVec::new(
            Opts::new(VM_COUNT, "Total number of virtual machines in the namespace"),
            &["namespace"],
        )?;
        let vm_status = GaugeVec::new(
            Opts::new(VM_STATUS, "Status of a virtual machine in the namespace"),
            &["namespace", "vm_name", "status"],
        )?;
        let failed_migrations = CounterVec::new(
            Opts::new(
                FAILED_MIGRATIONS,
                "Total number of failed migrations per namespace",
            ),
            &["namespace"],
        )?;
        let migration_time = GaugeVec::new(
            Opts::new(
                MIGRATION_TIME,
                "Time taken for virtual machine migrations in the namespace",
            ),
            &["namespace", "vm_name"],
        )?;
        let collection_errors = IntCounterVec::new(
            Opts::new(
                COLLECTION_ERRORS,
                "Collection routine runs that failed to read the cluster API",
            ),
            &["routine"],
        )?;

        registry.register(Box::new(vm_count.clone()))?;
        registry.register(Box::new(vm_status.clone()))?;
        registry.register(Box::new(failed_migrations.clone()))?;
        registry.register(Box::new(migration_time.clone()))?;
        registry.register(Box::new(collection_errors.clone()))?;

        debug!("Registered exporter metric families");

        Ok(Self {
            registry,
            vm_count,
            vm_status,
            failed_migrations,
            migration_time,
            collection_errors,
        })
    }

    // =========================================================================
    // Writers
    // =========================================================================

    pub fn set_vm_count(&self, namespace: &str, count: usize) {
        self.vm_count
            .with_label_values(&[namespace])
            .set(count as f64);
    }

    /// Mark `vm_name` as observed in `status`.
    pub fn set_vm_status(&self, namespace: &str, vm_name: &str, status: &str) {
        self.vm_status
            .with_label_values(&[namespace, vm_name, status])
            .set(1.0);
    }

    /// Drop the series for a status no longer reported. Returns false if
    /// there was no such series.
    pub fn remove_vm_status(&self, namespace: &str, vm_name: &str, status: &str) -> bool {
        self.vm_status
            .remove_label_values(&[namespace, vm_name, status])
            .is_ok()
    }

    pub fn set_migration_duration(&self, namespace: &str, vm_name: &str, seconds: f64) {
        self.migration_time
            .with_label_values(&[namespace, vm_name])
            .set(seconds);
    }

    pub fn inc_failed_migrations(&self, namespace: &str) {
        self.failed_migrations.with_label_values(&[namespace]).inc();
    }

    pub fn inc_collection_errors(&self, routine: &str) {
        self.collection_errors.with_label_values(&[routine]).inc();
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Render every family in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| Error::MetricsEncoding(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| Error::MetricsEncoding(e.to_string()))
    }

    /// Content type of [`encode`](Self::encode) output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Current value of the series `name` with exactly `labels`, if present.
    ///
    /// Reads the rendered exposition so looking a series up never creates it.
    pub fn sample(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let text = self.encode().ok()?;
        find_sample(&text, name, labels)
    }
}

impl std::fmt::Debug for ExporterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetrics")
            .field("families", &self.registry.gather().len())
            .finish()
    }
}

/// Find a sample in Prometheus text exposition output.
///
/// `labels` may be given in any order; they must match the full label set of
/// the series.
pub fn find_sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let mut sorted = labels.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let series = if sorted.is_empty() {
        name.to_string()
    } else {
        let pairs: Vec<String> = sorted
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();
        format!("{}{{{}}}", name, pairs.join(","))
    };

    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (head, value) = line.rsplit_once(' ')?;
            if head == series {
                value.parse().ok()
            } else {
                None
            }
        })
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_new_registry_is_empty_until_written() {
        let metrics = ExporterMetrics::new().unwrap();
        let text = metrics.encode().unwrap();

        // Vectors without children are not exposed
        assert!(!text.contains(VM_COUNT));
        assert_eq!(metrics.sample(VM_COUNT, &[("namespace", "default")]), None);
    }

    #[test]
    fn test_vm_count() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_vm_count("default", 0);
        metrics.set_vm_count("migrationlab", 3);
        metrics.set_vm_count("migrationlab", 1);

        assert_eq!(metrics.sample(VM_COUNT, &[("namespace", "default")]), Some(0.0));
        assert_eq!(
            metrics.sample(VM_COUNT, &[("namespace", "migrationlab")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_vm_status_label_order_does_not_matter() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_vm_status("migrationlab", "rocky9-esxi", "Running");

        let text = metrics.encode().unwrap();
        assert!(text.contains(
            r#"virtual_machine_status{namespace="migrationlab",status="Running",vm_name="rocky9-esxi"} 1"#
        ));

        assert_eq!(
            metrics.sample(
                VM_STATUS,
                &[
                    ("vm_name", "rocky9-esxi"),
                    ("namespace", "migrationlab"),
                    ("status", "Running"),
                ]
            ),
            Some(1.0)
        );
    }

    #[test]
    fn test_remove_vm_status() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_vm_status("ns", "vm", "Stopped");

        assert!(metrics.remove_vm_status("ns", "vm", "Stopped"));
        assert!(!metrics.remove_vm_status("ns", "vm", "Stopped"));
        assert_eq!(
            metrics.sample(VM_STATUS, &[("namespace", "ns"), ("vm_name", "vm"), ("status", "Stopped")]),
            None
        );
    }

    #[test]
    fn test_migration_duration_and_failures() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_migration_duration("migrationlab", "centos", 1043.0);
        metrics.inc_failed_migrations("migrationlab");
        metrics.inc_failed_migrations("migrationlab");
        metrics.inc_collection_errors("vm_count");

        assert_eq!(
            metrics.sample(
                MIGRATION_TIME,
                &[("namespace", "migrationlab"), ("vm_name", "centos")]
            ),
            Some(1043.0)
        );
        assert_eq!(
            metrics.sample(FAILED_MIGRATIONS, &[("namespace", "migrationlab")]),
            Some(2.0)
        );
        assert_eq!(
            metrics.sample(COLLECTION_ERRORS, &[("routine", "vm_count")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let first = ExporterMetrics::with_registry(registry.clone());
        assert!(first.is_ok());

        let second = ExporterMetrics::with_registry(registry);
        assert_matches!(second, Err(Error::MetricsRegistration(_)));
    }

    #[test]
    fn test_content_type() {
        let metrics = ExporterMetrics::new().unwrap();
        assert!(metrics.content_type().starts_with("text/plain"));
    }

    #[test]
    fn test_find_sample_escapes_label_values() {
        let text = "# HELP m help\n# TYPE m gauge\nm{name=\"a\\\"b\"} 7\n";
        assert_eq!(find_sample(text, "m", &[("name", "a\"b")]), Some(7.0));
        assert_eq!(find_sample(text, "m", &[("name", "ab")]), None);
    }

    #[test]
    fn test_clone_shares_series() {
        let metrics = ExporterMetrics::new().unwrap();
        let reader = metrics.clone();
        metrics.set_vm_count("default", 5);

        assert_eq!(reader.sample(VM_COUNT, &[("namespace", "default")]), Some(5.0));
    }
}
