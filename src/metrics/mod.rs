//! Metrics module
//!
//! The metric model published by the exporter.

mod registry;

pub use registry::{
    find_sample, ExporterMetrics, COLLECTION_ERRORS, FAILED_MIGRATIONS, MIGRATION_TIME, VM_COUNT,
    VM_STATUS,
};
