//! Collector module
//!
//! Collection routines and the loop that schedules them.

mod engine;
mod scheduler;

pub use engine::{
    migrated_vm_duration, migration_duration_seconds, Collector, CollectorConfig, CycleReport,
    EntryDuration, MigrationReport, ROUTINE_MIGRATION_TIME, ROUTINE_VM_COUNT, ROUTINE_VM_STATUS,
};
pub use scheduler::Scheduler;
