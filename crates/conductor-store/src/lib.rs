//! Record persistence for the Conductor engine.
//!
//! Execution history (workflow executions, automation runs, performance
//! metrics) is written through the [`RecordStore`] trait, which only requires
//! create/read/update-by-id semantics over named collections. Two
//! implementations ship: [`MemoryStore`] for tests and ephemeral runs, and
//! [`FileRecordStore`] which keeps one JSON file per record.

/// Typed view over one collection.
pub mod collection;
/// JSON-file store.
pub mod file;
/// In-process store.
pub mod memory;
/// The store trait.
pub mod store;

pub use collection::Collection;
pub use file::FileRecordStore;
pub use memory::MemoryStore;
pub use store::RecordStore;

/// Well-known collection names.
pub mod collections {
    /// Workflow execution records, keyed by execution id.
    pub const WORKFLOW_EXECUTIONS: &str = "workflow_executions";
    /// Automation task state, keyed by task id.
    pub const AUTOMATION_TASKS: &str = "automation_tasks";
    /// Automation run summaries, keyed by run id.
    pub const AUTOMATION_RUNS: &str = "automation_runs";
    /// Per-task agent performance samples, keyed by metric id.
    pub const PERFORMANCE_METRICS: &str = "performance_metrics";
}
