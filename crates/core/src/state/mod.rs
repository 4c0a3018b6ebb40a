pub mod db;
pub mod snapshots;
pub mod types;

pub use db::StateDb;
pub use snapshots::StateStore;
pub use types::{
    Case, CaseContext, Contradiction, Finding, FindingKind, FindingRef, Intent, PipelineState,
    PipelineStatus, RefinementStatus, RuleName, Severity, StateVersion, VersionSummary, WorkerId,
    WorkerOutput,
};
