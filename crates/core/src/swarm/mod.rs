//! # Swarm Orchestration
//!
//! Runs one trigger through the analysis pipeline.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Trigger → Triage → Fan-out (workers ∥) → Detection → Refinement ⟲ → Synthesis
//! ```
//!
//! Every transition is saved as a new version in the case's
//! [`StateStore`](crate::state::StateStore).

pub mod coordinator;
pub mod events;
pub mod fanout;
pub mod pipeline;
pub mod refinement;
pub mod trace;
pub mod triage;

pub use coordinator::{Controller, PipelineResult};
pub use events::{
    ChannelSink, CompositeSink, MemorySink, MetricsSink, MetricsSnapshot, ObservabilitySink,
    PipelineEvent, PipelineEventKind, RunningStats, TracingSink,
};
pub use fanout::FanOutExecutor;
pub use pipeline::{Pipeline, RefinementCycle};
pub use refinement::{RefinementLoop, RefinementOutcome};
pub use trace::{ExecutionReport, ExecutionTrace, Span, SpanStatus, Tracer};
pub use triage::{Classification, IntentClassifier};
