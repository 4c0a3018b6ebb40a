//! # Worker Capabilities
//!
//! The three external collaborators the pipeline consumes:
//!
//! - [`Worker`] analyzes a [`Case`] and returns findings
//! - [`Resolver`] reconciles one contradiction between two findings
//! - [`Synthesizer`] turns the reconciled state into a [`FinalReport`]
//!
//! The pipeline never interprets what a finding means, only its shape.

mod brief;
mod resolver;

pub use brief::{BriefSynthesizer, FinalReport, ReportSection};
pub use resolver::GuidanceResolver;

use crate::state::{Case, Contradiction, Finding, PipelineState, WorkerId, WorkerOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// An analysis worker.
///
/// Errors returned here (and panics) are captured per worker by the
/// fan-out executor; they never abort sibling workers.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> WorkerId;

    async fn invoke(&self, case: &Case) -> anyhow::Result<WorkerOutput>;
}

/// Resolution text and confidence for one contradiction
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub text: String,
    pub confidence: f64,
}

impl Resolution {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        contradiction: &Contradiction,
        finding_a: &Finding,
        finding_b: &Finding,
    ) -> anyhow::Result<Resolution>;
}

/// Invoked once per run, after refinement terminates
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, state: &PipelineState) -> anyhow::Result<FinalReport>;
}

/// Workers available to a Controller, keyed by id
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any previous worker with the same id
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> &mut Self {
        self.workers.insert(worker.id(), worker);
        self
    }

    pub fn with(mut self, worker: impl Worker + 'static) -> Self {
        self.register(Arc::new(worker));
        self
    }

    pub fn get(&self, id: &WorkerId) -> Option<Arc<dyn Worker>> {
        self.workers.get(id).cloned()
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

type WorkerFn = dyn Fn(&Case) -> anyhow::Result<WorkerOutput> + Send + Sync;

/// Worker backed by a closure, with an optional simulated latency.
///
/// ## Example
/// ```rust,ignore
/// let cam = FnWorker::new("cam", |case| {
///     Ok(WorkerOutput::new("cam", vec![Finding::new("cam", FindingKind::Analysis, "CPI at 0.87")], 0.8))
/// });
/// ```
#[derive(Clone)]
pub struct FnWorker {
    id: WorkerId,
    delay: Option<Duration>,
    run: Arc<WorkerFn>,
}

impl FnWorker {
    pub fn new<F>(id: impl Into<WorkerId>, run: F) -> Self
    where
        F: Fn(&Case) -> anyhow::Result<WorkerOutput> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            delay: None,
            run: Arc::new(run),
        }
    }

    /// Worker that always returns the given findings
    pub fn fixed(id: impl Into<WorkerId>, findings: Vec<Finding>, confidence: f64) -> Self {
        let id = id.into();
        let worker = id.clone();
        Self::new(id, move |_| {
            Ok(WorkerOutput::new(worker.clone(), findings.clone(), confidence))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Worker for FnWorker {
    fn id(&self) -> WorkerId {
        self.id.clone()
    }

    async fn invoke(&self, case: &Case) -> anyhow::Result<WorkerOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.run)(case)
    }
}
