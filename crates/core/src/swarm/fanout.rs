//! # Fan-Out Executor
//!
//! Runs the required workers against one shared, read-only [`Case`].
//!
//! - Every requested worker gets exactly one output, even when it errors,
//!   panics, is not registered, or is abandoned at the deadline.
//! - Concurrent mode bounds in-flight workers with a semaphore; sequential
//!   mode runs them one at a time in declared order.
//! - The call returns only after every dispatched worker has finished.

use crate::state::{Case, WorkerId, WorkerOutput};
use crate::workers::{Worker, WorkerRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub struct FanOutExecutor {
    registry: WorkerRegistry,
    synthesizer: WorkerId,
    sequential: bool,
    max_concurrent: usize,
}

impl FanOutExecutor {
    pub fn new(registry: WorkerRegistry, synthesizer: WorkerId) -> Self {
        Self {
            registry,
            synthesizer,
            sequential: false,
            max_concurrent: 8,
        }
    }

    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Run without a deadline
    pub async fn run(
        &self,
        case: Arc<Case>,
        required: &[WorkerId],
        exclude_synthesizer: bool,
    ) -> BTreeMap<WorkerId, WorkerOutput> {
        self.run_until(case, required, exclude_synthesizer, None).await
    }

    /// Run, abandoning any worker still in flight at `deadline`
    pub async fn run_until(
        &self,
        case: Arc<Case>,
        required: &[WorkerId],
        exclude_synthesizer: bool,
        deadline: Option<Instant>,
    ) -> BTreeMap<WorkerId, WorkerOutput> {
        let mut dispatch: Vec<WorkerId> = Vec::with_capacity(required.len());
        for id in required {
            if exclude_synthesizer && *id == self.synthesizer {
                continue;
            }
            if !dispatch.contains(id) {
                dispatch.push(id.clone());
            }
        }

        tracing::info!(
            workers = dispatch.len(),
            sequential = self.sequential,
            "Fanning out to workers"
        );

        let mut outputs = BTreeMap::new();

        if self.sequential {
            for id in dispatch {
                let handle = self.spawn(id.clone(), Arc::clone(&case), deadline, None);
                let output = join(id.clone(), handle).await;
                outputs.insert(id, output);
            }
            return outputs;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles: Vec<(WorkerId, JoinHandle<WorkerOutput>)> = Vec::new();

        // SCATTER
        for id in dispatch {
            let handle = self.spawn(
                id.clone(),
                Arc::clone(&case),
                deadline,
                Some(Arc::clone(&semaphore)),
            );
            handles.push((id, handle));
        }

        // GATHER: keyed by worker, not by completion order
        for (id, handle) in handles {
            let output = join(id.clone(), handle).await;
            outputs.insert(id, output);
        }

        outputs
    }

    fn spawn(
        &self,
        id: WorkerId,
        case: Arc<Case>,
        deadline: Option<Instant>,
        semaphore: Option<Arc<Semaphore>>,
    ) -> JoinHandle<WorkerOutput> {
        let worker = self.registry.get(&id);
        tokio::spawn(invoke_one(id, worker, case, deadline, semaphore))
    }
}

async fn join(id: WorkerId, handle: JoinHandle<WorkerOutput>) -> WorkerOutput {
    match handle.await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(worker = %id, error = %e, "Worker task panicked");
            WorkerOutput::failed(id, format!("worker panicked: {}", e))
        }
    }
}

async fn invoke_one(
    id: WorkerId,
    worker: Option<Arc<dyn Worker>>,
    case: Arc<Case>,
    deadline: Option<Instant>,
    semaphore: Option<Arc<Semaphore>>,
) -> WorkerOutput {
    let started = Instant::now();

    let Some(worker) = worker else {
        tracing::warn!(worker = %id, "No worker registered");
        return WorkerOutput::failed(id.clone(), format!("no worker registered for `{}`", id));
    };

    let work = async {
        // Held until the invocation finishes
        let _permit = match &semaphore {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        worker.invoke(&case).await
    };

    let result = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, work).await.ok(),
        None => Some(work.await),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        None => {
            tracing::warn!(worker = %id, elapsed_ms, "Worker abandoned at pipeline deadline");
            WorkerOutput::timed_out(id, elapsed_ms)
        }
        Some(Err(e)) => {
            tracing::warn!(worker = %id, error = %e, "Worker failed");
            let mut output = WorkerOutput::failed(id, format!("{:#}", e));
            output.duration_ms = elapsed_ms;
            output
        }
        Some(Ok(output)) => {
            let output = attribute(output, &id, elapsed_ms);
            tracing::debug!(
                worker = %id,
                findings = output.findings.len(),
                elapsed_ms,
                "Worker completed"
            );
            output
        }
    }
}

/// Findings belong to the worker that was dispatched, whatever it claims
fn attribute(mut output: WorkerOutput, id: &WorkerId, elapsed_ms: u64) -> WorkerOutput {
    output.worker = id.clone();
    output.confidence = output.confidence.clamp(0.0, 1.0);
    output.duration_ms = elapsed_ms;
    output.timed_out = false;
    for finding in &mut output.findings {
        finding.source = id.clone();
        finding.confidence = finding.confidence.clamp(0.0, 1.0);
    }
    output
}
