//! # Refinement Loop
//!
//! Repeatedly resolves outstanding contradictions until none remain, the
//! iteration cap is reached, or the pipeline deadline passes.
//!
//! - Contradictions are resolved one at a time in ascending id order.
//! - A resolved contradiction is never handed to the resolver again.
//! - Every iteration appends a state version; a call that runs no
//!   iteration still appends exactly one.

use super::events::{PipelineEventKind, TracingSink};
use super::pipeline::RefinementCycle;
use super::trace::Tracer;
use crate::error::StoreResult;
use crate::state::{PipelineState, RefinementStatus, StateStore};
use crate::workers::Resolver;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;

const SOURCE: &str = "refinement";

/// What one `refine` call did
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub state: PipelineState,
    /// Versions appended by this call, in order
    pub versions: Vec<u64>,
    pub resolver_calls: usize,
    pub deadline_exceeded: bool,
}

pub struct RefinementLoop {
    resolver: Arc<dyn Resolver>,
    max_iterations: u32,
    min_confidence: f64,
    deadline: Option<Instant>,
}

impl RefinementLoop {
    pub fn new(resolver: Arc<dyn Resolver>, max_iterations: u32) -> Self {
        Self {
            resolver,
            max_iterations,
            min_confidence: 0.0,
            deadline: None,
        }
    }

    /// Resolutions below `min_confidence` leave the contradiction open
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Checked between iterations, never mid-iteration
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn refine(
        &self,
        state: PipelineState,
        store: &StateStore,
    ) -> StoreResult<RefinementOutcome> {
        let mut tracer = Tracer::start(Arc::new(TracingSink), &state.case_id);
        self.refine_traced(state, store, &mut tracer).await
    }

    #[tracing::instrument(skip_all, fields(case_id = %state.case_id, max_iterations = self.max_iterations))]
    pub async fn refine_traced(
        &self,
        mut state: PipelineState,
        store: &StateStore,
        tracer: &mut Tracer,
    ) -> StoreResult<RefinementOutcome> {
        let mut cycle = RefinementCycle::new(state.iteration_count, self.max_iterations);
        cycle.start();
        state.refinement_status = cycle.status;

        let mut versions = Vec::new();
        let mut resolver_calls = 0;
        let mut deadline_exceeded = false;

        loop {
            let mut outstanding: Vec<usize> = state
                .contradictions
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.resolved)
                .map(|(i, _)| i)
                .collect();
            outstanding.sort_by_key(|&i| state.contradictions[i].id);

            if outstanding.is_empty() {
                cycle.resolve();
                break;
            }
            if !cycle.can_iterate() {
                cycle.exhaust();
                break;
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    iterations = cycle.iterations,
                    remaining = outstanding.len(),
                    "Pipeline deadline reached during refinement"
                );
                tracer.emit(
                    PipelineEventKind::DeadlineExceeded,
                    SOURCE,
                    Some(json!({ "phase": "refinement", "remaining": outstanding.len() })),
                );
                deadline_exceeded = true;
                cycle.exhaust();
                break;
            }

            let iteration = cycle.iterations + 1;
            let mut resolved_now = 0;

            for index in outstanding {
                let contradiction = state.contradictions[index].clone();
                let findings = (
                    state.finding(&contradiction.finding_a).cloned(),
                    state.finding(&contradiction.finding_b).cloned(),
                );
                let (Some(finding_a), Some(finding_b)) = findings else {
                    tracer.emit(
                        PipelineEventKind::ResolutionRejected,
                        SOURCE,
                        Some(json!({ "id": contradiction.id, "reason": "finding missing from state" })),
                    );
                    continue;
                };

                resolver_calls += 1;
                match self
                    .resolver
                    .resolve(&contradiction, &finding_a, &finding_b)
                    .await
                {
                    Ok(resolution) if resolution.confidence >= self.min_confidence => {
                        let target = &mut state.contradictions[index];
                        target.resolution = Some(resolution.text);
                        target.resolution_confidence = Some(resolution.confidence);
                        target.resolved = true;
                        target.resolved_in_iteration = Some(iteration);
                        resolved_now += 1;
                        tracer.emit(
                            PipelineEventKind::ContradictionResolved,
                            SOURCE,
                            Some(json!({
                                "id": contradiction.id,
                                "rule": contradiction.rule,
                                "iteration": iteration,
                                "confidence": resolution.confidence,
                            })),
                        );
                    }
                    Ok(resolution) => {
                        tracer.emit(
                            PipelineEventKind::ResolutionRejected,
                            SOURCE,
                            Some(json!({
                                "id": contradiction.id,
                                "reason": "confidence below floor",
                                "confidence": resolution.confidence,
                            })),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(id = %contradiction.id, error = %e, "Resolver failed");
                        tracer.emit(
                            PipelineEventKind::ResolutionRejected,
                            SOURCE,
                            Some(json!({ "id": contradiction.id, "error": format!("{:#}", e) })),
                        );
                    }
                }
            }

            state.iteration_count = cycle.complete_iteration();

            // The saved version carries the final status when this pass ends the loop
            if state.unresolved_count() == 0 {
                cycle.resolve();
            } else if !cycle.can_iterate() {
                cycle.exhaust();
            }
            state.refinement_status = cycle.status;

            let version = store.save(&state)?;
            versions.push(version);

            tracing::info!(
                iteration,
                resolved = resolved_now,
                remaining = state.unresolved_count(),
                version,
                "Refinement iteration complete"
            );
            tracer.emit(
                PipelineEventKind::RefinementIteration,
                SOURCE,
                Some(json!({
                    "iteration": iteration,
                    "resolved": resolved_now,
                    "remaining": state.unresolved_count(),
                    "version": version,
                })),
            );

            if cycle.is_finished() {
                break;
            }
        }

        if versions.is_empty() || state.refinement_status != cycle.status {
            state.refinement_status = cycle.status;
            versions.push(store.save(&state)?);
        }

        match cycle.status {
            RefinementStatus::Exhausted => {
                tracing::warn!(
                    iterations = state.iteration_count,
                    unresolved = state.unresolved_count(),
                    "Refinement exhausted"
                );
                tracer.emit(
                    PipelineEventKind::RefinementExhausted,
                    SOURCE,
                    Some(json!({
                        "iterations": state.iteration_count,
                        "unresolved": state.unresolved_count(),
                    })),
                );
            }
            _ => tracer.emit(
                PipelineEventKind::RefinementResolved,
                SOURCE,
                Some(json!({ "iterations": state.iteration_count })),
            ),
        }

        Ok(RefinementOutcome {
            state,
            versions,
            resolver_calls,
            deadline_exceeded,
        })
    }
}
