//! # Pipeline Stages
//!
//! The two state machines of a run: the pipeline status
//! (`triaging → analyzing → refining → synthesizing → complete`) and the
//! refinement cycle (`idle → refining → {resolved, exhausted}`).

use crate::state::{PipelineStatus, RefinementStatus};

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub status: PipelineStatus,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            status: PipelineStatus::Triaging,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next stage; `complete` is absorbing
    pub fn advance(&mut self) -> PipelineStatus {
        self.status = match self.status {
            PipelineStatus::Triaging => PipelineStatus::Analyzing,
            PipelineStatus::Analyzing => PipelineStatus::Refining,
            PipelineStatus::Refining => PipelineStatus::Synthesizing,
            PipelineStatus::Synthesizing => PipelineStatus::Complete,
            PipelineStatus::Complete => PipelineStatus::Complete,
        };
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == PipelineStatus::Complete
    }
}

/// Refinement state plus the iteration budget
#[derive(Debug, Clone)]
pub struct RefinementCycle {
    pub status: RefinementStatus,
    /// Iterations run so far, across calls
    pub iterations: u32,
    pub max_iterations: u32,
}

impl RefinementCycle {
    pub fn new(iterations: u32, max_iterations: u32) -> Self {
        Self {
            status: RefinementStatus::Idle,
            iterations,
            max_iterations,
        }
    }

    pub fn start(&mut self) {
        self.status = RefinementStatus::Refining;
    }

    /// Whether another iteration fits in the budget
    pub fn can_iterate(&self) -> bool {
        self.iterations < self.max_iterations
    }

    pub fn complete_iteration(&mut self) -> u32 {
        self.iterations += 1;
        self.iterations
    }

    pub fn resolve(&mut self) {
        self.status = RefinementStatus::Resolved;
    }

    pub fn exhaust(&mut self) {
        self.status = RefinementStatus::Exhausted;
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_advance() {
        let mut pipeline = Pipeline::new();
        assert_eq!(pipeline.status, PipelineStatus::Triaging);

        assert_eq!(pipeline.advance(), PipelineStatus::Analyzing);
        assert_eq!(pipeline.advance(), PipelineStatus::Refining);
        assert_eq!(pipeline.advance(), PipelineStatus::Synthesizing);
        assert_eq!(pipeline.advance(), PipelineStatus::Complete);
        assert_eq!(pipeline.advance(), PipelineStatus::Complete);
        assert!(pipeline.is_complete());
    }

    #[test]
    fn test_refinement_budget() {
        let mut cycle = RefinementCycle::new(0, 2);
        assert_eq!(cycle.status, RefinementStatus::Idle);

        cycle.start();
        assert!(cycle.can_iterate());
        assert_eq!(cycle.complete_iteration(), 1);
        assert!(cycle.can_iterate());
        assert_eq!(cycle.complete_iteration(), 2);
        assert!(!cycle.can_iterate());

        cycle.exhaust();
        assert!(cycle.is_finished());
        assert_eq!(cycle.status, RefinementStatus::Exhausted);
    }

    #[test]
    fn test_budget_carries_across_calls() {
        let cycle = RefinementCycle::new(3, 3);
        assert!(!cycle.can_iterate());
    }
}
