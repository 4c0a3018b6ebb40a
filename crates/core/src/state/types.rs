//! # Pipeline Data Model
//!
//! Findings, worker outputs, contradictions and the versioned pipeline state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identity of an analysis worker (e.g. `cam`, `risk`, `pm`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Classified category of a trigger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intent(String);

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of claim a finding makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Observation,
    Analysis,
    Recommendation,
    Action,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Analysis => "analysis",
            Self::Recommendation => "recommendation",
            Self::Action => "action",
        }
    }

    /// Recommendations and actions are the kinds that prescribe something
    pub fn is_prescriptive(&self) -> bool {
        matches!(self, Self::Recommendation | Self::Action)
    }
}

/// One atomic claim produced by exactly one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Worker that emitted the finding
    pub source: WorkerId,
    pub kind: FindingKind,
    pub content: String,
    /// Worker's confidence in the claim (0.0 - 1.0)
    pub confidence: f64,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(source: impl Into<WorkerId>, kind: FindingKind, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind,
            content: content.into(),
            confidence: 0.5,
            evidence_refs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence_refs.push(evidence.into());
        self
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Everything one worker returned from one fan-out pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub worker: WorkerId,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Worker's overall confidence (0.0 - 1.0)
    pub confidence: f64,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Set when the pipeline deadline abandoned this worker
    #[serde(default)]
    pub timed_out: bool,
}

impl WorkerOutput {
    pub fn new(worker: impl Into<WorkerId>, findings: Vec<Finding>, confidence: f64) -> Self {
        Self {
            worker: worker.into(),
            findings,
            confidence: confidence.clamp(0.0, 1.0),
            duration_ms: 0,
            errors: Vec::new(),
            timed_out: false,
        }
    }

    /// Output for a worker that failed: no findings, one error
    pub fn failed(worker: impl Into<WorkerId>, error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Self::new(worker, Vec::new(), 0.0)
        }
    }

    /// Output for a worker abandoned at the pipeline deadline
    pub fn timed_out(worker: impl Into<WorkerId>, elapsed_ms: u64) -> Self {
        let mut output = Self::failed(
            worker,
            format!("timeout: pipeline deadline exceeded after {} ms", elapsed_ms),
        );
        output.duration_ms = elapsed_ms;
        output.timed_out = true;
        output
    }

    pub fn is_failed(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// How severely two findings conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// One level up, saturating at high
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Stable tag of the detection rule that produced a contradiction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleName {
    DirectionalMetricDisagreement,
    SeverityLevelDisagreement,
    DurationEstimateDivergence,
    CostEstimateDivergence,
    RootCauseDisagreement,
    ActionConflict,
    ConfidenceDisparity,
}

impl RuleName {
    pub fn all() -> [RuleName; 7] {
        [
            Self::DirectionalMetricDisagreement,
            Self::SeverityLevelDisagreement,
            Self::DurationEstimateDivergence,
            Self::CostEstimateDivergence,
            Self::RootCauseDisagreement,
            Self::ActionConflict,
            Self::ConfidenceDisparity,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectionalMetricDisagreement => "directional_metric_disagreement",
            Self::SeverityLevelDisagreement => "severity_level_disagreement",
            Self::DurationEstimateDivergence => "duration_estimate_divergence",
            Self::CostEstimateDivergence => "cost_estimate_divergence",
            Self::RootCauseDisagreement => "root_cause_disagreement",
            Self::ActionConflict => "action_conflict",
            Self::ConfidenceDisparity => "confidence_disparity",
        }
    }

    pub fn is_quantitative(&self) -> bool {
        matches!(
            self,
            Self::DurationEstimateDivergence | Self::CostEstimateDivergence
        )
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one finding inside a pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FindingRef {
    pub worker: WorkerId,
    /// Position in the worker's `findings`
    pub index: usize,
}

/// A detected conflict between findings of two different workers.
///
/// Only the refinement loop touches `resolution`, `resolution_confidence`,
/// `resolved` and `resolved_in_iteration`. Contradictions are never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: Uuid,
    pub finding_a: FindingRef,
    pub finding_b: FindingRef,
    pub rule: RuleName,
    pub description: String,
    pub severity: Severity,
    /// Rule-specific resolution guidance attached at detection time
    #[serde(default)]
    pub guidance: String,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub resolution_confidence: Option<f64>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_in_iteration: Option<u32>,
}

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Triaging,
    Analyzing,
    Refining,
    Synthesizing,
    Complete,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triaging => "triaging",
            Self::Analyzing => "analyzing",
            Self::Refining => "refining",
            Self::Synthesizing => "synthesizing",
            Self::Complete => "complete",
        }
    }
}

/// State of the refinement loop: `idle -> refining -> {resolved, exhausted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStatus {
    #[default]
    Idle,
    Refining,
    Resolved,
    Exhausted,
}

impl RefinementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Exhausted)
    }
}

/// The unit of versioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub case_id: String,
    pub intent: Intent,
    pub intent_confidence: f64,
    pub required_workers: Vec<WorkerId>,
    #[serde(default)]
    pub worker_outputs: BTreeMap<WorkerId, WorkerOutput>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    pub status: PipelineStatus,
    #[serde(default)]
    pub refinement_status: RefinementStatus,
    #[serde(default)]
    pub iteration_count: u32,
}

impl PipelineState {
    pub fn new(
        case_id: impl Into<String>,
        intent: Intent,
        intent_confidence: f64,
        required_workers: Vec<WorkerId>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            intent,
            intent_confidence,
            required_workers,
            worker_outputs: BTreeMap::new(),
            contradictions: Vec::new(),
            status: PipelineStatus::Triaging,
            refinement_status: RefinementStatus::Idle,
            iteration_count: 0,
        }
    }

    /// Look up the finding a contradiction points at
    pub fn finding(&self, reference: &FindingRef) -> Option<&Finding> {
        self.worker_outputs
            .get(&reference.worker)
            .and_then(|output| output.findings.get(reference.index))
    }

    pub fn unresolved(&self) -> Vec<&Contradiction> {
        self.contradictions.iter().filter(|c| !c.resolved).collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.contradictions.iter().filter(|c| !c.resolved).count()
    }

    pub fn timed_out_workers(&self) -> Vec<WorkerId> {
        self.worker_outputs
            .values()
            .filter(|o| o.timed_out)
            .map(|o| o.worker.clone())
            .collect()
    }

    pub fn finding_count(&self) -> usize {
        self.worker_outputs.values().map(|o| o.findings.len()).sum()
    }
}

/// Caller-supplied context for one analysis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseContext {
    /// Reuse an existing case id; a fresh UUID is generated otherwise
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub program_name: String,
    #[serde(default)]
    pub reporting_period: String,
    /// Domain facts (program snapshot, metrics, ...) passed to workers as-is
    #[serde(default)]
    pub facts: serde_json::Value,
}

/// Immutable bundle of domain facts for one analysis request.
///
/// Workers only ever see `&Case`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    pub trigger: String,
    pub program_name: String,
    pub reporting_period: String,
    pub created_at: DateTime<Utc>,
    pub facts: serde_json::Value,
}

impl Case {
    pub fn new(trigger: &str, context: CaseContext) -> Self {
        Self {
            case_id: context
                .case_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            trigger: trigger.to_string(),
            program_name: context.program_name,
            reporting_period: context.reporting_period,
            created_at: Utc::now(),
            facts: context.facts,
        }
    }

    /// Read a fact by JSON pointer (e.g. `/evm/cpi`)
    pub fn fact(&self, pointer: &str) -> Option<&serde_json::Value> {
        self.facts.pointer(pointer)
    }
}

/// One immutable, timestamped snapshot of pipeline state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVersion {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub state: PipelineState,
}

/// History entry: `(version, timestamp, status)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub status: PipelineStatus,
    pub refinement_status: RefinementStatus,
    /// Version this one was copied from, when appended by a rollback
    #[serde(default)]
    pub rolled_back_from: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_escalation_saturates() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::Medium.escalate(), Severity::High);
        assert_eq!(Severity::High.escalate(), Severity::High);
        assert!(Severity::High > Severity::Low);
    }

    #[test]
    fn test_failed_output_has_no_findings() {
        let output = WorkerOutput::failed("risk", "boom");
        assert!(output.findings.is_empty());
        assert!(output.is_failed());
        assert!(!output.timed_out);

        let timed_out = WorkerOutput::timed_out("cam", 250);
        assert!(timed_out.timed_out);
        assert!(timed_out.errors[0].starts_with("timeout"));
    }

    #[test]
    fn test_finding_confidence_is_clamped() {
        let finding = Finding::new("cam", FindingKind::Analysis, "CPI at 0.87").with_confidence(1.7);
        assert_eq!(finding.confidence, 1.0);
    }

    #[test]
    fn test_state_serialization_uses_snake_case() {
        let state = PipelineState::new(
            "case-1",
            Intent::new("explain_variance"),
            0.5,
            vec![WorkerId::new("cam"), WorkerId::new("pm")],
        );
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"status\":\"triaging\""));
        assert!(json.contains("\"refinement_status\":\"idle\""));
        assert!(json.contains("\"required_workers\":[\"cam\",\"pm\"]"));
    }

    #[test]
    fn test_case_fact_lookup() {
        let case = Case::new(
            "Explain CPI",
            CaseContext {
                case_id: Some("case-9".into()),
                facts: serde_json::json!({ "evm": { "cpi": 0.87 } }),
                ..Default::default()
            },
        );
        assert_eq!(case.case_id, "case-9");
        assert_eq!(case.fact("/evm/cpi"), Some(&serde_json::json!(0.87)));
        assert!(case.fact("/evm/spi").is_none());
    }
}
