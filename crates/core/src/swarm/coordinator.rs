//! # Pipeline Controller
//!
//! Sequences classification, fan-out, contradiction detection, refinement
//! and synthesis for one trigger, saving a state version at every
//! transition.
//!
//! Only store integrity failures abort a run. Worker failures, deadline
//! overruns, refinement exhaustion and synthesis errors all degrade into
//! the returned [`PipelineResult`].

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::contradiction::ContradictionDetector;
use crate::error::StoreResult;
use crate::models::CoordinatorConfig;
use crate::state::{
    Case, CaseContext, Contradiction, PipelineState, RefinementStatus, StateStore, VersionSummary,
    WorkerId,
};
use crate::workers::{
    BriefSynthesizer, FinalReport, GuidanceResolver, Resolver, Synthesizer, WorkerRegistry,
};

use super::events::{ObservabilitySink, PipelineEventKind, TracingSink};
use super::fanout::FanOutExecutor;
use super::pipeline::Pipeline;
use super::refinement::RefinementLoop;
use super::trace::{ExecutionTrace, SpanStatus, Tracer};
use super::triage::IntentClassifier;

const SOURCE: &str = "controller";

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub final_state: PipelineState,
    /// Version number of `final_state` in the case's store
    pub final_version: u64,
    pub trace: ExecutionTrace,
    /// Still open after refinement; also flagged in the report
    pub unresolved_contradictions: Vec<Contradiction>,
    pub report: Option<FinalReport>,
    pub synthesis_error: Option<String>,
    pub timed_out_workers: Vec<WorkerId>,
}

impl PipelineResult {
    pub fn is_exhausted(&self) -> bool {
        self.final_state.refinement_status == RefinementStatus::Exhausted
    }
}

/// The pipeline controller
pub struct Controller {
    config: CoordinatorConfig,
    classifier: IntentClassifier,
    executor: FanOutExecutor,
    detector: ContradictionDetector,
    resolver: Arc<dyn Resolver>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn ObservabilitySink>,
    /// One store per case id
    stores: Mutex<HashMap<String, Arc<StateStore>>>,
}

impl Controller {
    /// Create a controller with the built-in resolver, synthesizer and a
    /// `tracing` sink
    pub fn new(config: CoordinatorConfig, registry: WorkerRegistry) -> Self {
        let executor = FanOutExecutor::new(registry, config.triage.synthesizer.clone())
            .sequential(config.sequential_fan_out)
            .max_concurrent(config.max_concurrent_workers);

        Self {
            classifier: IntentClassifier::new(config.triage.clone()),
            detector: ContradictionDetector::new(config.detector.clone()),
            executor,
            resolver: Arc::new(GuidanceResolver),
            synthesizer: Arc::new(BriefSynthesizer),
            sink: Arc::new(TracingSink),
            stores: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// Set the observability sink that receives every event
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Ids of every registered worker, sorted
    pub fn registered_workers(&self) -> Vec<WorkerId> {
        self.executor.registry().ids()
    }

    /// Store for a case that has run at least once
    pub fn state_store(&self, case_id: &str) -> Option<Arc<StateStore>> {
        self.stores.lock().ok()?.get(case_id).cloned()
    }

    /// Case ids with stored history, sorted
    pub fn case_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .stores
            .lock()
            .map(|stores| stores.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Version summaries for a case; empty for an unknown case
    pub fn get_state_history(&self, case_id: &str) -> StoreResult<Vec<VersionSummary>> {
        match self.state_store(case_id) {
            Some(store) => store.history(),
            None => Ok(Vec::new()),
        }
    }

    fn store_for(&self, case_id: &str) -> Result<Arc<StateStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        if let Some(store) = stores.get(case_id) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(StateStore::new().context("Failed to create state store")?);
        stores.insert(case_id.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn save(&self, store: &StateStore, state: &PipelineState, tracer: &mut Tracer) -> StoreResult<u64> {
        let version = store.save(state)?;
        tracer.emit(
            PipelineEventKind::StateSaved,
            SOURCE,
            Some(json!({ "version": version, "status": state.status })),
        );
        Ok(version)
    }

    /// Run the whole pipeline for one trigger
    #[tracing::instrument(skip(self, context), fields(trigger_preview = %trigger.chars().take(50).collect::<String>()))]
    pub async fn run_pipeline(&self, trigger: &str, context: CaseContext) -> Result<PipelineResult> {
        let deadline = self.config.deadline().map(|budget| Instant::now() + budget);
        let case = Arc::new(Case::new(trigger, context));
        let store = self.store_for(&case.case_id)?;
        let mut tracer = Tracer::start(Arc::clone(&self.sink), &case.case_id);
        let mut pipeline = Pipeline::new();

        tracing::info!(case_id = %case.case_id, trace_id = %tracer.trace_id(), "Pipeline started");
        tracer.emit(
            PipelineEventKind::PipelineStarted,
            SOURCE,
            Some(json!({ "case_id": case.case_id, "trigger": trigger })),
        );

        // === TRIAGE ===
        let span = tracer.start_span("triage", "classify");
        let classification = self.classifier.classify(trigger);
        tracer.set_intent(classification.intent.as_str());
        tracer.emit(
            PipelineEventKind::IntentClassified,
            "triage",
            Some(json!({
                "intent": classification.intent,
                "confidence": classification.confidence,
                "workers": classification.required_workers,
                "keywords": classification.matched_keywords,
            })),
        );
        let mut state = PipelineState::new(
            case.case_id.clone(),
            classification.intent,
            classification.confidence,
            classification.required_workers,
        );
        self.save(&store, &state, &mut tracer)?;
        tracer.end_span(span, SpanStatus::Ok);

        // === FAN-OUT ===
        state.status = pipeline.advance();
        self.save(&store, &state, &mut tracer)?;

        let span = tracer.start_span("fan_out", "run");
        let outputs = self
            .executor
            .run_until(Arc::clone(&case), &state.required_workers, true, deadline)
            .await;

        for output in outputs.values() {
            let worker = output.worker.as_str();
            let (kind, status) = if output.timed_out {
                (PipelineEventKind::WorkerTimedOut, SpanStatus::Timeout)
            } else if output.is_failed() {
                (PipelineEventKind::WorkerFailed, SpanStatus::Error)
            } else {
                (PipelineEventKind::WorkerCompleted, SpanStatus::Ok)
            };
            tracer.record_span(span, worker, "invoke", output.duration_ms as f64, status);
            tracer.emit(
                kind,
                worker,
                Some(json!({
                    "duration_ms": output.duration_ms,
                    "findings": output.findings.len(),
                    "finding_confidences": output.findings.iter().map(|f| f.confidence).collect::<Vec<_>>(),
                    "errors": output.errors,
                })),
            );
        }

        let timed_out: Vec<WorkerId> = outputs
            .values()
            .filter(|o| o.timed_out)
            .map(|o| o.worker.clone())
            .collect();
        if !timed_out.is_empty() {
            tracing::warn!(workers = ?timed_out, "Pipeline deadline exceeded during fan-out");
            tracer.emit(
                PipelineEventKind::DeadlineExceeded,
                SOURCE,
                Some(json!({ "phase": "fan_out", "workers": timed_out })),
            );
        }

        state.worker_outputs = outputs;
        tracer.end_span(span, SpanStatus::Ok);
        self.save(&store, &state, &mut tracer)?;

        // === DETECTION ===
        state.status = pipeline.advance();
        let span = tracer.start_span("detection", "detect");
        state.contradictions = self.detector.detect(&state.worker_outputs);

        let mut by_rule: BTreeMap<&str, usize> = BTreeMap::new();
        for c in &state.contradictions {
            *by_rule.entry(c.rule.as_str()).or_default() += 1;
        }
        tracer.emit(
            PipelineEventKind::ContradictionsDetected,
            "detector",
            Some(json!({ "count": state.contradictions.len(), "by_rule": by_rule })),
        );
        tracer.end_span(span, SpanStatus::Ok);
        self.save(&store, &state, &mut tracer)?;

        // === REFINEMENT ===
        let span = tracer.start_span("refinement", "refine");
        let outcome = RefinementLoop::new(
            Arc::clone(&self.resolver),
            self.config.max_refinement_iterations,
        )
        .with_min_confidence(self.config.min_resolution_confidence)
        .with_deadline(deadline)
        .refine_traced(state, &store, &mut tracer)
        .await?;
        let mut state = outcome.state;
        tracer.end_span(
            span,
            if state.refinement_status == RefinementStatus::Resolved {
                SpanStatus::Ok
            } else {
                SpanStatus::Error
            },
        );

        // === SYNTHESIS ===
        state.status = pipeline.advance();
        self.save(&store, &state, &mut tracer)?;

        let span = tracer.start_span("synthesis", self.config.triage.synthesizer.as_str());
        let (report, synthesis_error) = match self.synthesizer.synthesize(&state).await {
            Ok(report) => {
                tracer.emit(
                    PipelineEventKind::SynthesisCompleted,
                    "synthesis",
                    Some(json!({ "unresolved": report.unresolved_contradictions.len() })),
                );
                tracer.end_span(span, SpanStatus::Ok);
                (Some(report), None)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(error = %message, "Synthesis failed");
                tracer.emit(
                    PipelineEventKind::SynthesisFailed,
                    "synthesis",
                    Some(json!({ "error": message })),
                );
                tracer.end_span(span, SpanStatus::Error);
                (None, Some(message))
            }
        };

        state.status = pipeline.advance();
        let final_version = self.save(&store, &state, &mut tracer)?;

        let unresolved_contradictions: Vec<Contradiction> =
            state.unresolved().into_iter().cloned().collect();
        tracing::info!(
            case_id = %state.case_id,
            version = final_version,
            unresolved = unresolved_contradictions.len(),
            "Pipeline completed"
        );
        tracer.emit(
            PipelineEventKind::PipelineCompleted,
            SOURCE,
            Some(json!({
                "version": final_version,
                "refinement_status": state.refinement_status,
                "unresolved": unresolved_contradictions.len(),
            })),
        );

        Ok(PipelineResult {
            timed_out_workers: state.timed_out_workers(),
            final_state: state,
            final_version,
            trace: tracer.finish(),
            unresolved_contradictions,
            report,
            synthesis_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Finding, FindingKind, PipelineStatus, RuleName, Severity};
    use crate::swarm::events::{MemorySink, MetricsSink};
    use crate::swarm::trace::ExecutionReport;
    use crate::workers::{FnWorker, Resolution};
    use async_trait::async_trait;
    use std::time::Duration;

    fn analysis(worker: &str, content: &str, confidence: f64) -> FnWorker {
        FnWorker::fixed(
            worker,
            vec![Finding::new(worker, FindingKind::Analysis, content).with_confidence(confidence)],
            confidence,
        )
    }

    fn sequential() -> CoordinatorConfig {
        CoordinatorConfig {
            sequential_fan_out: true,
            ..Default::default()
        }
    }

    fn context(case_id: &str) -> CaseContext {
        CaseContext {
            case_id: Some(case_id.to_string()),
            program_name: "Wing Program".into(),
            reporting_period: "2024-06".into(),
            ..Default::default()
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl Resolver for FailingResolver {
        async fn resolve(
            &self,
            _c: &Contradiction,
            _a: &Finding,
            _b: &Finding,
        ) -> anyhow::Result<Resolution> {
            anyhow::bail!("no adjudicator available")
        }
    }

    struct FailingSynthesizer;

    #[async_trait]
    impl Synthesizer for FailingSynthesizer {
        async fn synthesize(&self, _state: &PipelineState) -> anyhow::Result<FinalReport> {
            anyhow::bail!("report template missing")
        }
    }

    #[tokio::test]
    async fn test_directional_end_to_end() {
        let registry = WorkerRegistry::new()
            .with(analysis("cam", "CPI improving to 0.92", 0.8))
            .with(analysis("risk", "CPI worsening, now 0.85", 0.8));
        let controller = Controller::new(sequential(), registry);

        let result = controller
            .run_pipeline("Explain the CPI and schedule slip", context("case-cpi"))
            .await
            .unwrap();
        let state = &result.final_state;

        assert_eq!(state.contradictions.len(), 1);
        let contradiction = &state.contradictions[0];
        assert_eq!(contradiction.rule, RuleName::DirectionalMetricDisagreement);
        assert_eq!(contradiction.severity, Severity::Medium);
        assert!(contradiction.resolved);

        assert_eq!(state.status, PipelineStatus::Complete);
        assert_eq!(state.refinement_status, RefinementStatus::Resolved);
        assert_eq!(
            state.worker_outputs.keys().cloned().collect::<Vec<_>>(),
            vec![WorkerId::new("cam"), WorkerId::new("risk")]
        );
        assert!(result.unresolved_contradictions.is_empty());
        assert!(result.report.is_some());
    }

    #[tokio::test]
    async fn test_duration_end_to_end() {
        let wide = Controller::new(
            sequential(),
            WorkerRegistry::new()
                .with(analysis("cam", "CDR milestone slip estimated at 10 days", 0.8))
                .with(analysis("risk", "CDR milestone slip estimated at 25 days", 0.8)),
        );
        let result = wide
            .run_pipeline("Assess the CDR milestone slip", context("case-wide"))
            .await
            .unwrap();
        let contradictions = &result.final_state.contradictions;
        assert_eq!(contradictions.len(), 1);
        assert_eq!(contradictions[0].rule, RuleName::DurationEstimateDivergence);
        assert_eq!(contradictions[0].severity, Severity::High);

        let close = Controller::new(
            sequential(),
            WorkerRegistry::new()
                .with(analysis("cam", "CDR milestone slip estimated at 10 days", 0.8))
                .with(analysis("risk", "CDR milestone slip estimated at 13 days", 0.8)),
        );
        let result = close
            .run_pipeline("Assess the CDR milestone slip", context("case-close"))
            .await
            .unwrap();
        assert!(result.final_state.contradictions.is_empty());
    }

    #[tokio::test]
    async fn test_versions_track_every_transition() {
        let registry = WorkerRegistry::new()
            .with(analysis("cam", "CPI improving to 0.92", 0.8))
            .with(analysis("risk", "CPI worsening, now 0.85", 0.8));
        let controller = Controller::new(sequential(), registry);
        let result = controller
            .run_pipeline("Explain the CPI", context("case-history"))
            .await
            .unwrap();

        let history = controller.get_state_history("case-history").unwrap();
        let statuses: Vec<PipelineStatus> = history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![
                PipelineStatus::Triaging,
                PipelineStatus::Analyzing,
                PipelineStatus::Analyzing,
                PipelineStatus::Refining,
                PipelineStatus::Refining,
                PipelineStatus::Synthesizing,
                PipelineStatus::Complete,
            ]
        );
        assert!(history.windows(2).all(|w| w[0].version < w[1].version));
        assert_eq!(history[0].version, 1);
        assert_eq!(result.final_version, 7);

        let store = controller.state_store("case-history").unwrap();
        assert_eq!(store.get(None).unwrap(), result.final_state);
        assert!(controller.get_state_history("unknown").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_through_controller() {
        let registry = WorkerRegistry::new().with(analysis("cam", "CPI at 0.87", 0.8));
        let controller = Controller::new(sequential(), registry);
        controller
            .run_pipeline("Explain the CPI", context("case-rb"))
            .await
            .unwrap();

        let store = controller.state_store("case-rb").unwrap();
        let before = store.history().unwrap().len();
        let new_version = store.rollback(1).unwrap();

        assert_eq!(store.get(None).unwrap(), store.get(Some(1)).unwrap());
        assert_eq!(store.history().unwrap().len(), before + 1);
        assert_eq!(new_version as usize, before + 1);
    }

    #[tokio::test]
    async fn test_worker_failures_degrade() {
        let registry = WorkerRegistry::new()
            .with(analysis("cam", "CPI at 0.87", 0.8))
            .with(FnWorker::new("risk", |_| anyhow::bail!("risk register offline")));
        let controller = Controller::new(sequential(), registry);

        let result = controller
            .run_pipeline("Explain the CPI variance", context("case-fail"))
            .await
            .unwrap();
        let outputs = &result.final_state.worker_outputs;

        // explain_variance dispatches cam, rca, risk; rca is not registered
        assert_eq!(outputs.len(), 3);
        assert!(outputs[&WorkerId::new("risk")].is_failed());
        assert!(outputs[&WorkerId::new("rca")].is_failed());
        assert!(!outputs[&WorkerId::new("cam")].is_failed());
        assert_eq!(result.final_state.status, PipelineStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_flags_timed_out_workers() {
        let registry = WorkerRegistry::new()
            .with(analysis("cam", "CPI improving to 0.92", 0.8))
            .with(analysis("risk", "CPI worsening, now 0.85", 0.8).with_delay(Duration::from_secs(10)));
        let config = CoordinatorConfig {
            pipeline_deadline_ms: Some(100),
            ..Default::default()
        };
        let sink = Arc::new(MemorySink::new());
        let controller = Controller::new(config, registry).with_sink(sink.clone());

        let result = controller
            .run_pipeline("Explain the CPI", context("case-deadline"))
            .await
            .unwrap();

        assert_eq!(result.timed_out_workers, vec![WorkerId::new("risk")]);
        assert!(result.final_state.contradictions.is_empty());
        assert_eq!(result.final_state.status, PipelineStatus::Complete);
        assert!(sink.kinds().contains(&PipelineEventKind::DeadlineExceeded));
        assert!(sink.kinds().contains(&PipelineEventKind::WorkerTimedOut));
    }

    #[tokio::test]
    async fn test_exhaustion_is_reported() {
        let registry = WorkerRegistry::new()
            .with(analysis("cam", "CPI improving to 0.92", 0.8))
            .with(analysis("risk", "CPI worsening, now 0.85", 0.8));
        let config = CoordinatorConfig {
            max_refinement_iterations: 2,
            sequential_fan_out: true,
            ..Default::default()
        };
        let controller =
            Controller::new(config, registry).with_resolver(Arc::new(FailingResolver));

        let result = controller
            .run_pipeline("Explain the CPI", context("case-exhaust"))
            .await
            .unwrap();

        assert!(result.is_exhausted());
        assert_eq!(result.final_state.iteration_count, 2);
        assert_eq!(result.unresolved_contradictions.len(), 1);
        let report = result.report.unwrap();
        assert_eq!(
            report.unresolved_contradictions,
            vec![result.unresolved_contradictions[0].id]
        );
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades() {
        let registry = WorkerRegistry::new().with(analysis("cam", "CPI at 0.87", 0.8));
        let controller = Controller::new(sequential(), registry)
            .with_synthesizer(Arc::new(FailingSynthesizer));

        let result = controller
            .run_pipeline("Explain the CPI", context("case-synth"))
            .await
            .unwrap();

        assert!(result.report.is_none());
        assert_eq!(result.synthesis_error.as_deref(), Some("report template missing"));
        assert_eq!(result.final_state.status, PipelineStatus::Complete);
    }

    #[tokio::test]
    async fn test_fallback_intent_runs_default_workers() {
        let registry = WorkerRegistry::new()
            .with(analysis("cam", "Nothing unusual", 0.6))
            .with(analysis("risk", "No new risks", 0.6));
        let controller = Controller::new(sequential(), registry);

        let result = controller
            .run_pipeline("Hello there", CaseContext::default())
            .await
            .unwrap();

        assert_eq!(result.final_state.intent.as_str(), "general_assessment");
        assert_eq!(result.final_state.intent_confidence, 0.0);
        assert_eq!(result.final_state.worker_outputs.len(), 2);
        assert!(!result.final_state.case_id.is_empty());
    }

    #[tokio::test]
    async fn test_events_and_trace() {
        let registry = WorkerRegistry::new()
            .with(analysis("cam", "CPI improving to 0.92", 0.8))
            .with(analysis("risk", "CPI worsening, now 0.85", 0.8));
        let memory = Arc::new(MemorySink::new());
        let metrics = Arc::new(MetricsSink::new());
        let sink = crate::swarm::events::CompositeSink::new()
            .with(memory.clone())
            .with(metrics.clone());
        let controller = Controller::new(sequential(), registry).with_sink(Arc::new(sink));

        let result = controller
            .run_pipeline("Explain the CPI", context("case-trace"))
            .await
            .unwrap();

        let kinds = memory.kinds();
        assert_eq!(kinds.first(), Some(&PipelineEventKind::PipelineStarted));
        assert_eq!(kinds.last(), Some(&PipelineEventKind::PipelineCompleted));
        assert_eq!(memory.events().len(), result.trace.events.len());
        let saves = kinds.iter().filter(|k| **k == PipelineEventKind::StateSaved).count();
        assert_eq!(saves as u64, result.final_version);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_completed, 1);
        assert_eq!(snapshot.contradictions_detected, 1);
        assert_eq!(snapshot.contradictions_resolved, 1);

        for phase in ["triage", "fan_out", "detection", "refinement"] {
            assert!(result.trace.spans.iter().any(|s| s.component == phase));
        }
        assert!(result.trace.span("cam", "invoke").is_some());
        let text = ExecutionReport::new(&result.trace).render();
        assert!(text.contains("[OK] cam / invoke"));
    }

    #[tokio::test]
    async fn test_runs_are_deterministic() {
        let build = || {
            Controller::new(
                sequential(),
                WorkerRegistry::new()
                    .with(analysis("cam", "CDR milestone slip estimated at 10 days", 0.9))
                    .with(analysis("risk", "CDR milestone slip estimated at 25 days", 0.4)),
            )
        };
        let first = build()
            .run_pipeline("Assess the slip", context("case-det"))
            .await
            .unwrap();
        let second = build()
            .run_pipeline("Assess the slip", context("case-det"))
            .await
            .unwrap();

        let strip = |result: &PipelineResult| {
            result
                .final_state
                .contradictions
                .iter()
                .map(|c| (c.id, c.rule, c.severity, c.resolution.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&first), strip(&second));
        assert_eq!(first.final_state.contradictions.len(), 2);
    }

    #[tokio::test]
    async fn test_outputs_unrelated_to_registration_order() {
        let registry = WorkerRegistry::new()
            .with(analysis("risk", "CPI worsening, now 0.85", 0.8))
            .with(analysis("cam", "CPI improving to 0.92", 0.8));
        let controller = Controller::new(CoordinatorConfig::default(), registry);
        let result = controller
            .run_pipeline("Explain the CPI", context("case-order"))
            .await
            .unwrap();

        let cam = &result.final_state.worker_outputs[&WorkerId::new("cam")];
        assert_eq!(cam.findings[0].content, "CPI improving to 0.92");
        assert_eq!(result.final_state.contradictions.len(), 1);
    }
}
