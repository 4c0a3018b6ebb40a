//! # Pipeline Events
//!
//! Event types emitted during a run and the sinks that receive them.
//! Sinks are handed to the Controller explicitly; there is no global
//! collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of pipeline event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    PipelineStarted,
    /// Trigger classified into an intent
    IntentClassified,
    PhaseStarted,
    PhaseCompleted,
    WorkerCompleted,
    WorkerFailed,
    /// Worker abandoned at the deadline
    WorkerTimedOut,
    ContradictionsDetected,
    ContradictionResolved,
    /// Resolver failed or answered below the confidence floor
    ResolutionRejected,
    RefinementIteration,
    RefinementResolved,
    RefinementExhausted,
    DeadlineExceeded,
    StateSaved,
    SynthesisCompleted,
    SynthesisFailed,
    PipelineCompleted,
}

impl PipelineEventKind {
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            Self::WorkerFailed
                | Self::WorkerTimedOut
                | Self::ResolutionRejected
                | Self::RefinementExhausted
                | Self::DeadlineExceeded
                | Self::SynthesisFailed
        )
    }
}

/// An event in a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: String,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: PipelineEventKind,
    /// Component or worker that produced the event
    pub source: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: PipelineEventKind, trace_id: &str, source: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trace_id: trace_id.to_string(),
            timestamp: Utc::now(),
            kind,
            source: source.to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    fn field_u64(&self, key: &str) -> Option<u64> {
        self.data.as_ref()?.get(key)?.as_u64()
    }
}

/// Receives every event of every run of a Controller
pub trait ObservabilitySink: Send + Sync {
    fn record(&self, event: &PipelineEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record(&self, event: &PipelineEvent) {
        let data = event
            .data
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        if event.kind.is_problem() {
            tracing::warn!(
                trace_id = %event.trace_id,
                kind = ?event.kind,
                source = %event.source,
                %data,
                "pipeline event"
            );
        } else {
            tracing::info!(
                trace_id = %event.trace_id,
                kind = ?event.kind,
                source = %event.source,
                %data,
                "pipeline event"
            );
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<PipelineEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl ObservabilitySink for MemorySink {
    fn record(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Publishes events on a broadcast channel (e.g. for an SSE stream)
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new(tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl ObservabilitySink for ChannelSink {
    fn record(&self, event: &PipelineEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}

/// Count, sum and range of a stream of samples; the samples are not kept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Aggregated counters, one snapshot per sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub worker_durations_ms: BTreeMap<String, RunningStats>,
    pub worker_errors: BTreeMap<String, u64>,
    pub worker_timeouts: BTreeMap<String, u64>,
    pub finding_confidence: RunningStats,
    pub contradictions_detected: u64,
    pub contradictions_resolved: u64,
    pub refinement_iterations: u64,
}

impl MetricsSnapshot {
    pub fn mean_finding_confidence(&self) -> Option<f64> {
        self.finding_confidence.mean()
    }
}

/// Aggregates worker timings, error counts and contradiction counts
#[derive(Debug, Default)]
pub struct MetricsSink {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl ObservabilitySink for MetricsSink {
    fn record(&self, event: &PipelineEvent) {
        let Ok(mut metrics) = self.inner.lock() else {
            return;
        };
        let worker = event.source.clone();

        match event.kind {
            PipelineEventKind::PipelineStarted => metrics.runs_started += 1,
            PipelineEventKind::PipelineCompleted => metrics.runs_completed += 1,
            PipelineEventKind::WorkerCompleted => {
                if let Some(ms) = event.field_u64("duration_ms") {
                    metrics.worker_durations_ms.entry(worker).or_default().push(ms as f64);
                }
                if let Some(confidences) = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("finding_confidences"))
                    .and_then(|c| c.as_array())
                {
                    for confidence in confidences.iter().filter_map(|c| c.as_f64()) {
                        metrics.finding_confidence.push(confidence);
                    }
                }
            }
            PipelineEventKind::WorkerFailed => {
                *metrics.worker_errors.entry(worker).or_default() += 1;
            }
            PipelineEventKind::WorkerTimedOut => {
                *metrics.worker_timeouts.entry(worker).or_default() += 1;
            }
            PipelineEventKind::ContradictionsDetected => {
                metrics.contradictions_detected += event.field_u64("count").unwrap_or(0);
            }
            PipelineEventKind::ContradictionResolved => metrics.contradictions_resolved += 1,
            PipelineEventKind::RefinementIteration => metrics.refinement_iterations += 1,
            _ => {}
        }
    }
}

/// Sends each event to several sinks in order
#[derive(Clone, Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn ObservabilitySink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ObservabilitySink for CompositeSink {
    fn record(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
