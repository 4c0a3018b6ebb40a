//! # Execution Trace
//!
//! Per-run record of phase spans and events, and a plain-text report over it.

use super::events::{ObservabilitySink, PipelineEvent, PipelineEventKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Running,
    Ok,
    Error,
    Timeout,
}

impl SpanStatus {
    fn marker(&self) -> &'static str {
        match self {
            SpanStatus::Running => "[RUNNING]",
            SpanStatus::Ok => "[OK]",
            SpanStatus::Error => "[ERROR]",
            SpanStatus::Timeout => "[TIMEOUT]",
        }
    }
}

/// Handle to an open span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanId(usize);

/// One timed unit of work: a phase, or a worker inside the fan-out phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: usize,
    #[serde(default)]
    pub parent: Option<usize>,
    pub component: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    pub status: SpanStatus,
}

/// Everything observed during one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub trace_id: String,
    pub case_id: String,
    #[serde(default)]
    pub intent: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    pub spans: Vec<Span>,
    pub events: Vec<PipelineEvent>,
}

impl ExecutionTrace {
    pub fn events_of(&self, kind: PipelineEventKind) -> Vec<&PipelineEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn span(&self, component: &str, operation: &str) -> Option<&Span> {
        self.spans
            .iter()
            .find(|s| s.component == component && s.operation == operation)
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Builds the trace of one run and forwards every event to the sink
pub struct Tracer {
    sink: Arc<dyn ObservabilitySink>,
    trace: ExecutionTrace,
    started: Instant,
    open: Vec<(SpanId, Instant)>,
}

impl Tracer {
    pub fn start(sink: Arc<dyn ObservabilitySink>, case_id: &str) -> Self {
        Self {
            sink,
            trace: ExecutionTrace {
                trace_id: Uuid::new_v4().to_string(),
                case_id: case_id.to_string(),
                intent: None,
                started_at: Utc::now(),
                ended_at: None,
                duration_ms: None,
                spans: Vec::new(),
                events: Vec::new(),
            },
            started: Instant::now(),
            open: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace.trace_id
    }

    pub fn set_intent(&mut self, intent: &str) {
        self.trace.intent = Some(intent.to_string());
    }

    pub fn emit(&mut self, kind: PipelineEventKind, source: &str, data: Option<serde_json::Value>) {
        let mut event = PipelineEvent::new(kind, &self.trace.trace_id, source);
        event.data = data;
        self.sink.record(&event);
        self.trace.events.push(event);
    }

    /// Open a phase span and emit `PhaseStarted`
    pub fn start_span(&mut self, component: &str, operation: &str) -> SpanId {
        let id = SpanId(self.trace.spans.len());
        self.trace.spans.push(Span {
            id: id.0,
            parent: None,
            component: component.to_string(),
            operation: operation.to_string(),
            started_at: Utc::now(),
            duration_ms: None,
            status: SpanStatus::Running,
        });
        self.open.push((id, Instant::now()));
        self.emit(
            PipelineEventKind::PhaseStarted,
            component,
            Some(serde_json::json!({ "operation": operation })),
        );
        id
    }

    /// Close a span and emit `PhaseCompleted`
    pub fn end_span(&mut self, id: SpanId, status: SpanStatus) {
        let Some(position) = self.open.iter().position(|(open, _)| *open == id) else {
            return;
        };
        let (_, started) = self.open.remove(position);
        let duration = elapsed_ms(started);

        let Some(span) = self.trace.spans.get_mut(id.0) else {
            return;
        };
        span.duration_ms = Some(duration);
        span.status = status;
        let (component, operation) = (span.component.clone(), span.operation.clone());

        self.emit(
            PipelineEventKind::PhaseCompleted,
            &component,
            Some(serde_json::json!({
                "operation": operation,
                "duration_ms": duration,
                "status": status,
            })),
        );
    }

    /// Record an already-finished child span (e.g. one worker of the fan-out)
    pub fn record_span(
        &mut self,
        parent: SpanId,
        component: &str,
        operation: &str,
        duration_ms: f64,
        status: SpanStatus,
    ) {
        let id = self.trace.spans.len();
        self.trace.spans.push(Span {
            id,
            parent: Some(parent.0),
            component: component.to_string(),
            operation: operation.to_string(),
            started_at: Utc::now(),
            duration_ms: Some(duration_ms),
            status,
        });
    }

    pub fn finish(mut self) -> ExecutionTrace {
        let open: Vec<SpanId> = self.open.iter().map(|(id, _)| *id).collect();
        for id in open {
            self.end_span(id, SpanStatus::Error);
        }
        self.trace.ended_at = Some(Utc::now());
        self.trace.duration_ms = Some(elapsed_ms(self.started));
        self.trace
    }
}

/// Plain-text summary of an [`ExecutionTrace`]
pub struct ExecutionReport<'a> {
    trace: &'a ExecutionTrace,
}

impl<'a> ExecutionReport<'a> {
    pub fn new(trace: &'a ExecutionTrace) -> Self {
        Self { trace }
    }

    pub fn render(&self) -> String {
        let t = self.trace;
        let rule = "=".repeat(72);
        let mut lines = vec![
            rule.clone(),
            "EXECUTION REPORT".to_string(),
            rule.clone(),
            format!("  Trace ID  : {}", t.trace_id),
            format!("  Case ID   : {}", t.case_id),
            format!("  Intent    : {}", t.intent.as_deref().unwrap_or("N/A")),
            format!("  Started   : {}", t.started_at.to_rfc3339()),
            format!(
                "  Ended     : {}",
                t.ended_at
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_else(|| "N/A".to_string())
            ),
        ];
        if let Some(duration) = t.duration_ms {
            lines.push(format!("  Duration  : {:.1} ms", duration));
        }
        lines.push("-".repeat(72));

        if t.spans.is_empty() {
            lines.push("  (no spans recorded)".to_string());
        } else {
            lines.push("  SPANS:".to_string());
            for span in t.spans.iter().filter(|s| s.parent.is_none()) {
                self.render_span(span, 1, &mut lines);
            }
        }

        let components: BTreeSet<&str> = t.spans.iter().map(|s| s.component.as_str()).collect();
        let ok = t.spans.iter().filter(|s| s.status == SpanStatus::Ok).count();
        let failed = t
            .spans
            .iter()
            .filter(|s| matches!(s.status, SpanStatus::Error | SpanStatus::Timeout))
            .count();
        let durations: Vec<f64> = t.spans.iter().filter_map(|s| s.duration_ms).collect();

        lines.push(rule.clone());
        lines.push("  SUMMARY".to_string());
        lines.push(format!("    Total spans : {}", t.spans.len()));
        lines.push(format!(
            "    Components  : {}",
            components.into_iter().collect::<Vec<_>>().join(", ")
        ));
        lines.push(format!("    OK spans    : {}", ok));
        lines.push(format!("    Error spans : {}", failed));
        lines.push(format!("    Events      : {}", t.events.len()));
        if let (Some(min), Some(max)) = (
            durations.iter().copied().reduce(f64::min),
            durations.iter().copied().reduce(f64::max),
        ) {
            lines.push(format!("    Fastest span: {:.1} ms", min));
            lines.push(format!("    Slowest span: {:.1} ms", max));
        }
        lines.push(rule);

        lines.join("\n")
    }

    fn render_span(&self, span: &Span, depth: usize, lines: &mut Vec<String>) {
        let duration = span
            .duration_ms
            .map(|d| format!("{:.1} ms", d))
            .unwrap_or_else(|| "running".to_string());
        lines.push(format!(
            "{}{} {} / {}  ({})",
            "  ".repeat(depth + 1),
            span.status.marker(),
            span.component,
            span.operation,
            duration
        ));
        for child in self.trace.spans.iter().filter(|s| s.parent == Some(span.id)) {
            self.render_span(child, depth + 1, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::events::MemorySink;

    #[test]
    fn test_spans_and_events_are_recorded() {
        let sink = Arc::new(MemorySink::new());
        let mut tracer = Tracer::start(sink.clone(), "case-1");
        tracer.set_intent("explain_variance");

        let fan_out = tracer.start_span("fan_out", "run");
        tracer.record_span(fan_out, "cam", "invoke", 12.0, SpanStatus::Ok);
        tracer.record_span(fan_out, "risk", "invoke", 40.0, SpanStatus::Timeout);
        tracer.end_span(fan_out, SpanStatus::Ok);

        let trace = tracer.finish();
        assert_eq!(trace.spans.len(), 3);
        assert_eq!(trace.spans[1].parent, Some(0));
        assert!(trace.duration_ms.is_some());
        assert_eq!(
            sink.kinds(),
            vec![PipelineEventKind::PhaseStarted, PipelineEventKind::PhaseCompleted]
        );
        assert!(trace.events.iter().all(|e| e.trace_id == trace.trace_id));
    }

    #[test]
    fn test_unclosed_spans_end_as_errors() {
        let mut tracer = Tracer::start(Arc::new(MemorySink::new()), "case-1");
        tracer.start_span("refinement", "refine");
        let trace = tracer.finish();
        assert_eq!(trace.spans[0].status, SpanStatus::Error);
    }

    #[test]
    fn test_report_render() {
        let mut tracer = Tracer::start(Arc::new(MemorySink::new()), "case-7");
        tracer.set_intent("schedule_analysis");
        let fan_out = tracer.start_span("fan_out", "run");
        tracer.record_span(fan_out, "cam", "invoke", 5.0, SpanStatus::Ok);
        tracer.record_span(fan_out, "risk", "invoke", 9.0, SpanStatus::Error);
        tracer.end_span(fan_out, SpanStatus::Ok);
        let trace = tracer.finish();

        let text = ExecutionReport::new(&trace).render();
        assert!(text.contains("EXECUTION REPORT"));
        assert!(text.contains("Intent    : schedule_analysis"));
        assert!(text.contains("[ERROR] risk / invoke  (9.0 ms)"));
        assert!(text.contains("Total spans : 3"));
        assert!(text.contains("Error spans : 1"));
        assert!(text.contains("Fastest span"));
    }

    #[test]
    fn test_empty_report() {
        let trace = Tracer::start(Arc::new(MemorySink::new()), "case-0").finish();
        let text = ExecutionReport::new(&trace).render();
        assert!(text.contains("(no spans recorded)"));
    }
}
