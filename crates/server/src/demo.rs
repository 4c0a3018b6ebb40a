//! # Scripted Workers
//!
//! Stand-ins for the domain workers so the engine can be exercised from the
//! CLI and the HTTP API. Each worker reads its script from the case facts:
//!
//! ```json
//! {
//!   "workers": {
//!     "cam":  { "findings": [{ "kind": "analysis", "content": "CPI improving to 0.92", "confidence": 0.8 }] },
//!     "risk": { "findings": [{ "kind": "analysis", "content": "CPI worsening, now 0.85" }], "delay_ms": 200 },
//!     "rca":  { "error": "cost ledger unavailable" }
//!   }
//! }
//! ```
//!
//! A worker without a script reports one low-confidence observation.

use anyhow::Context;
use async_trait::async_trait;
use concord_core::state::{Case, Finding, FindingKind, WorkerId, WorkerOutput};
use concord_core::workers::{Worker, WorkerRegistry};
use serde::Deserialize;
use std::time::Duration;

/// Worker ids the default intent table dispatches
pub const DEMO_WORKERS: [&str; 5] = ["cam", "rca", "risk", "contracts", "supplier_quality"];

#[derive(Debug, Deserialize)]
struct ScriptedFinding {
    #[serde(default = "default_kind")]
    kind: FindingKind,
    content: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    evidence: Vec<String>,
}

fn default_kind() -> FindingKind {
    FindingKind::Analysis
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Script {
    findings: Vec<ScriptedFinding>,
    confidence: Option<f64>,
    delay_ms: u64,
    error: Option<String>,
}

pub struct ScriptedWorker {
    id: WorkerId,
}

impl ScriptedWorker {
    pub fn new(id: impl Into<WorkerId>) -> Self {
        Self { id: id.into() }
    }

    fn unscripted(&self, case: &Case) -> WorkerOutput {
        let program = if case.program_name.is_empty() {
            "the program"
        } else {
            case.program_name.as_str()
        };
        let finding = Finding::new(
            self.id.clone(),
            FindingKind::Observation,
            format!("{} has no data for {}", self.id, program),
        )
        .with_confidence(0.3);
        WorkerOutput::new(self.id.clone(), vec![finding], 0.3)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> WorkerId {
        self.id.clone()
    }

    async fn invoke(&self, case: &Case) -> anyhow::Result<WorkerOutput> {
        let pointer = format!("/workers/{}", self.id);
        let Some(raw) = case.fact(&pointer) else {
            return Ok(self.unscripted(case));
        };
        let script: Script = serde_json::from_value(raw.clone())
            .with_context(|| format!("Invalid script for worker `{}`", self.id))?;

        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }
        if let Some(error) = script.error {
            anyhow::bail!(error);
        }

        let findings: Vec<Finding> = script
            .findings
            .into_iter()
            .map(|f| {
                f.evidence.into_iter().fold(
                    Finding::new(self.id.clone(), f.kind, f.content).with_confidence(f.confidence),
                    |finding, evidence| finding.with_evidence(evidence),
                )
            })
            .collect();

        let confidence = script.confidence.unwrap_or_else(|| {
            if findings.is_empty() {
                0.0
            } else {
                findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64
            }
        });

        Ok(WorkerOutput::new(self.id.clone(), findings, confidence))
    }
}

/// Registry with a scripted worker for every id in [`DEMO_WORKERS`]
pub fn demo_registry() -> WorkerRegistry {
    DEMO_WORKERS
        .iter()
        .fold(WorkerRegistry::new(), |registry, id| {
            registry.with(ScriptedWorker::new(*id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::state::CaseContext;
    use serde_json::json;

    fn case(facts: serde_json::Value) -> Case {
        Case::new(
            "Explain the CPI",
            CaseContext {
                program_name: "Wing Program".into(),
                facts,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_scripted_findings() {
        let case = case(json!({
            "workers": { "cam": { "findings": [
                { "kind": "recommendation", "content": "Accelerate the test campaign", "confidence": 0.9, "evidence": ["IMS-42"] },
                { "content": "CPI at 0.87" }
            ]}}
        }));

        let output = ScriptedWorker::new("cam").invoke(&case).await.unwrap();
        assert_eq!(output.findings.len(), 2);
        assert_eq!(output.findings[0].kind, FindingKind::Recommendation);
        assert_eq!(output.findings[0].evidence_refs, vec!["IMS-42".to_string()]);
        assert_eq!(output.findings[1].kind, FindingKind::Analysis);
        assert!((output.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let case = case(json!({ "workers": { "rca": { "error": "cost ledger unavailable" } } }));
        let err = ScriptedWorker::new("rca").invoke(&case).await.unwrap_err();
        assert_eq!(err.to_string(), "cost ledger unavailable");
    }

    #[tokio::test]
    async fn test_unscripted_worker_observes() {
        let output = ScriptedWorker::new("risk").invoke(&case(json!({}))).await.unwrap();
        assert_eq!(output.findings.len(), 1);
        assert!(output.findings[0].content.contains("Wing Program"));
    }

    #[test]
    fn test_demo_registry_covers_default_workers() {
        let registry = demo_registry();
        for id in DEMO_WORKERS {
            assert!(registry.contains(&WorkerId::new(id)));
        }
        assert!(!registry.contains(&WorkerId::new("pm")));
    }
}
