use super::Synthesizer;
use crate::state::{FindingKind, PipelineState, RefinementStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub lines: Vec<String>,
}

/// Output of the synthesis step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub case_id: String,
    pub title: String,
    pub sections: Vec<ReportSection>,
    /// Contradictions still open when the report was written
    pub unresolved_contradictions: Vec<Uuid>,
    pub generated_at: DateTime<Utc>,
}

impl FinalReport {
    pub fn section(&self, heading: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.heading == heading)
    }

    /// Render as Markdown
    pub fn render(&self) -> String {
        let mut out = format!("# {}\n", self.title);
        for section in &self.sections {
            out.push_str(&format!("\n## {}\n", section.heading));
            if section.lines.is_empty() {
                out.push_str("- (none)\n");
            }
            for line in &section.lines {
                out.push_str(&format!("- {}\n", line));
            }
        }
        out
    }
}

/// Leadership brief in What happened / Why / So what / Now what form
#[derive(Debug, Clone, Default)]
pub struct BriefSynthesizer;

impl BriefSynthesizer {
    fn lines_of_kind(state: &PipelineState, kinds: &[FindingKind]) -> Vec<String> {
        state
            .worker_outputs
            .values()
            .flat_map(|output| output.findings.iter())
            .filter(|f| kinds.contains(&f.kind))
            .map(|f| format!("[{}] {} ({:.0}%)", f.source, f.content, f.confidence * 100.0))
            .collect()
    }
}

#[async_trait]
impl Synthesizer for BriefSynthesizer {
    async fn synthesize(&self, state: &PipelineState) -> anyhow::Result<FinalReport> {
        let what = Self::lines_of_kind(state, &[FindingKind::Observation]);
        let why = Self::lines_of_kind(state, &[FindingKind::Analysis]);
        let mut now_what =
            Self::lines_of_kind(state, &[FindingKind::Recommendation, FindingKind::Action]);

        let mut so_what = Vec::new();
        for output in state.worker_outputs.values() {
            for error in &output.errors {
                so_what.push(format!("{} did not report: {}", output.worker, error));
            }
        }
        let resolved = state.contradictions.len() - state.unresolved_count();
        so_what.push(format!(
            "{} contradiction(s) detected, {} resolved after {} refinement iteration(s)",
            state.contradictions.len(),
            resolved,
            state.iteration_count
        ));
        if state.refinement_status == RefinementStatus::Exhausted {
            so_what.push("Refinement stopped before every conflict was reconciled".to_string());
        }

        for c in state.contradictions.iter().filter(|c| c.resolved) {
            if let Some(resolution) = &c.resolution {
                now_what.push(format!("Resolved ({}): {}", c.rule, resolution));
            }
        }

        let unresolved: Vec<Uuid> = state.unresolved().iter().map(|c| c.id).collect();
        for c in state.unresolved() {
            now_what.push(format!(
                "UNRESOLVED {} [{}]: {}",
                c.rule,
                c.severity.as_str(),
                c.description
            ));
        }

        Ok(FinalReport {
            case_id: state.case_id.clone(),
            title: format!("Program brief: {}", state.intent),
            sections: vec![
                ReportSection {
                    heading: "What happened".into(),
                    lines: what,
                },
                ReportSection {
                    heading: "Why it happened".into(),
                    lines: why,
                },
                ReportSection {
                    heading: "So what".into(),
                    lines: so_what,
                },
                ReportSection {
                    heading: "Now what".into(),
                    lines: now_what,
                },
            ],
            unresolved_contradictions: unresolved,
            generated_at: Utc::now(),
        })
    }
}
