//! # Contradiction Detection
//!
//! Compares the findings of every pair of workers with a fixed rule set.
//!
//! ## Flow
//!
//! 1. Every rule runs over every finding pair of every unordered worker pair
//!    (workers in ascending id order, so the result does not depend on
//!    insertion order).
//! 2. [`ContradictionDetector::classify_severity`] escalates contradictions
//!    that pile up on one finding pair or one worker pair.
//! 3. [`ContradictionDetector::suggest_resolution`] attaches rule-specific
//!    guidance.

pub mod rules;
pub mod text;
pub mod vocabulary;

use crate::models::DetectorConfig;
use crate::state::{
    Contradiction, Finding, FindingRef, RuleName, Severity, WorkerId, WorkerOutput,
};
use rules::Candidate;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub use rules::RuleHit;
pub use vocabulary::Vocabulary;

/// Namespace for deterministic contradiction ids
const CONTRADICTION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8b3d_4e59_9a71_0c5d_3e2f_8a14);

/// Same rule on the same finding pair always yields the same id
pub fn contradiction_id(rule: RuleName, a: &FindingRef, b: &FindingRef) -> Uuid {
    let key = format!(
        "{}|{}#{}|{}#{}",
        rule, a.worker, a.index, b.worker, b.index
    );
    Uuid::new_v5(&CONTRADICTION_NAMESPACE, key.as_bytes())
}

/// Pure detector over a set of worker outputs
#[derive(Debug, Clone, Default)]
pub struct ContradictionDetector {
    config: DetectorConfig,
}

impl ContradictionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run every rule over every cross-worker finding pair.
    ///
    /// Outputs without findings (failed or timed-out workers) take no part.
    pub fn detect(&self, outputs: &BTreeMap<WorkerId, WorkerOutput>) -> Vec<Contradiction> {
        let prepared: Vec<Vec<Candidate<'_>>> = outputs
            .iter()
            .filter(|(_, output)| !output.findings.is_empty())
            .map(|(worker, output)| {
                output
                    .findings
                    .iter()
                    .enumerate()
                    .map(|(index, finding)| {
                        Candidate::new(
                            FindingRef {
                                worker: worker.clone(),
                                index,
                            },
                            finding,
                        )
                    })
                    .collect()
            })
            .collect();

        let mut contradictions = Vec::new();

        for (i, left) in prepared.iter().enumerate() {
            for right in &prepared[i + 1..] {
                for a in left {
                    for b in right {
                        for rule in RuleName::all() {
                            if let Some(hit) = rules::evaluate(rule, a, b, &self.config) {
                                contradictions.push(self.record(hit, a, b));
                            }
                        }
                    }
                }
            }
        }

        self.classify_severity(&mut contradictions, outputs);

        tracing::debug!(
            workers = prepared.len(),
            contradictions = contradictions.len(),
            "Contradiction detection complete"
        );

        contradictions
    }

    fn record(&self, hit: RuleHit, a: &Candidate<'_>, b: &Candidate<'_>) -> Contradiction {
        let mut contradiction = Contradiction {
            id: contradiction_id(hit.rule, &a.reference, &b.reference),
            finding_a: a.reference.clone(),
            finding_b: b.reference.clone(),
            rule: hit.rule,
            description: hit.description,
            severity: hit.severity,
            guidance: String::new(),
            resolution: None,
            resolution_confidence: None,
            resolved: false,
            resolved_in_iteration: None,
        };
        contradiction.guidance = self.suggest_resolution(&contradiction, a.finding, b.finding);
        contradiction
    }

    /// Escalate one level (never down) when several rules fire on the same
    /// finding pair, when one worker pair accumulates too many
    /// contradictions, or when a low-severity conflict is between two
    /// prescriptive findings.
    pub fn classify_severity(
        &self,
        contradictions: &mut [Contradiction],
        outputs: &BTreeMap<WorkerId, WorkerOutput>,
    ) {
        let mut per_findings: HashMap<(FindingRef, FindingRef), usize> = HashMap::new();
        let mut per_workers: HashMap<(WorkerId, WorkerId), usize> = HashMap::new();

        for c in contradictions.iter() {
            *per_findings.entry(finding_pair(c)).or_default() += 1;
            *per_workers.entry(worker_pair(c)).or_default() += 1;
        }

        let lookup = |reference: &FindingRef| {
            outputs
                .get(&reference.worker)
                .and_then(|output| output.findings.get(reference.index))
        };

        for c in contradictions.iter_mut() {
            let stacked = per_findings.get(&finding_pair(c)).copied().unwrap_or(0) >= 2;
            let crowded = per_workers.get(&worker_pair(c)).copied().unwrap_or(0)
                >= self.config.worker_pair_escalation_count;
            let prescriptive_low = c.severity == Severity::Low
                && matches!(
                    (lookup(&c.finding_a), lookup(&c.finding_b)),
                    (Some(a), Some(b)) if a.kind.is_prescriptive() && b.kind.is_prescriptive()
                );

            if stacked || crowded || prescriptive_low {
                let escalated = c.severity.escalate();
                if escalated != c.severity {
                    tracing::debug!(
                        id = %c.id,
                        rule = %c.rule,
                        from = c.severity.as_str(),
                        to = escalated.as_str(),
                        "Escalating contradiction severity"
                    );
                }
                c.severity = escalated;
            }
        }
    }

    /// Rule-specific guidance for resolving a contradiction
    pub fn suggest_resolution(&self, contradiction: &Contradiction, a: &Finding, b: &Finding) -> String {
        let worker_a = &contradiction.finding_a.worker;
        let worker_b = &contradiction.finding_b.worker;

        match contradiction.rule {
            RuleName::DirectionalMetricDisagreement => format!(
                "Recompute the metric from the latest reporting-period data and confirm which \
                 baseline {} and {} each used before stating a trend.",
                worker_a, worker_b
            ),
            RuleName::SeverityLevelDisagreement => {
                "Rate the item against the program risk matrix; keep the higher rating until \
                 evidence supports lowering it."
                    .to_string()
            }
            RuleName::DurationEstimateDivergence | RuleName::CostEstimateDivergence => {
                if (a.confidence - b.confidence).abs() < f64::EPSILON {
                    format!(
                        "{} and {} report equal confidence ({:.0}%); request each basis of \
                         estimate before choosing a figure.",
                        worker_a,
                        worker_b,
                        a.confidence * 100.0
                    )
                } else {
                    let (preferred, confidence) = if a.confidence > b.confidence {
                        (worker_a, a.confidence)
                    } else {
                        (worker_b, b.confidence)
                    };
                    format!(
                        "Use the estimate from {}, which reports the higher confidence ({:.0}%).",
                        preferred,
                        confidence * 100.0
                    )
                }
            }
            RuleName::RootCauseDisagreement => format!(
                "Hold a joint root-cause review with the evidence from {} and {} before \
                 committing corrective action.",
                worker_a, worker_b
            ),
            RuleName::ActionConflict => format!(
                "Escalate to the program manager for adjudication: {} and {} recommend mutually \
                 exclusive actions.",
                worker_a, worker_b
            ),
            RuleName::ConfidenceDisparity => {
                let (high, low) = if a.confidence >= b.confidence {
                    (worker_a, worker_b)
                } else {
                    (worker_b, worker_a)
                };
                format!(
                    "Weight toward {}; ask {} what evidence would raise its confidence.",
                    high, low
                )
            }
        }
    }
}

fn finding_pair(c: &Contradiction) -> (FindingRef, FindingRef) {
    (c.finding_a.clone(), c.finding_b.clone())
}

fn worker_pair(c: &Contradiction) -> (WorkerId, WorkerId) {
    (c.finding_a.worker.clone(), c.finding_b.worker.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FindingKind;

    fn output(worker: &str, findings: &[(FindingKind, &str, f64)]) -> WorkerOutput {
        WorkerOutput::new(
            worker,
            findings
                .iter()
                .map(|(kind, content, confidence)| {
                    Finding::new(worker, *kind, *content).with_confidence(*confidence)
                })
                .collect(),
            0.8,
        )
    }

    fn outputs(list: Vec<WorkerOutput>) -> BTreeMap<WorkerId, WorkerOutput> {
        list.into_iter().map(|o| (o.worker.clone(), o)).collect()
    }

    #[test]
    fn test_directional_example() {
        let detector = ContradictionDetector::default();
        let found = detector.detect(&outputs(vec![
            output("cam", &[(FindingKind::Analysis, "CPI improving to 0.92", 0.8)]),
            output("risk", &[(FindingKind::Analysis, "CPI worsening, now 0.85", 0.8)]),
        ]));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule, RuleName::DirectionalMetricDisagreement);
        assert_eq!(found[0].severity, Severity::Medium);
        assert_ne!(found[0].finding_a.worker, found[0].finding_b.worker);
        assert!(!found[0].resolved);
        assert!(!found[0].guidance.is_empty());
    }

    #[test]
    fn test_detection_is_symmetric() {
        let x = (FindingKind::Analysis, "CDR milestone slip estimated at 10 days", 0.9);
        let y = (FindingKind::Analysis, "CDR milestone slip estimated at 25 days", 0.4);
        let detector = ContradictionDetector::default();

        let forward = detector.detect(&outputs(vec![output("alpha", &[x]), output("beta", &[y])]));
        let backward = detector.detect(&outputs(vec![output("alpha", &[y]), output("beta", &[x])]));

        let signature = |found: &[Contradiction], outs: &BTreeMap<WorkerId, WorkerOutput>| {
            let mut sig: Vec<(RuleName, Severity, Vec<String>)> = found
                .iter()
                .map(|c| {
                    let mut pair = vec![
                        outs[&c.finding_a.worker].findings[c.finding_a.index].content.clone(),
                        outs[&c.finding_b.worker].findings[c.finding_b.index].content.clone(),
                    ];
                    pair.sort();
                    (c.rule, c.severity, pair)
                })
                .collect();
            sig.sort_by(|l, r| format!("{:?}", l).cmp(&format!("{:?}", r)));
            sig
        };

        let forward_outs = outputs(vec![output("alpha", &[x]), output("beta", &[y])]);
        let backward_outs = outputs(vec![output("alpha", &[y]), output("beta", &[x])]);
        assert_eq!(forward.len(), 2);
        assert_eq!(
            signature(&forward, &forward_outs),
            signature(&backward, &backward_outs)
        );
    }

    #[test]
    fn test_ids_are_deterministic() {
        let detector = ContradictionDetector::default();
        let input = outputs(vec![
            output("cam", &[(FindingKind::Analysis, "CPI improving to 0.92", 0.8)]),
            output("risk", &[(FindingKind::Analysis, "CPI worsening, now 0.85", 0.8)]),
        ]);
        let first = detector.detect(&input);
        let second = detector.detect(&input);
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn test_failed_workers_are_skipped() {
        let detector = ContradictionDetector::default();
        let found = detector.detect(&outputs(vec![
            output("cam", &[(FindingKind::Analysis, "CPI improving to 0.92", 0.8)]),
            WorkerOutput::failed("risk", "boom"),
        ]));
        assert!(found.is_empty());
    }

    #[test]
    fn test_stacked_rules_escalate_once() {
        // Duration divergence plus confidence disparity on the same pair
        let detector = ContradictionDetector::default();
        let found = detector.detect(&outputs(vec![
            output("cam", &[(FindingKind::Analysis, "CDR milestone slip estimated at 10 days", 0.9)]),
            output("risk", &[(FindingKind::Analysis, "CDR milestone slip estimated at 25 days", 0.4)]),
        ]));

        assert_eq!(found.len(), 2);
        let disparity = found
            .iter()
            .find(|c| c.rule == RuleName::ConfidenceDisparity)
            .unwrap();
        assert_eq!(disparity.severity, Severity::High);
        let duration = found
            .iter()
            .find(|c| c.rule == RuleName::DurationEstimateDivergence)
            .unwrap();
        assert_eq!(duration.severity, Severity::High);
    }

    #[test]
    fn test_crowded_worker_pair_escalates() {
        let config = DetectorConfig {
            worker_pair_escalation_count: 2,
            ..Default::default()
        };
        let detector = ContradictionDetector::new(config);
        let found = detector.detect(&outputs(vec![
            output(
                "cam",
                &[
                    (FindingKind::Analysis, "CPI improving to 0.92", 0.8),
                    (FindingKind::Analysis, "SPI improving to 0.97", 0.8),
                ],
            ),
            output(
                "risk",
                &[
                    (FindingKind::Analysis, "CPI worsening, now 0.85", 0.8),
                    (FindingKind::Analysis, "SPI declining, now 0.90", 0.8),
                ],
            ),
        ]));

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.severity == Severity::High));
    }

    #[test]
    fn test_low_prescriptive_conflict_escalates() {
        let detector = ContradictionDetector::default();
        let mut list = vec![Contradiction {
            id: Uuid::nil(),
            finding_a: FindingRef { worker: "cam".into(), index: 0 },
            finding_b: FindingRef { worker: "risk".into(), index: 0 },
            rule: RuleName::SeverityLevelDisagreement,
            description: String::new(),
            severity: Severity::Low,
            guidance: String::new(),
            resolution: None,
            resolution_confidence: None,
            resolved: false,
            resolved_in_iteration: None,
        }];
        let outs = outputs(vec![
            output("cam", &[(FindingKind::Recommendation, "Hold the baseline", 0.8)]),
            output("risk", &[(FindingKind::Action, "Open a risk", 0.8)]),
        ]);

        detector.classify_severity(&mut list, &outs);
        assert_eq!(list[0].severity, Severity::Medium);
    }

    #[test]
    fn test_quantitative_guidance_prefers_confident_worker() {
        let detector = ContradictionDetector::default();
        let found = detector.detect(&outputs(vec![
            output("cam", &[(FindingKind::Analysis, "CDR milestone slip estimated at 10 days", 0.8)]),
            output("risk", &[(FindingKind::Analysis, "CDR milestone slip estimated at 25 days", 0.6)]),
        ]));
        assert_eq!(found.len(), 1);
        assert!(found[0].guidance.contains("Use the estimate from cam"));

        let tied = detector.detect(&outputs(vec![
            output("cam", &[(FindingKind::Analysis, "CDR milestone slip estimated at 10 days", 0.8)]),
            output("risk", &[(FindingKind::Analysis, "CDR milestone slip estimated at 25 days", 0.8)]),
        ]));
        assert!(tied[0].guidance.contains("equal confidence"));
    }

    #[test]
    fn test_action_conflict_guidance_escalates_to_pm() {
        let detector = ContradictionDetector::default();
        let found = detector.detect(&outputs(vec![
            output("cam", &[(FindingKind::Recommendation, "Accelerate the CDR milestone", 0.8)]),
            output("risk", &[(FindingKind::Recommendation, "Defer the CDR milestone", 0.8)]),
        ]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule, RuleName::ActionConflict);
        assert!(found[0].guidance.contains("program manager"));
    }
}
