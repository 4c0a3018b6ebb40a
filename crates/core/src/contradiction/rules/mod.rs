//! # Detection Rules
//!
//! Each rule compares two findings from different workers and either
//! reports a conflict or stays silent. Rules are symmetric: swapping the two
//! arguments never changes whether a rule fires or the severity it assigns.

mod action;
mod confidence;
mod cost;
mod directional;
mod duration;
mod root_cause;
mod severity_level;

use super::text::AnalyzedText;
use crate::models::DetectorConfig;
use crate::state::{Finding, FindingRef, RuleName, Severity};

/// A finding prepared for comparison
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub reference: FindingRef,
    pub finding: &'a Finding,
    pub text: AnalyzedText,
}

impl<'a> Candidate<'a> {
    pub fn new(reference: FindingRef, finding: &'a Finding) -> Self {
        Self {
            text: AnalyzedText::new(&finding.content),
            reference,
            finding,
        }
    }

    pub fn worker(&self) -> &str {
        self.reference.worker.as_str()
    }
}

/// What a rule reports when it fires
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub rule: RuleName,
    pub severity: Severity,
    pub description: String,
}

impl RuleHit {
    fn new(rule: RuleName, severity: Severity, description: String) -> Self {
        Self {
            rule,
            severity,
            description,
        }
    }
}

/// Values within this distance of a threshold count as sitting on it
const THRESHOLD_TOLERANCE: f64 = 1e-9;

/// Strictly above `threshold`, ignoring float drift from decimal inputs
fn exceeds(value: f64, threshold: f64) -> bool {
    value > threshold + THRESHOLD_TOLERANCE
}

/// Run one rule over a pair of findings
pub fn evaluate(
    rule: RuleName,
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    match rule {
        RuleName::DirectionalMetricDisagreement => directional::check(a, b, config),
        RuleName::SeverityLevelDisagreement => severity_level::check(a, b, config),
        RuleName::DurationEstimateDivergence => duration::check(a, b, config),
        RuleName::CostEstimateDivergence => cost::check(a, b, config),
        RuleName::RootCauseDisagreement => root_cause::check(a, b, config),
        RuleName::ActionConflict => action::check(a, b, config),
        RuleName::ConfidenceDisparity => confidence::check(a, b, config),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::state::{FindingKind, WorkerId};

    pub fn finding(worker: &str, kind: FindingKind, content: &str, confidence: f64) -> Finding {
        Finding::new(worker, kind, content).with_confidence(confidence)
    }

    pub fn candidate<'a>(finding: &'a Finding) -> Candidate<'a> {
        Candidate::new(
            FindingRef {
                worker: WorkerId::new(finding.source.as_str()),
                index: 0,
            },
            finding,
        )
    }

    /// Evaluate in both argument orders and insist they agree
    pub fn check_both(rule: RuleName, a: &Finding, b: &Finding) -> Option<RuleHit> {
        check_both_with(rule, a, b, &DetectorConfig::default())
    }

    pub fn check_both_with(
        rule: RuleName,
        a: &Finding,
        b: &Finding,
        config: &DetectorConfig,
    ) -> Option<RuleHit> {
        let (ca, cb) = (candidate(a), candidate(b));
        let forward = evaluate(rule, &ca, &cb, config);
        let backward = evaluate(rule, &cb, &ca, config);
        assert_eq!(
            forward.as_ref().map(|h| h.severity),
            backward.as_ref().map(|h| h.severity),
            "rule {} is not symmetric",
            rule
        );
        forward
    }
}
