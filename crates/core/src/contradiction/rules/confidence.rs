use super::{exceeds, Candidate, RuleHit};
use crate::contradiction::text::shared_count;
use crate::models::DetectorConfig;
use crate::state::{RuleName, Severity};

pub(super) fn check(
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    if a.finding.kind != b.finding.kind {
        return None;
    }

    let gap = (a.finding.confidence - b.finding.confidence).abs();
    if !exceeds(gap, config.confidence_gap) {
        return None;
    }

    let stopwords = &config.vocabulary.stopwords;
    let shared = shared_count(
        &a.text.subject_tokens(stopwords, &[]),
        &b.text.subject_tokens(stopwords, &[]),
    );
    if shared < config.confidence_min_shared_tokens {
        return None;
    }

    let severity = if exceeds(gap, config.confidence_high_gap) {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(RuleHit::new(
        RuleName::ConfidenceDisparity,
        severity,
        format!(
            "{} is {:.0}% confident while {} is {:.0}% confident in a similar {}",
            a.worker(),
            a.finding.confidence * 100.0,
            b.worker(),
            b.finding.confidence * 100.0,
            a.finding.kind.as_str()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{check_both, finding};
    use crate::state::{FindingKind, RuleName, Severity};

    const RULE: RuleName = RuleName::ConfidenceDisparity;
    const TEXT: &str = "Composite wing skin supplier will recover delivery schedule";

    #[test]
    fn test_gap_bands() {
        let a = finding("supplier_quality", FindingKind::Analysis, TEXT, 0.9);

        let medium = finding("risk", FindingKind::Analysis, TEXT, 0.5);
        assert_eq!(check_both(RULE, &a, &medium).unwrap().severity, Severity::Medium);

        let high = finding("risk", FindingKind::Analysis, TEXT, 0.2);
        assert_eq!(check_both(RULE, &a, &high).unwrap().severity, Severity::High);

        let close = finding("risk", FindingKind::Analysis, TEXT, 0.75);
        assert!(check_both(RULE, &a, &close).is_none());
    }

    #[test]
    fn test_gap_on_threshold_is_not_above_it() {
        let a = finding("supplier_quality", FindingKind::Analysis, TEXT, 0.8);
        let b = finding("risk", FindingKind::Analysis, TEXT, 0.5);
        assert!(check_both(RULE, &a, &b).is_none());

        let a = finding("supplier_quality", FindingKind::Analysis, TEXT, 0.9);
        let b = finding("risk", FindingKind::Analysis, TEXT, 0.3);
        assert_eq!(check_both(RULE, &a, &b).unwrap().severity, Severity::Medium);
    }

    #[test]
    fn test_kinds_must_match() {
        let a = finding("supplier_quality", FindingKind::Analysis, TEXT, 0.9);
        let b = finding("risk", FindingKind::Observation, TEXT, 0.2);
        assert!(check_both(RULE, &a, &b).is_none());
    }

    #[test]
    fn test_unrelated_findings_are_ignored() {
        let a = finding("supplier_quality", FindingKind::Analysis, TEXT, 0.9);
        let b = finding("risk", FindingKind::Analysis, "Avionics software integration on track", 0.2);
        assert!(check_both(RULE, &a, &b).is_none());
    }
}
