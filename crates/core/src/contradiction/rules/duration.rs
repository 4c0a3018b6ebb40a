use super::{exceeds, Candidate, RuleHit};
use crate::contradiction::text::{durations_in_days, largest, shared_count};
use crate::models::DetectorConfig;
use crate::state::{RuleName, Severity};

const UNIT_WORDS: [&str; 6] = ["day", "days", "week", "weeks", "month", "months"];

pub(super) fn check(
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    let days_a = largest(&durations_in_days(&a.text.lower))?;
    let days_b = largest(&durations_in_days(&b.text.lower))?;

    let units: Vec<String> = UNIT_WORDS.iter().map(|u| u.to_string()).collect();
    let stopwords = &config.vocabulary.stopwords;
    let shared = shared_count(
        &a.text.subject_tokens(stopwords, &units),
        &b.text.subject_tokens(stopwords, &units),
    );
    if shared < config.duration_min_shared_tokens {
        return None;
    }

    let (larger, smaller) = (days_a.max(days_b), days_a.min(days_b));
    if !exceeds(larger - smaller, config.duration_divergence_ratio * larger) {
        return None;
    }

    let ratio = larger / smaller;
    let severity = if exceeds(ratio, config.duration_high_ratio) {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(RuleHit::new(
        RuleName::DurationEstimateDivergence,
        severity,
        format!(
            "{} estimates {} days while {} estimates {} days ({:.1}x)",
            a.worker(),
            days_a,
            b.worker(),
            days_b,
            ratio
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{check_both, check_both_with, finding};
    use crate::models::DetectorConfig;
    use crate::state::{FindingKind, RuleName, Severity};

    const RULE: RuleName = RuleName::DurationEstimateDivergence;

    #[test]
    fn test_wide_divergence_is_high() {
        let a = finding("cam", FindingKind::Analysis, "CDR milestone slip estimated at 10 days", 0.8);
        let b = finding("risk", FindingKind::Analysis, "CDR milestone slip estimated at 25 days", 0.8);

        let hit = check_both(RULE, &a, &b).unwrap();
        assert_eq!(hit.severity, Severity::High);
        assert!(hit.description.contains("2.5x"));
    }

    #[test]
    fn test_close_estimates_do_not_conflict() {
        let a = finding("cam", FindingKind::Analysis, "CDR milestone slip estimated at 10 days", 0.8);
        let b = finding("risk", FindingKind::Analysis, "CDR milestone slip estimated at 13 days", 0.8);
        assert!(check_both(RULE, &a, &b).is_none());
    }

    #[test]
    fn test_units_are_normalized() {
        let a = finding("cam", FindingKind::Analysis, "Final assembly slip of 2 weeks", 0.8);
        let b = finding("risk", FindingKind::Analysis, "Final assembly slip of 14 days", 0.8);
        assert!(check_both(RULE, &a, &b).is_none());

        let c = finding("risk", FindingKind::Analysis, "Final assembly slip of 2 months", 0.8);
        assert!(check_both(RULE, &a, &c).is_some());
    }

    #[test]
    fn test_unrelated_items_do_not_conflict() {
        let a = finding("cam", FindingKind::Analysis, "Wing tooling rework needs 10 days", 0.8);
        let b = finding("risk", FindingKind::Analysis, "Avionics qualification adds 40 days", 0.8);
        assert!(check_both(RULE, &a, &b).is_none());
    }

    #[test]
    fn test_medium_band_with_looser_threshold() {
        let config = DetectorConfig {
            duration_divergence_ratio: 0.25,
            ..Default::default()
        };
        let a = finding("cam", FindingKind::Analysis, "CDR milestone slip estimated at 10 days", 0.8);
        let b = finding("risk", FindingKind::Analysis, "CDR milestone slip estimated at 15 days", 0.8);

        let hit = check_both_with(RULE, &a, &b, &config).unwrap();
        assert_eq!(hit.severity, Severity::Medium);
    }
}
