use super::{exceeds, Candidate, RuleHit};
use crate::contradiction::text::{dollar_amounts, largest, shared_count};
use crate::models::DetectorConfig;
use crate::state::{RuleName, Severity};

const MAGNITUDE_WORDS: [&str; 6] = ["thousand", "million", "billion", "k", "m", "bn"];

fn money(value: f64) -> String {
    if value >= 1e9 {
        format!("${:.2}B", value / 1e9)
    } else if value >= 1e6 {
        format!("${:.1}M", value / 1e6)
    } else if value >= 1e3 {
        format!("${:.0}K", value / 1e3)
    } else {
        format!("${:.0}", value)
    }
}

pub(super) fn check(
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    let cost_a = largest(&dollar_amounts(&a.text.lower))?;
    let cost_b = largest(&dollar_amounts(&b.text.lower))?;

    let magnitudes: Vec<String> = MAGNITUDE_WORDS.iter().map(|m| m.to_string()).collect();
    let stopwords = &config.vocabulary.stopwords;
    let shared = shared_count(
        &a.text.subject_tokens(stopwords, &magnitudes),
        &b.text.subject_tokens(stopwords, &magnitudes),
    );
    if shared < config.cost_min_shared_tokens {
        return None;
    }

    let larger = cost_a.max(cost_b);
    let share = (cost_a - cost_b).abs() / larger;
    if !exceeds(share, config.cost_divergence_ratio) {
        return None;
    }

    let severity = if exceeds(share, config.cost_high_ratio) {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(RuleHit::new(
        RuleName::CostEstimateDivergence,
        severity,
        format!(
            "{} estimates {} while {} estimates {} ({:.0}% apart)",
            a.worker(),
            money(cost_a),
            b.worker(),
            money(cost_b),
            share * 100.0
        ),
    ))
}
