use super::{Candidate, RuleHit};
use crate::models::DetectorConfig;
use crate::state::{RuleName, Severity};

/// Cause category named after the first cause marker in the finding
fn cause_category<'c>(candidate: &Candidate<'_>, config: &'c DetectorConfig) -> Option<&'c str> {
    let vocab = &config.vocabulary;
    let tail = vocab
        .cause_markers
        .iter()
        .find_map(|marker| candidate.text.tail_after(marker))?;

    tail.split_whitespace().find_map(|token| {
        vocab
            .cause_categories
            .iter()
            .find(|category| category.words.iter().any(|w| w == token))
            .map(|category| category.name.as_str())
    })
}

pub(super) fn check(
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    let cause_a = cause_category(a, config)?;
    let cause_b = cause_category(b, config)?;
    if cause_a == cause_b {
        return None;
    }

    let shared_terms: Vec<&str> = config
        .vocabulary
        .domain_terms
        .iter()
        .filter(|term| a.text.has_phrase(term) && b.text.has_phrase(term))
        .map(String::as_str)
        .collect();
    if shared_terms.len() < config.root_cause_min_shared_terms {
        return None;
    }

    Some(RuleHit::new(
        RuleName::RootCauseDisagreement,
        Severity::Medium,
        format!(
            "{} attributes the {} issue to {} causes while {} attributes it to {} causes",
            a.worker(),
            shared_terms.join("/"),
            cause_a,
            b.worker(),
            cause_b
        ),
    ))
}
