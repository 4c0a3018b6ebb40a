use super::{Candidate, RuleHit};
use crate::contradiction::text::shared_count;
use crate::models::DetectorConfig;
use crate::state::{RuleName, Severity};

/// Highest severity level named in the finding, as a rank on the scale
fn level(candidate: &Candidate<'_>, config: &DetectorConfig) -> Option<usize> {
    config
        .vocabulary
        .severity_levels
        .iter()
        .enumerate()
        .rev()
        .find(|(_, level)| candidate.text.has_any(&level.words))
        .map(|(rank, _)| rank)
}

pub(super) fn check(
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    let vocab = &config.vocabulary;
    let (rank_a, rank_b) = (level(a, config)?, level(b, config)?);
    if rank_a == rank_b {
        return None;
    }

    let level_words: Vec<String> = vocab
        .severity_levels
        .iter()
        .flat_map(|l| l.words.iter().cloned())
        .collect();
    let shared = shared_count(
        &a.text.subject_tokens(&vocab.stopwords, &level_words),
        &b.text.subject_tokens(&vocab.stopwords, &level_words),
    );
    if shared < config.severity_min_shared_tokens {
        return None;
    }

    let severity = match rank_a.abs_diff(rank_b) {
        1 => Severity::Low,
        2 => Severity::Medium,
        _ => Severity::High,
    };

    Some(RuleHit::new(
        RuleName::SeverityLevelDisagreement,
        severity,
        format!(
            "{} rates the item {} while {} rates it {}",
            a.worker(),
            vocab.severity_levels[rank_a].level,
            b.worker(),
            vocab.severity_levels[rank_b].level
        ),
    ))
}
