use super::{Candidate, RuleHit};
use crate::contradiction::text::shared_count;
use crate::models::DetectorConfig;
use crate::state::{RuleName, Severity};

pub(super) fn check(
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    if !a.finding.kind.is_prescriptive() || !b.finding.kind.is_prescriptive() {
        return None;
    }

    let vocab = &config.vocabulary;
    let pair = vocab.action_pairs.iter().find(|pair| {
        (a.text.has_any(&pair.first) && b.text.has_any(&pair.second))
            || (a.text.has_any(&pair.second) && b.text.has_any(&pair.first))
    })?;

    let action_words = vocab.action_tokens();
    let shared = shared_count(
        &a.text.subject_tokens(&vocab.stopwords, &action_words),
        &b.text.subject_tokens(&vocab.stopwords, &action_words),
    );
    if shared < config.action_min_shared_tokens {
        return None;
    }

    let side = |candidate: &Candidate<'_>| {
        candidate
            .text
            .matching(&pair.first)
            .into_iter()
            .chain(candidate.text.matching(&pair.second))
            .next()
            .unwrap_or_default()
            .to_string()
    };

    Some(RuleHit::new(
        RuleName::ActionConflict,
        Severity::High,
        format!(
            "{} recommends \"{}\" while {} recommends \"{}\" ({})",
            a.worker(),
            side(a),
            b.worker(),
            side(b),
            pair.label
        ),
    ))
}
