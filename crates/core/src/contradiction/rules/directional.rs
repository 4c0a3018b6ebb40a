use super::{Candidate, RuleHit};
use crate::models::DetectorConfig;
use crate::state::{RuleName, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Improving,
    Worsening,
}

impl Trend {
    fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Worsening => "worsening",
        }
    }
}

/// A finding that uses both kinds of trend word states no direction
fn trend(candidate: &Candidate<'_>, config: &DetectorConfig) -> Option<Trend> {
    let vocab = &config.vocabulary;
    let up = candidate.text.has_any(&vocab.improving);
    let down = candidate.text.has_any(&vocab.worsening);

    match (up, down) {
        (true, false) => Some(Trend::Improving),
        (false, true) => Some(Trend::Worsening),
        _ => None,
    }
}

pub(super) fn check(
    a: &Candidate<'_>,
    b: &Candidate<'_>,
    config: &DetectorConfig,
) -> Option<RuleHit> {
    let metric = config
        .vocabulary
        .metrics
        .iter()
        .find(|m| a.text.has_phrase(m) && b.text.has_phrase(m))?;

    let (trend_a, trend_b) = (trend(a, config)?, trend(b, config)?);
    if trend_a == trend_b {
        return None;
    }

    Some(RuleHit::new(
        RuleName::DirectionalMetricDisagreement,
        Severity::Medium,
        format!(
            "{} reports {} as {} while {} reports it as {}",
            a.worker(),
            metric.to_uppercase(),
            trend_a.as_str(),
            b.worker(),
            trend_b.as_str()
        ),
    ))
}
