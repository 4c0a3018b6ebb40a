//! # Triage
//!
//! Maps a free-text trigger to an intent and the workers that should run.
//! Pure and deterministic given the trigger and the intent table.

use crate::models::TriageConfig;
use crate::state::{Intent, WorkerId};
use serde::{Deserialize, Serialize};

/// Result of classifying one trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// Keyword hits over keywords for the intent, at most 1.0
    pub confidence: f64,
    /// Ordered; always ends with the synthesizer
    pub required_workers: Vec<WorkerId>,
    pub matched_keywords: Vec<String>,
}

impl Classification {
    pub fn is_fallback(&self, config: &TriageConfig) -> bool {
        self.intent == config.fallback_intent
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntentClassifier {
    config: TriageConfig,
}

impl IntentClassifier {
    pub fn new(config: TriageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Keyword hits are substring matches on the lower-cased trigger, so
    /// multi-word keywords such as "cost variance" match as written. The
    /// highest hit count wins; on a tie the intent declared first wins.
    pub fn classify(&self, trigger: &str) -> Classification {
        let text = trigger.to_lowercase();
        let mut best: Option<(usize, Vec<String>)> = None;

        for (index, rule) in self.config.intents.iter().enumerate() {
            let hits: Vec<String> = rule
                .keywords
                .iter()
                .filter(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
                .cloned()
                .collect();

            let better = match &best {
                None => !hits.is_empty(),
                Some((_, current)) => hits.len() > current.len(),
            };
            if better {
                best = Some((index, hits));
            }
        }

        match best {
            Some((index, hits)) => {
                let rule = &self.config.intents[index];
                let confidence = (hits.len() as f64 / rule.keywords.len().max(1) as f64).min(1.0);
                tracing::debug!(
                    intent = %rule.intent,
                    confidence,
                    hits = hits.len(),
                    "Trigger classified"
                );
                Classification {
                    intent: rule.intent.clone(),
                    confidence,
                    required_workers: self.with_synthesizer(&rule.workers),
                    matched_keywords: hits,
                }
            }
            None => {
                tracing::debug!(intent = %self.config.fallback_intent, "No keyword hits, using fallback intent");
                Classification {
                    intent: self.config.fallback_intent.clone(),
                    confidence: 0.0,
                    required_workers: self.with_synthesizer(&self.config.fallback_workers),
                    matched_keywords: Vec::new(),
                }
            }
        }
    }

    /// Worker set for a known intent
    pub fn required_workers(&self, intent: &Intent) -> Vec<WorkerId> {
        let workers = self
            .config
            .intents
            .iter()
            .find(|rule| &rule.intent == intent)
            .map(|rule| rule.workers.as_slice())
            .unwrap_or(&self.config.fallback_workers);
        self.with_synthesizer(workers)
    }

    fn with_synthesizer(&self, workers: &[WorkerId]) -> Vec<WorkerId> {
        let mut ordered: Vec<WorkerId> = Vec::with_capacity(workers.len() + 1);
        for worker in workers {
            if *worker != self.config.synthesizer && !ordered.contains(worker) {
                ordered.push(worker.clone());
            }
        }
        ordered.push(self.config.synthesizer.clone());
        ordered
    }
}
