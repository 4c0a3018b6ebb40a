//! # Rule Vocabulary
//!
//! Word lists the detection rules match against. Entries are written in
//! normalized form (lower-case, punctuation replaced by spaces), so
//! `"dual-source"` in a finding matches the entry `"dual source"`.

use serde::{Deserialize, Serialize};

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// A qualitative severity level and the words that signal it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelWords {
    pub level: String,
    pub words: Vec<String>,
}

/// A cause category (labor, material, ...) and its signal words
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseCategory {
    pub name: String,
    pub words: Vec<String>,
}

/// Two mutually exclusive courses of action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPair {
    pub label: String,
    pub first: Vec<String>,
    pub second: Vec<String>,
}

/// All word lists used by the detection rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Named metrics whose trend can be disputed
    pub metrics: Vec<String>,
    pub improving: Vec<String>,
    pub worsening: Vec<String>,
    /// Ordered from least to most severe
    pub severity_levels: Vec<LevelWords>,
    /// Phrases that introduce a root-cause claim
    pub cause_markers: Vec<String>,
    pub cause_categories: Vec<CauseCategory>,
    /// Domain terms two root-cause findings must share to be about the same issue
    pub domain_terms: Vec<String>,
    pub action_pairs: Vec<ActionPair>,
    /// Ignored when measuring subject overlap between findings
    pub stopwords: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            metrics: owned(&[
                "cpi",
                "spi",
                "tcpi",
                "cost performance index",
                "schedule performance index",
                "cost performance",
                "schedule performance",
                "eac",
                "estimate at completion",
                "cost variance",
                "schedule variance",
                "otdp",
                "on time delivery",
                "dpmo",
                "defect rate",
                "first pass yield",
            ]),
            improving: owned(&[
                "improving",
                "improved",
                "improvement",
                "recovery",
                "recovering",
                "positive",
                "upward",
                "increasing",
                "better",
                "gained",
                "favorable",
                "trending up",
                "on track",
                "ahead",
            ]),
            worsening: owned(&[
                "declining",
                "declined",
                "worsening",
                "worsened",
                "negative",
                "downward",
                "decreasing",
                "worse",
                "degrading",
                "unfavorable",
                "trending down",
                "behind",
                "slipping",
                "eroding",
                "deteriorating",
                "dropped",
            ]),
            severity_levels: vec![
                LevelWords {
                    level: "low".into(),
                    words: owned(&["low", "minor", "minimal", "negligible", "marginal"]),
                },
                LevelWords {
                    level: "medium".into(),
                    words: owned(&["medium", "moderate", "manageable", "notable"]),
                },
                LevelWords {
                    level: "high".into(),
                    words: owned(&["high", "significant", "major", "serious", "substantial"]),
                },
                LevelWords {
                    level: "critical".into(),
                    words: owned(&[
                        "critical",
                        "catastrophic",
                        "showstopper",
                        "unacceptable",
                        "severe",
                    ]),
                },
            ],
            cause_markers: owned(&[
                "root cause",
                "caused by",
                "attributed to",
                "driven by",
                "due to",
                "because of",
                "stems from",
            ]),
            cause_categories: vec![
                CauseCategory {
                    name: "labor".into(),
                    words: owned(&[
                        "labor",
                        "staffing",
                        "workforce",
                        "overtime",
                        "personnel",
                        "headcount",
                        "training",
                        "technicians",
                    ]),
                },
                CauseCategory {
                    name: "material".into(),
                    words: owned(&[
                        "material",
                        "materials",
                        "parts",
                        "supplier",
                        "vendor",
                        "supply",
                        "shortage",
                        "shortages",
                        "fastener",
                        "fasteners",
                    ]),
                },
                CauseCategory {
                    name: "design".into(),
                    words: owned(&[
                        "design",
                        "engineering",
                        "requirements",
                        "drawing",
                        "drawings",
                        "specification",
                    ]),
                },
                CauseCategory {
                    name: "process".into(),
                    words: owned(&[
                        "process",
                        "workmanship",
                        "procedure",
                        "procedures",
                        "handling",
                        "rework",
                    ]),
                },
                CauseCategory {
                    name: "tooling".into(),
                    words: owned(&["tooling", "equipment", "fixture", "fixtures", "machine"]),
                },
                CauseCategory {
                    name: "test".into(),
                    words: owned(&["test", "testing", "qualification", "inspection"]),
                },
                CauseCategory {
                    name: "software".into(),
                    words: owned(&["software", "code", "firmware"]),
                },
                CauseCategory {
                    name: "planning".into(),
                    words: owned(&[
                        "planning",
                        "estimating",
                        "baseline",
                        "funding",
                        "budget",
                        "scope",
                    ]),
                },
            ],
            domain_terms: owned(&[
                "cost",
                "schedule",
                "quality",
                "supplier",
                "rework",
                "assembly",
                "wing",
                "fastener",
                "fasteners",
                "composite",
                "labor",
                "material",
                "delivery",
                "manufacturing",
                "tooling",
                "design",
                "engineering",
                "testing",
                "production",
                "avionics",
                "structures",
                "integration",
                "software",
                "overrun",
                "variance",
            ]),
            action_pairs: vec![
                ActionPair {
                    label: "schedule approach: acceleration vs. deferral".into(),
                    first: owned(&["accelerate", "expedite", "fast track", "compress"]),
                    second: owned(&["defer", "delay", "postpone", "descope"]),
                },
                ActionPair {
                    label: "sourcing strategy: dual-source vs. sole-source".into(),
                    first: owned(&["dual source", "alternate source", "second source"]),
                    second: owned(&["sole source", "single source", "incumbent"]),
                },
                ActionPair {
                    label: "resource strategy: increase vs. reduce".into(),
                    first: owned(&[
                        "increase staffing",
                        "add resources",
                        "augment workforce",
                        "hire",
                        "overtime",
                    ]),
                    second: owned(&[
                        "reduce cost",
                        "cut spending",
                        "reduce headcount",
                        "stop overtime",
                    ]),
                },
                ActionPair {
                    label: "baseline strategy: rebaseline vs. maintain".into(),
                    first: owned(&["rebaseline", "reset baseline", "over target baseline"]),
                    second: owned(&[
                        "maintain baseline",
                        "hold baseline",
                        "keep baseline",
                        "no rebaseline",
                    ]),
                },
                ActionPair {
                    label: "risk response: acceptance vs. mitigation".into(),
                    first: owned(&["accept risk", "risk acceptance", "accept the risk"]),
                    second: owned(&[
                        "mitigate risk",
                        "risk mitigation",
                        "reduce risk",
                        "eliminate risk",
                    ]),
                },
            ],
            stopwords: owned(&[
                "the", "a", "an", "is", "are", "was", "were", "be", "been", "of", "in", "on",
                "at", "to", "and", "or", "for", "that", "this", "with", "by", "as", "it", "its",
                "from", "now", "than", "has", "have", "had", "will", "would", "should", "could",
                "into", "per", "vs", "we", "our", "their",
            ]),
        }
    }
}

impl Vocabulary {
    /// Index of a severity level on the ordered scale
    pub fn level_rank(&self, level: &str) -> Option<usize> {
        self.severity_levels.iter().position(|l| l.level == level)
    }

    /// Every token appearing in any action phrase
    pub fn action_tokens(&self) -> Vec<String> {
        self.action_pairs
            .iter()
            .flat_map(|pair| pair.first.iter().chain(pair.second.iter()))
            .flat_map(|phrase| phrase.split_whitespace().map(str::to_string))
            .collect()
    }
}
