//! # Concord Models
//!
//! Centralized configuration types for the coordination engine: the
//! Controller's run options, the detection thresholds and the intent table.
//!
//! ## Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `MAX_REFINEMENT_ITERATIONS` | 3 |
//! | `PIPELINE_DEADLINE_MS` | unset |
//! | `SEQUENTIAL_FAN_OUT` | false |
//! | `MAX_CONCURRENT_WORKERS` | 8 |
//! | `MIN_RESOLUTION_CONFIDENCE` | 0.0 |

use crate::contradiction::vocabulary::Vocabulary;
use crate::error::ConfigError;
use crate::state::{Intent, WorkerId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for one Controller
///
/// ## Example
/// ```rust,ignore
/// use concord_core::models::CoordinatorConfig;
///
/// let config = CoordinatorConfig::from_env()?;
/// let strict = CoordinatorConfig { sequential_fan_out: true, ..config };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Cap on refinement iterations
    pub max_refinement_iterations: u32,
    /// Wall-clock budget for a whole run
    pub pipeline_deadline_ms: Option<u64>,
    /// Run workers one at a time in declared order
    pub sequential_fan_out: bool,
    /// Size of the concurrent fan-out pool
    pub max_concurrent_workers: usize,
    /// Resolutions below this confidence leave a contradiction unresolved
    pub min_resolution_confidence: f64,
    pub detector: DetectorConfig,
    pub triage: TriageConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_refinement_iterations: 3,
            pipeline_deadline_ms: None,
            sequential_fan_out: false,
            max_concurrent_workers: 8,
            min_resolution_confidence: 0.0,
            detector: DetectorConfig::default(),
            triage: TriageConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("MAX_REFINEMENT_ITERATIONS") {
            config.max_refinement_iterations = parse_number("MAX_REFINEMENT_ITERATIONS", &value)?;
        }
        if let Some(value) = lookup("PIPELINE_DEADLINE_MS") {
            if !value.trim().is_empty() {
                config.pipeline_deadline_ms = Some(parse_number("PIPELINE_DEADLINE_MS", &value)?);
            }
        }
        if let Some(value) = lookup("SEQUENTIAL_FAN_OUT") {
            config.sequential_fan_out = parse_bool("SEQUENTIAL_FAN_OUT", &value)?;
        }
        if let Some(value) = lookup("MAX_CONCURRENT_WORKERS") {
            let workers: usize = parse_number("MAX_CONCURRENT_WORKERS", &value)?;
            if workers == 0 {
                return Err(invalid("MAX_CONCURRENT_WORKERS", &value, "must be at least 1"));
            }
            config.max_concurrent_workers = workers;
        }
        if let Some(value) = lookup("MIN_RESOLUTION_CONFIDENCE") {
            let min: f64 = parse_number("MIN_RESOLUTION_CONFIDENCE", &value)?;
            if !(0.0..=1.0).contains(&min) {
                return Err(invalid(
                    "MIN_RESOLUTION_CONFIDENCE",
                    &value,
                    "must be between 0 and 1",
                ));
            }
            config.min_resolution_confidence = min;
        }

        Ok(config)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.pipeline_deadline_ms.map(Duration::from_millis)
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

/// Thresholds and vocabularies for the contradiction rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Shared subject tokens before two severity claims are about one item
    pub severity_min_shared_tokens: usize,
    pub duration_min_shared_tokens: usize,
    /// Diverge when the difference exceeds this share of the larger estimate
    pub duration_divergence_ratio: f64,
    /// High severity when larger / smaller exceeds this
    pub duration_high_ratio: f64,
    pub cost_min_shared_tokens: usize,
    pub cost_divergence_ratio: f64,
    /// High severity when the difference exceeds this share of the larger estimate
    pub cost_high_ratio: f64,
    pub root_cause_min_shared_terms: usize,
    pub action_min_shared_tokens: usize,
    pub confidence_min_shared_tokens: usize,
    pub confidence_gap: f64,
    pub confidence_high_gap: f64,
    /// Contradictions between one worker pair before all of them escalate
    pub worker_pair_escalation_count: usize,
    pub vocabulary: Vocabulary,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            severity_min_shared_tokens: 5,
            duration_min_shared_tokens: 2,
            duration_divergence_ratio: 0.5,
            duration_high_ratio: 2.0,
            cost_min_shared_tokens: 2,
            cost_divergence_ratio: 0.10,
            cost_high_ratio: 0.25,
            root_cause_min_shared_terms: 2,
            action_min_shared_tokens: 1,
            confidence_min_shared_tokens: 4,
            confidence_gap: 0.3,
            confidence_high_gap: 0.6,
            worker_pair_escalation_count: 3,
            vocabulary: Vocabulary::default(),
        }
    }
}

/// One row of the intent table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: Intent,
    pub keywords: Vec<String>,
    /// Workers to dispatch, in order; the synthesizer is appended if missing
    pub workers: Vec<WorkerId>,
}

impl IntentRule {
    pub fn new(intent: &str, keywords: &[&str], workers: &[&str]) -> Self {
        Self {
            intent: Intent::new(intent),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            workers: workers.iter().map(|w| WorkerId::new(*w)).collect(),
        }
    }
}

/// The ordered intent table used by the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Declaration order breaks ties
    pub intents: Vec<IntentRule>,
    pub fallback_intent: Intent,
    pub fallback_workers: Vec<WorkerId>,
    pub synthesizer: WorkerId,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            intents: vec![
                IntentRule::new(
                    "explain_variance",
                    &[
                        "variance",
                        "cpi",
                        "spi",
                        "cost variance",
                        "schedule variance",
                        "evm",
                        "earned value",
                        "overrun",
                        "underrun",
                        "performance index",
                    ],
                    &["cam", "rca", "risk", "pm"],
                ),
                IntentRule::new(
                    "assess_contract_change",
                    &[
                        "contract",
                        "mod",
                        "modification",
                        "change order",
                        "amendment",
                        "bilateral",
                        "unilateral",
                        "cdrl",
                        "deliverable",
                    ],
                    &["contracts", "cam", "risk", "pm"],
                ),
                IntentRule::new(
                    "supplier_quality_investigation",
                    &[
                        "quality",
                        "escape",
                        "defect",
                        "nonconformance",
                        "supplier",
                        "dpmo",
                        "rejection",
                        "rework",
                        "scrap",
                        "car",
                    ],
                    &["supplier_quality", "rca", "cam", "contracts", "risk", "pm"],
                ),
                IntentRule::new(
                    "risk_assessment",
                    &[
                        "risk",
                        "threat",
                        "opportunity",
                        "probability",
                        "impact",
                        "mitigation",
                        "contingency",
                        "exposure",
                    ],
                    &["risk", "cam", "pm"],
                ),
                IntentRule::new(
                    "schedule_analysis",
                    &[
                        "schedule",
                        "milestone",
                        "slip",
                        "delay",
                        "critical path",
                        "float",
                        "ims",
                        "timeline",
                    ],
                    &["cam", "risk", "pm"],
                ),
            ],
            fallback_intent: Intent::new("general_assessment"),
            fallback_workers: vec![WorkerId::new("cam"), WorkerId::new("risk"), WorkerId::new("pm")],
            synthesizer: WorkerId::new("pm"),
        }
    }
}
