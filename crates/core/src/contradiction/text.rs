//! # Text Heuristics
//!
//! Findings are free text, so "the same item" is decided by token overlap
//! and phrase matching rather than string equality.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Lower-case, replace everything but letters, digits and decimal points
/// with spaces, and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let chars: Vec<char> = lowered.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        let keep = c.is_alphanumeric()
            || (c == '.'
                && i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()));
        out.push(if keep { c } else { ' ' });
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `0.85`, `10`, `557m`: anything that starts with a digit
fn is_numeric(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
}

/// A finding's content, analyzed once for every rule
#[derive(Debug, Clone)]
pub struct AnalyzedText {
    /// Raw content lower-cased (for number extraction)
    pub lower: String,
    /// Normalized content padded with spaces for whole-phrase matching
    padded: String,
    /// Distinct normalized tokens
    pub tokens: BTreeSet<String>,
}

impl AnalyzedText {
    pub fn new(raw: &str) -> Self {
        let normalized = normalize(raw);
        let tokens = normalized
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Self {
            lower: raw.to_lowercase(),
            padded: format!(" {} ", normalized),
            tokens,
        }
    }

    /// Whole-word / whole-phrase match
    pub fn has_phrase(&self, phrase: &str) -> bool {
        let phrase = normalize(phrase);
        !phrase.is_empty() && self.padded.contains(&format!(" {} ", phrase))
    }

    pub fn has_any(&self, phrases: &[String]) -> bool {
        phrases.iter().any(|p| self.has_phrase(p))
    }

    /// Phrases from `phrases` that occur in the text
    pub fn matching<'a>(&self, phrases: &'a [String]) -> Vec<&'a str> {
        phrases
            .iter()
            .filter(|p| self.has_phrase(p))
            .map(String::as_str)
            .collect()
    }

    /// Normalized text following the first occurrence of `phrase`
    pub fn tail_after(&self, phrase: &str) -> Option<&str> {
        let needle = format!(" {} ", normalize(phrase));
        self.padded
            .find(&needle)
            .map(|pos| self.padded[pos + needle.len()..].trim())
    }

    /// Tokens that carry subject matter: no stopwords, no bare numbers,
    /// nothing from `exclude`.
    pub fn subject_tokens(&self, stopwords: &[String], exclude: &[String]) -> BTreeSet<String> {
        self.tokens
            .iter()
            .filter(|t| !is_numeric(t))
            .filter(|t| !stopwords.iter().any(|s| s == *t))
            .filter(|t| !exclude.iter().any(|s| s == *t))
            .cloned()
            .collect()
    }
}

/// Size of the intersection of two token sets
pub fn shared_count(a: &BTreeSet<String>, b: &BTreeSet<String>) -> usize {
    a.intersection(b).count()
}

fn duration_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(days?|weeks?|months?)\b").ok())
        .as_ref()
}

fn dollar_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)\$\s*(\d[\d,]*(?:\.\d+)?)\s*(billion|million|thousand|bn|b|m|k)?\b")
                .ok()
        })
        .as_ref()
}

/// Every duration in the text, converted to days (weeks = 7, months = 30)
pub fn durations_in_days(text: &str) -> Vec<f64> {
    let Some(pattern) = duration_pattern() else {
        return Vec::new();
    };

    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str().to_lowercase();
            let factor = if unit.starts_with("week") {
                7.0
            } else if unit.starts_with("month") {
                30.0
            } else {
                1.0
            };
            Some(value * factor)
        })
        .collect()
}

/// Every dollar amount in the text, in USD
pub fn dollar_amounts(text: &str) -> Vec<f64> {
    let Some(pattern) = dollar_pattern() else {
        return Vec::new();
    };

    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let raw = caps.get(1)?.as_str().replace(',', "");
            let value: f64 = raw.parse().ok()?;
            let multiplier = match caps
                .get(2)
                .map(|m| m.as_str().to_lowercase())
                .as_deref()
            {
                Some("billion") | Some("bn") | Some("b") => 1e9,
                Some("million") | Some("m") => 1e6,
                Some("thousand") | Some("k") => 1e3,
                _ => 1.0,
            };
            Some(value * multiplier)
        })
        .collect()
}

/// Largest value, ignoring non-positive ones
pub fn largest(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| *v > 0.0)
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
}
