//! crates/session_insight_core/src/consolidation.rs
//!
//! Merges the per-provider analyses of one document into a single
//! `ConsolidatedInsight`. Everything in this module is a pure function of its
//! input: the same result set always produces the same insight.
//!
//! Providers answer in different shapes (a JSON object, or a plain-text note with
//! labelled lines), so each `raw_output` is parsed into a `ParsedAnalysis` first
//! and only then merged.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use crate::domain::{
    AnalysisResult, ConfidenceScore, ConsolidatedInsight, ProviderId, SentimentSummary,
};

/// Largest mood spread (max - min) still counted as agreement.
///
/// This is an inherited heuristic threshold, not a statistical bound.
const MOOD_AGREEMENT_SPREAD: f64 = 2.0;
/// Absorbs float noise such as `6.1 - 4.1`.
const SPREAD_TOLERANCE: f64 = 1e-9;
/// Tie-break order for the sentiment majority vote.
const SENTIMENT_PRIORITY: [&str; 3] = ["positive", "neutral", "negative"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsolidationError {
    #[error("result stored under {slot} was produced by {produced_by}")]
    ProviderMismatch {
        slot: ProviderId,
        produced_by: ProviderId,
    },
}

/// The fields consolidation understands, extracted from one provider's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAnalysis {
    pub summary: Option<String>,
    pub mood: Option<f64>,
    pub topics: Vec<String>,
    pub techniques: Vec<String>,
    pub sentiment: Option<String>,
    pub emotional_tone: Option<String>,
}

//=========================================================================================
// Parsing
//=========================================================================================

/// Parses a provider's raw output. JSON objects (optionally fenced) are read by
/// key; anything else is scanned for `Label: value` lines. Values that cannot be
/// understood are dropped silently.
pub fn parse_raw_output(raw: &str) -> ParsedAnalysis {
    let body = strip_code_fence(raw.trim());
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => parse_json_object(&map),
        _ => parse_labelled_text(raw),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the language tag line, e.g. ```json
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_json_object(map: &Map<String, Value>) -> ParsedAnalysis {
    let (mut sentiment, mut emotional_tone) = match map
        .get("sentiment_analysis")
        .or_else(|| map.get("sentiment"))
    {
        Some(Value::Object(inner)) => (
            first_string(inner, &["overall_sentiment", "sentiment"]),
            first_string(inner, &["emotional_tone", "tone"]),
        ),
        Some(Value::String(label)) => (non_empty(label), None),
        _ => (None, None),
    };
    if sentiment.is_none() {
        sentiment = first_string(map, &["overall_sentiment"]);
    }
    if emotional_tone.is_none() {
        emotional_tone = first_string(map, &["emotional_tone"]);
    }

    ParsedAnalysis {
        summary: first_string(map, &["session_summary", "summary"]),
        mood: first_present(map, &["client_mood", "mood", "mood_score"]).and_then(coerce_number),
        topics: first_present(map, &["key_topics", "topics", "key_themes"])
            .map(string_list)
            .unwrap_or_default(),
        techniques: first_present(map, &["therapeutic_techniques", "techniques"])
            .map(string_list)
            .unwrap_or_default(),
        sentiment,
        emotional_tone,
    }
}

fn labelled_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:[-*•][ \t]*)?([A-Za-z][A-Za-z ]{0,40}?)[ \t]*:[ \t]*(.*)$")
            .expect("labelled line pattern is valid")
    })
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").expect("number pattern is valid"))
}

fn parse_labelled_text(text: &str) -> ParsedAnalysis {
    let mut parsed = ParsedAnalysis::default();

    for caps in labelled_line().captures_iter(text) {
        let label = caps[1].split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let value = caps[2].trim();
        if value.is_empty() {
            continue;
        }

        match label.as_str() {
            "summary" | "session summary" => set_once(&mut parsed.summary, value),
            "mood" | "client mood" | "mood score" => {
                if parsed.mood.is_none() {
                    parsed.mood = leading_number(value);
                }
            }
            "topics" | "key topics" | "themes" | "key themes" => {
                parsed.topics.extend(split_list(value))
            }
            "techniques" | "therapeutic techniques" | "interventions" => {
                parsed.techniques.extend(split_list(value))
            }
            "sentiment" | "overall sentiment" => {
                if let Some(word) = value
                    .split(|c: char| !c.is_alphabetic())
                    .find(|w| !w.is_empty())
                {
                    set_once(&mut parsed.sentiment, word);
                }
            }
            "tone" | "emotional tone" => set_once(&mut parsed.emotional_tone, value),
            _ => {}
        }
    }

    parsed
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(Value::as_str)
        .find_map(non_empty)
}

/// Numbers pass through; numeric-looking strings are coerced; the rest is dropped.
fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn leading_number(text: &str) -> Option<f64> {
    number_pattern()
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(non_empty)
            .collect(),
        Value::String(s) => split_list(s),
        _ => Vec::new(),
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split([',', ';']).filter_map(non_empty).collect()
}

//=========================================================================================
// Consolidation
//=========================================================================================

/// Builds a fresh insight from `results`.
///
/// An empty map yields `ConsolidatedInsight::empty()`. The only failure is a
/// result filed under the wrong provider, which indicates corrupted state.
pub fn consolidate(
    results: &BTreeMap<ProviderId, AnalysisResult>,
) -> Result<ConsolidatedInsight, ConsolidationError> {
    if results.is_empty() {
        return Ok(ConsolidatedInsight::empty());
    }

    for (slot, result) in results {
        if *slot != result.provider_id {
            return Err(ConsolidationError::ProviderMismatch {
                slot: *slot,
                produced_by: result.provider_id,
            });
        }
    }

    // BTreeMap iteration is ascending by provider id, which every tie-break relies on.
    let parsed: Vec<ParsedAnalysis> = results
        .values()
        .map(|r| parse_raw_output(&r.raw_output))
        .collect();

    let moods: Vec<f64> = parsed.iter().filter_map(|p| p.mood).collect();
    let labels: Vec<String> = parsed
        .iter()
        .filter_map(|p| p.sentiment.as_deref())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(ConsolidatedInsight {
        summary: select_summary(&parsed),
        mood_score: average_mood(&moods),
        topics: merge_case_insensitive(parsed.iter().flat_map(|p| p.topics.iter())),
        techniques: merge_case_insensitive(parsed.iter().flat_map(|p| p.techniques.iter())),
        sentiment: SentimentSummary {
            overall_sentiment: majority_sentiment(&labels),
            emotional_tone: join_tones(&parsed),
        },
        confidence: score_agreement(results.len(), &moods, &labels),
    })
}

/// Longest non-empty summary; on equal length the earliest provider keeps it.
fn select_summary(parsed: &[ParsedAnalysis]) -> Option<String> {
    let mut best: Option<&str> = None;
    for candidate in parsed
        .iter()
        .filter_map(|p| p.summary.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        if best.map_or(true, |b| candidate.chars().count() > b.chars().count()) {
            best = Some(candidate);
        }
    }
    best.map(str::to_string)
}

fn average_mood(moods: &[f64]) -> Option<f64> {
    if moods.is_empty() {
        return None;
    }
    let mean = moods.iter().sum::<f64>() / moods.len() as f64;
    Some(round_to(mean, 1))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Union keyed on the trimmed, lower-cased form; the first spelling seen wins.
fn merge_case_insensitive<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            merged.push(trimmed.to_string());
        }
    }
    merged
}

fn sentiment_rank(label: &str) -> usize {
    SENTIMENT_PRIORITY
        .iter()
        .position(|p| *p == label)
        .unwrap_or(SENTIMENT_PRIORITY.len())
}

fn majority_sentiment(labels: &[String]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .min_by(|(a, count_a), (b, count_b)| {
            count_b
                .cmp(count_a)
                .then_with(|| sentiment_rank(a).cmp(&sentiment_rank(b)))
                .then_with(|| a.cmp(b))
        })
        .map(|(label, _)| label.to_string())
}

fn join_tones(parsed: &[ParsedAnalysis]) -> String {
    let mut tones: Vec<&str> = Vec::new();
    for tone in parsed
        .iter()
        .filter_map(|p| p.emotional_tone.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        if !tones.contains(&tone) {
            tones.push(tone);
        }
    }
    tones.join(", ")
}

/// Counts agreement points over the comparisons that were possible.
///
/// Mood agreement is only compared with two or more mood scores; sentiment
/// agreement is always compared. Fewer than two providers yields 0.5.
fn score_agreement(provider_count: usize, moods: &[f64], labels: &[String]) -> ConfidenceScore {
    if provider_count < 2 {
        return ConfidenceScore {
            overall_confidence: 0.5,
            provider_count,
            agreement_ratio: "0/0".to_string(),
        };
    }

    let mut points = 0u32;
    let mut comparisons = 0u32;

    if moods.len() >= 2 {
        let max = moods.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = moods.iter().copied().fold(f64::INFINITY, f64::min);
        if max - min <= MOOD_AGREEMENT_SPREAD + SPREAD_TOLERANCE {
            points += 1;
        }
        comparisons += 1;
    }

    let distinct: HashSet<&str> = labels.iter().map(String::as_str).collect();
    if distinct.len() <= 1 {
        points += 1;
    }
    comparisons += 1;

    ConfidenceScore {
        overall_confidence: round_to(f64::from(points) / f64::from(comparisons), 2),
        provider_count,
        agreement_ratio: format!("{points}/{comparisons}"),
    }
}
