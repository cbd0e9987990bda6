//! Fuzzy resolution of free-text input onto the action vocabulary.
//!
//! Two modes share one scoring core:
//!
//! - [`CommandResolver::resolve_one`] picks a single best identifier and only
//!   returns it when it passes the consecutive-run confidence gate.
//! - [`CommandResolver::resolve_many`] ranks every identifier with extra
//!   containment and run bonuses and applies no gate, for suggestion lists.

use crossterm::style::Stylize;
use serde::Serialize;

use crate::matching::{find_consecutive_runs, has_consecutive_run, lcs, RunThreshold};

/// Default minimum run length for both the gate and the run bonus.
pub const DEFAULT_MIN_RUN: usize = 4;
/// Default fraction of the identifier length a run must cover to pass the gate.
pub const DEFAULT_GATE_RATIO: f64 = 0.75;

/// Bonus added when the identifier contains the whole query literally.
const CONTAINMENT_BONUS: f64 = 1.0;
/// Weight applied to each run's share of the identifier length.
const RUN_BONUS_WEIGHT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    pub min_run: usize,
    pub gate_ratio: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_run: DEFAULT_MIN_RUN,
            gate_ratio: DEFAULT_GATE_RATIO,
        }
    }
}

/// A scored identifier produced by [`CommandResolver::resolve_many`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub identifier: String,
    pub score: f64,
    pub first_match_offset: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    identifier: String,
    normalized: Vec<char>,
}

/// Resolver over an immutable snapshot of the vocabulary.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    entries: Vec<Entry>,
    config: ResolverConfig,
}

impl CommandResolver {
    pub fn new<I, S>(identifiers: I, config: ResolverConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = identifiers
            .into_iter()
            .map(Into::into)
            .map(|identifier: String| Entry {
                normalized: normalize(&identifier),
                identifier,
            })
            .collect();
        Self { entries, config }
    }

    pub fn with_defaults<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(identifiers, ResolverConfig::default())
    }

    pub fn config(&self) -> ResolverConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.identifier.as_str())
    }

    /// Resolve `query` to the single most likely identifier.
    ///
    /// Returns `None` when nothing scores above zero or when the best
    /// candidate lacks a long enough run of consecutive matching characters.
    pub fn resolve_one(&self, query: &str) -> Option<&str> {
        let query = normalize(query);
        if query.is_empty() {
            return None;
        }

        let mut best: Option<(&Entry, f64)> = None;
        for entry in &self.entries {
            let score = base_score(&query, &entry.normalized);
            let current = best.map_or(0.0, |(_, s)| s);
            if score > current {
                best = Some((entry, score));
            }
        }

        let (entry, score) = best?;
        let threshold = self.gate_threshold(entry.normalized.len());
        if has_consecutive_run(&query, &entry.normalized, RunThreshold::Fixed(threshold)) {
            tracing::debug!(
                target = "traders_console::resolver",
                identifier = %entry.identifier,
                score,
                threshold,
                "resolved input"
            );
            Some(entry.identifier.as_str())
        } else {
            tracing::debug!(
                target = "traders_console::resolver",
                identifier = %entry.identifier,
                score,
                threshold,
                "best candidate rejected by run gate"
            );
            None
        }
    }

    /// Rank identifiers against `query`, best first, at most `limit` entries.
    pub fn resolve_many(&self, query: &str, limit: usize) -> Vec<MatchCandidate> {
        let query = normalize(query);
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<MatchCandidate> = self
            .entries
            .iter()
            .map(|entry| self.score_candidate(&query, entry))
            .collect();

        // Stable sort keeps vocabulary order among equal scores.
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(limit);
        ranked
    }

    fn score_candidate(&self, query: &[char], entry: &Entry) -> MatchCandidate {
        let candidate = &entry.normalized;
        let (_, first_match_offset) = lcs(query, candidate);
        let mut score = base_score(query, candidate);

        if contains(candidate, query) {
            score += CONTAINMENT_BONUS;
        }

        let len = candidate.len() as f64;
        for run in find_consecutive_runs(query, candidate, RunThreshold::Fixed(self.config.min_run)) {
            score += (run.len as f64 / len) * RUN_BONUS_WEIGHT;
        }

        score /= query.len() as f64;

        MatchCandidate {
            identifier: entry.identifier.clone(),
            score,
            first_match_offset,
        }
    }

    fn gate_threshold(&self, identifier_len: usize) -> usize {
        let min_run = self.config.min_run;
        if identifier_len > min_run {
            min_run.max(RunThreshold::Fraction(self.config.gate_ratio).resolve(identifier_len))
        } else {
            min_run
        }
    }
}

/// Upper-case and drop all whitespace.
pub fn normalize(text: &str) -> Vec<char> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// For each character of `identifier`, whether it occurs anywhere in `query`.
pub fn matched_mask(query: &str, identifier: &str) -> Vec<bool> {
    let query = normalize(query);
    identifier
        .chars()
        .map(|c| c.to_uppercase().all(|u| query.contains(&u)))
        .collect()
}

/// Render `identifier` with the characters that also appear in `query` in bold.
pub fn highlight(query: &str, identifier: &str) -> String {
    identifier
        .chars()
        .zip(matched_mask(query, identifier))
        .map(|(c, matched)| {
            if matched {
                c.bold().to_string()
            } else {
                c.to_string()
            }
        })
        .collect()
}

fn base_score(query: &[char], candidate: &[char]) -> f64 {
    if candidate.is_empty() {
        return 0.0;
    }
    let (lcs_len, first_match) = lcs(query, candidate);
    let len = candidate.len() as f64;
    (lcs_len as f64 / len) * (1.0 - first_match as f64 / len)
}

fn contains(haystack: &[char], needle: &[char]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|window| window == needle)
}
