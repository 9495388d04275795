//! Fuzzy detection of crisis phrases.
//!
//! Slides a window the width of each crisis-tier phrase across the message
//! words and scores it with a normalized edit-distance similarity. This
//! catches typos and contractions such as "i wnat to die".

use std::sync::Arc;

use super::analyzer::{AnalysisError, DetectionStrategy};
use super::context::ConversationContext;
use super::normalize::NormalizedMessage;
use super::{MatchPosition, MatchType, Severity, TriggerCatalog, TriggerMatch};

/// Default similarity a window must exceed to count as a match.
///
/// At 0.8 a single-letter change in a short phrase still matches, which
/// catches typos but also innocent look-alikes: "want to dye" scores about
/// 0.91 against "want to die". Such false positives over-escalate rather
/// than miss a crisis. Known look-alikes are listed in [`NEAR_MISS_WORDS`].
pub const DEFAULT_FUZZY_THRESHOLD: f32 = 0.8;

/// `(phrase word, harmless word)` pairs. A window whose word differs from
/// the phrase only by one of these substitutions is not a fuzzy match.
pub const NEAR_MISS_WORDS: &[(&str, &str)] = &[
    ("die", "dye"),
    ("die", "dyed"),
    ("die", "diet"),
    ("dead", "deaf"),
];

/// Edit-distance detector over crisis-tier phrases.
pub struct FuzzyMatcher {
    catalog: Arc<TriggerCatalog>,
    threshold: f32,
}

impl FuzzyMatcher {
    /// Creates a matcher with the given similarity threshold.
    pub fn new(catalog: Arc<TriggerCatalog>, threshold: f32) -> Self {
        Self {
            catalog,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Returns the similarity threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Finds near-miss crisis phrases. At most one match per phrase (the
    /// best-scoring window); verbatim windows are left to exact matching.
    pub fn find(&self, message: &NormalizedMessage) -> Vec<TriggerMatch> {
        let mut matches = Vec::new();
        let text = message.text();

        for entry in self.catalog.phrases_for_tier(Severity::Crisis) {
            let width = entry.word_count;
            if width == 0 || width > message.word_count() {
                continue;
            }

            let mut best: Option<(f32, usize, usize)> = None;
            for start in 0..=(message.word_count() - width) {
                let Some((from, to)) = message.word_window(start, width) else {
                    continue;
                };
                let window = &text[from..to];
                if is_near_miss(window, &entry.phrase) {
                    continue;
                }
                let score = similarity(window, &entry.phrase);
                if score > self.threshold
                    && score < 1.0
                    && best.map_or(true, |(b, _, _)| score > b)
                {
                    best = Some((score, from, to));
                }
            }

            if let Some((score, from, to)) = best {
                matches.push(TriggerMatch::new(
                    entry.phrase.clone(),
                    score,
                    entry.category,
                    entry.severity,
                    MatchPosition::new(from, to),
                    MatchType::Fuzzy,
                ));
            }
        }

        matches
    }
}

impl DetectionStrategy for FuzzyMatcher {
    fn detect(
        &self,
        message: &NormalizedMessage,
        _context: &ConversationContext,
    ) -> Result<Vec<TriggerMatch>, AnalysisError> {
        Ok(self.find(message))
    }

    fn name(&self) -> &'static str {
        "fuzzy"
    }
}

fn is_near_miss(window: &str, phrase: &str) -> bool {
    window.split(' ').zip(phrase.split(' ')).any(|(word, expected)| {
        NEAR_MISS_WORDS
            .iter()
            .any(|&(target, harmless)| target == expected && harmless == word)
    })
}

/// Levenshtein distance over Unicode scalar values.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// `1 - distance / max_len`, in `[0, 1]`. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}
