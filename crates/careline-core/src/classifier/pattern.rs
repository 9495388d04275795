//! Semantic paraphrase detection with curated regular expressions.
//!
//! Catches phrasings the catalog does not list verbatim ("I just want to
//! disappear forever", "I'm struggling to breathe"). Patterns run against
//! the normalized message, so apostrophes are already gone ("cant").

use regex::{Regex, RegexSet};

use super::analyzer::{AnalysisError, DetectionStrategy};
use super::context::ConversationContext;
use super::normalize::NormalizedMessage;
use super::{MatchPosition, MatchType, TriggerCategory, TriggerMatch};

/// Confidence assigned to pattern matches.
pub const PATTERN_MATCH_CONFIDENCE: f32 = 0.9;

/// Pattern configuration for a category.
struct CategoryPatterns {
    category: TriggerCategory,
    /// Regex set for fast multi-pattern matching.
    regex_set: RegexSet,
    /// Individual regexes for extracting matched spans.
    regexes: Vec<Regex>,
}

/// Regex-based paraphrase detector.
pub struct PatternMatcher {
    patterns: Vec<CategoryPatterns>,
}

impl PatternMatcher {
    /// Compiles the curated pattern set.
    pub fn new() -> Result<Self, regex::Error> {
        let groups: [(TriggerCategory, &[&str]); 7] = [
            (
                TriggerCategory::SuicideIdeation,
                &[
                    r"\b(want|wanna|wish|going|ready) to (die|be dead|disappear forever|not wake up)\b",
                    r"\b(no|dont see (a|any)) (point|reason) (in )?(living|to live|going on)\b",
                    r"\bbetter off (dead|without me)\b",
                    r"\b(end|take) my (own )?life\b",
                ],
            ),
            (
                TriggerCategory::SelfHarm,
                &[r"\b(hurt|harm|cut|cutting|burn|burning) (myself|my self)\b"],
            ),
            (
                TriggerCategory::LifeThreatening,
                &[
                    r"\b(cant|cannot|can not|unable to|struggling to) (breathe|breath|catch my breath)\b",
                    r"\b(crushing|severe|sharp) (chest|heart) pain\b",
                    r"\b(passing|blacking|blacked) out\b",
                ],
            ),
            (
                TriggerCategory::SevereBleeding,
                &[
                    r"\bbleeding (so |really |very )?(heavily|a lot|nonstop|non stop)\b",
                    r"\bsoak(ing|ed)? (through|thru) (a |my )?(pad|pads|tampon|tampons)\b",
                ],
            ),
            (
                TriggerCategory::SevereDistress,
                &[
                    r"\b(cant|cannot|can not) (cope|go on|take (it|this) anymore|handle (it|this))\b",
                    r"\b(completely|totally|utterly) (hopeless|overwhelmed|lost)\b",
                ],
            ),
            (
                TriggerCategory::ImmediateDanger,
                &[
                    r"\b(he|she|they|someone) (is going to|will|wants to|threatened to) (hurt|kill) me\b",
                    r"\bnot safe (at home|here|with him|with her)\b",
                ],
            ),
            (
                TriggerCategory::CallbackRequest,
                &[
                    r"\b(call|ring|phone) me( back)?\b",
                    r"\b(speak|talk) (to|with) (a|the) (nurse|person|human)\b",
                ],
            ),
        ];

        let patterns = groups
            .iter()
            .map(|(category, patterns)| Self::build_category_patterns(*category, patterns))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Returns one match per pattern that fires, in pattern order.
    pub fn find(&self, message: &NormalizedMessage) -> Vec<TriggerMatch> {
        let text = message.text();
        let mut matches = Vec::new();
        if text.is_empty() {
            return matches;
        }

        for group in &self.patterns {
            // Fast check: does any pattern in this category fire?
            if !group.regex_set.is_match(text) {
                continue;
            }
            for regex in &group.regexes {
                if let Some(m) = regex.find(text) {
                    matches.push(TriggerMatch::new(
                        m.as_str(),
                        PATTERN_MATCH_CONFIDENCE,
                        group.category,
                        group.category.default_severity(),
                        MatchPosition::new(m.start(), m.end()),
                        MatchType::Pattern,
                    ));
                }
            }
        }

        matches
    }

    /// Number of compiled patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.iter().map(|g| g.regexes.len()).sum()
    }

    fn build_category_patterns(
        category: TriggerCategory,
        patterns: &[&str],
    ) -> Result<CategoryPatterns, regex::Error> {
        let regex_set = RegexSet::new(patterns)?;
        let regexes = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CategoryPatterns {
            category,
            regex_set,
            regexes,
        })
    }
}

impl DetectionStrategy for PatternMatcher {
    fn detect(
        &self,
        message: &NormalizedMessage,
        _context: &ConversationContext,
    ) -> Result<Vec<TriggerMatch>, AnalysisError> {
        Ok(self.find(message))
    }

    fn name(&self) -> &'static str {
        "pattern"
    }
}
