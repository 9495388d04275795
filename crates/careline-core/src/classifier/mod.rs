//! Risk classification of user messages.
//!
//! Four strategies run over a normalized copy of each message:
//! exact catalog phrases, fuzzy crisis phrases, curated paraphrase
//! patterns, and conversation context. Their matches are merged by
//! [`MessageClassifier`] into a single [`SafetyResult`].

mod analyzer;
mod catalog;
mod category;
mod context;
mod fuzzy;
mod keyword;
mod normalize;
mod pattern;
mod result;

pub use analyzer::{AnalysisError, DetectionStrategy, MessageClassifier};
pub use catalog::{CatalogPhrase, CatalogSummary, TriggerCatalog};
pub use category::{MatchPosition, MatchType, Severity, TriggerCategory, TriggerMatch};
pub use context::{
    distress_term_count, ContextAnalyzer, ConversationContext, HistoryMessage, UserProfile,
};
pub use fuzzy::{
    levenshtein, similarity, FuzzyMatcher, DEFAULT_FUZZY_THRESHOLD, NEAR_MISS_WORDS,
};
pub use keyword::{KeywordMatcher, EXACT_MATCH_CONFIDENCE};
pub use normalize::{normalize, NormalizedMessage};
pub use pattern::{PatternMatcher, PATTERN_MATCH_CONFIDENCE};
pub use result::{
    aggregate_confidence, aggregate_severity, escalation_required, SafetyResult,
    ANALYSIS_FAILURE, HIGH_CONCERN_ESCALATION_CONFIDENCE, IMMEDIATE_HUMAN_REVIEW,
};
