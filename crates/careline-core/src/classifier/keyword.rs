//! Exact catalog phrase detection.
//!
//! Every catalog phrase is tested for containment in the normalized message.
//! A hit is a verbatim match and always scores 1.0.

use std::sync::Arc;

use super::analyzer::{AnalysisError, DetectionStrategy};
use super::context::ConversationContext;
use super::normalize::NormalizedMessage;
use super::{MatchPosition, MatchType, TriggerCatalog, TriggerMatch};

/// Confidence assigned to verbatim catalog hits.
pub const EXACT_MATCH_CONFIDENCE: f32 = 1.0;

/// Exact-phrase detector backed by the trigger catalog.
pub struct KeywordMatcher {
    catalog: Arc<TriggerCatalog>,
}

impl KeywordMatcher {
    /// Creates a matcher over the given catalog.
    pub fn new(catalog: Arc<TriggerCatalog>) -> Self {
        Self { catalog }
    }

    /// Returns every catalog phrase found in the message, in catalog order.
    pub fn find(&self, message: &NormalizedMessage) -> Vec<TriggerMatch> {
        if message.is_empty() {
            return Vec::new();
        }

        self.catalog
            .phrases()
            .iter()
            .filter_map(|entry| {
                message.find_phrase(&entry.phrase).map(|(start, end)| {
                    TriggerMatch::new(
                        entry.phrase.clone(),
                        EXACT_MATCH_CONFIDENCE,
                        entry.category,
                        entry.severity,
                        MatchPosition::new(start, end),
                        MatchType::Exact,
                    )
                })
            })
            .collect()
    }
}

impl DetectionStrategy for KeywordMatcher {
    fn detect(
        &self,
        message: &NormalizedMessage,
        _context: &ConversationContext,
    ) -> Result<Vec<TriggerMatch>, AnalysisError> {
        Ok(self.find(message))
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}
