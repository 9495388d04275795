//! Conversation context and the contextual detection strategy.
//!
//! The conversation engine owns history and profiles; this module only
//! defines the shape it hands to the classifier and the rules applied to it:
//!
//! - Repeated distress vocabulary across the last hour of history raises a
//!   high-concern match.
//! - Distress vocabulary from a user flagged as vulnerable raises a crisis
//!   match.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::analyzer::{AnalysisError, DetectionStrategy};
use super::normalize::{count_on_word_boundaries, normalize, NormalizedMessage};
use super::{MatchPosition, MatchType, Severity, TriggerCategory, TriggerMatch};

/// Confidence of the repeated-distress match.
pub const REPEATED_DISTRESS_CONFIDENCE: f32 = 0.8;

/// Confidence of the vulnerable-user match.
pub const VULNERABLE_DISTRESS_CONFIDENCE: f32 = 0.9;

/// Messages within this many minutes count towards message frequency.
const FREQUENCY_WINDOW_MINUTES: i64 = 10;

/// Message count within the frequency window that is considered high.
const HIGH_FREQUENCY_MESSAGES: usize = 5;

/// Vocabulary that signals emotional distress.
const DISTRESS_VOCABULARY: &[&str] = &[
    "sad",
    "depressed",
    "hopeless",
    "worthless",
    "alone",
    "lonely",
    "scared",
    "frightened",
    "anxious",
    "panic",
    "overwhelmed",
    "exhausted",
    "crying",
    "cant cope",
    "desperate",
    "empty",
    "numb",
    "trapped",
    "helpless",
    "miserable",
];

/// A previous user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Raw message text.
    pub text: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
}

impl HistoryMessage {
    /// Creates a history entry.
    pub fn new(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            timestamp,
        }
    }
}

/// What the conversation engine knows about the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Vulnerability flags, e.g. `postnatal`, `previous_crisis`.
    #[serde(default)]
    pub vulnerability_flags: Vec<String>,
    /// How many times this user has been escalated before.
    #[serde(default)]
    pub previous_escalations: u32,
}

impl UserProfile {
    /// Returns true if any vulnerability flag is set.
    pub fn is_vulnerable(&self) -> bool {
        !self.vulnerability_flags.is_empty()
    }
}

/// Everything the classifier may consider beyond the message itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// User identifier.
    pub user_id: String,
    /// Conversation session identifier.
    pub session_id: String,
    /// Earlier user messages, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    /// Optional user profile.
    #[serde(default)]
    pub profile: Option<UserProfile>,
    /// When the current message arrived. Lookback windows are measured
    /// from here, which keeps classification deterministic.
    pub received_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Creates a context with no history, received now.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            history: Vec::new(),
            profile: None,
            received_at: Utc::now(),
        }
    }

    /// Sets the message history.
    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    /// Sets the user profile.
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Sets the time the current message was received.
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    /// History entries received within `window` before the current message.
    pub fn recent_messages(&self, window: Duration) -> impl Iterator<Item = &HistoryMessage> {
        let since = self.received_at - window;
        let until = self.received_at;
        self.history
            .iter()
            .filter(move |m| m.timestamp >= since && m.timestamp <= until)
    }

    /// Returns true if the profile carries a vulnerability flag.
    pub fn is_vulnerable(&self) -> bool {
        self.profile.as_ref().is_some_and(UserProfile::is_vulnerable)
    }

    /// Number of earlier escalations recorded on the profile.
    pub fn previous_escalations(&self) -> u32 {
        self.profile
            .as_ref()
            .map_or(0, |p| p.previous_escalations)
    }

    /// Observations about timing and pacing of the conversation.
    pub fn contextual_concerns(&self) -> Vec<String> {
        let mut concerns = Vec::new();
        let recent = self
            .recent_messages(Duration::minutes(FREQUENCY_WINDOW_MINUTES))
            .count();
        if recent >= HIGH_FREQUENCY_MESSAGES {
            concerns.push("high_message_frequency".to_string());
        }
        let hour = self.received_at.hour();
        if hour >= 23 || hour < 6 {
            concerns.push("late_night_contact".to_string());
        }
        concerns
    }
}

/// Counts distress-vocabulary occurrences in normalized text.
pub fn distress_term_count(normalized: &str) -> usize {
    DISTRESS_VOCABULARY
        .iter()
        .map(|term| count_on_word_boundaries(normalized, term))
        .sum()
}

/// Contextual detection strategy.
pub struct ContextAnalyzer {
    lookback: Duration,
    repeat_threshold: usize,
}

impl ContextAnalyzer {
    /// Creates an analyzer with the given lookback window and threshold.
    pub fn new(lookback_minutes: i64, repeat_threshold: usize) -> Self {
        Self {
            lookback: Duration::minutes(lookback_minutes.max(0)),
            repeat_threshold: repeat_threshold.max(1),
        }
    }

    /// Applies the contextual rules.
    pub fn find(
        &self,
        message: &NormalizedMessage,
        context: &ConversationContext,
    ) -> Vec<TriggerMatch> {
        let mut matches = Vec::new();
        let whole = MatchPosition::new(0, message.text().len());

        let repeated: usize = context
            .recent_messages(self.lookback)
            .map(|m| distress_term_count(&normalize(&m.text)))
            .sum();
        if repeated >= self.repeat_threshold {
            matches.push(TriggerMatch::new(
                "repeated distress in recent messages",
                REPEATED_DISTRESS_CONFIDENCE,
                TriggerCategory::SevereDistress,
                Severity::HighConcern,
                whole,
                MatchType::Context,
            ));
        }

        if context.is_vulnerable() && distress_term_count(message.text()) > 0 {
            matches.push(TriggerMatch::new(
                "distress from vulnerable user",
                VULNERABLE_DISTRESS_CONFIDENCE,
                TriggerCategory::SevereDistress,
                Severity::Crisis,
                whole,
                MatchType::Context,
            ));
        }

        matches
    }
}

impl DetectionStrategy for ContextAnalyzer {
    fn detect(
        &self,
        message: &NormalizedMessage,
        context: &ConversationContext,
    ) -> Result<Vec<TriggerMatch>, AnalysisError> {
        Ok(self.find(message, context))
    }

    fn name(&self) -> &'static str {
        "context"
    }
}
