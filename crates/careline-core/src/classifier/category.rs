//! Risk categories, severity tiers and individual trigger matches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{check_confidence, ValidationError};

/// Severity tier of a match or of a whole message.
///
/// Variants are declared in ascending priority so that `Ord` gives
/// `Crisis > HighConcern > EmotionalSupport > General`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No specific risk detected.
    #[default]
    General,
    /// Low-risk emotional content that deserves a supportive reply.
    EmotionalSupport,
    /// Concerning content that may need a nurse follow-up.
    HighConcern,
    /// Immediate risk to life or safety.
    Crisis,
}

impl Severity {
    /// Returns all tiers, highest priority first.
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Crisis,
            Severity::HighConcern,
            Severity::EmotionalSupport,
            Severity::General,
        ]
    }

    /// Returns the wire name of this tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::General => "general",
            Severity::EmotionalSupport => "emotional_support",
            Severity::HighConcern => "high_concern",
            Severity::Crisis => "crisis",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::all()
            .iter()
            .copied()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| format!("unknown severity: {s}"))
    }
}

/// Risk category a trigger belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCategory {
    /// Thoughts of ending one's life.
    SuicideIdeation,
    /// Intent or acts of self-injury.
    SelfHarm,
    /// Acute distress the user says they cannot cope with.
    SevereDistress,
    /// Symptoms such as chest pain or being unable to breathe.
    LifeThreatening,
    /// Heavy or uncontrolled bleeding.
    SevereBleeding,
    /// The user is being threatened or is unsafe where they are.
    ImmediateDanger,
    /// Explicit request to be contacted by a nurse.
    CallbackRequest,
    /// Low mood, loneliness, sadness.
    EmotionalDistress,
    /// Worry, fear, panic.
    AnxietyIndicators,
    /// Routine pain descriptions.
    PainIndicators,
    /// General health questions and worries.
    GeneralConcern,
}

impl TriggerCategory {
    /// Returns all categories.
    pub fn all() -> &'static [TriggerCategory] {
        &[
            TriggerCategory::SuicideIdeation,
            TriggerCategory::SelfHarm,
            TriggerCategory::SevereDistress,
            TriggerCategory::LifeThreatening,
            TriggerCategory::SevereBleeding,
            TriggerCategory::ImmediateDanger,
            TriggerCategory::CallbackRequest,
            TriggerCategory::EmotionalDistress,
            TriggerCategory::AnxietyIndicators,
            TriggerCategory::PainIndicators,
            TriggerCategory::GeneralConcern,
        ]
    }

    /// Returns the wire name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerCategory::SuicideIdeation => "suicide_ideation",
            TriggerCategory::SelfHarm => "self_harm",
            TriggerCategory::SevereDistress => "severe_distress",
            TriggerCategory::LifeThreatening => "life_threatening",
            TriggerCategory::SevereBleeding => "severe_bleeding",
            TriggerCategory::ImmediateDanger => "immediate_danger",
            TriggerCategory::CallbackRequest => "callback_request",
            TriggerCategory::EmotionalDistress => "emotional_distress",
            TriggerCategory::AnxietyIndicators => "anxiety_indicators",
            TriggerCategory::PainIndicators => "pain_indicators",
            TriggerCategory::GeneralConcern => "general_concern",
        }
    }

    /// Severity used when a match is produced outside the catalog (patterns).
    pub fn default_severity(&self) -> Severity {
        match self {
            TriggerCategory::SuicideIdeation
            | TriggerCategory::SelfHarm
            | TriggerCategory::LifeThreatening
            | TriggerCategory::SevereBleeding
            | TriggerCategory::ImmediateDanger => Severity::Crisis,
            TriggerCategory::SevereDistress | TriggerCategory::CallbackRequest => {
                Severity::HighConcern
            }
            TriggerCategory::EmotionalDistress | TriggerCategory::AnxietyIndicators => {
                Severity::EmotionalSupport
            }
            TriggerCategory::PainIndicators | TriggerCategory::GeneralConcern => {
                Severity::General
            }
        }
    }

    /// Returns true for categories that call for emergency services.
    pub fn is_medical_emergency(&self) -> bool {
        matches!(
            self,
            TriggerCategory::LifeThreatening | TriggerCategory::SevereBleeding
        )
    }

    /// Returns true for mental-health crisis categories.
    pub fn is_mental_health_crisis(&self) -> bool {
        matches!(
            self,
            TriggerCategory::SuicideIdeation
                | TriggerCategory::SelfHarm
                | TriggerCategory::SevereDistress
        )
    }
}

impl fmt::Display for TriggerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerCategory::all()
            .iter()
            .copied()
            .find(|cat| cat.as_str() == s)
            .ok_or_else(|| format!("unknown trigger category: {s}"))
    }
}

/// Detection strategy that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Verbatim catalog phrase.
    Exact,
    /// Near-miss of a crisis phrase (typos, contractions).
    Fuzzy,
    /// Curated paraphrase regex.
    Pattern,
    /// Derived from conversation history or the user profile.
    Context,
}

/// Byte offsets of a match within the normalized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchPosition {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl MatchPosition {
    /// Creates a new position.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns true if the two spans share at least one byte.
    pub fn overlaps(&self, other: &MatchPosition) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A single trigger hit within one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMatch {
    /// The phrase or pattern that matched.
    pub trigger: String,
    /// Confidence score (0.0 to 1.0).
    pub confidence: f32,
    /// Risk category.
    pub category: TriggerCategory,
    /// Severity tier of this individual match.
    pub severity: Severity,
    /// Where the match sits in the normalized message.
    pub position: MatchPosition,
    /// Strategy that produced the match.
    pub match_type: MatchType,
}

impl TriggerMatch {
    /// Creates a new match.
    pub fn new(
        trigger: impl Into<String>,
        confidence: f32,
        category: TriggerCategory,
        severity: Severity,
        position: MatchPosition,
        match_type: MatchType,
    ) -> Self {
        Self {
            trigger: trigger.into(),
            confidence,
            category,
            severity,
            position,
            match_type,
        }
    }

    /// Checks the match invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_confidence("match confidence", self.confidence)?;
        if self.position.start > self.position.end {
            return Err(ValidationError::InvalidPosition {
                start: self.position.start,
                end: self.position.end,
            });
        }
        Ok(())
    }
}
