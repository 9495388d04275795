//! The aggregated outcome of classifying one message.

use serde::{Deserialize, Serialize};

use super::{Severity, TriggerCategory, TriggerMatch};
use crate::error::{check_confidence, ValidationError};

/// Confidence bonus per match, before the cap.
const MATCH_COUNT_BONUS: f32 = 0.1;

/// Maximum total bonus from the match count.
const MAX_MATCH_COUNT_BONUS: f32 = 0.3;

/// High-concern results escalate only above this confidence.
pub const HIGH_CONCERN_ESCALATION_CONFIDENCE: f32 = 0.8;

/// Risk factor recorded on the fail-safe result.
pub const ANALYSIS_FAILURE: &str = "analysis_failure";

/// Recommended action on the fail-safe result.
pub const IMMEDIATE_HUMAN_REVIEW: &str = "immediate_human_review";

/// Result of safety classification for a single inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyResult {
    /// Highest-priority severity across all matches.
    pub severity: Severity,
    /// Aggregate confidence (0.0 to 1.0).
    pub confidence: f32,
    /// Whether a human team must be notified.
    pub requires_escalation: bool,
    /// Every trigger that fired.
    pub matches: Vec<TriggerMatch>,
    /// Aggravating factors, e.g. `vulnerable_user`.
    pub risk_factors: Vec<String>,
    /// Observations about the conversation, e.g. `late_night_contact`.
    pub contextual_concerns: Vec<String>,
    /// Analysis duration in milliseconds.
    pub analysis_time_ms: u64,
    /// Actions the caller should take.
    pub recommended_actions: Vec<String>,
}

impl SafetyResult {
    /// Builds a result from matches, deriving severity, confidence and the
    /// escalation flag, then validating the whole value.
    pub fn from_matches(
        matches: Vec<TriggerMatch>,
        risk_factors: Vec<String>,
        contextual_concerns: Vec<String>,
        recommended_actions: Vec<String>,
        analysis_time_ms: u64,
    ) -> Result<Self, ValidationError> {
        let severity = aggregate_severity(&matches);
        let confidence = aggregate_confidence(&matches);
        let result = Self {
            severity,
            confidence,
            requires_escalation: escalation_required(severity, confidence),
            matches,
            risk_factors,
            contextual_concerns,
            analysis_time_ms,
            recommended_actions,
        };
        result.validate()?;
        Ok(result)
    }

    /// Creates an empty result for a message with no risk indicators.
    pub fn safe(analysis_time_ms: u64) -> Self {
        Self {
            severity: Severity::General,
            confidence: 0.0,
            requires_escalation: false,
            matches: Vec::new(),
            risk_factors: Vec::new(),
            contextual_concerns: Vec::new(),
            analysis_time_ms,
            recommended_actions: Vec::new(),
        }
    }

    /// The conservative result substituted when analysis itself fails.
    ///
    /// An internal fault must never read as "no risk detected".
    pub fn fail_safe(analysis_time_ms: u64) -> Self {
        Self {
            severity: Severity::Crisis,
            confidence: 1.0,
            requires_escalation: true,
            matches: Vec::new(),
            risk_factors: vec![ANALYSIS_FAILURE.to_string()],
            contextual_concerns: Vec::new(),
            analysis_time_ms,
            recommended_actions: vec![IMMEDIATE_HUMAN_REVIEW.to_string()],
        }
    }

    /// Returns true if this is the fail-safe result.
    pub fn is_fail_safe(&self) -> bool {
        self.matches.is_empty() && self.risk_factors.iter().any(|f| f == ANALYSIS_FAILURE)
    }

    /// Checks the data-model invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_confidence("confidence", self.confidence)?;
        for m in &self.matches {
            m.validate()?;
        }

        if self.is_fail_safe() {
            if self.severity != Severity::Crisis {
                return Err(ValidationError::SeverityMismatch {
                    declared: self.severity,
                    expected: Severity::Crisis,
                });
            }
            if !self.requires_escalation {
                return Err(ValidationError::EscalationFlagMismatch { expected: true });
            }
            return Ok(());
        }

        let expected = aggregate_severity(&self.matches);
        if self.severity != expected {
            return Err(ValidationError::SeverityMismatch {
                declared: self.severity,
                expected,
            });
        }

        let expected_flag = escalation_required(self.severity, self.confidence);
        if self.requires_escalation != expected_flag {
            return Err(ValidationError::EscalationFlagMismatch {
                expected: expected_flag,
            });
        }

        Ok(())
    }

    /// Returns true if any match belongs to the given category.
    pub fn has_category(&self, category: TriggerCategory) -> bool {
        self.matches.iter().any(|m| m.category == category)
    }

    /// Returns matches for a specific category.
    pub fn matches_for(&self, category: TriggerCategory) -> Vec<&TriggerMatch> {
        self.matches
            .iter()
            .filter(|m| m.category == category)
            .collect()
    }

    /// Returns the distinct categories present, in first-seen order.
    pub fn categories(&self) -> Vec<TriggerCategory> {
        let mut seen = Vec::new();
        for m in &self.matches {
            if !seen.contains(&m.category) {
                seen.push(m.category);
            }
        }
        seen
    }

    /// Returns the highest confidence match, if any.
    pub fn highest_confidence(&self) -> Option<&TriggerMatch> {
        self.matches
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Highest-priority severity across `matches`, `General` when empty.
pub fn aggregate_severity(matches: &[TriggerMatch]) -> Severity {
    matches
        .iter()
        .map(|m| m.severity)
        .max()
        .unwrap_or(Severity::General)
}

/// Mean confidence plus a match-count bonus, capped at 1.0.
pub fn aggregate_confidence(matches: &[TriggerMatch]) -> f32 {
    if matches.is_empty() {
        return 0.0;
    }
    let count = matches.len() as f32;
    let mean = matches.iter().map(|m| m.confidence).sum::<f32>() / count;
    let bonus = (MATCH_COUNT_BONUS * count).min(MAX_MATCH_COUNT_BONUS);
    (mean + bonus).clamp(0.0, 1.0)
}

/// Crisis always escalates; high concern escalates above the confidence bar.
pub fn escalation_required(severity: Severity, confidence: f32) -> bool {
    match severity {
        Severity::Crisis => true,
        Severity::HighConcern => confidence > HIGH_CONCERN_ESCALATION_CONFIDENCE,
        _ => false,
    }
}
