//! Validation errors for the safety data model.
//!
//! Every entity that crosses a component boundary (`SafetyResult`,
//! `EscalationEvent`, `NotificationPayload`) is checked against its
//! invariants when it is constructed. Violations surface here and are never
//! silently coerced.

use thiserror::Error;
use uuid::Uuid;

use crate::classifier::Severity;
use crate::escalation::UrgencyLevel;

/// A data-model invariant violation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A confidence score was outside `[0, 1]` or not finite.
    #[error("{field} must be within [0, 1], got {value}")]
    ConfidenceOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f32,
    },

    /// The declared severity does not equal the highest severity in the matches.
    #[error("severity {declared} does not match aggregated match severity {expected}")]
    SeverityMismatch {
        /// Severity stored on the entity.
        declared: Severity,
        /// Severity derived from the matches.
        expected: Severity,
    },

    /// `requires_escalation` disagrees with the escalation rule.
    #[error("requires_escalation should be {expected} for this severity and confidence")]
    EscalationFlagMismatch {
        /// The value the rule demands.
        expected: bool,
    },

    /// A match position has `start > end`.
    #[error("invalid match position {start}..{end}")]
    InvalidPosition {
        /// Start offset.
        start: usize,
        /// End offset.
        end: usize,
    },

    /// A required text field was empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// The urgency level is not the one derived from the severity.
    #[error("urgency {urgency} is inconsistent with severity {severity}")]
    UrgencyMismatch {
        /// Severity of the event.
        severity: Severity,
        /// Urgency carried by the event.
        urgency: UrgencyLevel,
    },

    /// Contact details are unusable (no reachable method, or the preferred
    /// method has no matching address).
    #[error("invalid contact details: {0}")]
    InvalidContact(String),

    /// A nurse-callback escalation without a callback request.
    #[error("nurse_callback escalations must have callback_requested set")]
    CallbackWithoutRequest,

    /// Dispatch flags were already recorded for this escalation.
    #[error("dispatch flags already recorded for escalation {0}")]
    FlagsAlreadyRecorded(Uuid),

    /// The escalation id is the nil UUID.
    #[error("escalation id must not be nil")]
    NilId,
}

/// Checks that a confidence value is finite and within `[0, 1]`.
pub(crate) fn check_confidence(field: &'static str, value: f32) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::ConfidenceOutOfRange { field, value })
    }
}

/// Checks that a text field has non-whitespace content.
pub(crate) fn check_not_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}
