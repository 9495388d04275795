//! Channel-agnostic alert payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{ContactDetails, EscalationEvent, EscalationType, UrgencyLevel};
use crate::classifier::Severity;
use crate::error::{check_not_empty, ValidationError};

/// What the nurse team receives. Derived from an [`EscalationEvent`] and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Escalation id.
    pub escalation_id: Uuid,
    /// Severity tier.
    pub severity: Severity,
    /// User identifier.
    pub user_id: String,
    /// One-line summary for the alert title.
    pub summary: String,
    /// Distinct triggers that fired.
    pub trigger_matches: Vec<String>,
    /// Escalation creation time.
    pub timestamp: DateTime<Utc>,
    /// Required response speed.
    pub urgency: UrgencyLevel,
    /// The user asked for a callback.
    pub requires_callback: bool,
    /// How to reach the user.
    #[serde(default)]
    pub contact_details: Option<ContactDetails>,
}

impl NotificationPayload {
    /// Builds the payload for a validated event.
    pub fn from_event(event: &EscalationEvent) -> Result<Self, ValidationError> {
        event.validate()?;

        let mut trigger_matches: Vec<String> = Vec::new();
        for m in &event.safety_result.matches {
            if !trigger_matches.contains(&m.trigger) {
                trigger_matches.push(m.trigger.clone());
            }
        }

        let payload = Self {
            escalation_id: event.id(),
            severity: event.severity,
            user_id: event.user_id.clone(),
            summary: summarize(event),
            trigger_matches,
            timestamp: event.timestamp,
            urgency: event.urgency_level,
            requires_callback: event.callback_requested,
            contact_details: event.contact_details.clone(),
        };
        payload.validate()?;
        Ok(payload)
    }

    /// Checks the payload invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.escalation_id.is_nil() {
            return Err(ValidationError::NilId);
        }
        check_not_empty("user_id", &self.user_id)?;
        check_not_empty("summary", &self.summary)?;
        if self.urgency != UrgencyLevel::from_severity(self.severity) {
            return Err(ValidationError::UrgencyMismatch {
                severity: self.severity,
                urgency: self.urgency,
            });
        }
        if let Some(contact) = &self.contact_details {
            contact.validate()?;
        }
        Ok(())
    }

    /// Alert title, e.g. `[IMMEDIATE] crisis escalation`.
    pub fn title(&self) -> String {
        format!(
            "[{}] {} escalation",
            self.urgency.as_str().to_uppercase(),
            self.severity
        )
    }
}

fn summarize(event: &EscalationEvent) -> String {
    let result = &event.safety_result;
    if result.is_fail_safe() {
        return format!(
            "Automatic analysis failed for user {}; immediate human review required",
            event.user_id
        );
    }

    let categories: Vec<&str> = result.categories().iter().map(|c| c.as_str()).collect();
    let kind = match event.escalation_type {
        EscalationType::Crisis => "crisis escalation".to_string(),
        EscalationType::NurseCallback => format!("{} nurse callback", event.severity),
        EscalationType::GeneralSupport => format!("{} support request", event.severity),
    };
    let mut summary = format!("{} for user {}", kind, event.user_id);
    if !categories.is_empty() {
        summary.push_str(&format!(
            ": {} (confidence {:.2})",
            categories.join(", "),
            result.confidence
        ));
    }
    if event.callback_requested {
        summary.push_str("; callback requested");
    }
    summary
}
