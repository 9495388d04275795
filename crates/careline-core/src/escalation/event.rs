//! Escalation events and their factory.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{
    MatchPosition, MatchType, SafetyResult, Severity, TriggerCategory, TriggerMatch,
};
use crate::error::{check_not_empty, ValidationError};

/// How the user would like to be contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    /// Voice call.
    Phone,
    /// Text message.
    Sms,
    /// Email.
    Email,
}

/// Contact details supplied by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactDetails {
    /// Name the nurse should ask for.
    #[serde(default)]
    pub name: Option<String>,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Preferred method.
    pub preferred_method: ContactMethod,
    /// Free-text availability, e.g. "weekday evenings".
    #[serde(default)]
    pub best_time: Option<String>,
}

impl ContactDetails {
    /// Phone contact.
    pub fn phone(number: impl Into<String>) -> Self {
        Self {
            name: None,
            phone: Some(number.into()),
            email: None,
            preferred_method: ContactMethod::Phone,
            best_time: None,
        }
    }

    /// Email contact.
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            name: None,
            phone: None,
            email: Some(address.into()),
            preferred_method: ContactMethod::Email,
            best_time: None,
        }
    }

    /// Checks that the preferred method is reachable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.preferred_method {
            ContactMethod::Phone | ContactMethod::Sms if !has(&self.phone) => Err(
                ValidationError::InvalidContact("preferred method needs a phone number".into()),
            ),
            ContactMethod::Email if !has(&self.email) => Err(ValidationError::InvalidContact(
                "preferred method needs an email address".into(),
            )),
            ContactMethod::Email if !self.email.as_deref().unwrap_or_default().contains('@') => {
                Err(ValidationError::InvalidContact("malformed email address".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Why the escalation was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    /// Crisis-tier risk.
    Crisis,
    /// The user asked a nurse to call back.
    NurseCallback,
    /// Elevated concern without a callback request.
    GeneralSupport,
}

impl EscalationType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationType::Crisis => "crisis",
            EscalationType::NurseCallback => "nurse_callback",
            EscalationType::GeneralSupport => "general_support",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "crisis" => Some(EscalationType::Crisis),
            "nurse_callback" => Some(EscalationType::NurseCallback),
            "general_support" => Some(EscalationType::GeneralSupport),
            _ => None,
        }
    }
}

/// How quickly the nurse team must respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    /// Low urgency.
    Low,
    /// Medium urgency.
    Medium,
    /// High urgency.
    High,
    /// Act now.
    Immediate,
}

impl UrgencyLevel {
    /// Urgency implied by a severity tier.
    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Crisis => UrgencyLevel::Immediate,
            Severity::HighConcern => UrgencyLevel::High,
            Severity::EmotionalSupport => UrgencyLevel::Medium,
            Severity::General => UrgencyLevel::Low,
        }
    }

    /// String form used in logs and alerts.
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Immediate => "immediate",
        }
    }

    /// Parses the string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(UrgencyLevel::Low),
            "medium" => Some(UrgencyLevel::Medium),
            "high" => Some(UrgencyLevel::High),
            "immediate" => Some(UrgencyLevel::Immediate),
            _ => None,
        }
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags recorded once dispatch has finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFlags {
    /// At least one channel delivered the alert.
    pub notification_sent: bool,
    /// The primary (nurse team) channel delivered the alert.
    pub nurse_team_alerted: bool,
    /// A response was shown to the user.
    pub response_generated: bool,
    /// When the flags were recorded; `None` until then.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// A detected need for human follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    id: Uuid,
    /// User identifier.
    pub user_id: String,
    /// Session identifier.
    pub session_id: String,
    /// Severity, equal to `safety_result.severity`.
    pub severity: Severity,
    /// Classification that triggered the escalation.
    pub safety_result: SafetyResult,
    /// The message that triggered the escalation.
    pub user_message: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    flags: DispatchFlags,
    /// How to reach the user.
    #[serde(default)]
    pub contact_details: Option<ContactDetails>,
    /// Why the escalation was raised.
    pub escalation_type: EscalationType,
    /// The user asked for a callback.
    pub callback_requested: bool,
    /// Preferred contact method, if known.
    #[serde(default)]
    pub preferred_contact_method: Option<ContactMethod>,
    /// Urgency derived from severity.
    pub urgency_level: UrgencyLevel,
}

impl EscalationEvent {
    /// Unique id, fixed at creation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Dispatch flags.
    pub fn flags(&self) -> &DispatchFlags {
        &self.flags
    }

    /// Returns true once dispatch flags have been recorded.
    pub fn is_dispatch_recorded(&self) -> bool {
        self.flags.recorded_at.is_some()
    }

    /// Records the dispatch outcome. Allowed once per event.
    pub fn record_dispatch(
        &mut self,
        notification_sent: bool,
        nurse_team_alerted: bool,
        response_generated: bool,
    ) -> Result<(), ValidationError> {
        if self.is_dispatch_recorded() {
            return Err(ValidationError::FlagsAlreadyRecorded(self.id));
        }
        self.flags = DispatchFlags {
            notification_sent,
            nurse_team_alerted,
            response_generated,
            recorded_at: Some(Utc::now()),
        };
        Ok(())
    }

    /// Checks the event invariants. Deserialized events should be
    /// re-validated before use.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId);
        }
        check_not_empty("user_id", &self.user_id)?;
        check_not_empty("session_id", &self.session_id)?;
        self.safety_result.validate()?;

        if self.severity != self.safety_result.severity {
            return Err(ValidationError::SeverityMismatch {
                declared: self.severity,
                expected: self.safety_result.severity,
            });
        }
        let expected_urgency = UrgencyLevel::from_severity(self.severity);
        if self.urgency_level != expected_urgency {
            return Err(ValidationError::UrgencyMismatch {
                severity: self.severity,
                urgency: self.urgency_level,
            });
        }
        if self.escalation_type == EscalationType::NurseCallback && !self.callback_requested {
            return Err(ValidationError::CallbackWithoutRequest);
        }
        if let Some(contact) = &self.contact_details {
            contact.validate()?;
        }
        Ok(())
    }
}

/// Builds validated escalation events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationEventFactory;

impl EscalationEventFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self
    }

    /// Creates an event from a classification.
    pub fn create(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
        safety_result: SafetyResult,
        contact_details: Option<ContactDetails>,
    ) -> Result<EscalationEvent, ValidationError> {
        let callback_requested = safety_result.has_category(TriggerCategory::CallbackRequest);
        let escalation_type = if safety_result.severity == Severity::Crisis {
            EscalationType::Crisis
        } else if callback_requested {
            EscalationType::NurseCallback
        } else {
            EscalationType::GeneralSupport
        };

        self.build(
            user_id,
            session_id,
            message,
            safety_result,
            contact_details,
            escalation_type,
            callback_requested,
        )
    }

    /// Creates a nurse-callback event from contact details alone.
    pub fn create_callback(
        &self,
        user_id: &str,
        session_id: &str,
        contact_details: ContactDetails,
        reason: Option<&str>,
    ) -> Result<EscalationEvent, ValidationError> {
        contact_details.validate()?;
        let message = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or("Nurse callback requested");

        let request = TriggerMatch::new(
            "callback requested",
            1.0,
            TriggerCategory::CallbackRequest,
            Severity::HighConcern,
            MatchPosition::new(0, 0),
            MatchType::Exact,
        );
        let safety_result = SafetyResult::from_matches(
            vec![request],
            Vec::new(),
            Vec::new(),
            vec![
                "nurse_notification".to_string(),
                "follow_up_scheduling".to_string(),
            ],
            0,
        )?;

        self.build(
            user_id,
            session_id,
            message,
            safety_result,
            Some(contact_details),
            EscalationType::NurseCallback,
            true,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
        safety_result: SafetyResult,
        contact_details: Option<ContactDetails>,
        escalation_type: EscalationType,
        callback_requested: bool,
    ) -> Result<EscalationEvent, ValidationError> {
        let severity = safety_result.severity;
        let preferred_contact_method = contact_details.as_ref().map(|c| c.preferred_method);
        let event = EscalationEvent {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            severity,
            safety_result,
            user_message: message.to_string(),
            timestamp: Utc::now(),
            flags: DispatchFlags::default(),
            contact_details,
            escalation_type,
            callback_requested,
            preferred_contact_method,
            urgency_level: UrgencyLevel::from_severity(severity),
        };
        event.validate()?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crisis_result() -> SafetyResult {
        SafetyResult::from_matches(
            vec![TriggerMatch::new(
                "kill myself",
                1.0,
                TriggerCategory::SuicideIdeation,
                Severity::Crisis,
                MatchPosition::new(10, 21),
                MatchType::Exact,
            )],
            Vec::new(),
            Vec::new(),
            vec!["immediate_nurse_notification".into()],
            3,
        )
        .unwrap()
    }

    fn callback_result() -> SafetyResult {
        SafetyResult::from_matches(
            vec![TriggerMatch::new(
                "call me back",
                1.0,
                TriggerCategory::CallbackRequest,
                Severity::HighConcern,
                MatchPosition::new(0, 12),
                MatchType::Exact,
            )],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            1,
        )
        .unwrap()
    }

    // === Factory ===

    #[test]
    fn create_crisis_event() {
        let event = EscalationEventFactory::new()
            .create("user-1", "session-1", "I want to kill myself", crisis_result(), None)
            .unwrap();
        assert!(!event.id().is_nil());
        assert_eq!(event.severity, Severity::Crisis);
        assert_eq!(event.escalation_type, EscalationType::Crisis);
        assert_eq!(event.urgency_level, UrgencyLevel::Immediate);
        assert!(!event.callback_requested);
        assert_eq!(event.flags(), &DispatchFlags::default());
    }

    #[test]
    fn ids_are_unique() {
        let factory = EscalationEventFactory::new();
        let a = factory.create("u", "s", "m", crisis_result(), None).unwrap();
        let b = factory.create("u", "s", "m", crisis_result(), None).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn callback_match_becomes_nurse_callback() {
        let event = EscalationEventFactory::new()
            .create(
                "u",
                "s",
                "please call me back",
                callback_result(),
                Some(ContactDetails::phone("07700 900123")),
            )
            .unwrap();
        assert_eq!(event.escalation_type, EscalationType::NurseCallback);
        assert!(event.callback_requested);
        assert_eq!(event.urgency_level, UrgencyLevel::High);
        assert_eq!(event.preferred_contact_method, Some(ContactMethod::Phone));
    }

    #[test]
    fn create_callback_synthesizes_high_concern() {
        let event = EscalationEventFactory::new()
            .create_callback("u", "s", ContactDetails::email("jo@example.org"), None)
            .unwrap();
        assert_eq!(event.escalation_type, EscalationType::NurseCallback);
        assert_eq!(event.severity, Severity::HighConcern);
        assert!(event.safety_result.requires_escalation);
        assert_eq!(event.user_message, "Nurse callback requested");
    }

    // === Validation ===

    #[test]
    fn empty_user_id_is_rejected() {
        let err = EscalationEventFactory::new()
            .create(" ", "s", "m", crisis_result(), None)
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyField("user_id"));
    }

    #[test]
    fn unreachable_contact_is_rejected() {
        let contact = ContactDetails {
            preferred_method: ContactMethod::Sms,
            ..ContactDetails::email("jo@example.org")
        };
        let err = EscalationEventFactory::new()
            .create_callback("u", "s", contact, None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidContact(_)));
    }

    #[test]
    fn tampered_urgency_fails_validation() {
        let mut event = EscalationEventFactory::new()
            .create("u", "s", "m", crisis_result(), None)
            .unwrap();
        event.urgency_level = UrgencyLevel::Low;
        assert!(matches!(
            event.validate(),
            Err(ValidationError::UrgencyMismatch { .. })
        ));
    }

    // === Dispatch flags ===

    #[test]
    fn flags_are_recorded_once() {
        let mut event = EscalationEventFactory::new()
            .create("u", "s", "m", crisis_result(), None)
            .unwrap();
        event.record_dispatch(true, true, true).unwrap();
        assert!(event.flags().notification_sent);
        assert!(event.is_dispatch_recorded());

        let err = event.record_dispatch(false, false, false).unwrap_err();
        assert_eq!(err, ValidationError::FlagsAlreadyRecorded(event.id()));
        assert!(event.flags().nurse_team_alerted);
    }

    // === Serialization ===

    #[test]
    fn event_round_trips_and_revalidates() {
        let mut event = EscalationEventFactory::new()
            .create(
                "u",
                "s",
                "call me back",
                callback_result(),
                Some(ContactDetails::phone("07700 900123")),
            )
            .unwrap();
        event.record_dispatch(true, false, true).unwrap();

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"escalation_type\":\"nurse_callback\""));
        assert!(json.contains("\"notification_sent\":true"));

        let decoded: EscalationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
        assert!(decoded.validate().is_ok());
    }

    #[test]
    fn decoded_event_with_nil_id_fails_validation() {
        let event = EscalationEventFactory::new()
            .create("u", "s", "m", crisis_result(), None)
            .unwrap();
        let mut value = serde_json::to_value(&event).unwrap();
        value["id"] = serde_json::json!(Uuid::nil());
        let decoded: EscalationEvent = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.validate(), Err(ValidationError::NilId));
    }
}
