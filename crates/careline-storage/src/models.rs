//! Data models for storage.

use careline_core::escalation::{EscalationType, UrgencyLevel};
use careline_core::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored escalation as listed (stores hash and preview, not the message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Escalation id.
    pub id: Uuid,
    /// User identifier.
    pub user_id: String,
    /// Session identifier.
    pub session_id: String,
    /// Severity tier.
    pub severity: Severity,
    /// Why the escalation was raised.
    pub escalation_type: EscalationType,
    /// Urgency derived from severity.
    pub urgency: UrgencyLevel,
    /// SHA-256 hash of the triggering message.
    pub message_hash: String,
    /// Short preview of the triggering message.
    pub message_preview: String,
    /// At least one channel delivered the alert.
    pub notification_sent: bool,
    /// The nurse team channel delivered the alert.
    pub nurse_team_alerted: bool,
    /// A response was shown to the user.
    pub response_generated: bool,
    /// When the dispatch flags were recorded.
    pub flags_recorded_at: Option<DateTime<Utc>>,
    /// Event creation time.
    pub created_at: DateTime<Utc>,
}
