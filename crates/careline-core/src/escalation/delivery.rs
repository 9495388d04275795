//! Delivery outcomes: per channel, per dispatch, and the status table entry.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two alert channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Primary chat-ops channel (nurse team room).
    Teams,
    /// Secondary email channel.
    Email,
}

impl ChannelKind {
    /// Both channels, primary first.
    pub fn all() -> [ChannelKind; 2] {
        [ChannelKind::Teams, ChannelKind::Email]
    }

    /// Human-readable label used in failure messages.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::Teams => "Teams",
            ChannelKind::Email => "Email",
        }
    }

    /// Stable identifier used in confirmations and storage.
    pub fn id(&self) -> &'static str {
        match self {
            ChannelKind::Teams => "teams",
            ChannelKind::Email => "email",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State of a single channel delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Not attempted yet.
    #[default]
    Pending,
    /// Accepted by the channel.
    Sent,
    /// Failed after the channel's retries.
    Failed,
}

impl DeliveryState {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryState::Pending),
            "sent" => Some(DeliveryState::Sent),
            "failed" => Some(DeliveryState::Failed),
            _ => None,
        }
    }
}

/// Who was notified about what, through which channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    /// Escalation being delivered.
    pub escalation_id: Uuid,
    /// Channel that produced this trail.
    pub channel: ChannelKind,
    /// When the delivery finished.
    pub timestamp: DateTime<Utc>,
    /// Channel-specific identifiers (HTTP status, recipients, ...).
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
}

/// Result reported by one channel for one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDeliveryResult {
    /// Sent or failed.
    pub status: DeliveryState,
    /// Message id assigned by the channel.
    pub message_id: Option<String>,
    /// When the channel accepted the message.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Retries used before the final outcome.
    pub retry_count: u32,
    /// Audit record.
    pub audit_trail: AuditTrail,
}

impl ChannelDeliveryResult {
    /// A successful delivery.
    pub fn sent(
        channel: ChannelKind,
        escalation_id: Uuid,
        message_id: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            status: DeliveryState::Sent,
            message_id: Some(message_id.into()),
            delivered_at: Some(now),
            retry_count,
            audit_trail: AuditTrail {
                escalation_id,
                channel,
                timestamp: now,
                identifiers: BTreeMap::new(),
            },
        }
    }

    /// Adds a channel-specific identifier to the audit trail.
    pub fn with_identifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.audit_trail.identifiers.insert(key.into(), value.into());
        self
    }

    /// Returns true if the channel accepted the message.
    pub fn is_sent(&self) -> bool {
        self.status == DeliveryState::Sent
    }
}

/// Proof of delivery for the channels that succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    /// Escalation that was delivered.
    pub escalation_id: Uuid,
    /// Primary channel message id, if it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teams_message_id: Option<String>,
    /// Secondary channel message id, if it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_message_id: Option<String>,
    /// When the dispatch finished.
    pub delivered_at: DateTime<Utc>,
    /// Identifiers of succeeded channels only.
    pub channels: Vec<String>,
}

/// Aggregate outcome of a dual-channel dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualDeliveryResult {
    /// Primary channel succeeded.
    pub teams_delivered: bool,
    /// Secondary channel succeeded.
    pub email_delivered: bool,
    /// At least one channel succeeded.
    pub overall_success: bool,
    /// `"<Channel>: <reason>"` for each failed channel.
    pub failures: Vec<String>,
    /// Confirmation for the succeeded channels.
    pub delivery_confirmation: DeliveryConfirmation,
    /// Retries across both channels.
    pub retry_count: u32,
    /// Per-channel results for channels that succeeded.
    #[serde(default)]
    pub channel_results: Vec<ChannelDeliveryResult>,
}

impl DualDeliveryResult {
    /// Overall status derived from the channel flags.
    pub fn overall_status(&self) -> OverallStatus {
        OverallStatus::from_flags(self.teams_delivered, self.email_delivered)
    }
}

/// Aggregate state of an escalation's delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Dispatch in progress.
    #[default]
    Pending,
    /// Every channel succeeded.
    Sent,
    /// Some channels succeeded.
    Partial,
    /// No channel succeeded.
    Failed,
}

impl OverallStatus {
    /// Derives the status from per-channel success flags.
    pub fn from_flags(teams: bool, email: bool) -> Self {
        match (teams, email) {
            (true, true) => OverallStatus::Sent,
            (false, false) => OverallStatus::Failed,
            _ => OverallStatus::Partial,
        }
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Pending => "pending",
            OverallStatus::Sent => "sent",
            OverallStatus::Partial => "partial",
            OverallStatus::Failed => "failed",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OverallStatus::Pending),
            "sent" => Some(OverallStatus::Sent),
            "partial" => Some(OverallStatus::Partial),
            "failed" => Some(OverallStatus::Failed),
            _ => None,
        }
    }

    /// Returns true once dispatch has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OverallStatus::Pending)
    }
}

/// Entry in the delivery-status table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Escalation id.
    pub escalation_id: Uuid,
    /// Primary channel state.
    pub teams: DeliveryState,
    /// Secondary channel state.
    pub email: DeliveryState,
    /// Aggregate state.
    pub overall_status: OverallStatus,
    /// Failure reasons, if any.
    #[serde(default)]
    pub failures: Vec<String>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl DeliveryStatus {
    /// Status for a dispatch that has just started.
    pub fn pending(escalation_id: Uuid) -> Self {
        Self {
            escalation_id,
            teams: DeliveryState::Pending,
            email: DeliveryState::Pending,
            overall_status: OverallStatus::Pending,
            failures: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Terminal status for a finished dispatch.
    pub fn finished(
        escalation_id: Uuid,
        teams_delivered: bool,
        email_delivered: bool,
        failures: Vec<String>,
    ) -> Self {
        let state = |ok: bool| {
            if ok {
                DeliveryState::Sent
            } else {
                DeliveryState::Failed
            }
        };
        Self {
            escalation_id,
            teams: state(teams_delivered),
            email: state(email_delivered),
            overall_status: OverallStatus::from_flags(teams_delivered, email_delivered),
            failures,
            updated_at: Utc::now(),
        }
    }

    /// State of one channel.
    pub fn channel(&self, kind: ChannelKind) -> DeliveryState {
        match kind {
            ChannelKind::Teams => self.teams,
            ChannelKind::Email => self.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_labels_and_ids() {
        assert_eq!(ChannelKind::Teams.label(), "Teams");
        assert_eq!(ChannelKind::Email.label(), "Email");
        assert_eq!(ChannelKind::Teams.id(), "teams");
        assert_eq!(ChannelKind::Email.to_string(), "Email");
    }

    #[test]
    fn overall_status_from_flags() {
        assert_eq!(OverallStatus::from_flags(true, true), OverallStatus::Sent);
        assert_eq!(OverallStatus::from_flags(true, false), OverallStatus::Partial);
        assert_eq!(OverallStatus::from_flags(false, true), OverallStatus::Partial);
        assert_eq!(OverallStatus::from_flags(false, false), OverallStatus::Failed);
        assert!(!OverallStatus::Pending.is_terminal());
        assert!(OverallStatus::Partial.is_terminal());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            OverallStatus::Pending,
            OverallStatus::Sent,
            OverallStatus::Partial,
            OverallStatus::Failed,
        ] {
            assert_eq!(OverallStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeliveryState::parse("sent"), Some(DeliveryState::Sent));
        assert_eq!(DeliveryState::parse("bogus"), None);
    }

    #[test]
    fn finished_status_sets_channel_states() {
        let id = Uuid::new_v4();
        let status = DeliveryStatus::finished(id, true, false, vec!["Email: SMTP down".into()]);
        assert_eq!(status.channel(ChannelKind::Teams), DeliveryState::Sent);
        assert_eq!(status.channel(ChannelKind::Email), DeliveryState::Failed);
        assert_eq!(status.overall_status, OverallStatus::Partial);
    }

    #[test]
    fn sent_result_carries_audit_identifiers() {
        let id = Uuid::new_v4();
        let result = ChannelDeliveryResult::sent(ChannelKind::Teams, id, "A1", 1)
            .with_identifier("http_status", "200");
        assert!(result.is_sent());
        assert_eq!(result.message_id.as_deref(), Some("A1"));
        assert_eq!(result.audit_trail.escalation_id, id);
        assert_eq!(result.audit_trail.identifiers["http_status"], "200");
    }

    #[test]
    fn confirmation_omits_missing_message_ids() {
        let confirmation = DeliveryConfirmation {
            escalation_id: Uuid::new_v4(),
            teams_message_id: Some("A1".into()),
            email_message_id: None,
            delivered_at: Utc::now(),
            channels: vec!["teams".into()],
        };
        let json = serde_json::to_string(&confirmation).unwrap();
        assert!(json.contains("teams_message_id"));
        assert!(!json.contains("email_message_id"));
    }
}
