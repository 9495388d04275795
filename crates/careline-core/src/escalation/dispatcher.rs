//! Dual-channel escalation dispatcher.
//!
//! Both channels are sent to concurrently and both outcomes are awaited.
//! One success is enough for the escalation to count as delivered; only a
//! total failure is returned as an error.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::channel::{AlertChannel, ChannelError};
use super::delivery::{
    ChannelDeliveryResult, ChannelKind, DeliveryConfirmation, DeliveryStatus, DualDeliveryResult,
    OverallStatus,
};
use super::payload::NotificationPayload;
use crate::config::LegacyAlertConfig;
use crate::error::ValidationError;

/// Errors returned by the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No channel delivered the alert. Nobody on the nurse team knows.
    #[error("All notification channels failed: {}", .failures.join("; "))]
    AllChannelsFailed {
        /// Escalation that could not be delivered.
        escalation_id: Uuid,
        /// `"<Channel>: <reason>"` per channel.
        failures: Vec<String>,
    },

    /// The single-channel crisis alert ran out of attempts.
    #[error("crisis alert failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        last: String,
    },

    /// The single-channel crisis alert has no primary channel.
    #[error("primary alert channel not configured")]
    PrimaryNotConfigured,

    /// The escalation already has a delivery status. A repeat notification
    /// needs a new escalation.
    #[error("escalation {escalation_id} was already dispatched ({})", .status.as_str())]
    AlreadyDispatched {
        /// Escalation id.
        escalation_id: Uuid,
        /// Status recorded by the earlier dispatch.
        status: OverallStatus,
    },

    /// A channel was registered in the slot of the other kind.
    #[error("{} channel registered in the {} slot", .found.label(), .slot.label())]
    ChannelMismatch {
        /// Slot the channel was passed for.
        slot: ChannelKind,
        /// Kind the channel reports.
        found: ChannelKind,
    },

    /// The payload failed validation.
    #[error("invalid notification payload: {0}")]
    Validation(#[from] ValidationError),
}

/// Sends escalations to the nurse team over two independent channels.
pub struct EscalationDispatcher {
    teams: Option<Arc<dyn AlertChannel>>,
    email: Option<Arc<dyn AlertChannel>>,
    statuses: Arc<RwLock<HashMap<Uuid, DeliveryStatus>>>,
    legacy: LegacyAlertConfig,
}

impl EscalationDispatcher {
    /// Creates a dispatcher. Either channel may be absent, but a present
    /// channel must report the kind of its slot.
    pub fn new(
        teams: Option<Arc<dyn AlertChannel>>,
        email: Option<Arc<dyn AlertChannel>>,
    ) -> Result<Self, DispatchError> {
        for (slot, channel) in [(ChannelKind::Teams, &teams), (ChannelKind::Email, &email)] {
            if let Some(channel) = channel {
                let found = channel.kind();
                if found != slot {
                    return Err(DispatchError::ChannelMismatch { slot, found });
                }
            }
        }

        Ok(Self {
            teams,
            email,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            legacy: LegacyAlertConfig::default(),
        })
    }

    /// Sets the retry settings of [`send_crisis_alert`](Self::send_crisis_alert).
    pub fn with_legacy_config(mut self, legacy: LegacyAlertConfig) -> Self {
        self.legacy = legacy;
        self
    }

    /// Returns true if the channel slot is filled.
    pub fn is_configured(&self, kind: ChannelKind) -> bool {
        self.channel(kind).is_some()
    }

    fn channel(&self, kind: ChannelKind) -> Option<&Arc<dyn AlertChannel>> {
        match kind {
            ChannelKind::Teams => self.teams.as_ref(),
            ChannelKind::Email => self.email.as_ref(),
        }
    }

    /// Delivers the payload on both channels.
    ///
    /// Each escalation is dispatched once; its status is terminal after the
    /// first aggregation.
    pub async fn dispatch(
        &self,
        payload: &NotificationPayload,
    ) -> Result<DualDeliveryResult, DispatchError> {
        payload.validate()?;
        let escalation_id = payload.escalation_id;
        self.begin(escalation_id)?;

        debug!(%escalation_id, urgency = %payload.urgency, "Dispatching escalation");

        let (teams, email) = tokio::join!(
            self.deliver(ChannelKind::Teams, payload),
            self.deliver(ChannelKind::Email, payload),
        );

        let mut failures = Vec::new();
        let mut retry_count = 0;
        let mut teams_delivered = false;
        let mut email_delivered = false;
        let mut channel_results = Vec::new();
        let mut confirmation = DeliveryConfirmation {
            escalation_id,
            teams_message_id: None,
            email_message_id: None,
            delivered_at: Utc::now(),
            channels: Vec::new(),
        };

        for (kind, outcome) in [(ChannelKind::Teams, teams), (ChannelKind::Email, email)] {
            match outcome {
                Ok(result) => {
                    retry_count += result.retry_count;
                    match kind {
                        ChannelKind::Teams => {
                            teams_delivered = true;
                            confirmation.teams_message_id = result.message_id.clone();
                        }
                        ChannelKind::Email => {
                            email_delivered = true;
                            confirmation.email_message_id = result.message_id.clone();
                        }
                    }
                    confirmation.channels.push(kind.id().to_string());
                    channel_results.push(result);
                }
                Err(e) => {
                    retry_count += e.retry_count();
                    failures.push(format!("{}: {}", kind.label(), e));
                }
            }
        }

        let overall_success = teams_delivered || email_delivered;

        self.record_status(DeliveryStatus::finished(
            escalation_id,
            teams_delivered,
            email_delivered,
            failures.clone(),
        ));

        if !overall_success {
            error!(
                severity = "CRITICAL",
                %escalation_id,
                failures = %failures.join("; "),
                "All notification channels failed"
            );
            return Err(DispatchError::AllChannelsFailed {
                escalation_id,
                failures,
            });
        }

        if failures.is_empty() {
            info!(%escalation_id, retry_count, "Escalation delivered on all channels");
        } else {
            warn!(
                %escalation_id,
                failures = %failures.join("; "),
                "Partial notification failure"
            );
        }

        Ok(DualDeliveryResult {
            teams_delivered,
            email_delivered,
            overall_success,
            failures,
            delivery_confirmation: confirmation,
            retry_count,
            channel_results,
        })
    }

    async fn deliver(
        &self,
        kind: ChannelKind,
        payload: &NotificationPayload,
    ) -> Result<ChannelDeliveryResult, ChannelError> {
        let Some(channel) = self.channel(kind) else {
            warn!(
                channel = kind.id(),
                escalation_id = %payload.escalation_id,
                "Alert channel not configured"
            );
            return Err(ChannelError::NotConfigured);
        };

        match channel.send(payload).await {
            Ok(result) if result.is_sent() => Ok(result),
            Ok(_) => Err(ChannelError::Transport("delivery not confirmed".to_string())),
            Err(e) => Err(e),
        }
    }

    /// Recorded delivery status for an escalation.
    pub fn status(&self, escalation_id: Uuid) -> Option<DeliveryStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&escalation_id)
            .cloned()
    }

    /// Marks the escalation pending, unless it already has a status.
    fn begin(&self, escalation_id: Uuid) -> Result<(), DispatchError> {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = statuses.get(&escalation_id) {
            let status = existing.overall_status;
            warn!(%escalation_id, status = status.as_str(), "Escalation already dispatched");
            return Err(DispatchError::AlreadyDispatched {
                escalation_id,
                status,
            });
        }
        statuses.insert(escalation_id, DeliveryStatus::pending(escalation_id));
        Ok(())
    }

    fn record_status(&self, status: DeliveryStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(status.escalation_id, status);
    }

    /// Sends the payload on the primary channel only, retrying on any
    /// failure until the configured attempts run out.
    pub async fn send_crisis_alert(
        &self,
        payload: &NotificationPayload,
    ) -> Result<ChannelDeliveryResult, DispatchError> {
        payload.validate()?;
        let channel = self
            .channel(ChannelKind::Teams)
            .ok_or(DispatchError::PrimaryNotConfigured)?;

        let attempts = self.legacy.max_retries.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match channel.send(payload).await {
                Ok(result) if result.is_sent() => {
                    info!(escalation_id = %payload.escalation_id, attempt, "Crisis alert sent");
                    return Ok(result);
                }
                Ok(_) => last = "delivery not confirmed".to_string(),
                Err(e) => last = e.to_string(),
            }

            warn!(
                escalation_id = %payload.escalation_id,
                attempt,
                max_attempts = attempts,
                error = %last,
                "Crisis alert attempt failed"
            );
            if attempt < attempts {
                sleep(self.legacy.delay_before(attempt)).await;
            }
        }

        error!(
            escalation_id = %payload.escalation_id,
            attempts,
            error = %last,
            "Crisis alert failed after all retries"
        );
        Err(DispatchError::RetriesExhausted { attempts, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{
        MatchPosition, MatchType, SafetyResult, Severity, TriggerCategory, TriggerMatch,
    };
    use crate::escalation::EscalationEventFactory;
    use crate::escalation::retry::Backoff;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct MockChannel {
        kind: ChannelKind,
        outcome: Result<&'static str, &'static str>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl MockChannel {
        fn ok(kind: ChannelKind, message_id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcome: Ok(message_id),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(kind: ChannelKind, reason: &'static str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcome: Err(reason),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn slow(kind: ChannelKind, message_id: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                kind,
                outcome: Ok(message_id),
                delay,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl AlertChannel for MockChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            payload: &NotificationPayload,
        ) -> Result<ChannelDeliveryResult, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            match self.outcome {
                Ok(id) => Ok(ChannelDeliveryResult::sent(
                    self.kind,
                    payload.escalation_id,
                    id,
                    0,
                )),
                Err(reason) => Err(ChannelError::Transport(reason.to_string())),
            }
        }
    }

    fn payload() -> NotificationPayload {
        let result = SafetyResult::from_matches(
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
            Vec::new(),
            1,
        )
        .unwrap();
        let event = EscalationEventFactory::new()
            .create("user-1", "session-1", "I want to kill myself", result, None)
            .unwrap();
        NotificationPayload::from_event(&event).unwrap()
    }

    fn dispatcher(
        teams: Option<Arc<MockChannel>>,
        email: Option<Arc<MockChannel>>,
    ) -> EscalationDispatcher {
        EscalationDispatcher::new(
            teams.map(|c| c as Arc<dyn AlertChannel>),
            email.map(|c| c as Arc<dyn AlertChannel>),
        )
        .unwrap()
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    // === Dual-channel dispatch ===

    #[tokio::test]
    async fn both_channels_succeed() {
        let dispatcher = dispatcher(
            Some(MockChannel::ok(ChannelKind::Teams, "A1")),
            Some(MockChannel::ok(ChannelKind::Email, "B1")),
        );
        let payload = payload();
        let result = dispatcher.dispatch(&payload).await.unwrap();

        assert!(result.overall_success);
        assert!(result.teams_delivered && result.email_delivered);
        assert!(result.failures.is_empty());
        assert_eq!(result.delivery_confirmation.channels, vec!["teams", "email"]);
        assert_eq!(result.channel_results.len(), 2);

        let status = dispatcher.status(payload.escalation_id).unwrap();
        assert_eq!(status.overall_status, OverallStatus::Sent);
    }

    #[tokio::test]
    async fn partial_failure_is_success() {
        let dispatcher = dispatcher(
            Some(MockChannel::ok(ChannelKind::Teams, "A1")),
            Some(MockChannel::failing(ChannelKind::Email, "SMTP down")),
        );
        let payload = payload();
        let result = dispatcher.dispatch(&payload).await.unwrap();

        assert!(result.overall_success);
        assert!(result.teams_delivered);
        assert!(!result.email_delivered);
        assert_eq!(result.failures, vec!["Email: SMTP down"]);
        assert_eq!(result.delivery_confirmation.channels, vec!["teams"]);
        assert_eq!(
            result.delivery_confirmation.teams_message_id.as_deref(),
            Some("A1")
        );
        assert!(result.delivery_confirmation.email_message_id.is_none());

        let status = dispatcher.status(payload.escalation_id).unwrap();
        assert_eq!(status.overall_status, OverallStatus::Partial);
    }

    #[tokio::test]
    async fn total_failure_logs_one_critical_entry() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dispatcher = dispatcher(
            Some(MockChannel::failing(ChannelKind::Teams, "webhook 500")),
            Some(MockChannel::failing(ChannelKind::Email, "SMTP down")),
        );
        let payload = payload();
        let err = dispatcher.dispatch(&payload).await.unwrap_err();

        assert!(err.to_string().contains("All notification channels failed"));
        match &err {
            DispatchError::AllChannelsFailed { failures, .. } => {
                assert_eq!(failures, &vec!["Teams: webhook 500", "Email: SMTP down"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let logs = buffer.contents();
        let critical: Vec<&str> = logs.lines().filter(|l| l.contains("CRITICAL")).collect();
        assert_eq!(critical.len(), 1, "logs were:\n{logs}");
        assert!(critical[0].contains("ERROR"));
        assert!(critical[0].contains("webhook 500"));
        assert!(critical[0].contains("SMTP down"));

        let status = dispatcher.status(payload.escalation_id).unwrap();
        assert_eq!(status.overall_status, OverallStatus::Failed);
    }

    #[tokio::test]
    async fn missing_channel_counts_as_failure() {
        let dispatcher = dispatcher(Some(MockChannel::ok(ChannelKind::Teams, "A1")), None);
        let result = dispatcher.dispatch(&payload()).await.unwrap();
        assert!(result.overall_success);
        assert_eq!(result.failures, vec!["Email: channel not configured"]);
        assert!(!dispatcher.is_configured(ChannelKind::Email));
    }

    #[tokio::test]
    async fn no_channels_is_total_failure() {
        let dispatcher = dispatcher(None, None);
        let err = dispatcher.dispatch(&payload()).await.unwrap_err();
        assert!(matches!(err, DispatchError::AllChannelsFailed { .. }));
    }

    #[tokio::test]
    async fn channels_are_sent_concurrently() {
        let delay = Duration::from_millis(200);
        let dispatcher = dispatcher(
            Some(MockChannel::slow(ChannelKind::Teams, "A1", delay)),
            Some(MockChannel::slow(ChannelKind::Email, "B1", delay)),
        );
        let start = Instant::now();
        dispatcher.dispatch(&payload()).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(380));
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected() {
        let dispatcher = dispatcher(Some(MockChannel::ok(ChannelKind::Teams, "A1")), None);
        let mut payload = payload();
        payload.user_id = String::new();
        let err = dispatcher.dispatch(&payload).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn concurrent_dispatches_keep_separate_status() {
        let dispatcher = Arc::new(dispatcher(
            Some(MockChannel::ok(ChannelKind::Teams, "A1")),
            Some(MockChannel::failing(ChannelKind::Email, "SMTP down")),
        ));

        let mut handles = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..10 {
            let payload = payload();
            ids.push(payload.escalation_id);
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move { dispatcher.dispatch(&payload).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        for id in ids {
            assert_eq!(
                dispatcher.status(id).unwrap().overall_status,
                OverallStatus::Partial
            );
        }
    }

    #[tokio::test]
    async fn repeat_dispatch_keeps_first_status() {
        let teams = MockChannel::ok(ChannelKind::Teams, "A1");
        let email = MockChannel::failing(ChannelKind::Email, "SMTP down");
        let dispatcher = dispatcher(Some(teams.clone()), Some(email.clone()));
        let payload = payload();

        dispatcher.dispatch(&payload).await.unwrap();
        let first = dispatcher.status(payload.escalation_id).unwrap();
        assert_eq!(first.overall_status, OverallStatus::Partial);

        let err = dispatcher.dispatch(&payload).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::AlreadyDispatched { escalation_id, status: OverallStatus::Partial }
                if escalation_id == payload.escalation_id
        ));

        assert_eq!(dispatcher.status(payload.escalation_id).unwrap(), first);
        assert_eq!(teams.calls.load(Ordering::SeqCst), 1);
        assert_eq!(email.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_escalation_is_not_redispatched() {
        let teams = MockChannel::failing(ChannelKind::Teams, "webhook 500");
        let dispatcher = dispatcher(Some(teams.clone()), None);
        let payload = payload();

        assert!(dispatcher.dispatch(&payload).await.is_err());
        let err = dispatcher.dispatch(&payload).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::AlreadyDispatched { status: OverallStatus::Failed, .. }
        ));
        assert_eq!(teams.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_in_wrong_slot_is_rejected() {
        let teams: Arc<dyn AlertChannel> = MockChannel::ok(ChannelKind::Teams, "A1");
        let err = EscalationDispatcher::new(None, Some(teams)).err().unwrap();
        assert!(matches!(
            err,
            DispatchError::ChannelMismatch {
                slot: ChannelKind::Email,
                found: ChannelKind::Teams,
            }
        ));
        assert_eq!(err.to_string(), "Teams channel registered in the Email slot");
    }

    #[test]
    fn unknown_escalation_has_no_status() {
        let dispatcher = dispatcher(None, None);
        assert!(dispatcher.status(Uuid::new_v4()).is_none());
    }

    // === Legacy single-channel path ===

    fn fast_legacy() -> LegacyAlertConfig {
        LegacyAlertConfig {
            max_retries: 3,
            retry_delay_ms: 1,
            backoff: Backoff::Linear,
        }
    }

    #[tokio::test]
    async fn crisis_alert_uses_primary_only() {
        let teams = MockChannel::ok(ChannelKind::Teams, "A1");
        let email = MockChannel::ok(ChannelKind::Email, "B1");
        let dispatcher = dispatcher(Some(teams.clone()), Some(email.clone()))
            .with_legacy_config(fast_legacy());

        let result = dispatcher.send_crisis_alert(&payload()).await.unwrap();
        assert_eq!(result.message_id.as_deref(), Some("A1"));
        assert_eq!(teams.calls.load(Ordering::SeqCst), 1);
        assert_eq!(email.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn crisis_alert_errors_after_retries() {
        let teams = MockChannel::failing(ChannelKind::Teams, "webhook 500");
        let dispatcher = dispatcher(Some(teams.clone()), None).with_legacy_config(fast_legacy());

        let err = dispatcher.send_crisis_alert(&payload()).await.unwrap_err();
        assert_eq!(teams.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("webhook 500"));
    }

    #[tokio::test]
    async fn crisis_alert_without_primary() {
        let dispatcher = dispatcher(None, Some(MockChannel::ok(ChannelKind::Email, "B1")));
        let err = dispatcher.send_crisis_alert(&payload()).await.unwrap_err();
        assert!(matches!(err, DispatchError::PrimaryNotConfigured));
    }
}
