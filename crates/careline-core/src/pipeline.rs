//! End-to-end handling of one inbound message.
//!
//! Classify, compose the user response, and when escalation is required
//! create, persist and dispatch the escalation event. The user response is
//! returned straight away; persistence and dispatch run on a spawned task
//! that the caller can await through [`PendingEscalation`].

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classifier::{ConversationContext, MessageClassifier, SafetyResult, TriggerCatalog};
use crate::config::{CarelineConfig, ConfigError};
use crate::error::ValidationError;
use crate::escalation::{
    AlertChannel, ChannelError, ContactDetails, DeliveryStatus, DispatchError, DispatchFlags,
    DualDeliveryResult, EmailRelayChannel, EscalationDispatcher, EscalationEvent,
    EscalationEventFactory, EscalationStore, EscalationType, NotificationPayload, StoreError,
    WebhookChannel,
};
use crate::response::{CrisisResponse, ResponseComposer};

/// Sender used when the configuration names a relay but no sender.
const DEFAULT_EMAIL_FROM: &str = "careline-alerts@localhost";

/// Errors building a pipeline or raising a callback request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration or catalog could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A built-in pattern failed to compile.
    #[error("failed to compile detection patterns: {0}")]
    Pattern(#[from] regex::Error),

    /// A configured alert channel could not be built.
    #[error("invalid alert channel configuration: {0}")]
    Channel(#[from] ChannelError),

    /// The channels could not be wired into a dispatcher.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Builds the classifier from the configured catalog, or the built-in
/// catalog when none is configured.
pub fn build_classifier(config: &CarelineConfig) -> Result<MessageClassifier, PipelineError> {
    let catalog = match &config.catalog_path {
        Some(path) => TriggerCatalog::from_path(path)?,
        None => TriggerCatalog::default_catalog(),
    };
    Ok(MessageClassifier::new(Arc::new(catalog), config.safety.clone())?)
}

/// What happened to an escalation.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationOutcome {
    /// Escalation id.
    pub escalation_id: Uuid,
    /// Why the escalation was raised.
    pub escalation_type: EscalationType,
    /// Delivery details when at least one channel succeeded.
    pub delivery: Option<DualDeliveryResult>,
    /// Final delivery status.
    pub status: Option<DeliveryStatus>,
    /// Flags recorded on the event.
    pub flags: DispatchFlags,
    /// Dispatch or persistence failure, if any.
    pub error: Option<String>,
}

impl EscalationOutcome {
    /// Returns true if at least one channel delivered the alert.
    pub fn notified(&self) -> bool {
        self.flags.notification_sent
    }
}

/// Escalation being persisted and dispatched in the background.
#[derive(Debug)]
pub struct PendingEscalation {
    /// Escalation id.
    pub escalation_id: Uuid,
    /// Why the escalation was raised.
    pub escalation_type: EscalationType,
    handle: JoinHandle<EscalationOutcome>,
}

impl PendingEscalation {
    /// Returns true once dispatch has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for dispatch to finish.
    pub async fn outcome(self) -> EscalationOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(escalation_id = %self.escalation_id, error = %e, "Escalation task failed");
                EscalationOutcome {
                    escalation_id: self.escalation_id,
                    escalation_type: self.escalation_type,
                    delivery: None,
                    status: None,
                    flags: DispatchFlags::default(),
                    error: Some(format!("escalation task failed: {e}")),
                }
            }
        }
    }
}

/// Result of [`SafetyPipeline::handle_message`], available before any
/// notification has been attempted.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Classification.
    pub safety_result: SafetyResult,
    /// Response for the user.
    pub response: CrisisResponse,
    /// Set when the message was escalated.
    pub escalation: Option<PendingEscalation>,
}

impl PipelineOutcome {
    /// Waits for the escalation, if any, and returns the full report.
    pub async fn completed(self) -> PipelineReport {
        let escalation = match self.escalation {
            Some(pending) => Some(pending.outcome().await),
            None => None,
        };
        PipelineReport {
            safety_result: self.safety_result,
            response: self.response,
            escalation,
        }
    }
}

/// A handled message together with its finished escalation.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Classification.
    pub safety_result: SafetyResult,
    /// Response for the user.
    pub response: CrisisResponse,
    /// Set when the message was escalated.
    pub escalation: Option<EscalationOutcome>,
}

/// Classifier, composer and dispatcher wired to a store.
pub struct SafetyPipeline {
    classifier: MessageClassifier,
    composer: ResponseComposer,
    factory: EscalationEventFactory,
    dispatcher: Arc<EscalationDispatcher>,
    store: Arc<dyn EscalationStore>,
}

impl SafetyPipeline {
    /// Creates a pipeline from its parts.
    pub fn new(
        classifier: MessageClassifier,
        composer: ResponseComposer,
        dispatcher: EscalationDispatcher,
        store: Arc<dyn EscalationStore>,
    ) -> Self {
        Self {
            classifier,
            composer,
            factory: EscalationEventFactory::new(),
            dispatcher: Arc::new(dispatcher),
            store,
        }
    }

    /// Builds a pipeline from configuration. Channels without an endpoint
    /// are left unconfigured.
    pub fn from_config(
        config: &CarelineConfig,
        store: Arc<dyn EscalationStore>,
    ) -> Result<Self, PipelineError> {
        let classifier = build_classifier(config)?;
        let composer = ResponseComposer::from_config(&config.safety);

        let channels = &config.channels;
        let teams: Option<Arc<dyn AlertChannel>> = match channels.webhook_url.as_deref() {
            Some(url) => Some(Arc::new(WebhookChannel::new(
                url,
                config.dispatch.teams.clone(),
            )?)),
            None => None,
        };
        let email: Option<Arc<dyn AlertChannel>> = match channels.email_relay_url.as_deref() {
            Some(url) => Some(Arc::new(EmailRelayChannel::new(
                url,
                channels.email_from.as_deref().unwrap_or(DEFAULT_EMAIL_FROM),
                channels.email_recipients.clone(),
                config.dispatch.email.clone(),
            )?)),
            None => None,
        };
        if teams.is_none() && email.is_none() {
            warn!("No alert channels configured; escalations will not reach the nurse team");
        }

        let dispatcher = EscalationDispatcher::new(teams, email)?
            .with_legacy_config(config.dispatch.legacy.clone());
        Ok(Self::new(classifier, composer, dispatcher, store))
    }

    /// The classifier.
    pub fn classifier(&self) -> &MessageClassifier {
        &self.classifier
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &EscalationDispatcher {
        &self.dispatcher
    }

    /// Classifies a message, composes the response and escalates if needed.
    ///
    /// Returns without waiting for the escalation, so a slow or failing
    /// channel never holds back the response. Must be called from within a
    /// Tokio runtime.
    pub fn handle_message(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
        context: &ConversationContext,
    ) -> PipelineOutcome {
        let safety_result = self.classifier.analyze(message, context);
        let response = self.composer.compose(&safety_result);

        if !safety_result.requires_escalation {
            return PipelineOutcome {
                safety_result,
                response,
                escalation: None,
            };
        }

        let escalation = match self.factory.create(
            user_id,
            session_id,
            message,
            safety_result.clone(),
            None,
        ) {
            Ok(event) => Some(self.spawn_escalation(event)),
            Err(e) => {
                error!(user_id, error = %e, "Could not create escalation event");
                None
            }
        };

        PipelineOutcome {
            safety_result,
            response,
            escalation,
        }
    }

    /// Raises a nurse callback from contact details alone.
    pub async fn request_callback(
        &self,
        user_id: &str,
        session_id: &str,
        contact: ContactDetails,
        reason: Option<&str>,
    ) -> Result<EscalationOutcome, PipelineError> {
        let event = self
            .factory
            .create_callback(user_id, session_id, contact, reason)?;
        Ok(escalate(&self.dispatcher, self.store.as_ref(), event).await)
    }

    /// Delivery status of an escalation, from the store or the dispatcher.
    pub fn status(&self, escalation_id: Uuid) -> Result<Option<DeliveryStatus>, StoreError> {
        match self.store.query_delivery_status(escalation_id)? {
            Some(status) => Ok(Some(status)),
            None => Ok(self.dispatcher.status(escalation_id)),
        }
    }

    fn spawn_escalation(&self, event: EscalationEvent) -> PendingEscalation {
        let escalation_id = event.id();
        let escalation_type = event.escalation_type;
        let dispatcher = Arc::clone(&self.dispatcher);
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            escalate(&dispatcher, store.as_ref(), event).await
        });
        PendingEscalation {
            escalation_id,
            escalation_type,
            handle,
        }
    }
}

/// Persists the event, dispatches it, then records status and flags once.
async fn escalate(
    dispatcher: &EscalationDispatcher,
    store: &dyn EscalationStore,
    mut event: EscalationEvent,
) -> EscalationOutcome {
    let escalation_id = event.id();
    let mut errors = Vec::new();

    if let Err(e) = store.save(&event) {
        error!(%escalation_id, error = %e, "Failed to persist escalation event");
        errors.push(format!("store: {e}"));
    }

    let delivery = match NotificationPayload::from_event(&event) {
        Ok(payload) => match dispatcher.dispatch(&payload).await {
            Ok(result) => Some(result),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        },
        Err(e) => {
            error!(%escalation_id, error = %e, "Invalid notification payload");
            errors.push(e.to_string());
            None
        }
    };

    let status = dispatcher.status(escalation_id);
    if let Some(status) = &status {
        if let Err(e) = store.record_delivery_status(status) {
            error!(%escalation_id, error = %e, "Failed to persist delivery status");
            errors.push(format!("store: {e}"));
        }
    }

    let (sent, alerted) = delivery
        .as_ref()
        .map(|d| (d.overall_success, d.teams_delivered))
        .unwrap_or((false, false));
    if let Err(e) = event.record_dispatch(sent, alerted, true) {
        error!(%escalation_id, error = %e, "Dispatch flags already recorded");
        errors.push(e.to_string());
    } else if let Err(e) = store.update_flags(escalation_id, event.flags()) {
        error!(%escalation_id, error = %e, "Failed to persist dispatch flags");
        errors.push(format!("store: {e}"));
    }

    info!(
        %escalation_id,
        escalation_type = event.escalation_type.as_str(),
        notification_sent = sent,
        nurse_team_alerted = alerted,
        "Escalation handled"
    );

    EscalationOutcome {
        escalation_id,
        escalation_type: event.escalation_type,
        delivery,
        status,
        flags: event.flags().clone(),
        error: (!errors.is_empty()).then(|| errors.join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::{
        ChannelDeliveryResult, ChannelKind, ContactMethod, InMemoryEscalationStore, OverallStatus,
    };
    use crate::classifier::Severity;
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    struct MockChannel {
        kind: ChannelKind,
        fail_with: Option<&'static str>,
        delay: Duration,
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
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.fail_with {
                Some(reason) => Err(ChannelError::Transport(reason.to_string())),
                None => Ok(ChannelDeliveryResult::sent(
                    self.kind,
                    payload.escalation_id,
                    format!("{}-1", self.kind.id()),
                    0,
                )),
            }
        }
    }

    fn channel(kind: ChannelKind, fail_with: Option<&'static str>) -> Option<Arc<dyn AlertChannel>> {
        Some(Arc::new(MockChannel {
            kind,
            fail_with,
            delay: Duration::ZERO,
        }))
    }

    fn slow_channel(
        kind: ChannelKind,
        fail_with: Option<&'static str>,
        delay: Duration,
    ) -> Option<Arc<dyn AlertChannel>> {
        Some(Arc::new(MockChannel {
            kind,
            fail_with,
            delay,
        }))
    }

    fn pipeline(
        teams: Option<Arc<dyn AlertChannel>>,
        email: Option<Arc<dyn AlertChannel>>,
    ) -> (SafetyPipeline, Arc<InMemoryEscalationStore>) {
        let store = Arc::new(InMemoryEscalationStore::new());
        let pipeline = SafetyPipeline::new(
            MessageClassifier::with_defaults().unwrap(),
            ResponseComposer::default(),
            EscalationDispatcher::new(teams, email).unwrap(),
            store.clone(),
        );
        (pipeline, store)
    }

    fn context() -> ConversationContext {
        ConversationContext::new("user-1", "session-1")
    }

    // === Message handling ===

    #[tokio::test]
    async fn crisis_message_is_escalated_and_persisted() {
        let (pipeline, store) = pipeline(
            channel(ChannelKind::Teams, None),
            channel(ChannelKind::Email, None),
        );
        let outcome = pipeline
            .handle_message("user-1", "session-1", "I want to kill myself", &context())
            .completed()
            .await;

        assert_eq!(outcome.safety_result.severity, Severity::Crisis);
        assert!(outcome.response.escalation_required);

        let escalation = outcome.escalation.unwrap();
        assert!(escalation.notified());
        assert!(escalation.flags.nurse_team_alerted);
        assert!(escalation.flags.response_generated);
        assert!(escalation.error.is_none());
        assert_eq!(escalation.escalation_type, EscalationType::Crisis);

        let stored = store.get(escalation.escalation_id).unwrap().unwrap();
        assert!(stored.is_dispatch_recorded());
        assert!(stored.flags().notification_sent);

        let status = pipeline.status(escalation.escalation_id).unwrap().unwrap();
        assert_eq!(status.overall_status, OverallStatus::Sent);
    }

    #[tokio::test]
    async fn response_does_not_wait_for_slow_channels() {
        let delay = Duration::from_millis(500);
        let (pipeline, store) = pipeline(
            slow_channel(ChannelKind::Teams, Some("webhook timeout"), delay),
            slow_channel(ChannelKind::Email, Some("SMTP timeout"), delay),
        );

        let start = Instant::now();
        let outcome =
            pipeline.handle_message("user-1", "session-1", "I want to kill myself", &context());
        assert!(start.elapsed() < Duration::from_millis(250));

        assert_eq!(outcome.safety_result.severity, Severity::Crisis);
        assert!(outcome.response.escalation_required);
        assert!(!outcome.response.resources.is_empty());

        let pending = outcome.escalation.unwrap();
        assert!(!pending.is_finished());
        assert_eq!(pending.escalation_type, EscalationType::Crisis);

        let escalation = pending.outcome().await;
        assert!(start.elapsed() >= delay);
        assert!(!escalation.notified());
        assert!(escalation.flags.response_generated);

        let status = store
            .query_delivery_status(escalation.escalation_id)
            .unwrap()
            .unwrap();
        assert_eq!(status.overall_status, OverallStatus::Failed);
    }

    #[tokio::test]
    async fn general_message_is_not_escalated() {
        let (pipeline, store) = pipeline(
            channel(ChannelKind::Teams, None),
            channel(ChannelKind::Email, None),
        );
        let outcome = pipeline
            .handle_message("user-1", "session-1", "When is my next appointment?", &context())
            .completed()
            .await;

        assert_eq!(outcome.safety_result.severity, Severity::General);
        assert!(outcome.escalation.is_none());
        assert!(!outcome.response.escalation_required);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn partial_failure_still_alerts_nurse_team() {
        let (pipeline, store) = pipeline(
            channel(ChannelKind::Teams, None),
            channel(ChannelKind::Email, Some("SMTP down")),
        );
        let outcome = pipeline
            .handle_message("user-1", "session-1", "I want to kill myself", &context())
            .completed()
            .await;

        let escalation = outcome.escalation.unwrap();
        assert!(escalation.notified());
        assert!(escalation.flags.nurse_team_alerted);
        let delivery = escalation.delivery.unwrap();
        assert_eq!(delivery.failures, vec!["Email: SMTP down".to_string()]);

        let status = store
            .query_delivery_status(escalation.escalation_id)
            .unwrap()
            .unwrap();
        assert_eq!(status.overall_status, OverallStatus::Partial);
    }

    #[tokio::test]
    async fn total_failure_still_returns_response() {
        let (pipeline, store) = pipeline(
            channel(ChannelKind::Teams, Some("webhook down")),
            channel(ChannelKind::Email, Some("SMTP down")),
        );
        let outcome = pipeline
            .handle_message("user-1", "session-1", "I want to kill myself", &context())
            .completed()
            .await;

        assert!(outcome.response.escalation_required);
        assert!(!outcome.response.resources.is_empty());

        let escalation = outcome.escalation.unwrap();
        assert!(!escalation.notified());
        assert!(!escalation.flags.nurse_team_alerted);
        assert!(escalation.flags.response_generated);
        assert!(escalation.delivery.is_none());
        assert!(escalation
            .error
            .as_deref()
            .unwrap()
            .contains("All notification channels failed"));

        let stored = store.get(escalation.escalation_id).unwrap().unwrap();
        assert!(stored.is_dispatch_recorded());
        assert!(!stored.flags().notification_sent);

        let status = store
            .query_delivery_status(escalation.escalation_id)
            .unwrap()
            .unwrap();
        assert_eq!(status.overall_status, OverallStatus::Failed);
    }

    #[tokio::test]
    async fn unconfigured_channels_count_as_failures() {
        let (pipeline, _) = pipeline(None, None);
        let outcome = pipeline
            .handle_message("user-1", "session-1", "I want to kill myself", &context())
            .completed()
            .await;
        let escalation = outcome.escalation.unwrap();
        let error = escalation.error.unwrap();
        assert!(error.contains("Teams: channel not configured"));
        assert!(error.contains("Email: channel not configured"));
    }

    // === Callback requests ===

    #[tokio::test]
    async fn callback_request_creates_nurse_callback() {
        let (pipeline, store) = pipeline(
            channel(ChannelKind::Teams, None),
            channel(ChannelKind::Email, None),
        );
        let contact = ContactDetails::phone("07700 900123");
        let escalation = pipeline
            .request_callback("user-1", "session-1", contact, Some("Question about results"))
            .await
            .unwrap();

        assert_eq!(escalation.escalation_type, EscalationType::NurseCallback);
        assert!(escalation.notified());

        let stored = store.get(escalation.escalation_id).unwrap().unwrap();
        assert!(stored.callback_requested);
        assert_eq!(stored.user_message, "Question about results");
        assert_eq!(stored.preferred_contact_method, Some(ContactMethod::Phone));
    }

    #[tokio::test]
    async fn invalid_contact_is_rejected() {
        let (pipeline, store) = pipeline(channel(ChannelKind::Teams, None), None);
        let contact = ContactDetails::email("not-an-address");
        let err = pipeline
            .request_callback("user-1", "session-1", contact, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(store.is_empty());
    }

    // === Configuration ===

    #[test]
    fn build_classifier_reads_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{ "crisis": { "immediate_danger": ["locked me in"] } }"#)
            .unwrap();
        let config = CarelineConfig {
            catalog_path: Some(path),
            ..CarelineConfig::default()
        };

        let classifier = build_classifier(&config).unwrap();
        let result = classifier.analyze("he locked me in the house", &context());
        assert_eq!(result.severity, Severity::Crisis);
    }

    #[test]
    fn build_classifier_missing_catalog() {
        let config = CarelineConfig {
            catalog_path: Some("/nonexistent/catalog.json".into()),
            ..CarelineConfig::default()
        };
        assert!(matches!(
            build_classifier(&config),
            Err(PipelineError::Config(ConfigError::Io { .. }))
        ));
    }

    #[test]
    fn from_config_without_endpoints() {
        let store = Arc::new(InMemoryEscalationStore::new());
        let pipeline = SafetyPipeline::from_config(&CarelineConfig::default(), store).unwrap();
        assert!(!pipeline.dispatcher().is_configured(ChannelKind::Teams));
        assert!(!pipeline.dispatcher().is_configured(ChannelKind::Email));
    }

    #[test]
    fn from_config_with_endpoints() {
        let config = CarelineConfig::from_json(
            r#"{
                "channels": {
                    "webhook_url": "http://127.0.0.1:9/hook",
                    "email_relay_url": "http://127.0.0.1:9/mail",
                    "email_recipients": ["nurses@example.org"]
                }
            }"#,
        )
        .unwrap();
        let store = Arc::new(InMemoryEscalationStore::new());
        let pipeline = SafetyPipeline::from_config(&config, store).unwrap();
        assert!(pipeline.dispatcher().is_configured(ChannelKind::Teams));
        assert!(pipeline.dispatcher().is_configured(ChannelKind::Email));
    }

    #[test]
    fn relay_without_recipients_is_rejected() {
        let config = CarelineConfig::from_json(
            r#"{ "channels": { "email_relay_url": "http://127.0.0.1:9/mail" } }"#,
        )
        .unwrap();
        let store = Arc::new(InMemoryEscalationStore::new());
        assert!(matches!(
            SafetyPipeline::from_config(&config, store),
            Err(PipelineError::Channel(_))
        ));
    }
}
