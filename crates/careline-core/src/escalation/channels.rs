//! HTTP alert channels: a chat-ops webhook and an email relay.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::channel::{AlertChannel, ChannelError, ChannelMetrics, MetricsSnapshot};
use super::delivery::{ChannelDeliveryResult, ChannelKind};
use super::event::UrgencyLevel;
use super::payload::NotificationPayload;
use super::retry::RetryPolicy;

/// Response header carrying the id assigned by the receiving service.
const MESSAGE_ID_HEADER: &str = "x-message-id";

fn build_client(timeout: Duration) -> Result<Client, ChannelError> {
    Client::builder()
        .user_agent(format!("Careline/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| ChannelError::Transport(e.to_string()))
}

fn parse_url(url: &str) -> Result<Url, ChannelError> {
    Url::parse(url).map_err(|e| ChannelError::Rejected(format!("invalid endpoint {url}: {e}")))
}

/// POSTs `body` and maps the HTTP outcome onto [`ChannelError`].
async fn post_json(client: &Client, url: &Url, body: &Value) -> Result<(String, u16), ChannelError> {
    let response = client
        .post(url.clone())
        .json(body)
        .send()
        .await
        .map_err(|e| ChannelError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ChannelError::Transport(format!("HTTP {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(ChannelError::Rejected(format!("HTTP {}", status.as_u16())));
    }

    let message_id = response
        .headers()
        .get(MESSAGE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok((message_id, status.as_u16()))
}

fn theme_color(urgency: UrgencyLevel) -> &'static str {
    match urgency {
        UrgencyLevel::Immediate => "D70000",
        UrgencyLevel::High => "FF8C00",
        UrgencyLevel::Medium => "FFD700",
        UrgencyLevel::Low => "0078D7",
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn contact_line(payload: &NotificationPayload) -> Option<String> {
    let contact = payload.contact_details.as_ref()?;
    let mut parts = Vec::new();
    if let Some(name) = &contact.name {
        parts.push(name.clone());
    }
    if let Some(phone) = &contact.phone {
        parts.push(phone.clone());
    }
    if let Some(email) = &contact.email {
        parts.push(email.clone());
    }
    if let Some(best_time) = &contact.best_time {
        parts.push(format!("best time: {best_time}"));
    }
    Some(parts.join(", "))
}

/// Chat-ops webhook channel (Teams-style `MessageCard`).
pub struct WebhookChannel {
    client: Client,
    url: Url,
    policy: RetryPolicy,
    metrics: ChannelMetrics,
}

impl WebhookChannel {
    /// Creates a channel posting to `url`.
    pub fn new(url: &str, policy: RetryPolicy) -> Result<Self, ChannelError> {
        Ok(Self {
            client: build_client(policy.timeout())?,
            url: parse_url(url)?,
            policy,
            metrics: ChannelMetrics::new(),
        })
    }

    /// Delivery counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Renders the alert card.
    pub fn message_card(payload: &NotificationPayload) -> Value {
        let title = payload.title();
        let mut facts = vec![
            json!({ "name": "Escalation", "value": payload.escalation_id.to_string() }),
            json!({ "name": "User", "value": payload.user_id }),
            json!({ "name": "Urgency", "value": payload.urgency.as_str() }),
            json!({ "name": "Triggers", "value": payload.trigger_matches.join(", ") }),
            json!({ "name": "Callback requested", "value": yes_no(payload.requires_callback) }),
            json!({ "name": "Raised at", "value": payload.timestamp.to_rfc3339() }),
        ];
        if let Some(contact) = contact_line(payload) {
            facts.push(json!({ "name": "Contact", "value": contact }));
        }

        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": theme_color(payload.urgency),
            "summary": title,
            "sections": [{
                "activityTitle": title,
                "activitySubtitle": payload.summary,
                "facts": facts,
                "markdown": true
            }]
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Teams
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<ChannelDeliveryResult, ChannelError> {
        let card = Self::message_card(payload);
        let (client, url, metrics, card) = (&self.client, &self.url, &self.metrics, &card);
        let started = Instant::now();

        let outcome = self
            .policy
            .run(ChannelKind::Teams.id(), move |_| {
                metrics.record_attempt();
                post_json(client, url, card)
            })
            .await;
        metrics.record_outcome(outcome.is_ok(), started.elapsed());

        let ((message_id, http_status), retries) = outcome?;
        debug!(escalation_id = %payload.escalation_id, %message_id, "Webhook alert accepted");

        Ok(
            ChannelDeliveryResult::sent(ChannelKind::Teams, payload.escalation_id, message_id, retries)
                .with_identifier("http_status", http_status.to_string())
                .with_identifier("endpoint", url.host_str().unwrap_or_default()),
        )
    }
}

/// Email channel that hands messages to an HTTP mail relay.
pub struct EmailRelayChannel {
    client: Client,
    url: Url,
    from: String,
    recipients: Vec<String>,
    policy: RetryPolicy,
    metrics: ChannelMetrics,
}

impl EmailRelayChannel {
    /// Creates a channel posting to the relay at `url`.
    pub fn new(
        url: &str,
        from: impl Into<String>,
        recipients: Vec<String>,
        policy: RetryPolicy,
    ) -> Result<Self, ChannelError> {
        if recipients.is_empty() {
            return Err(ChannelError::Rejected("no email recipients configured".into()));
        }
        Ok(Self {
            client: build_client(policy.timeout())?,
            url: parse_url(url)?,
            from: from.into(),
            recipients,
            policy,
            metrics: ChannelMetrics::new(),
        })
    }

    /// Delivery counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Renders the relay request body.
    pub fn render(&self, payload: &NotificationPayload) -> Value {
        let mut lines = vec![
            payload.summary.clone(),
            String::new(),
            format!("Escalation: {}", payload.escalation_id),
            format!("User: {}", payload.user_id),
            format!("Urgency: {}", payload.urgency),
            format!("Triggers: {}", payload.trigger_matches.join(", ")),
            format!("Callback requested: {}", yes_no(payload.requires_callback)),
            format!("Raised at: {}", payload.timestamp.to_rfc3339()),
        ];
        if let Some(contact) = contact_line(payload) {
            lines.push(format!("Contact: {contact}"));
        }

        json!({
            "from": self.from,
            "to": self.recipients,
            "subject": payload.title(),
            "text": lines.join("\n"),
        })
    }
}

#[async_trait]
impl AlertChannel for EmailRelayChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, payload: &NotificationPayload) -> Result<ChannelDeliveryResult, ChannelError> {
        let body = self.render(payload);
        let (client, url, metrics, body) = (&self.client, &self.url, &self.metrics, &body);
        let started = Instant::now();

        let outcome = self
            .policy
            .run(ChannelKind::Email.id(), move |_| {
                metrics.record_attempt();
                post_json(client, url, body)
            })
            .await;
        metrics.record_outcome(outcome.is_ok(), started.elapsed());

        let ((message_id, http_status), retries) = outcome?;
        debug!(escalation_id = %payload.escalation_id, %message_id, "Email alert relayed");

        Ok(
            ChannelDeliveryResult::sent(ChannelKind::Email, payload.escalation_id, message_id, retries)
                .with_identifier("http_status", http_status.to_string())
                .with_identifier("recipients", self.recipients.join(",")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{
        MatchPosition, MatchType, SafetyResult, Severity, TriggerCategory, TriggerMatch,
    };
    use crate::escalation::{retry::Backoff, ContactDetails, EscalationEventFactory};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload() -> NotificationPayload {
        let result = SafetyResult::from_matches(
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
        .unwrap();
        let mut contact = ContactDetails::phone("07700 900123");
        contact.name = Some("Jo".into());
        let event = EscalationEventFactory::new()
            .create("user-1", "session-1", "call me back", result, Some(contact))
            .unwrap();
        NotificationPayload::from_event(&event).unwrap()
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay_ms: 1,
            backoff: Backoff::Fixed,
            timeout_ms: 2_000,
        }
    }

    /// Minimal HTTP endpoint answering every request with `response`.
    async fn serve(response: &'static str) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        request.extend_from_slice(&buf[..n]);
                        let text = String::from_utf8_lossy(&request).to_lowercase();
                        if let Some(end) = text.find("\r\n\r\n") {
                            let length = text
                                .lines()
                                .find_map(|l| l.strip_prefix("content-length:"))
                                .and_then(|v| v.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if request.len() >= end + 4 + length {
                                break;
                            }
                        }
                    }
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}/alerts"), hits)
    }

    const OK_RESPONSE: &str =
        "HTTP/1.1 200 OK\r\nx-message-id: T-42\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const SERVER_ERROR: &str =
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const BAD_REQUEST: &str =
        "HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

    // === Rendering ===

    #[test]
    fn message_card_contains_alert_facts() {
        let payload = payload();
        let card = WebhookChannel::message_card(&payload);
        assert_eq!(card["@type"], "MessageCard");
        assert_eq!(card["themeColor"], "FF8C00");
        assert_eq!(card["summary"], "[HIGH] high_concern escalation");

        let facts = card["sections"][0]["facts"].as_array().unwrap();
        assert!(facts
            .iter()
            .any(|f| f["name"] == "Contact" && f["value"] == "Jo, 07700 900123"));
        assert!(facts
            .iter()
            .any(|f| f["name"] == "Callback requested" && f["value"] == "yes"));
    }

    #[test]
    fn email_body_lists_recipients_and_summary() {
        let channel = EmailRelayChannel::new(
            "http://relay.invalid/send",
            "alerts@careline.example",
            vec!["nurses@careline.example".into()],
            RetryPolicy::default(),
        )
        .unwrap();
        let payload = payload();
        let body = channel.render(&payload);
        assert_eq!(body["to"][0], "nurses@careline.example");
        assert_eq!(body["subject"], payload.title());
        assert!(body["text"].as_str().unwrap().starts_with(&payload.summary));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(WebhookChannel::new("not a url", RetryPolicy::default()).is_err());
        assert!(EmailRelayChannel::new(
            "http://relay.invalid",
            "a@b.c",
            Vec::new(),
            RetryPolicy::default()
        )
        .is_err());
    }

    // === Delivery ===

    #[tokio::test]
    async fn webhook_delivery_reads_message_id() {
        let (url, hits) = serve(OK_RESPONSE).await;
        let channel = WebhookChannel::new(&url, fast_policy(3)).unwrap();
        let payload = payload();

        let result = channel.send(&payload).await.unwrap();
        assert!(result.is_sent());
        assert_eq!(result.message_id.as_deref(), Some("T-42"));
        assert_eq!(result.retry_count, 0);
        assert_eq!(result.audit_trail.identifiers["http_status"], "200");
        assert_eq!(result.audit_trail.escalation_id, payload.escalation_id);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let metrics = channel.metrics();
        assert_eq!(metrics.attempts, 1);
        assert_eq!(metrics.successes, 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (url, hits) = serve(SERVER_ERROR).await;
        let channel = WebhookChannel::new(&url, fast_policy(3)).unwrap();

        let err = channel.send(&payload()).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(err.retry_count(), 2);
        assert!(err.to_string().contains("HTTP 503"));
        assert_eq!(channel.metrics().failures, 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = serve(BAD_REQUEST).await;
        let channel = EmailRelayChannel::new(
            &url,
            "alerts@careline.example",
            vec!["nurses@careline.example".into()],
            fast_policy(3),
        )
        .unwrap();

        let err = channel.send(&payload()).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(err, ChannelError::Rejected("HTTP 400".into()));
    }

    #[tokio::test]
    async fn email_delivery_records_recipients() {
        let (url, _) = serve(OK_RESPONSE).await;
        let channel = EmailRelayChannel::new(
            &url,
            "alerts@careline.example",
            vec!["a@careline.example".into(), "b@careline.example".into()],
            fast_policy(1),
        )
        .unwrap();

        let result = channel.send(&payload()).await.unwrap();
        assert_eq!(
            result.audit_trail.identifiers["recipients"],
            "a@careline.example,b@careline.example"
        );
        assert_eq!(result.audit_trail.channel, ChannelKind::Email);
    }
}
