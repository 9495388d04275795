//! Escalation events and dual-channel delivery to the nurse team.

pub mod channel;
pub mod channels;
pub mod delivery;
mod dispatcher;
mod event;
mod payload;
pub mod retry;
mod store;

pub use channel::{AlertChannel, ChannelError, ChannelMetrics, MetricsSnapshot};
pub use channels::{EmailRelayChannel, WebhookChannel};
pub use delivery::{
    AuditTrail, ChannelDeliveryResult, ChannelKind, DeliveryConfirmation, DeliveryState,
    DeliveryStatus, DualDeliveryResult, OverallStatus,
};
pub use dispatcher::{DispatchError, EscalationDispatcher};
pub use event::{
    ContactDetails, ContactMethod, DispatchFlags, EscalationEvent, EscalationEventFactory,
    EscalationType, UrgencyLevel,
};
pub use payload::NotificationPayload;
pub use retry::{Backoff, RetryPolicy};
pub use store::{EscalationStore, InMemoryEscalationStore, StoreError};
