//! Careline Core - Safety classification and escalation.
//!
//! This crate decides whether a message to the gynaecological-support
//! assistant shows risk, what the user should see in response, and how the
//! nurse team is alerted. It handles:
//!
//! - Multi-strategy classification (exact, fuzzy, pattern, context)
//! - Crisis responses with support resources and disclaimers
//! - Escalation events with validated invariants
//! - Concurrent dual-channel delivery (webhook + email relay)
//!
//! # Example
//!
//! ```no_run
//! use careline_core::classifier::{ConversationContext, MessageClassifier};
//! use careline_core::response::ResponseComposer;
//!
//! let classifier = MessageClassifier::with_defaults().unwrap();
//! let context = ConversationContext::new("user-1", "session-1");
//! let result = classifier.analyze("I want to kill myself", &context);
//! assert!(result.requires_escalation);
//!
//! let response = ResponseComposer::default().compose(&result);
//! println!("{}", response.immediate_message);
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod escalation;
pub mod pipeline;
pub mod response;

pub use classifier::{
    ConversationContext, MessageClassifier, SafetyResult, Severity, TriggerCatalog,
    TriggerCategory, TriggerMatch,
};
pub use config::{CarelineConfig, ConfigError, SafetyConfig};
pub use error::ValidationError;
pub use escalation::{
    DispatchError, DualDeliveryResult, EscalationDispatcher, EscalationEvent,
    EscalationEventFactory, EscalationStore, NotificationPayload,
};
pub use pipeline::{
    build_classifier, EscalationOutcome, PendingEscalation, PipelineError, PipelineOutcome,
    PipelineReport, SafetyPipeline,
};
pub use response::{CrisisResponse, ResponseComposer, SupportResource};
