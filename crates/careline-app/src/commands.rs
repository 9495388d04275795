//! Command implementations.
//!
//! Each command returns a serializable value; `main` prints it as JSON.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use careline_core::classifier::{ConversationContext, UserProfile};
use careline_core::escalation::{ContactDetails, DeliveryStatus, EscalationStore};
use careline_core::{
    build_classifier, CarelineConfig, CrisisResponse, EscalationOutcome, PipelineReport,
    ResponseComposer, SafetyPipeline, SafetyResult,
};
use careline_storage::{Database, EscalationRecord};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Output of `analyze`.
#[derive(Debug, Serialize)]
pub struct Assessment {
    /// Classification.
    pub safety_result: SafetyResult,
    /// Response the user would see.
    pub response: CrisisResponse,
}

/// Loads the configuration file, or defaults when none exists.
pub fn load_config(path: Option<&Path>) -> Result<CarelineConfig> {
    CarelineConfig::load_or_default(path).context("Failed to load configuration")
}

/// Opens the database at `db_path`, the configured path, or the default path.
pub fn open_database(config: &CarelineConfig, db_path: Option<&Path>) -> Result<Database> {
    let db = match db_path.or(config.database_path.as_deref()) {
        Some(path) => Database::with_path(path),
        None => Database::new(),
    };
    db.context("Failed to open database")
}

/// Reads a conversation context from a JSON file, or starts an empty one.
pub fn load_context(
    path: Option<&Path>,
    user_id: &str,
    session_id: &str,
) -> Result<ConversationContext> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file {:?}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("Invalid context file {:?}", path))
        }
        None => Ok(ConversationContext::new(user_id, session_id)),
    }
}

/// Classifies a message without escalating it.
pub fn analyze(
    config: &CarelineConfig,
    message: &str,
    context: &ConversationContext,
) -> Result<Assessment> {
    let classifier = build_classifier(config)?;
    let safety_result = classifier.analyze(message, context);
    let response = ResponseComposer::from_config(&config.safety).compose(&safety_result);
    Ok(Assessment {
        safety_result,
        response,
    })
}

/// Runs the full pipeline with the configured channels and waits for the
/// escalation to finish.
///
/// The user's escalation count from the database is added to the context
/// profile unless the context already carries one.
pub async fn escalate(
    config: &CarelineConfig,
    db: &Database,
    message: &str,
    mut context: ConversationContext,
) -> Result<PipelineReport> {
    if context.profile.is_none() {
        let previous = db.count_escalations_for_user(&context.user_id)?;
        context.profile = Some(UserProfile {
            previous_escalations: u32::try_from(previous).unwrap_or(u32::MAX),
            ..UserProfile::default()
        });
    }

    let pipeline = pipeline(config, db)?;
    let outcome = pipeline
        .handle_message(&context.user_id, &context.session_id, message, &context)
        .completed()
        .await;

    if let Some(escalation) = &outcome.escalation {
        info!(
            escalation_id = %escalation.escalation_id,
            notified = escalation.notified(),
            "Escalation raised"
        );
    }
    Ok(outcome)
}

/// Raises a nurse callback request.
pub async fn callback(
    config: &CarelineConfig,
    db: &Database,
    user_id: &str,
    session_id: &str,
    phone: Option<String>,
    email: Option<String>,
    reason: Option<&str>,
) -> Result<EscalationOutcome> {
    let contact = match (phone, email) {
        (Some(phone), email) => ContactDetails {
            email,
            ..ContactDetails::phone(phone)
        },
        (None, Some(email)) => ContactDetails::email(email),
        (None, None) => bail!("A phone number or email address is required for a callback"),
    };

    let pipeline = pipeline(config, db)?;
    Ok(pipeline
        .request_callback(user_id, session_id, contact, reason)
        .await?)
}

/// Reads the stored delivery status of an escalation.
pub fn status(db: &Database, escalation_id: &str) -> Result<Option<DeliveryStatus>> {
    let id = Uuid::parse_str(escalation_id)
        .with_context(|| format!("Invalid escalation id {:?}", escalation_id))?;
    Ok(db.delivery_status(id)?)
}

/// Lists recent escalations, or only those that reached no channel.
pub fn recent(db: &Database, limit: i64, undelivered: bool) -> Result<Vec<EscalationRecord>> {
    let records = if undelivered {
        db.undelivered_escalations()?
    } else {
        db.recent_escalations(limit)?
    };
    Ok(records)
}

fn pipeline(config: &CarelineConfig, db: &Database) -> Result<SafetyPipeline> {
    let store: Arc<dyn EscalationStore> = Arc::new(db.clone());
    SafetyPipeline::from_config(config, store).context("Failed to build safety pipeline")
}
