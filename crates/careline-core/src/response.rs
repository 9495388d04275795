//! User-facing responses to classified messages.
//!
//! The composer picks a response cluster from the matched categories,
//! attaches support resources and disclaimers, and never fails: any
//! internal problem produces a fixed safe response instead.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::classifier::{SafetyResult, Severity, TriggerCategory};
use crate::config::{Disclaimers, ResourceTemplates, SafetyConfig};

/// Internal composition failures. Never returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// A resource template is not `"name: contact[ | description | availability]"`.
    #[error("malformed resource template: {0:?}")]
    MalformedTemplate(String),

    /// The chosen cluster has no resources configured.
    #[error("no resources configured for {0:?}")]
    NoResources(ResponseCluster),
}

/// A helpline or service offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportResource {
    /// Service name.
    pub name: String,
    /// Phone number, text code or URL.
    pub contact: String,
    /// What the service offers.
    #[serde(default)]
    pub description: Option<String>,
    /// Opening hours.
    #[serde(default)]
    pub availability: Option<String>,
}

impl SupportResource {
    /// Parses `"name: contact"` with optional `" | description | availability"`.
    pub fn parse(template: &str) -> Result<Self, ResponseError> {
        let malformed = || ResponseError::MalformedTemplate(template.to_string());
        let mut parts = template.split('|').map(str::trim);

        let head = parts.next().ok_or_else(malformed)?;
        let (name, contact) = head.split_once(':').ok_or_else(malformed)?;
        let (name, contact) = (name.trim(), contact.trim());
        if name.is_empty() || contact.is_empty() {
            return Err(malformed());
        }

        let optional = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);
        let description = optional(parts.next());
        let availability = optional(parts.next());
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            name: name.to_string(),
            contact: contact.to_string(),
            description,
            availability,
        })
    }
}

/// What the user sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisResponse {
    /// Message shown first.
    pub immediate_message: String,
    /// Support resources, most relevant first.
    pub resources: Vec<SupportResource>,
    /// The nurse team is being alerted.
    pub escalation_required: bool,
    /// Someone will follow up.
    pub follow_up_required: bool,
    /// Disclaimers shown under the message.
    pub disclaimers: Vec<String>,
    /// Time taken to compose the response.
    pub response_time_ms: u64,
}

/// Response clusters, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCluster {
    /// Life-threatening symptoms or severe bleeding.
    MedicalEmergency,
    /// Suicidal ideation, self-harm or severe distress.
    MentalHealthCrisis,
    /// Abuse or threats.
    ImmediateDanger,
    /// Elevated concern outside the clusters above.
    HighConcern,
    /// Emotional support or general questions.
    LowSeverity,
}

impl ResponseCluster {
    /// Picks the cluster for a classification.
    pub fn for_result(result: &SafetyResult) -> Self {
        let categories = result.categories();
        if categories.iter().any(TriggerCategory::is_medical_emergency) {
            ResponseCluster::MedicalEmergency
        } else if categories.iter().any(TriggerCategory::is_mental_health_crisis) {
            ResponseCluster::MentalHealthCrisis
        } else if categories.contains(&TriggerCategory::ImmediateDanger) {
            ResponseCluster::ImmediateDanger
        } else if result.severity >= Severity::HighConcern {
            ResponseCluster::HighConcern
        } else {
            ResponseCluster::LowSeverity
        }
    }
}

const SAFE_DEFAULT_MESSAGE: &str = "If you are in immediate danger or need urgent medical help, \
please call 999 now. You can talk to Samaritans at any time on 116 123. \
A member of our nursing team will follow up with you.";

/// Builds [`CrisisResponse`]s.
#[derive(Debug, Clone, Default)]
pub struct ResponseComposer {
    resources: ResourceTemplates,
    disclaimers: Disclaimers,
}

impl ResponseComposer {
    /// Creates a composer from explicit resources and disclaimers.
    pub fn new(resources: ResourceTemplates, disclaimers: Disclaimers) -> Self {
        Self {
            resources,
            disclaimers,
        }
    }

    /// Creates a composer from the safety configuration.
    pub fn from_config(config: &SafetyConfig) -> Self {
        Self::new(config.resources.clone(), config.disclaimers.clone())
    }

    /// Composes the response for a classification.
    pub fn compose(&self, result: &SafetyResult) -> CrisisResponse {
        let start = Instant::now();
        if result.is_fail_safe() {
            return Self::safe_default(start.elapsed().as_millis() as u64);
        }

        match self.try_compose(result) {
            Ok(mut response) => {
                response.response_time_ms = start.elapsed().as_millis() as u64;
                response
            }
            Err(e) => {
                error!(error = %e, "Response composition failed, using safe default");
                Self::safe_default(start.elapsed().as_millis() as u64)
            }
        }
    }

    fn try_compose(&self, result: &SafetyResult) -> Result<CrisisResponse, ResponseError> {
        let cluster = ResponseCluster::for_result(result);
        let templates = self.templates(cluster);
        if templates.is_empty() {
            return Err(ResponseError::NoResources(cluster));
        }
        let resources = templates
            .iter()
            .map(|t| SupportResource::parse(t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut disclaimers = vec![
            self.disclaimers.general.clone(),
            self.disclaimers.medical.clone(),
        ];
        if result.severity == Severity::Crisis {
            disclaimers.push(self.disclaimers.emergency.clone());
        }

        Ok(CrisisResponse {
            immediate_message: immediate_message(cluster, result),
            resources,
            escalation_required: result.requires_escalation,
            follow_up_required: result.requires_escalation
                || result.severity >= Severity::HighConcern,
            disclaimers,
            response_time_ms: 0,
        })
    }

    fn templates(&self, cluster: ResponseCluster) -> &[String] {
        match cluster {
            ResponseCluster::MedicalEmergency => &self.resources.medical_emergency,
            ResponseCluster::MentalHealthCrisis => &self.resources.mental_health_crisis,
            ResponseCluster::ImmediateDanger => &self.resources.immediate_danger,
            ResponseCluster::HighConcern => &self.resources.high_concern,
            ResponseCluster::LowSeverity => &self.resources.low_severity,
        }
    }

    /// The fixed response used when composition fails.
    pub fn safe_default(response_time_ms: u64) -> CrisisResponse {
        let defaults = Disclaimers::default();
        CrisisResponse {
            immediate_message: SAFE_DEFAULT_MESSAGE.to_string(),
            resources: vec![
                SupportResource {
                    name: "Emergency Services".into(),
                    contact: "999".into(),
                    description: Some("For immediate danger or a medical emergency".into()),
                    availability: Some("24/7".into()),
                },
                SupportResource {
                    name: "Samaritans".into(),
                    contact: "116 123".into(),
                    description: Some("Free, confidential emotional support".into()),
                    availability: Some("24/7".into()),
                },
            ],
            escalation_required: true,
            follow_up_required: true,
            disclaimers: vec![defaults.general, defaults.medical, defaults.emergency],
            response_time_ms,
        }
    }
}

fn immediate_message(cluster: ResponseCluster, result: &SafetyResult) -> String {
    let mut message = match cluster {
        ResponseCluster::MedicalEmergency => {
            "What you're describing could be a medical emergency. Please call 999 now, \
             or go to your nearest A&E."
        }
        ResponseCluster::MentalHealthCrisis => {
            "I'm really sorry you're feeling this way, and I'm glad you told me. \
             You don't have to go through this alone. If you feel you might act on these \
             thoughts, please call 999. Samaritans are there for you any time on 116 123."
        }
        ResponseCluster::ImmediateDanger => {
            "Your safety matters. If you are in immediate danger, please call 999. \
             If you can't speak, call 999 and press 55 when prompted."
        }
        ResponseCluster::HighConcern => {
            "Thank you for telling me. It sounds like things are really difficult right now."
        }
        ResponseCluster::LowSeverity => {
            "Thank you for sharing that with me. Here is some information and support that may help."
        }
    }
    .to_string();

    if result.requires_escalation {
        if result.has_category(TriggerCategory::CallbackRequest) {
            message.push_str(" A nurse from our team will call you back.");
        } else {
            message.push_str(" A member of our nursing team has been alerted and will follow up with you.");
        }
    }
    message
}
