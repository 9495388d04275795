//! Multi-strategy message classifier.
//!
//! Runs each detection strategy over the normalized message, merges their
//! matches, and aggregates them into a [`SafetyResult`]. Analysis never
//! fails from the caller's point of view: any internal fault, including a
//! panic inside a strategy, yields the fail-safe crisis result.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, warn};

use super::context::{ContextAnalyzer, ConversationContext};
use super::fuzzy::FuzzyMatcher;
use super::keyword::KeywordMatcher;
use super::normalize::NormalizedMessage;
use super::pattern::PatternMatcher;
use super::{
    aggregate_severity, MatchType, SafetyResult, Severity, TriggerCatalog, TriggerCategory,
    TriggerMatch,
};
use crate::config::SafetyConfig;
use crate::error::ValidationError;

/// Per-match confidence above which `high_confidence_match` is reported.
const HIGH_CONFIDENCE: f32 = 0.9;

/// An internal analysis fault.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The assembled result violated a data-model invariant.
    #[error("invalid analysis result: {0}")]
    Validation(#[from] ValidationError),

    /// A strategy reported a failure.
    #[error("detection strategy {name} failed: {reason}")]
    Strategy {
        /// Strategy name.
        name: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// A strategy panicked.
    #[error("analysis panicked: {0}")]
    Panicked(String),
}

/// One way of finding risk indicators in a message.
pub trait DetectionStrategy: Send + Sync {
    /// Returns the matches this strategy finds.
    fn detect(
        &self,
        message: &NormalizedMessage,
        context: &ConversationContext,
    ) -> Result<Vec<TriggerMatch>, AnalysisError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Classifies user messages for risk.
pub struct MessageClassifier {
    catalog: Arc<TriggerCatalog>,
    config: SafetyConfig,
    strategies: Vec<Box<dyn DetectionStrategy>>,
}

impl MessageClassifier {
    /// Creates a classifier running exact, fuzzy, pattern and context
    /// detection, in that order.
    pub fn new(catalog: Arc<TriggerCatalog>, config: SafetyConfig) -> Result<Self, regex::Error> {
        let strategies: Vec<Box<dyn DetectionStrategy>> = vec![
            Box::new(KeywordMatcher::new(Arc::clone(&catalog))),
            Box::new(FuzzyMatcher::new(Arc::clone(&catalog), config.fuzzy_threshold)),
            Box::new(PatternMatcher::new()?),
            Box::new(ContextAnalyzer::new(
                config.context_window_minutes,
                config.distress_repeat_threshold,
            )),
        ];

        Ok(Self {
            catalog,
            config,
            strategies,
        })
    }

    /// Creates a classifier with the built-in catalog and default settings.
    pub fn with_defaults() -> Result<Self, regex::Error> {
        Self::new(
            Arc::new(TriggerCatalog::default_catalog()),
            SafetyConfig::default(),
        )
    }

    /// Appends a strategy that runs after the built-in ones.
    pub fn with_strategy(mut self, strategy: Box<dyn DetectionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// The catalog in use.
    pub fn catalog(&self) -> &TriggerCatalog {
        &self.catalog
    }

    /// Names of the active strategies, in execution order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Classifies a message.
    pub fn analyze(&self, message: &str, context: &ConversationContext) -> SafetyResult {
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.try_analyze(message, context, start)
        }));
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(error = %e, user_id = %context.user_id, "Analysis failed, using fail-safe result");
                SafetyResult::fail_safe(elapsed_ms)
            }
            Err(payload) => {
                let e = AnalysisError::Panicked(panic_message(payload.as_ref()));
                error!(error = %e, user_id = %context.user_id, "Analysis failed, using fail-safe result");
                SafetyResult::fail_safe(elapsed_ms)
            }
        };

        if elapsed_ms > self.config.detection_budget_ms {
            warn!(
                elapsed_ms,
                budget_ms = self.config.detection_budget_ms,
                "Message analysis exceeded detection budget"
            );
        }

        result
    }

    fn try_analyze(
        &self,
        message: &str,
        context: &ConversationContext,
        start: Instant,
    ) -> Result<SafetyResult, AnalysisError> {
        let normalized = NormalizedMessage::new(message);
        if normalized.is_empty() {
            return Ok(SafetyResult::safe(start.elapsed().as_millis() as u64));
        }

        let mut matches: Vec<TriggerMatch> = Vec::new();
        for strategy in &self.strategies {
            let found = strategy.detect(&normalized, context)?;
            debug!(strategy = strategy.name(), matches = found.len(), "Strategy finished");
            for candidate in found {
                if !is_duplicate(&matches, &candidate) {
                    matches.push(candidate);
                }
            }
        }

        let severity = aggregate_severity(&matches);
        let risk_factors = risk_factors(&matches, context);
        let concerns = context.contextual_concerns();
        let actions = recommended_actions(severity, &matches);

        let result = SafetyResult::from_matches(
            matches,
            risk_factors,
            concerns,
            actions,
            start.elapsed().as_millis() as u64,
        )?;

        debug!(
            severity = %result.severity,
            confidence = result.confidence,
            matches = result.matches.len(),
            requires_escalation = result.requires_escalation,
            "Message analyzed"
        );
        Ok(result)
    }
}

/// Fuzzy and pattern hits that overlap an accepted match of the same
/// category restate it and are dropped. Exact and context matches are kept.
fn is_duplicate(accepted: &[TriggerMatch], candidate: &TriggerMatch) -> bool {
    match candidate.match_type {
        MatchType::Exact | MatchType::Context => false,
        MatchType::Fuzzy | MatchType::Pattern => accepted.iter().any(|m| {
            m.category == candidate.category
                && m.match_type != MatchType::Context
                && m.position.overlaps(&candidate.position)
        }),
    }
}

fn risk_factors(matches: &[TriggerMatch], context: &ConversationContext) -> Vec<String> {
    let mut factors = Vec::new();
    let crisis = matches
        .iter()
        .filter(|m| m.severity == Severity::Crisis)
        .count();
    if crisis >= 2 {
        factors.push("multiple_crisis_indicators".to_string());
    }
    if matches.iter().any(|m| m.confidence > HIGH_CONFIDENCE) {
        factors.push("high_confidence_match".to_string());
    }
    if context.is_vulnerable() {
        factors.push("vulnerable_user".to_string());
    }
    if context.previous_escalations() > 0 {
        factors.push("previous_escalations".to_string());
    }
    factors
}

fn recommended_actions(severity: Severity, matches: &[TriggerMatch]) -> Vec<String> {
    let mut actions: Vec<&str> = match severity {
        Severity::Crisis => vec![
            "immediate_nurse_notification",
            "crisis_resources_provision",
            "safety_plan_activation",
        ],
        Severity::HighConcern => vec![
            "nurse_notification",
            "support_resources",
            "follow_up_scheduling",
        ],
        Severity::EmotionalSupport => vec!["supportive_resources", "gentle_inquiry"],
        Severity::General => Vec::new(),
    };

    let medical = matches.iter().any(|m| {
        matches!(
            m.category,
            TriggerCategory::LifeThreatening | TriggerCategory::SevereBleeding
        )
    });
    if severity == Severity::Crisis && medical {
        actions.push("emergency_services_guidance");
    }

    actions.into_iter().map(String::from).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
