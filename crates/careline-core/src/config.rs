//! Runtime configuration.
//!
//! Everything is loaded from a single JSON file. Every field has a default,
//! so a partial (or missing) file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::escalation::{Backoff, RetryPolicy};

/// Errors loading configuration or catalog files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a file failed.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid JSON for the expected shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A catalog tier name is not a known severity.
    #[error("unknown severity tier: {0}")]
    UnknownSeverity(String),

    /// A catalog category name is not a known trigger category.
    #[error("unknown trigger category: {0}")]
    UnknownCategory(String),

    /// A catalog phrase is empty after normalization.
    #[error("catalog phrase is empty after normalization: {0:?}")]
    EmptyPhrase(String),

    /// No platform configuration directory could be determined.
    #[error("could not determine configuration directory")]
    NoConfigDir,
}

/// Support resources per response cluster.
///
/// Each entry is `"name: contact"` optionally followed by
/// `" | description | availability"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceTemplates {
    /// Life-threatening symptoms and severe bleeding.
    pub medical_emergency: Vec<String>,
    /// Suicidal ideation, self-harm and severe distress.
    pub mental_health_crisis: Vec<String>,
    /// Abuse or threats to the user's safety.
    pub immediate_danger: Vec<String>,
    /// Elevated concern without a crisis cluster.
    pub high_concern: Vec<String>,
    /// Emotional support and general questions.
    pub low_severity: Vec<String>,
}

impl Default for ResourceTemplates {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            medical_emergency: list(&[
                "Emergency Services: 999 | Call now if you are in immediate danger or have severe symptoms | 24/7",
                "NHS 111: 111 | Urgent medical advice when it is not a 999 emergency | 24/7",
            ]),
            mental_health_crisis: list(&[
                "Samaritans: 116 123 | Free, confidential emotional support | 24/7",
                "Shout: text SHOUT to 85258 | Crisis text line | 24/7",
                "Emergency Services: 999 | If you are in immediate danger | 24/7",
            ]),
            immediate_danger: list(&[
                "Emergency Services: 999 | If you are in immediate danger, call 999 | 24/7",
                "National Domestic Abuse Helpline: 0808 2000 247 | Free, confidential support | 24/7",
            ]),
            high_concern: list(&[
                "NHS 111: 111 | Urgent medical advice | 24/7",
                "Samaritans: 116 123 | Someone to talk to | 24/7",
            ]),
            low_severity: list(&[
                "Mind: 0300 123 3393 | Mental health information and support | Weekdays 9am-6pm",
                "NHS 111: 111 | Medical advice | 24/7",
            ]),
        }
    }
}

/// Disclaimers attached to every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disclaimers {
    /// Always included.
    pub general: String,
    /// Always included.
    pub medical: String,
    /// Included for crisis responses.
    pub emergency: String,
}

impl Default for Disclaimers {
    fn default() -> Self {
        Self {
            general: "This service provides information and support, not a diagnosis.".into(),
            medical: "Always consult a healthcare professional about your symptoms.".into(),
            emergency: "If you are in immediate danger or need urgent medical help, call 999."
                .into(),
        }
    }
}

/// Classifier and response settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Analysis time above which a warning is logged.
    pub detection_budget_ms: u64,
    /// Similarity a fuzzy window must exceed.
    pub fuzzy_threshold: f32,
    /// History lookback for repeated distress.
    pub context_window_minutes: i64,
    /// Distress terms in the lookback that raise a match.
    pub distress_repeat_threshold: usize,
    /// Support resources.
    pub resources: ResourceTemplates,
    /// Response disclaimers.
    pub disclaimers: Disclaimers,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            detection_budget_ms: 500,
            fuzzy_threshold: 0.8,
            context_window_minutes: 60,
            distress_repeat_threshold: 3,
            resources: ResourceTemplates::default(),
            disclaimers: Disclaimers::default(),
        }
    }
}

impl SafetyConfig {
    /// The detection budget as a duration.
    pub fn detection_budget(&self) -> Duration {
        Duration::from_millis(self.detection_budget_ms)
    }
}

/// Retry settings of the single-channel crisis alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyAlertConfig {
    /// Attempts before giving up.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay_ms: u64,
    /// Delay growth between attempts.
    pub backoff: Backoff,
}

impl Default for LegacyAlertConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            backoff: Backoff::Linear,
        }
    }
}

impl LegacyAlertConfig {
    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Fixed => self.retry_delay_ms,
            Backoff::Linear => self.retry_delay_ms.saturating_mul(u64::from(attempt.max(1))),
        };
        Duration::from_millis(millis)
    }
}

/// Retry settings per channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Primary webhook channel.
    pub teams: RetryPolicy,
    /// Secondary email channel.
    pub email: RetryPolicy,
    /// Single-channel crisis alert.
    pub legacy: LegacyAlertConfig,
}

/// Where alerts are sent. Unset endpoints leave the channel unconfigured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelEndpoints {
    /// Chat-ops incoming webhook URL.
    pub webhook_url: Option<String>,
    /// HTTP mail relay URL.
    pub email_relay_url: Option<String>,
    /// Sender address for alert emails.
    pub email_from: Option<String>,
    /// Nurse team addresses.
    pub email_recipients: Vec<String>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarelineConfig {
    /// Classifier and response settings.
    pub safety: SafetyConfig,
    /// Channel retry settings.
    pub dispatch: DispatchConfig,
    /// Channel endpoints.
    pub channels: ChannelEndpoints,
    /// Trigger catalog file; the built-in catalog is used when unset.
    pub catalog_path: Option<PathBuf>,
    /// SQLite database file; the platform default is used when unset.
    pub database_path: Option<PathBuf>,
}

impl CarelineConfig {
    /// Loads the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses the configuration from JSON.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Loads from `path`, or from the default location if it exists, or
    /// falls back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_config_path() {
            Ok(default) if default.exists() => Self::load(default),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/careline/config.json` for the current platform.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("org", "careline", "careline").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.json"))
    }
}
