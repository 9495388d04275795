//! The trigger phrase lexicon.
//!
//! A catalog maps severity tier → category → phrases. It is built once at
//! startup (from the built-in lexicon or a JSON file) and shared read-only
//! between every classifier, so it needs no synchronization.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::normalize::normalize;
use super::{Severity, TriggerCategory};
use crate::config::ConfigError;

/// A single phrase entry with its tier and category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPhrase {
    /// Normalized phrase text.
    pub phrase: String,
    /// Tier the phrase was listed under.
    pub severity: Severity,
    /// Category the phrase was listed under.
    pub category: TriggerCategory,
    /// Number of words in the phrase.
    pub word_count: usize,
}

/// Raw on-disk shape: `{"crisis": {"suicide_ideation": ["kill myself"]}}`.
type RawCatalog = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Immutable, categorized lexicon of risk phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCatalog {
    tiers: BTreeMap<Severity, BTreeMap<TriggerCategory, Vec<String>>>,
    /// Flattened view, highest tier first, in deterministic order.
    phrases: Vec<CatalogPhrase>,
}

impl TriggerCatalog {
    /// Builds a catalog from an already-parsed mapping.
    ///
    /// Phrases are normalized the same way messages are and de-duplicated
    /// within their category. Empty phrases are rejected.
    pub fn new(
        tiers: BTreeMap<Severity, BTreeMap<TriggerCategory, Vec<String>>>,
    ) -> Result<Self, ConfigError> {
        let mut normalized: BTreeMap<Severity, BTreeMap<TriggerCategory, Vec<String>>> =
            BTreeMap::new();

        for (severity, categories) in tiers {
            for (category, phrases) in categories {
                let entry = normalized
                    .entry(severity)
                    .or_default()
                    .entry(category)
                    .or_default();
                for phrase in phrases {
                    let phrase = normalize(&phrase);
                    if phrase.is_empty() {
                        return Err(ConfigError::EmptyPhrase(category.to_string()));
                    }
                    if !entry.contains(&phrase) {
                        entry.push(phrase);
                    }
                }
            }
        }

        let mut phrases = Vec::new();
        for (severity, categories) in normalized.iter().rev() {
            for (category, list) in categories {
                for phrase in list {
                    phrases.push(CatalogPhrase {
                        phrase: phrase.clone(),
                        severity: *severity,
                        category: *category,
                        word_count: phrase.split(' ').count(),
                    });
                }
            }
        }

        Ok(Self {
            tiers: normalized,
            phrases,
        })
    }

    /// Parses a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawCatalog = serde_json::from_str(json)?;
        let mut tiers = BTreeMap::new();
        for (tier_name, categories) in raw {
            let severity: Severity = tier_name
                .parse()
                .map_err(|_| ConfigError::UnknownSeverity(tier_name.clone()))?;
            let mut parsed = BTreeMap::new();
            for (category_name, phrases) in categories {
                let category: TriggerCategory = category_name
                    .parse()
                    .map_err(|_| ConfigError::UnknownCategory(category_name.clone()))?;
                parsed.insert(category, phrases);
            }
            tiers.insert(severity, parsed);
        }
        Self::new(tiers)
    }

    /// Loads a catalog from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&json)?;
        info!(
            "Loaded trigger catalog from {:?} ({} phrases)",
            path,
            catalog.len()
        );
        Ok(catalog)
    }

    /// Serializes the catalog back to its JSON shape.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let raw: RawCatalog = self
            .tiers
            .iter()
            .map(|(sev, cats)| {
                let cats = cats
                    .iter()
                    .map(|(cat, list)| (cat.to_string(), list.clone()))
                    .collect();
                (sev.to_string(), cats)
            })
            .collect();
        Ok(serde_json::to_string_pretty(&raw)?)
    }

    /// The built-in gynaecological-support lexicon.
    pub fn default_catalog() -> Self {
        let mut tiers: BTreeMap<Severity, BTreeMap<TriggerCategory, Vec<String>>> =
            BTreeMap::new();

        let mut add = |severity: Severity, category: TriggerCategory, phrases: &[&str]| {
            tiers
                .entry(severity)
                .or_default()
                .insert(category, phrases.iter().map(|p| p.to_string()).collect());
        };

        add(
            Severity::Crisis,
            TriggerCategory::SuicideIdeation,
            &[
                "kill myself",
                "want to die",
                "end my life",
                "end it all",
                "take my own life",
                "suicide",
                "suicidal",
                "better off dead",
                "no reason to live",
                "dont want to be here anymore",
            ],
        );
        add(
            Severity::Crisis,
            TriggerCategory::SelfHarm,
            &[
                "hurt myself",
                "harm myself",
                "self harm",
                "cut myself",
                "cutting myself",
            ],
        );
        add(
            Severity::Crisis,
            TriggerCategory::LifeThreatening,
            &[
                "chest pain",
                "cant breathe",
                "difficulty breathing",
                "unconscious",
                "passed out",
                "seizure",
                "heart attack",
            ],
        );
        add(
            Severity::Crisis,
            TriggerCategory::SevereBleeding,
            &[
                "heavy bleeding",
                "bleeding heavily",
                "soaking through pads",
                "haemorrhage",
                "hemorrhage",
                "wont stop bleeding",
            ],
        );
        add(
            Severity::Crisis,
            TriggerCategory::ImmediateDanger,
            &[
                "not safe at home",
                "going to hurt me",
                "threatened to kill me",
                "being abused",
                "in danger",
            ],
        );
        add(
            Severity::HighConcern,
            TriggerCategory::SevereDistress,
            &[
                "cant cope",
                "cant go on",
                "completely hopeless",
                "falling apart",
                "breaking down",
            ],
        );
        add(
            Severity::HighConcern,
            TriggerCategory::CallbackRequest,
            &[
                "call me back",
                "speak to a nurse",
                "talk to a nurse",
                "speak to someone",
                "callback",
            ],
        );
        add(
            Severity::EmotionalSupport,
            TriggerCategory::EmotionalDistress,
            &[
                "feel sad",
                "feeling low",
                "feel alone",
                "so lonely",
                "depressed",
                "crying all the time",
            ],
        );
        add(
            Severity::EmotionalSupport,
            TriggerCategory::AnxietyIndicators,
            &["anxious", "panic attack", "so worried", "scared", "frightened"],
        );
        add(
            Severity::General,
            TriggerCategory::PainIndicators,
            &["period pain", "cramps", "pelvic pain"],
        );
        add(
            Severity::General,
            TriggerCategory::GeneralConcern,
            &["worried about", "is it normal", "not sure if normal"],
        );

        // Built-in phrases are static and non-empty, so this cannot fail.
        Self::new(tiers).unwrap_or_else(|_| Self {
            tiers: BTreeMap::new(),
            phrases: Vec::new(),
        })
    }

    /// All phrases, highest tier first.
    pub fn phrases(&self) -> &[CatalogPhrase] {
        &self.phrases
    }

    /// Phrases listed under one tier.
    pub fn phrases_for_tier(&self, severity: Severity) -> impl Iterator<Item = &CatalogPhrase> {
        self.phrases.iter().filter(move |p| p.severity == severity)
    }

    /// Phrases listed under one category, across tiers.
    pub fn phrases_for_category(
        &self,
        category: TriggerCategory,
    ) -> impl Iterator<Item = &CatalogPhrase> {
        self.phrases.iter().filter(move |p| p.category == category)
    }

    /// Total number of phrases.
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    /// Returns true if the catalog has no phrases.
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl Default for TriggerCatalog {
    fn default() -> Self {
        Self::default_catalog()
    }
}

/// Serializable summary used by diagnostics and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSummary {
    /// Phrase count per tier.
    pub per_tier: BTreeMap<Severity, usize>,
    /// Total phrase count.
    pub total: usize,
}

impl From<&TriggerCatalog> for CatalogSummary {
    fn from(catalog: &TriggerCatalog) -> Self {
        let mut per_tier = BTreeMap::new();
        for p in catalog.phrases() {
            *per_tier.entry(p.severity).or_insert(0) += 1;
        }
        Self {
            per_tier,
            total: catalog.len(),
        }
    }
}
