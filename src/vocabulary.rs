//! Shop names, state keywords and synonym resolution shared by every extractor

use crate::config::VocabularyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// Two-valued report marker for a canonical state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateMarker {
    Low,
    Out,
}

impl StateMarker {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Low => "\u{26A0}\u{FE0F}",
            Self::Out => "\u{274C}",
        }
    }
}

/// Immutable vocabulary built once at startup
#[derive(Debug, Clone)]
pub struct Vocabulary {
    shops: Vec<String>,
    keywords: Vec<String>,
    synonyms: HashMap<String, String>,
    markers: HashMap<String, StateMarker>,
}

impl Vocabulary {
    pub fn from_config(config: &VocabularyConfig) -> Self {
        let clean = |values: &[String]| -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for value in values {
                let folded = fold(value);
                if !folded.is_empty() && !out.contains(&folded) {
                    out.push(folded);
                }
            }
            out
        };

        let synonyms = config
            .synonyms
            .iter()
            .map(|(k, v)| (fold(k), fold(v)))
            .collect();

        let mut markers = HashMap::new();
        for state in clean(&config.low_states) {
            markers.insert(state, StateMarker::Low);
        }
        for state in clean(&config.out_states) {
            markers.insert(state, StateMarker::Out);
        }

        Self {
            shops: clean(&config.shops),
            keywords: clean(&config.keywords),
            synonyms,
            markers,
        }
    }

    pub fn shops(&self) -> &[String] {
        &self.shops
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// First configured shop contained in `text`; configured order decides overlaps
    pub fn resolve_shop(&self, text: &str) -> Option<&str> {
        let folded = fold(text);
        self.shops
            .iter()
            .find(|shop| folded.contains(shop.as_str()))
            .map(String::as_str)
    }

    /// Exact, case-insensitive membership test used to validate fallback replies
    pub fn canonical_shop(&self, name: &str) -> Option<&str> {
        let folded = fold(name);
        self.shops
            .iter()
            .find(|shop| **shop == folded)
            .map(String::as_str)
    }

    /// Keywords missing from the synonym table are already canonical
    pub fn normalize_state(&self, keyword: &str) -> String {
        let folded = fold(keyword);
        match self.synonyms.get(&folded) {
            Some(canonical) => canonical.clone(),
            None => folded,
        }
    }

    /// Distinct canonical states in keyword order
    pub fn canonical_states(&self) -> Vec<String> {
        let mut states: Vec<String> = Vec::new();
        for keyword in &self.keywords {
            let state = self.normalize_state(keyword);
            if !states.contains(&state) {
                states.push(state);
            }
        }
        states
    }

    pub fn marker(&self, state: &str) -> Option<StateMarker> {
        self.markers.get(state).copied()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::from_config(&VocabularyConfig::default())
    }
}

/// NFC + lowercase so composed and decomposed spellings compare equal
pub fn fold(text: &str) -> String {
    text.trim().nfc().collect::<String>().to_lowercase()
}
