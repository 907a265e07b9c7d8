//! Heuristic stock-status extraction: keyword/regex scan for a known shop.
//! Recall is preferred over precision. Both surface orders are searched for every
//! keyword and overlapping hits are kept, so one phrase can produce several candidates;
//! the aggregator's counts absorb the repetition.

use crate::error::{Result, StockError};
use crate::vocabulary::{Vocabulary, fold};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One (state, item) candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatePair {
    pub state: String,
    pub item: String,
}

impl StatePair {
    pub fn new(state: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            item: item.into(),
        }
    }
}

/// Shop plus every candidate found for it, in discovery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub shop: String,
    pub pairs: Vec<StatePair>,
}

struct KeywordPatterns {
    keyword: String,
    state: String,
    /// `<keyword> <item>`
    forward: Regex,
    /// `<item> <keyword>`
    backward: Regex,
}

/// Token run: word characters, digits, whitespace, hyphens and plus signs
const TOKEN_RUN: &str = r"[\w\s\-+]+";

pub struct HeuristicExtractor {
    vocabulary: Arc<Vocabulary>,
    patterns: Vec<KeywordPatterns>,
}

impl HeuristicExtractor {
    pub fn new(vocabulary: Arc<Vocabulary>) -> Result<Self> {
        let mut patterns = Vec::with_capacity(vocabulary.keywords().len());
        for keyword in vocabulary.keywords() {
            let escaped = regex::escape(keyword);
            let forward = Regex::new(&format!(r"{escaped}\s+({TOKEN_RUN})"));
            let backward = Regex::new(&format!(r"({TOKEN_RUN})\s+{escaped}"));
            let (forward, backward) = match (forward, backward) {
                (Ok(f), Ok(b)) => (f, b),
                (Err(e), _) | (_, Err(e)) => {
                    return Err(StockError::config(format!(
                        "keyword '{}' does not compile to a pattern: {}",
                        keyword, e
                    )));
                }
            };
            patterns.push(KeywordPatterns {
                keyword: keyword.clone(),
                state: vocabulary.normalize_state(keyword),
                forward,
                backward,
            });
        }
        Ok(Self {
            vocabulary,
            patterns,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Extract (shop, pairs) from `text`; None when no shop or no pair is found
    pub fn extract(&self, text: &str) -> Option<ExtractionResult> {
        let text = fold(text);
        if text.is_empty() {
            return None;
        }
        let shop = self.vocabulary.resolve_shop(&text)?;

        let mut pairs = Vec::new();
        for pattern in &self.patterns {
            if !text.contains(pattern.keyword.as_str()) {
                continue;
            }
            for regex in [&pattern.forward, &pattern.backward] {
                for caps in regex.captures_iter(&text) {
                    let Some(run) = caps.get(1) else { continue };
                    let item = run.as_str().trim();
                    if item.is_empty() {
                        continue;
                    }
                    pairs.push(StatePair::new(pattern.state.clone(), item));
                }
            }
        }

        if pairs.is_empty() {
            tracing::debug!("shop '{}' found but no state keywords matched", shop);
            return None;
        }
        Some(ExtractionResult {
            shop: shop.to_string(),
            pairs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> HeuristicExtractor {
        HeuristicExtractor::new(Arc::new(Vocabulary::default())).unwrap()
    }

    #[test]
    fn low_stock_in_keyword_first_order() {
        let result = extractor().extract("хайп мало лабубу").unwrap();
        assert_eq!(result.shop, "хайп");
        assert!(result.pairs.contains(&StatePair::new("мало", "лабубу")));
    }

    #[test]
    fn synonym_resolves_to_out_state() {
        let result = extractor().extract("янтарь нету стичей").unwrap();
        assert_eq!(result.shop, "янтарь");
        assert!(result.pairs.contains(&StatePair::new("нету", "стичей")));
        assert!(result.pairs.iter().all(|p| p.state == "нету"));
    }

    #[test]
    fn overlapping_candidates_are_not_deduplicated() {
        // "хайп мало" satisfies the backward pattern as well, and "нет" is a prefix of
        // "нету": every hit is reported and counted downstream.
        let result = extractor().extract("хайп мало лабубу").unwrap();
        assert_eq!(
            result.pairs,
            vec![StatePair::new("мало", "лабубу"), StatePair::new("мало", "хайп")]
        );

        let result = extractor().extract("янтарь нету стичей").unwrap();
        assert_eq!(
            result.pairs,
            vec![
                StatePair::new("нету", "стичей"),
                StatePair::new("нету", "янтарь"),
                StatePair::new("нету", "янтарь"),
            ]
        );
    }

    #[test]
    fn item_before_keyword() {
        let result = extractor().extract("Полка: молоко закончилось? нет, сыр закончился").unwrap();
        assert_eq!(result.shop, "полка");
        assert!(result.pairs.contains(&StatePair::new("нету", "сыр")));
    }

    #[test]
    fn multiword_keyword_and_item_runs() {
        let result = extractor().extract("в хайпе не осталось labubu big-into-energy+").unwrap();
        assert!(
            result
                .pairs
                .contains(&StatePair::new("нету", "labubu big-into-energy+"))
        );
    }

    #[test]
    fn shopless_text_is_never_scanned() {
        assert_eq!(extractor().extract("мало лабубу и нету стичей"), None);
    }

    #[test]
    fn shop_without_keywords_is_no_result() {
        assert_eq!(extractor().extract("в хайпе всё хорошо"), None);
        assert_eq!(extractor().extract("   "), None);
    }

    #[test]
    fn uppercase_input_is_folded() {
        let result = extractor().extract("ХАЙП МАЛО ЛАБУБУ").unwrap();
        assert!(result.pairs.contains(&StatePair::new("мало", "лабубу")));
    }
}
