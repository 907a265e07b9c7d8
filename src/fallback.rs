//! Fallback extraction through an external completion service.
//! Every failure (transport, timeout, malformed or invalid reply) degrades to `None`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::clients::traits::{CompletionBackend, CompletionError};
use crate::error::{Result, StockError};
use crate::extractor::{ExtractionResult, StatePair};
use crate::vocabulary::{Vocabulary, fold};

/// Reply shape requested from the completion service
#[derive(Debug, Deserialize)]
struct RawReply {
    shop: String,
    items: Vec<(String, String)>,
}

/// Completion reply validated at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReply {
    Valid { shop: String, items: Vec<StatePair> },
    /// The `{"shop": "", "items": []}` answer: the text reports nothing
    Empty,
    Invalid(String),
}

impl FallbackReply {
    /// Decode and validate a raw reply; prose or code fences around the object are tolerated
    pub fn parse(raw: &str, vocabulary: &Vocabulary) -> Self {
        let decoded = decode_object(raw.trim()).or_else(|| {
            extract_json_candidates(raw)
                .iter()
                .rev()
                .find_map(|candidate| decode_object(candidate))
        });
        let Some(reply) = decoded else {
            return Self::Invalid(format!(
                "no object with shop/items found in reply: {}",
                snippet(raw)
            ));
        };

        if reply.shop.trim().is_empty() && reply.items.is_empty() {
            return Self::Empty;
        }
        let Some(shop) = vocabulary.canonical_shop(&reply.shop) else {
            return Self::Invalid(format!("unknown shop '{}'", reply.shop));
        };
        if reply.items.is_empty() {
            return Self::Invalid("reply has no items".to_string());
        }

        let states = vocabulary.canonical_states();
        let items: Vec<StatePair> = reply
            .items
            .iter()
            .filter_map(|(state, item)| {
                let item = fold(item);
                let state = vocabulary.normalize_state(state);
                if !states.contains(&state) {
                    tracing::debug!("fallback state '{}' is not in the vocabulary", state);
                    return None;
                }
                (!item.is_empty()).then(|| StatePair::new(state, item))
            })
            .collect();
        if items.is_empty() {
            return Self::Invalid("no item with a known state in reply".to_string());
        }

        Self::Valid {
            shop: shop.to_string(),
            items,
        }
    }
}

pub struct FallbackExtractor {
    backend: Arc<dyn CompletionBackend>,
    vocabulary: Arc<Vocabulary>,
    timeout: Duration,
}

impl FallbackExtractor {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        vocabulary: Arc<Vocabulary>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            vocabulary,
            timeout,
        }
    }

    pub fn build_prompt(&self, text: &str) -> String {
        let shops = self.vocabulary.shops().join(", ");
        let states = self.vocabulary.canonical_states().join(", ");
        format!(
            "Определи магазин и товары из сообщения о наличии товара.\n\
             Магазины: {shops}\n\
             Состояния: {states}\n\
             Ответь только JSON-объектом вида \
             {{\"shop\": \"<магазин>\", \"items\": [[\"<состояние>\", \"<товар>\"]]}}.\n\
             Используй только перечисленные магазины и состояния. \
             Если магазин или товары не упомянуты, верни {{\"shop\": \"\", \"items\": []}}.\n\
             Сообщение:\n{text}"
        )
    }

    /// One request, no retry; failures are logged and reported as no result
    pub async fn extract(&self, text: &str) -> Option<ExtractionResult> {
        match self.try_extract(text).await {
            Ok(Some(result)) => {
                tracing::debug!(
                    "fallback extracted {} pair(s) for shop '{}'",
                    result.pairs.len(),
                    result.shop
                );
                Some(result)
            }
            Ok(None) => {
                tracing::debug!("fallback found nothing to record");
                None
            }
            Err(e) => {
                tracing::warn!("fallback extraction failed: {}", e);
                None
            }
        }
    }

    /// `Ok(None)` when the service answers that the text reports nothing
    pub async fn try_extract(&self, text: &str) -> Result<Option<ExtractionResult>> {
        let prompt = self.build_prompt(text);
        let timeout_ms = self.timeout.as_millis() as u64;
        let raw = match tokio::time::timeout(self.timeout, self.backend.complete(&prompt)).await {
            Err(_) | Ok(Err(CompletionError::Timeout { .. })) => {
                return Err(StockError::Timeout {
                    operation: "fallback extraction".to_string(),
                    timeout_ms,
                });
            }
            Ok(Err(e)) => {
                return Err(StockError::Transport {
                    message: e.to_string(),
                });
            }
            Ok(Ok(raw)) => raw,
        };

        match FallbackReply::parse(&raw, &self.vocabulary) {
            FallbackReply::Valid { shop, items } => {
                Ok(Some(ExtractionResult { shop, pairs: items }))
            }
            FallbackReply::Empty => Ok(None),
            FallbackReply::Invalid(reason) => Err(StockError::MalformedResponse { message: reason }),
        }
    }
}

/// Only a JSON object qualifies; serde would otherwise accept `[shop, items]` too
fn decode_object(text: &str) -> Option<RawReply> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn snippet(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= 200 {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(200).collect();
    out.push_str("...");
    out
}

/// Balanced top-level `{...}` spans, skipping braces inside strings
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut depth: u32 = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0
                        && let Some(s) = start.take()
                    {
                        candidates.push(text[s..idx + 1].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Canned(std::result::Result<String, ()>);

    #[async_trait]
    impl CompletionBackend for Canned {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, CompletionError> {
            self.0
                .clone()
                .map_err(|_| CompletionError::Http("connection refused".into()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl CompletionBackend for Hanging {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, CompletionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn extractor(backend: impl CompletionBackend + 'static) -> FallbackExtractor {
        FallbackExtractor::new(
            Arc::new(backend),
            Arc::new(Vocabulary::default()),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn parse_accepts_valid_reply_and_normalizes() {
        let vocab = Vocabulary::default();
        let reply = FallbackReply::parse(
            r#"{"shop": "Янтарь", "items": [["закончились", " Стичи "], ["мало", "лабубу"]]}"#,
            &vocab,
        );
        assert_eq!(
            reply,
            FallbackReply::Valid {
                shop: "янтарь".into(),
                items: vec![StatePair::new("нету", "стичи"), StatePair::new("мало", "лабубу")],
            }
        );
    }

    #[test]
    fn parse_tolerates_code_fences() {
        let vocab = Vocabulary::default();
        let raw = "Вот ответ:\n```json\n{\"shop\": \"хайп\", \"items\": [[\"мало\", \"брелки {mini}\"]]}\n```";
        match FallbackReply::parse(raw, &vocab) {
            FallbackReply::Valid { shop, items } => {
                assert_eq!(shop, "хайп");
                assert_eq!(items, vec![StatePair::new("мало", "брелки {mini}")]);
            }
            other => panic!("expected valid reply, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_unknown_shop_and_empty_items() {
        let vocab = Vocabulary::default();
        assert!(matches!(
            FallbackReply::parse(r#"{"shop": "ашан", "items": [["мало", "хлеб"]]}"#, &vocab),
            FallbackReply::Invalid(_)
        ));
        assert!(matches!(
            FallbackReply::parse(r#"{"shop": "хайп", "items": []}"#, &vocab),
            FallbackReply::Invalid(_)
        ));
        assert!(matches!(
            FallbackReply::parse(r#"{"shop": "хайп", "items": [["мало", "  "]]}"#, &vocab),
            FallbackReply::Invalid(_)
        ));
    }

    #[test]
    fn parse_rejects_wrong_shapes() {
        let vocab = Vocabulary::default();
        for raw in [
            "not json at all",
            r#"{"shop": "хайп"}"#,
            r#"{"items": [["мало", "лабубу"]]}"#,
            r#"{"shop": "хайп", "items": [["мало", "лабубу", "лишнее"]]}"#,
            r#"{"shop": "хайп", "items": "мало лабубу"}"#,
            r#"["хайп", [["мало", "лабубу"]]]"#,
            r#"{"shop": "хайп", "items": [["есть", "лабубу"], ["полно", "стичи"]]}"#,
        ] {
            assert!(
                matches!(FallbackReply::parse(raw, &vocab), FallbackReply::Invalid(_)),
                "should reject {raw}"
            );
        }
    }

    #[test]
    fn parse_drops_states_outside_vocabulary() {
        let vocab = Vocabulary::default();
        let reply = FallbackReply::parse(
            r#"{"shop": "хайп", "items": [["полно", "стичи"], ["нет", "лабубу"]]}"#,
            &vocab,
        );
        assert_eq!(
            reply,
            FallbackReply::Valid {
                shop: "хайп".into(),
                items: vec![StatePair::new("нету", "лабубу")],
            }
        );
    }

    #[tokio::test]
    async fn nothing_to_report_is_not_an_error() {
        let fallback = extractor(Canned(Ok(r#"{"shop": "", "items": []}"#.into())));
        assert_eq!(
            FallbackReply::parse(r#"{"shop": " ", "items": []}"#, &Vocabulary::default()),
            FallbackReply::Empty
        );
        assert!(matches!(fallback.try_extract("привет").await, Ok(None)));
        assert_eq!(fallback.extract("привет").await, None);
    }

    #[test]
    fn prompt_lists_shops_states_and_text() {
        let prompt = extractor(Canned(Ok(String::new()))).build_prompt("ну там мало этих");
        assert!(prompt.contains("хайп, янтарь, полка"));
        assert!(prompt.contains("мало, нету"));
        assert!(prompt.ends_with("ну там мало этих"));
    }

    #[tokio::test]
    async fn transport_error_is_no_result() {
        let fallback = extractor(Canned(Err(())));
        assert_eq!(fallback.extract("что-то про хайп").await, None);
        assert!(matches!(
            fallback.try_extract("что-то про хайп").await,
            Err(StockError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_reply_is_no_result() {
        let fallback = extractor(Canned(Ok("{\"shop\": 5".into())));
        assert_eq!(fallback.extract("что-то").await, None);
        assert!(matches!(
            fallback.try_extract("что-то").await,
            Err(StockError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn hung_backend_times_out() {
        let fallback = extractor(Hanging);
        assert!(matches!(
            fallback.try_extract("что-то").await,
            Err(StockError::Timeout { timeout_ms: 50, .. })
        ));
    }

    #[tokio::test]
    async fn valid_reply_becomes_extraction() {
        let fallback = extractor(Canned(Ok(
            r#"{"shop": "полка", "items": [["не осталось", "чехлы"]]}"#.into(),
        )));
        let result = fallback.extract("полка, чехлов больше нет").await.unwrap();
        assert_eq!(result.shop, "полка");
        assert_eq!(result.pairs, vec![StatePair::new("нету", "чехлы")]);
    }
}
