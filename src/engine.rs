//! Per-message pipeline: context buffer, heuristic pass, detached fallback, aggregation

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::aggregator::{Aggregator, Bucketing, SharedAggregator, Snapshot};
use crate::clients::traits::CompletionBackend;
use crate::config::Config;
use crate::context::ContextBuffer;
use crate::error::Result;
use crate::extractor::{ExtractionResult, HeuristicExtractor};
use crate::fallback::FallbackExtractor;
use crate::popularity::PopularityStore;
use crate::report::ReportRenderer;
use crate::vocabulary::Vocabulary;

/// One chat message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: String,
    pub chat_id: i64,
    pub topic_id: Option<i64>,
    pub message_id: i64,
    /// None for stickers, photos and other non-text content
    pub text: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum MessageOutcome {
    /// Wrong chat or topic, or no text
    Ignored,
    /// The report command; the caller sends the text back as a reply
    Report(String),
    /// Heuristics recorded this many triples
    Recorded { shop: String, triples: usize },
    /// Fallback submitted as a detached task; resolves to the number of triples recorded
    Deferred(JoinHandle<usize>),
    NoMatch,
}

struct EngineInner {
    heuristic: HeuristicExtractor,
    fallback: Option<FallbackExtractor>,
    context: Mutex<ContextBuffer>,
    aggregator: SharedAggregator,
    popularity: Option<Mutex<PopularityStore>>,
    renderer: ReportRenderer,
    chat_id: Option<i64>,
    topic_id: Option<i64>,
    command: String,
    window: usize,
    tz: Tz,
}

/// Cheap to clone; every clone shares the same counts and buffers
#[derive(Clone)]
pub struct StockEngine {
    inner: Arc<EngineInner>,
}

impl StockEngine {
    /// Build from configuration. `backend` is only used when the fallback is enabled.
    pub fn from_config(
        config: &Config,
        backend: Option<Arc<dyn CompletionBackend>>,
    ) -> Result<Self> {
        let vocabulary = Arc::new(Vocabulary::from_config(&config.vocabulary));
        let heuristic = HeuristicExtractor::new(vocabulary.clone())?;

        let fallback = match backend {
            Some(backend) if config.fallback.enable => Some(FallbackExtractor::new(
                backend,
                vocabulary.clone(),
                Duration::from_millis(config.fallback.timeout_ms),
            )),
            _ => None,
        };

        let max_age = config
            .context
            .max_age_hours
            .map(|h| chrono::Duration::hours(h as i64));
        let context = ContextBuffer::new(
            config.context.capacity,
            config.context.max_senders,
            max_age,
        );

        let bucketing = if config.storage.daily_buckets {
            Bucketing::Daily
        } else {
            Bucketing::Lifetime
        };

        let popularity = config.storage.popularity_file.as_ref().map(|path| {
            let store = PopularityStore::load(path);
            tracing::info!(
                "Popularity file {} loaded, top items: {:?}",
                store.path().display(),
                store.top(3)
            );
            Mutex::new(store)
        });

        Ok(Self {
            inner: Arc::new(EngineInner {
                heuristic,
                fallback,
                context: Mutex::new(context),
                aggregator: Aggregator::shared(bucketing),
                popularity,
                renderer: ReportRenderer::new(vocabulary, &config.report),
                chat_id: config.telegram.group_chat_id,
                topic_id: config.telegram.topic_id,
                command: config.report.command.trim().to_string(),
                window: config.context.window,
                tz: config.report.tz()?,
            }),
        })
    }

    /// Shared handle to the counts
    pub fn aggregator(&self) -> SharedAggregator {
        self.inner.aggregator.clone()
    }

    pub fn has_fallback(&self) -> bool {
        self.inner.fallback.is_some()
    }

    pub async fn handle_message(&self, message: InboundMessage) -> MessageOutcome {
        let inner = &self.inner;
        let text = message.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return MessageOutcome::Ignored;
        }
        if inner.chat_id.is_some_and(|chat| chat != message.chat_id) {
            return MessageOutcome::Ignored;
        }
        if self.is_command(text) {
            tracing::info!("Report requested by {}", message.sender_id);
            return MessageOutcome::Report(self.render_report(message.received_at).await);
        }
        if inner.topic_id.is_some_and(|topic| Some(topic) != message.topic_id) {
            return MessageOutcome::Ignored;
        }

        let (seq, window_text) = {
            let mut context = inner.context.lock().await;
            let seq = context.append(&message.sender_id, text, message.received_at);
            let window =
                context.recent_text_since(&message.sender_id, inner.window, message.received_at);
            (seq, window)
        };

        if let Some(result) = inner.heuristic.extract(text) {
            self.mark_recorded(&message.sender_id, seq).await;
            let triples = self.record(&result, message.received_at).await;
            return MessageOutcome::Recorded {
                shop: result.shop,
                triples,
            };
        }

        let window_text = window_text.filter(|w| w.as_str() != text);
        if let Some(window) = window_text.as_deref()
            && let Some(result) = inner.heuristic.extract(window)
        {
            tracing::debug!("Context window of {} resolved the message", message.sender_id);
            self.mark_recorded(&message.sender_id, seq).await;
            let triples = self.record(&result, message.received_at).await;
            return MessageOutcome::Recorded {
                shop: result.shop,
                triples,
            };
        }

        if inner.fallback.is_none() {
            tracing::debug!(
                "No match for message {} from {}",
                message.message_id,
                message.sender_id
            );
            return MessageOutcome::NoMatch;
        }

        // Detached: the sample is fixed now even if the buffer moves on, and the task's
        // increments may land after those of later messages. A success retires the
        // sampled entries only, up to this message.
        let sample = window_text.unwrap_or_else(|| text.to_string());
        let engine = self.clone();
        let sender_id = message.sender_id;
        let received_at = message.received_at;
        MessageOutcome::Deferred(tokio::spawn(async move {
            let Some(fallback) = engine.inner.fallback.as_ref() else {
                return 0;
            };
            match fallback.extract(&sample).await {
                Some(result) => {
                    engine.mark_recorded(&sender_id, seq).await;
                    engine.record(&result, Utc::now().max(received_at)).await
                }
                None => 0,
            }
        }))
    }

    async fn mark_recorded(&self, sender_id: &str, seq: u64) {
        self.inner.context.lock().await.mark_recorded(sender_id, seq);
    }

    /// Report for an on-demand request; stale daily buckets are dropped first
    pub async fn render_report(&self, now: DateTime<Utc>) -> String {
        let snapshot = {
            let mut aggregator = self.inner.aggregator.lock().await;
            aggregator.roll_over(self.local_date(now));
            aggregator.snapshot()
        };
        self.render_snapshot(&snapshot, now)
    }

    /// Report for the scheduled push at `fire_at`. The closing day is the local day the
    /// instant just before `fire_at` belongs to; in daily mode counts from any other day
    /// are not reported.
    pub async fn render_closing_report(&self, fire_at: DateTime<Utc>) -> String {
        let closing_day = self.local_date(fire_at - chrono::Duration::seconds(1));
        let snapshot = self.inner.aggregator.lock().await.snapshot_for(closing_day);
        self.render_snapshot(&snapshot, fire_at)
    }

    fn render_snapshot(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> String {
        let local = now.with_timezone(&self.inner.tz).naive_local();
        self.inner.renderer.render(snapshot, local)
    }

    fn is_command(&self, text: &str) -> bool {
        let command = self.inner.command.as_str();
        if command.is_empty() {
            return false;
        }
        match text.strip_prefix(command) {
            Some(rest) => {
                rest.is_empty() || rest.starts_with('@') || rest.starts_with(char::is_whitespace)
            }
            None => false,
        }
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.inner.tz).date_naive()
    }

    async fn record(&self, result: &ExtractionResult, now: DateTime<Utc>) -> usize {
        {
            let mut aggregator = self.inner.aggregator.lock().await;
            if aggregator.roll_over(self.local_date(now)) {
                tracing::info!("New day bucket started, previous counts dropped");
            }
            for pair in &result.pairs {
                aggregator.increment(&result.shop, &pair.item, &pair.state);
            }
        }

        if let Some(popularity) = &self.inner.popularity {
            let items = result.pairs.iter().map(|p| p.item.as_str());
            if let Err(e) = popularity.lock().await.record(items).await {
                tracing::warn!("Failed to persist popularity: {}", e);
            }
        }

        tracing::info!(
            "[{}] recorded {:?}",
            result.shop.to_uppercase(),
            result
                .pairs
                .iter()
                .map(|p| (p.state.as_str(), p.item.as_str()))
                .collect::<Vec<_>>()
        );
        result.pairs.len()
    }
}
