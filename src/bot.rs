//! Long-polling loop against the Telegram Bot API

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clients::telegram::TelegramClient;
use crate::config::TelegramConfig;
use crate::engine::{InboundMessage, MessageOutcome, StockEngine};

/// Poll updates until cancelled. Transport errors are logged and retried after a backoff.
pub async fn run_polling(
    engine: StockEngine,
    client: Arc<TelegramClient>,
    config: &TelegramConfig,
    cancel: CancellationToken,
) {
    let mut offset: i64 = 0;
    let backoff = Duration::from_millis(config.error_backoff_ms);
    tracing::info!(
        "Polling Telegram updates (chat {:?}, topic {:?})",
        config.group_chat_id,
        config.topic_id
    );

    loop {
        let updates = tokio::select! {
            _ = cancel.cancelled() => break,
            res = client.get_updates(offset, config.poll_timeout_secs) => res,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("getUpdates failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(message) = update.into_inbound() {
                dispatch(&engine, &client, message).await;
            }
        }
    }
    tracing::info!("Polling stopped");
}

async fn dispatch(engine: &StockEngine, client: &TelegramClient, message: InboundMessage) {
    let (chat_id, topic_id, message_id) = (message.chat_id, message.topic_id, message.message_id);
    match engine.handle_message(message).await {
        MessageOutcome::Report(text) => {
            if let Err(e) = client
                .send_message(chat_id, topic_id, Some(message_id), &text)
                .await
            {
                tracing::warn!("Failed to reply with report: {}", e);
            }
        }
        MessageOutcome::Recorded { shop, triples } => {
            tracing::debug!("Message {} -> {} triples for {}", message_id, triples, shop);
        }
        MessageOutcome::Deferred(handle) => {
            // the fallback applies its own results; only surface panics
            tokio::spawn(async move {
                if let Err(e) = handle.await {
                    tracing::error!("Fallback task for message {} failed: {}", message_id, e);
                }
            });
        }
        MessageOutcome::Ignored | MessageOutcome::NoMatch => {}
    }
}
