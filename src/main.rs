use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use stock_tally::clients::{
    CompletionBackend, OpenAiCompatClient, TelegramClient, TelegramDestination,
};
use stock_tally::{Config, InboundMessage, MessageOutcome, StockEngine, bot, scheduler};

/// Stock-status tally bot for a shop group chat
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to STOCK_TALLY_CONFIG or stock_tally.toml)
    #[arg(long)]
    config: Option<String>,

    /// Read messages from stdin instead of Telegram and print the report at EOF
    #[arg(long)]
    dry_run: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => {
            let _ = dotenvy::dotenv();
            Config::load_from_path(path)
        }
        None => Config::load(),
    }
    .map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    stock_tally::init_tracing(&config.runtime.log_level);

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let backend: Option<Arc<dyn CompletionBackend>> = match &config.runtime.llm_api_key {
        Some(key) if config.fallback.enable => {
            let client = OpenAiCompatClient::new(&config.fallback, key.clone())?;
            info!("LLM fallback enabled with model {}", client.model());
            Some(Arc::new(client))
        }
        _ => {
            info!("LLM fallback disabled");
            None
        }
    };
    let engine = StockEngine::from_config(&config, backend)?;

    if args.dry_run {
        return run_stdin(engine, &config).await;
    }

    config.validate_for_polling()?;
    let token = config
        .runtime
        .bot_token
        .as_deref()
        .context("BOT_TOKEN is not set")?;
    let chat_id = config
        .telegram
        .group_chat_id
        .context("GROUP_CHAT_ID is not set")?;
    let client = Arc::new(TelegramClient::new(&config.telegram, token)?);

    let cancel = CancellationToken::new();
    let sink = Arc::new(TelegramDestination::new(
        client.clone(),
        chat_id,
        config.telegram.topic_id,
    ));
    let schedule = tokio::spawn(scheduler::run_daily_report(
        engine.clone(),
        sink,
        config.report.schedule_time()?,
        config.report.tz()?,
        cancel.clone(),
    ));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    info!("Starting stock tally bot");
    bot::run_polling(engine, client, &config.telegram, cancel.clone()).await;
    cancel.cancel();
    let _ = schedule.await;
    Ok(())
}

/// Each stdin line is one message from a single sender in the configured chat and topic
async fn run_stdin(engine: StockEngine, config: &Config) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::new();
    let mut message_id = 0;

    while let Some(line) = lines.next_line().await? {
        message_id += 1;
        let message = InboundMessage {
            sender_id: "stdin".to_string(),
            chat_id: config.telegram.group_chat_id.unwrap_or_default(),
            topic_id: config.telegram.topic_id,
            message_id,
            text: Some(line),
            received_at: Utc::now(),
        };
        match engine.handle_message(message).await {
            MessageOutcome::Report(text) => println!("{}\n", text),
            MessageOutcome::Deferred(handle) => pending.push(handle),
            _ => {}
        }
    }

    for handle in pending {
        if let Err(e) = handle.await {
            tracing::error!("Fallback task failed: {}", e);
        }
    }
    println!("{}", engine.render_report(Utc::now()).await);
    Ok(())
}
