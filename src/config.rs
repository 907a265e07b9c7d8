use crate::error::{Result, StockError};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure loaded from stock_tally.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub vocabulary: VocabularyConfig,
    pub context: ContextConfig,
    pub fallback: FallbackConfig,
    pub report: ReportConfig,
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    /// Secrets and process-level settings, env only
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Shops, state keywords and their canonical forms
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Scan order matters: the first shop found in a message wins
    pub shops: Vec<String>,
    pub keywords: Vec<String>,
    /// keyword -> canonical state
    pub synonyms: HashMap<String, String>,
    pub low_states: Vec<String>,
    pub out_states: Vec<String>,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            shops: vec!["хайп".into(), "янтарь".into(), "полка".into()],
            keywords: vec![
                "мало".into(),
                "нету".into(),
                "нет".into(),
                "закончился".into(),
                "закончились".into(),
                "не осталось".into(),
            ],
            synonyms: [
                ("нет", "нету"),
                ("не осталось", "нету"),
                ("закончился", "нету"),
                ("закончились", "нету"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            low_states: vec!["мало".into()],
            out_states: vec!["нету".into()],
        }
    }
}

/// Per-sender message buffer used to widen the evidence window
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    pub capacity: usize,
    /// How many recent messages are joined for re-analysis
    pub window: usize,
    /// Entries older than this are ignored for re-analysis; None keeps them forever
    pub max_age_hours: Option<u64>,
    pub max_senders: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            window: 3,
            max_age_hours: Some(24),
            max_senders: 1024,
        }
    }
}

/// OpenAI-compatible completion backend used when heuristics find nothing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enable: bool,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub temperature: f32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enable: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 15_000,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Messages starting with this token get the report as a reply
    pub command: String,
    pub timezone: String,
    /// Local time of the daily push, HH:MM
    pub at: String,
    pub title: String,
    pub placeholder: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            command: "/статка".to_string(),
            timezone: "Europe/Moscow".to_string(),
            at: "00:00".to_string(),
            title: "Актуальная статистика".to_string(),
            placeholder: "Пока нет данных.".to_string(),
        }
    }
}

impl ReportConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| StockError::config(format!("Invalid report timezone: {}", e)))
    }

    pub fn schedule_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.at.trim(), "%H:%M").map_err(|e| {
            StockError::config(format!("Invalid report time '{}': {}", self.at, e))
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub group_chat_id: Option<i64>,
    /// Forum topic whose messages are analysed; None accepts the whole chat
    pub topic_id: Option<i64>,
    pub poll_timeout_secs: u64,
    pub request_timeout_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            group_chat_id: None,
            topic_id: None,
            poll_timeout_secs: 30,
            request_timeout_ms: 40_000,
            error_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Reset counts when the local calendar day changes
    pub daily_buckets: bool,
    /// Item popularity file (item -> count), rewritten after every mutation
    pub popularity_file: Option<PathBuf>,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub bot_token: Option<String>,
    pub llm_api_key: Option<String>,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            llm_api_key: None,
            log_level: "stock_tally=info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        Self {
            bot_token: non_empty_env("BOT_TOKEN"),
            llm_api_key: non_empty_env("STOCK_LLM_API_KEY")
                .or_else(|| non_empty_env("OPENAI_API_KEY")),
            log_level: std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "stock_tally=info".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses STOCK_TALLY_CONFIG environment variable or defaults to "stock_tally.toml"
    pub fn load() -> Result<Self> {
        if let Ok(env_path) = std::env::var("STOCK_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
            if std::env::var("BOT_TOKEN").is_err() {
                let _ = dotenvy::from_path("../.env");
            }
        }

        let config_path = std::env::var("STOCK_TALLY_CONFIG")
            .unwrap_or_else(|_| "stock_tally.toml".to_string());
        Self::load_from_path(&config_path)
    }

    /// Same as [`Config::load`] but with an explicit config file path and no .env lookup
    pub fn load_from_path(config_path: &str) -> Result<Self> {
        let mut config = if let Ok(content) = std::fs::read_to_string(config_path) {
            Self::from_toml_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Env-first overrides for everything that differs between deployments
    pub fn apply_env_overrides(&mut self) {
        self.runtime = RuntimeConfig::load_from_env();

        if let Some(chat) = env_parse::<i64>("GROUP_CHAT_ID") {
            self.telegram.group_chat_id = Some(chat);
        }
        if let Some(topic) = env_parse::<i64>("TOPIC_ID") {
            self.telegram.topic_id = Some(topic);
        }
        if let Some(base) = non_empty_env("TELEGRAM_API_BASE") {
            self.telegram.api_base = base;
        }
        if let Some(base) = non_empty_env("STOCK_LLM_BASE_URL") {
            self.fallback.base_url = base;
        }
        if let Some(model) = non_empty_env("STOCK_LLM_MODEL") {
            self.fallback.model = model;
        }
        if let Some(timeout) = env_parse::<u64>("STOCK_LLM_TIMEOUT_MS") {
            self.fallback.timeout_ms = timeout;
        }
        if let Ok(enable) = std::env::var("STOCK_FALLBACK_ENABLE") {
            self.fallback.enable = enable == "1" || enable.eq_ignore_ascii_case("true");
        }
        if let Some(capacity) = env_parse::<usize>("STOCK_CONTEXT_CAPACITY") {
            self.context.capacity = capacity;
        }
        if let Some(window) = env_parse::<usize>("STOCK_CONTEXT_WINDOW") {
            self.context.window = window;
        }
        if let Ok(hours) = std::env::var("STOCK_CONTEXT_MAX_AGE_HOURS") {
            // 0 disables expiry
            self.context.max_age_hours = hours.parse::<u64>().ok().filter(|h| *h > 0);
        }
        if let Some(tz) = non_empty_env("STOCK_REPORT_TZ") {
            self.report.timezone = tz;
        }
        if let Some(at) = non_empty_env("STOCK_REPORT_AT") {
            self.report.at = at;
        }
        if let Some(path) = non_empty_env("STOCK_POPULARITY_FILE") {
            self.storage.popularity_file = Some(PathBuf::from(path));
        }
        if let Ok(daily) = std::env::var("STOCK_DAILY_BUCKETS") {
            self.storage.daily_buckets = daily == "1" || daily.eq_ignore_ascii_case("true");
        }
    }

    /// Checks that do not depend on the chat transport
    pub fn validate(&self) -> Result<()> {
        let vocab = &self.vocabulary;
        if vocab.shops.iter().all(|s| s.trim().is_empty()) {
            return Err(StockError::config("vocabulary.shops must not be empty"));
        }
        if vocab.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(StockError::config("vocabulary.keywords must not be empty"));
        }
        for (keyword, canonical) in &vocab.synonyms {
            if canonical.trim().is_empty() {
                return Err(StockError::config(format!(
                    "synonym '{}' maps to an empty state",
                    keyword
                )));
            }
        }
        if self.context.capacity == 0 {
            return Err(StockError::config("context.capacity must be at least 1"));
        }
        if self.context.window == 0 || self.context.window > self.context.capacity {
            return Err(StockError::config(format!(
                "context.window must be between 1 and capacity ({}), got {}",
                self.context.capacity, self.context.window
            )));
        }
        if self.context.max_senders == 0 {
            return Err(StockError::config("context.max_senders must be at least 1"));
        }
        self.report.tz()?;
        self.report.schedule_time()?;
        if self.fallback.enable && self.runtime.llm_api_key.is_none() {
            return Err(StockError::config(
                "fallback is enabled but neither STOCK_LLM_API_KEY nor OPENAI_API_KEY is set",
            ));
        }
        if self.fallback.enable && self.fallback.timeout_ms == 0 {
            return Err(StockError::config("fallback.timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Extra requirements for running against the Telegram Bot API
    pub fn validate_for_polling(&self) -> Result<()> {
        if self.runtime.bot_token.is_none() {
            return Err(StockError::config("BOT_TOKEN is not set"));
        }
        if self.telegram.group_chat_id.is_none() {
            return Err(StockError::config("GROUP_CHAT_ID is not set"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
