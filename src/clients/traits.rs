use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("http error: {0}")]
    Http(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Natural-language completion service used by the fallback extractor
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send one prompt and return the raw reply text
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// Fixed destination for the scheduled report
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn push_report(&self, text: &str) -> crate::error::Result<()>;
}
