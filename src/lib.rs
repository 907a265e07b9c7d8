pub mod aggregator;
pub mod bot;
pub mod clients;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod popularity;
pub mod report;
pub mod scheduler;
pub mod vocabulary;

pub use config::Config;
pub use engine::{InboundMessage, MessageOutcome, StockEngine};
pub use error::{Result, StockError};

/// Initialise the global tracing subscriber from a filter string such as `stock_tally=info`
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}
