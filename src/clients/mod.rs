pub mod openai;
pub mod telegram;
pub mod traits;

pub use openai::OpenAiCompatClient;
pub use telegram::{TelegramClient, TelegramDestination};
pub use traits::{CompletionBackend, CompletionError, ReportSink};
