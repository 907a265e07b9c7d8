//! Run the heuristic extractor over stdin lines and print one JSON result per line.
//! Useful for checking vocabulary changes against a chat export.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use stock_tally::config::Config;
use stock_tally::extractor::HeuristicExtractor;
use stock_tally::vocabulary::Vocabulary;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file whose [vocabulary] section is used; defaults when missing
    #[arg(long, default_value = "stock_tally.toml")]
    config: String,

    /// Only print lines that produced a result
    #[arg(long)]
    matches_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    stock_tally::init_tracing("stock_tally=warn");

    // vocabulary only: no secrets or transport settings are needed here
    let config = match std::fs::read_to_string(&args.config) {
        Ok(content) => Config::from_toml_str(&content)?,
        Err(_) => Config::default(),
    };
    let vocabulary = Arc::new(Vocabulary::from_config(&config.vocabulary));
    let extractor = HeuristicExtractor::new(vocabulary)?;

    let (mut seen, mut matched) = (0usize, 0usize);
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        seen += 1;
        let result = extractor.extract(&line);
        if result.is_some() {
            matched += 1;
        } else if args.matches_only {
            continue;
        }
        println!("{}", json!({ "text": line, "result": result }));
    }
    eprintln!("{} of {} lines matched", matched, seen);
    Ok(())
}
