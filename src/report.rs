//! Human-readable report over an aggregator snapshot (Telegram HTML)

use crate::aggregator::{Snapshot, SnapshotEntry};
use crate::config::ReportConfig;
use crate::vocabulary::Vocabulary;
use chrono::NaiveDateTime;
use std::sync::Arc;

pub struct ReportRenderer {
    vocabulary: Arc<Vocabulary>,
    title: String,
    placeholder: String,
}

impl ReportRenderer {
    pub fn new(vocabulary: Arc<Vocabulary>, config: &ReportConfig) -> Self {
        Self {
            vocabulary,
            title: config.title.clone(),
            placeholder: config.placeholder.clone(),
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Same snapshot and clock always give the same text
    pub fn render(&self, snapshot: &Snapshot, now: NaiveDateTime) -> String {
        if snapshot.is_empty() {
            return self.placeholder.clone();
        }

        let mut lines = vec![format!(
            "\u{1F4CA} <b>{}</b> на {}\n",
            escape_html(&self.title),
            now.format("%d.%m %H:%M")
        )];
        for shop in &snapshot.shops {
            lines.push(format!("<u>{}</u>:", escape_html(&capitalize(&shop.shop))));
            let mut entries: Vec<&SnapshotEntry> = shop.entries.iter().collect();
            // stable: equal counts keep first-seen order
            entries.sort_by(|a, b| b.count.cmp(&a.count));
            for entry in entries {
                lines.push(self.format_entry(entry));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    fn format_entry(&self, entry: &SnapshotEntry) -> String {
        let body = format!(
            "<b>{}</b> — {} ({})",
            escape_html(&entry.item),
            escape_html(&entry.state),
            entry.count
        );
        match self.vocabulary.marker(&entry.state) {
            Some(marker) => format!("{} {}", marker.emoji(), body),
            None => body,
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
