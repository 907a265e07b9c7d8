//! Per-sender sliding window of recent messages

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::collections::VecDeque;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// Buffer-wide sequence number, increasing with every append
    pub seq: u64,
    pub sender_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SenderContext {
    entries: VecDeque<ContextEntry>,
    /// Entries up to this sequence number already produced triples
    recorded_through: u64,
}

impl SenderContext {
    fn pending(&self) -> impl DoubleEndedIterator<Item = &ContextEntry> {
        let through = self.recorded_through;
        self.entries.iter().filter(move |e| e.seq > through)
    }
}

/// Fixed-capacity FIFO per sender; the set of senders is itself LRU-bounded.
/// Entries marked as recorded stay in the ring but are left out of every window.
pub struct ContextBuffer {
    capacity: usize,
    max_age: Option<Duration>,
    next_seq: u64,
    senders: LruCache<String, SenderContext>,
}

impl ContextBuffer {
    pub fn new(capacity: usize, max_senders: usize, max_age: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            max_age,
            next_seq: 0,
            senders: LruCache::new(NonZeroUsize::new(max_senders).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message and return its sequence number.
    /// The oldest entry is dropped silently once the sender is full.
    pub fn append(&mut self, sender_id: &str, text: &str, now: DateTime<Utc>) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        let capacity = self.capacity;
        let sender = self
            .senders
            .get_or_insert_mut(sender_id.to_string(), || SenderContext {
                entries: VecDeque::with_capacity(capacity),
                recorded_through: 0,
            });
        if sender.entries.len() == capacity {
            sender.entries.pop_front();
        }
        sender.entries.push_back(ContextEntry {
            seq,
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            received_at: now,
        });
        seq
    }

    /// Exclude every entry of `sender_id` up to and including `seq` from later windows
    pub fn mark_recorded(&mut self, sender_id: &str, seq: u64) {
        if let Some(sender) = self.senders.peek_mut(sender_id) {
            sender.recorded_through = sender.recorded_through.max(seq);
        }
    }

    /// Last `window` unrecorded texts, oldest first, joined with a space
    pub fn recent_text(&self, sender_id: &str, window: usize) -> Option<String> {
        let sender = self.senders.peek(sender_id)?;
        join_tail(sender.pending(), window)
    }

    /// Like [`recent_text`](Self::recent_text) but skips entries older than the configured max age
    pub fn recent_text_since(
        &self,
        sender_id: &str,
        window: usize,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let Some(max_age) = self.max_age else {
            return self.recent_text(sender_id, window);
        };
        let sender = self.senders.peek(sender_id)?;
        let cutoff = now - max_age;
        join_tail(sender.pending().filter(|e| e.received_at >= cutoff), window)
    }

    pub fn len(&self, sender_id: &str) -> usize {
        self.senders.peek(sender_id).map_or(0, |s| s.entries.len())
    }

    pub fn tracked_senders(&self) -> usize {
        self.senders.len()
    }
}

fn join_tail<'a>(
    entries: impl DoubleEndedIterator<Item = &'a ContextEntry>,
    window: usize,
) -> Option<String> {
    let mut tail: Vec<&str> = entries.rev().take(window).map(|e| e.text.as_str()).collect();
    if tail.is_empty() {
        return None;
    }
    tail.reverse();
    Some(tail.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn recent_text_is_oldest_first() {
        let mut buffer = ContextBuffer::new(5, 16, None);
        buffer.append("u1", "в хайпе", at(0));
        buffer.append("u1", "мало", at(1));
        buffer.append("u1", "лабубу", at(2));
        assert_eq!(buffer.recent_text("u1", 3).as_deref(), Some("в хайпе мало лабубу"));
        assert_eq!(buffer.recent_text("u1", 2).as_deref(), Some("мало лабубу"));
        assert_eq!(buffer.recent_text("u1", 10).as_deref(), Some("в хайпе мало лабубу"));
    }

    #[test]
    fn oldest_entry_is_evicted_past_capacity() {
        let mut buffer = ContextBuffer::new(3, 16, None);
        for (i, text) in ["first", "second", "third", "fourth"].iter().enumerate() {
            buffer.append("u1", text, at(i as u32));
        }
        assert_eq!(buffer.len("u1"), 3);
        let text = buffer.recent_text("u1", 3).unwrap();
        assert!(!text.contains("first"));
        assert_eq!(text, "second third fourth");
    }

    #[test]
    fn senders_are_isolated() {
        let mut buffer = ContextBuffer::new(3, 16, None);
        buffer.append("u1", "хайп", at(0));
        buffer.append("u2", "янтарь", at(0));
        assert_eq!(buffer.recent_text("u1", 3).as_deref(), Some("хайп"));
        assert_eq!(buffer.recent_text("u2", 3).as_deref(), Some("янтарь"));
        assert_eq!(buffer.recent_text("u3", 3), None);
    }

    #[test]
    fn stale_entries_are_skipped_when_max_age_is_set() {
        let mut buffer = ContextBuffer::new(5, 16, Some(Duration::hours(24)));
        let yesterday = at(0) - Duration::hours(25);
        buffer.append("u1", "старое", yesterday);
        buffer.append("u1", "свежее", at(0));
        assert_eq!(buffer.recent_text_since("u1", 5, at(1)).as_deref(), Some("свежее"));
        // unfiltered view still has both
        assert_eq!(buffer.recent_text("u1", 5).as_deref(), Some("старое свежее"));
    }

    #[test]
    fn recorded_entries_leave_the_window() {
        let mut buffer = ContextBuffer::new(5, 16, None);
        let first = buffer.append("u1", "хайп мало лабубу", at(0));
        buffer.append("u2", "янтарь", at(0));
        buffer.mark_recorded("u1", first);
        assert_eq!(buffer.recent_text("u1", 3), None);

        buffer.append("u1", "спасибо", at(1));
        assert_eq!(buffer.recent_text("u1", 3).as_deref(), Some("спасибо"));
        assert_eq!(buffer.len("u1"), 2);
        // other senders keep their entries
        assert_eq!(buffer.recent_text("u2", 3).as_deref(), Some("янтарь"));
    }

    #[test]
    fn marking_is_bounded_by_sequence() {
        let mut buffer = ContextBuffer::new(5, 16, None);
        let first = buffer.append("u1", "пишу из янтарь", at(0));
        buffer.append("u1", "закончились стичи", at(1));
        // a late mark for the first entry keeps the newer one
        buffer.mark_recorded("u1", first);
        assert_eq!(buffer.recent_text("u1", 3).as_deref(), Some("закончились стичи"));
        buffer.mark_recorded("u1", 0);
        assert_eq!(buffer.recent_text("u1", 3).as_deref(), Some("закончились стичи"));
    }

    #[test]
    fn least_recent_sender_is_dropped() {
        let mut buffer = ContextBuffer::new(2, 2, None);
        buffer.append("a", "1", at(0));
        buffer.append("b", "2", at(1));
        buffer.append("c", "3", at(2));
        assert_eq!(buffer.tracked_senders(), 2);
        assert_eq!(buffer.recent_text("a", 2), None);
        assert!(buffer.recent_text("c", 2).is_some());
    }
}
