//! Occurrence counts per (shop, item, state)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    pub shop: String,
    pub item: String,
    pub state: String,
}

impl AggregationKey {
    pub fn new(shop: impl Into<String>, item: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            shop: shop.into(),
            item: item.into(),
            state: state.into(),
        }
    }
}

/// Lifetime of the counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucketing {
    /// Counts live until the process exits
    Lifetime,
    /// Counts reset when the local calendar day changes
    Daily,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    pub item: String,
    pub state: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShopSnapshot {
    pub shop: String,
    /// First-seen order
    pub entries: Vec<SnapshotEntry>,
}

/// Read-only copy of the counts, shops in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub shops: Vec<ShopSnapshot>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.shops.is_empty()
    }
}

/// Monotonic counters with stable insertion order.
/// Not internally synchronized; share it as [`SharedAggregator`].
#[derive(Debug)]
pub struct Aggregator {
    bucketing: Bucketing,
    bucket: Option<NaiveDate>,
    entries: Vec<(AggregationKey, u64)>,
    index: HashMap<AggregationKey, usize>,
}

pub type SharedAggregator = Arc<Mutex<Aggregator>>;

impl Aggregator {
    pub fn new(bucketing: Bucketing) -> Self {
        Self {
            bucketing,
            bucket: None,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn shared(bucketing: Bucketing) -> SharedAggregator {
        Arc::new(Mutex::new(Self::new(bucketing)))
    }

    /// Add exactly one occurrence and return the new count
    pub fn increment(&mut self, shop: &str, item: &str, state: &str) -> u64 {
        let key = AggregationKey::new(shop, item, state);
        match self.index.get(&key) {
            Some(&pos) => {
                self.entries[pos].1 += 1;
                self.entries[pos].1
            }
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, 1));
                1
            }
        }
    }

    pub fn count(&self, key: &AggregationKey) -> u64 {
        self.index.get(key).map_or(0, |&pos| self.entries[pos].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start a new bucket when `today` differs from the current one (daily mode only).
    /// Returns true when counts were dropped.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.bucketing == Bucketing::Lifetime {
            return false;
        }
        match self.bucket {
            Some(current) if current == today => false,
            Some(_) => {
                self.entries.clear();
                self.index.clear();
                self.bucket = Some(today);
                true
            }
            None => {
                self.bucket = Some(today);
                false
            }
        }
    }

    /// Snapshot of the bucket for `day`; in daily mode a bucket from any other day is empty
    pub fn snapshot_for(&self, day: NaiveDate) -> Snapshot {
        match (self.bucketing, self.bucket) {
            (Bucketing::Daily, Some(bucket)) if bucket != day => Snapshot::default(),
            _ => self.snapshot(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut shops: Vec<ShopSnapshot> = Vec::new();
        for (key, count) in &self.entries {
            let entry = SnapshotEntry {
                item: key.item.clone(),
                state: key.state.clone(),
                count: *count,
            };
            match shops.iter_mut().find(|s| s.shop == key.shop) {
                Some(block) => block.entries.push(entry),
                None => shops.push(ShopSnapshot {
                    shop: key.shop.clone(),
                    entries: vec![entry],
                }),
            }
        }
        Snapshot { shops }
    }
}
