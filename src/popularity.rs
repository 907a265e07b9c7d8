//! Item popularity file: a flat JSON object of item name -> count.
//! Rewritten once per recorded batch; losing it only loses history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug)]
pub struct PopularityStore {
    path: PathBuf,
    counts: BTreeMap<String, u64>,
}

impl PopularityStore {
    /// Missing or unreadable files start from zero
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let counts = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, u64>>(&content) {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::warn!(
                        "Popularity file {} is malformed ({}), starting empty",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(
                    "Popularity file {} is unreadable ({}), starting empty",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };
        Self { path, counts }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, item: &str) -> u64 {
        self.counts.get(item).copied().unwrap_or(0)
    }

    /// Increment every item once per occurrence, then persist the whole map in one write
    pub async fn record<'a>(&mut self, items: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut changed = false;
        for item in items {
            *self.counts.entry(item.to_string()).or_insert(0) += 1;
            changed = true;
        }
        if changed {
            self.save().await?;
        }
        Ok(())
    }

    /// Most popular items first, ties alphabetical
    pub fn top(&self, limit: usize) -> Vec<(&str, u64)> {
        let mut items: Vec<(&str, u64)> =
            self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        items.sort_by(|a, b| b.1.cmp(&a.1));
        items.truncate(limit);
        items
    }

    async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&self.counts)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
