//! Sync links and the partition-scoped link set.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted association between one source task and one dest task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLink {
    #[serde(alias = "obs_uuid")]
    pub source_id: String,
    #[serde(alias = "rem_uuid")]
    pub dest_id: String,
    pub score: f64,
    /// Partition (vault) the link belongs to; `None` for legacy entries
    #[serde(default, alias = "vault_id")]
    pub partition_id: Option<String>,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SyncLink {
    pub fn new(source_id: impl Into<String>, dest_id: impl Into<String>, score: f64) -> Self {
        Self {
            source_id: source_id.into(),
            dest_id: dest_id.into(),
            score,
            partition_id: None,
            last_synced: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_partition(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn key(&self) -> (String, String) {
        (self.source_id.clone(), self.dest_id.clone())
    }

    pub fn belongs_to(&self, partition_id: &str) -> bool {
        self.partition_id.as_deref() == Some(partition_id)
    }

    pub fn is_legacy(&self) -> bool {
        self.partition_id.is_none()
    }
}

/// Ephemeral scored pair produced before links are materialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub source_id: String,
    pub dest_id: String,
    pub score: f64,
}

/// Links of a single partition, keyed by source id with a dest index.
///
/// Holds at most one link per source id and one per dest id.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    by_source: BTreeMap<String, SyncLink>,
    dest_index: HashMap<String, String>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a list, later entries replacing earlier ones on
    /// conflicting ids.
    pub fn from_links(links: impl IntoIterator<Item = SyncLink>) -> Self {
        let mut set = Self::new();
        for link in links {
            set.upsert(link);
        }
        set
    }

    /// Insert or replace a link. Any link holding the same source id or the
    /// same dest id is evicted and returned.
    pub fn upsert(&mut self, link: SyncLink) -> Vec<SyncLink> {
        let mut evicted = Vec::new();
        if let Some(previous) = self.remove_source(&link.source_id) {
            evicted.push(previous);
        }
        if let Some(previous) = self.remove_dest(&link.dest_id) {
            evicted.push(previous);
        }
        self.dest_index
            .insert(link.dest_id.clone(), link.source_id.clone());
        self.by_source.insert(link.source_id.clone(), link);
        evicted
    }

    pub fn remove_source(&mut self, source_id: &str) -> Option<SyncLink> {
        let link = self.by_source.remove(source_id)?;
        self.dest_index.remove(&link.dest_id);
        Some(link)
    }

    pub fn remove_dest(&mut self, dest_id: &str) -> Option<SyncLink> {
        let source_id = self.dest_index.remove(dest_id)?;
        self.by_source.remove(&source_id)
    }

    pub fn by_source(&self, source_id: &str) -> Option<&SyncLink> {
        self.by_source.get(source_id)
    }

    pub fn by_source_mut(&mut self, source_id: &str) -> Option<&mut SyncLink> {
        self.by_source.get_mut(source_id)
    }

    pub fn by_dest(&self, dest_id: &str) -> Option<&SyncLink> {
        self.dest_index
            .get(dest_id)
            .and_then(|source_id| self.by_source.get(source_id))
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.by_source.contains_key(source_id)
    }

    pub fn contains_dest(&self, dest_id: &str) -> bool {
        self.dest_index.contains_key(dest_id)
    }

    /// Drop links that do not satisfy the predicate, returning them.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<SyncLink>
    where
        F: FnMut(&SyncLink) -> bool,
    {
        let dropped: Vec<String> = self
            .by_source
            .values()
            .filter(|link| !keep(link))
            .map(|link| link.source_id.clone())
            .collect();
        dropped
            .iter()
            .filter_map(|source_id| self.remove_source(source_id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncLink> {
        self.by_source.values()
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    /// Links ordered by source id.
    pub fn into_vec(self) -> Vec<SyncLink> {
        self.by_source.into_values().collect()
    }
}
