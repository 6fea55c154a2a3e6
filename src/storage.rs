//! Link file persistence
//!
//! All partitions share one JSON link file:
//!
//! ```text
//! {
//!   "version": 1,
//!   "links": [
//!     {"source_id": "...", "dest_id": "...", "score": 1.0,
//!      "partition_id": "personal", "last_synced": "...", "created_at": "..."}
//!   ]
//! }
//! ```
//!
//! Entries without a `partition_id` are legacy entries. A partition adopts
//! the legacy entries whose endpoints appear in its current task snapshots.
//! Dest lists can be shared between vaults, so a legacy entry seen only
//! through its dest id is read but not owned: it is rewritten only when the
//! pass links that dest again.
//! Writes are a read-merge-write under `<link file>.lock` so concurrent
//! passes for different partitions never drop each other's entries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::link::SyncLink;
use crate::lock;

/// Current link file format version
pub const LINK_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkFile {
    pub version: u32,
    pub links: Vec<SyncLink>,
}

/// Result of a lenient read.
#[derive(Debug, Default)]
pub struct LoadedLinks {
    pub links: Vec<SyncLink>,
    /// Set when the whole document could not be parsed
    pub corrupt: Option<String>,
    /// Entries dropped because they did not parse
    pub skipped: usize,
}

/// Which link file entries a partition owns.
#[derive(Debug, Clone)]
pub struct PartitionScope {
    pub partition_id: String,
    pub source_ids: HashSet<String>,
    pub dest_ids: HashSet<String>,
}

impl PartitionScope {
    pub fn new(
        partition_id: impl Into<String>,
        source_ids: impl IntoIterator<Item = String>,
        dest_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            source_ids: source_ids.into_iter().collect(),
            dest_ids: dest_ids.into_iter().collect(),
        }
    }

    /// Entries of this partition, plus legacy entries touching its tasks.
    pub fn claims(&self, link: &SyncLink) -> bool {
        link.belongs_to(&self.partition_id)
            || (link.is_legacy()
                && (self.source_ids.contains(&link.source_id)
                    || self.dest_ids.contains(&link.dest_id)))
    }

    /// Legacy entries seen only through their dest id. Another vault may
    /// own them.
    pub fn claims_by_dest_only(&self, link: &SyncLink) -> bool {
        link.is_legacy()
            && !self.source_ids.contains(&link.source_id)
            && self.dest_ids.contains(&link.dest_id)
    }

    /// Legacy entries with neither endpoint in the current snapshots.
    pub fn is_abandoned_legacy(&self, link: &SyncLink) -> bool {
        link.is_legacy()
            && !self.source_ids.contains(&link.source_id)
            && !self.dest_ids.contains(&link.dest_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    /// Entries written for this partition
    pub written: usize,
    /// Entries of this partition (or adopted legacy) that were replaced
    pub replaced: usize,
    /// Abandoned legacy entries removed
    pub cleaned: usize,
    /// Entries of other partitions passed through untouched
    pub foreign: usize,
    /// False when the merged document matched the file byte for byte
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct LinkStore {
    path: PathBuf,
    lock_timeout_ms: u64,
}

impl LinkStore {
    pub fn new(path: impl Into<PathBuf>, lock_timeout_ms: u64) -> Self {
        Self {
            path: path.into(),
            lock_timeout_ms,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry, degrading a corrupt document to an empty one.
    ///
    /// Only I/O failures other than a missing file are errors.
    pub fn load(&self) -> Result<LoadedLinks> {
        let Some(bytes) = lock::read_optional(&self.path)? else {
            return Ok(LoadedLinks::default());
        };
        Ok(self.parse_lenient(&bytes))
    }

    /// Read every entry, failing on any malformed content.
    pub fn load_strict(&self) -> Result<Vec<SyncLink>> {
        let Some(bytes) = lock::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let entries = parse_entries(&bytes).map_err(|message| self.corrupt(message))?;
        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                serde_json::from_value(entry)
                    .map_err(|err| self.corrupt(format!("entry {index}: {err}")))
            })
            .collect()
    }

    /// Entries a partition owns, plus the corruption message if any.
    pub fn load_partition(&self, scope: &PartitionScope) -> Result<LoadedLinks> {
        let mut loaded = self.load()?;
        loaded.links.retain(|link| scope.claims(link));
        debug!(
            partition = %scope.partition_id,
            links = loaded.links.len(),
            "loaded partition links"
        );
        Ok(loaded)
    }

    /// Replace this partition's entries with `links`, keeping every other
    /// partition's entries as they are on disk at write time.
    pub fn persist(&self, scope: &PartitionScope, links: &[SyncLink]) -> Result<PersistReport> {
        lock::with_lock(&self.path, self.lock_timeout_ms, || {
            let existing = lock::read_optional(&self.path)?;
            let current = match &existing {
                Some(bytes) => self.parse_lenient(bytes).links,
                None => Vec::new(),
            };

            let relinked: HashSet<&str> = links.iter().map(|l| l.dest_id.as_str()).collect();
            let mut report = PersistReport::default();
            let mut merged: Vec<SyncLink> = Vec::with_capacity(current.len() + links.len());
            for link in current {
                let unowned =
                    scope.claims_by_dest_only(&link) && !relinked.contains(link.dest_id.as_str());
                if scope.claims(&link) && !unowned {
                    report.replaced += 1;
                } else if scope.is_abandoned_legacy(&link) {
                    report.cleaned += 1;
                } else {
                    report.foreign += 1;
                    merged.push(link);
                }
            }

            let mut seen: HashSet<(String, String)> = HashSet::new();
            for link in links {
                if !seen.insert(link.key()) {
                    continue;
                }
                let mut link = link.clone();
                link.partition_id = Some(scope.partition_id.clone());
                merged.push(link);
                report.written += 1;
            }
            merged.sort_by(|a, b| {
                a.partition_id
                    .cmp(&b.partition_id)
                    .then_with(|| a.source_id.cmp(&b.source_id))
                    .then_with(|| a.dest_id.cmp(&b.dest_id))
            });

            let document = LinkFile {
                version: LINK_FILE_VERSION,
                links: merged,
            };
            let mut json = serde_json::to_string_pretty(&document)?;
            json.push('\n');

            report.changed = existing.as_deref() != Some(json.as_bytes());
            if report.changed {
                lock::write_atomic(&self.path, json.as_bytes())?;
            }
            debug!(
                partition = %scope.partition_id,
                written = report.written,
                replaced = report.replaced,
                cleaned = report.cleaned,
                foreign = report.foreign,
                changed = report.changed,
                "persisted links"
            );
            Ok(report)
        })
    }

    fn parse_lenient(&self, bytes: &[u8]) -> LoadedLinks {
        let entries = match parse_entries(bytes) {
            Ok(entries) => entries,
            Err(message) => {
                warn!(path = %self.path.display(), %message, "link file corrupt, treating as empty");
                return LoadedLinks {
                    links: Vec::new(),
                    corrupt: Some(message),
                    skipped: 0,
                };
            }
        };

        let mut loaded = LoadedLinks::default();
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<SyncLink>(entry) {
                Ok(link) => loaded.links.push(link),
                Err(err) => {
                    warn!(path = %self.path.display(), index, error = %err, "skipping malformed link entry");
                    loaded.skipped += 1;
                }
            }
        }
        loaded
    }

    fn corrupt(&self, message: String) -> Error {
        Error::LinkFileCorrupt {
            path: self.path.clone(),
            message,
        }
    }
}

/// Raw link entries of a document. Accepts the versioned object form and a
/// bare array; blank files hold no entries.
fn parse_entries(bytes: &[u8]) -> std::result::Result<Vec<Value>, String> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut map) => {
            if let Some(version) = map.get("version").and_then(Value::as_u64) {
                if version > u64::from(LINK_FILE_VERSION) {
                    return Err(format!("unsupported link file version {version}"));
                }
            }
            match map.remove("links") {
                Some(Value::Array(entries)) => Ok(entries),
                Some(_) => Err("`links` is not an array".to_string()),
                None => Err("missing `links` array".to_string()),
            }
        }
        _ => Err("expected an object with a `links` array".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store(dir: &tempfile::TempDir) -> LinkStore {
        LinkStore::new(dir.path().join("links.json"), 1000)
    }

    fn scope(partition: &str, sources: &[&str], dests: &[&str]) -> PartitionScope {
        PartitionScope::new(
            partition,
            sources.iter().map(|s| s.to_string()),
            dests.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = store(&dir).load().unwrap();
        assert!(loaded.links.is_empty());
        assert!(loaded.corrupt.is_none());
    }

    #[test]
    fn corrupt_file_degrades_but_strict_fails() {
        let dir = tempfile::tempdir().unwrap();
        let links = store(&dir);
        fs::write(links.path(), "{not json").unwrap();

        let loaded = links.load().unwrap();
        assert!(loaded.links.is_empty());
        assert!(loaded.corrupt.is_some());
        assert!(matches!(
            links.load_strict(),
            Err(Error::LinkFileCorrupt { .. })
        ));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let links = store(&dir);
        fs::write(
            links.path(),
            r#"{"version":1,"links":[{"source_id":"s1","dest_id":"d1","score":1.0},{"source_id":42}]}"#,
        )
        .unwrap();

        let loaded = links.load().unwrap();
        assert_eq!(loaded.links.len(), 1);
        assert_eq!(loaded.skipped, 1);
    }

    #[test]
    fn persist_keeps_other_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let links = store(&dir);
        links
            .persist(
                &scope("b", &["b-s"], &["shared"]),
                &[SyncLink::new("b-s", "shared", 1.0)],
            )
            .unwrap();

        let report = links
            .persist(
                &scope("a", &["a-s"], &["shared"]),
                &[SyncLink::new("a-s", "shared", 1.0)],
            )
            .unwrap();
        assert_eq!(report.foreign, 1);
        assert_eq!(report.written, 1);

        let all = links.load_strict().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|l| l.belongs_to("b") && l.source_id == "b-s"));
        assert!(all.iter().any(|l| l.belongs_to("a") && l.source_id == "a-s"));
    }

    #[test]
    fn legacy_entries_are_adopted_or_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let links = store(&dir);
        fs::write(
            links.path(),
            r#"{"links":[
                {"obs_uuid":"tmp-001","rem_uuid":"R1","score":1.0,"created_at":"2024-01-01T00:00:00Z"},
                {"obs_uuid":"gone","rem_uuid":"gone-too","score":1.0,"created_at":"2024-01-01T00:00:00Z"}
            ]}"#,
        )
        .unwrap();

        let scope = scope("v1", &["stable-abcd"], &["R1"]);
        let loaded = links.load_partition(&scope).unwrap();
        assert_eq!(loaded.links.len(), 1);
        assert_eq!(loaded.links[0].source_id, "tmp-001");

        let healed = SyncLink::new("stable-abcd", "R1", 1.0);
        let report = links.persist(&scope, &[healed]).unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(report.cleaned, 1);

        let all = links.load_strict().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_id, "stable-abcd");
        assert!(all[0].belongs_to("v1"));
    }

    #[test]
    fn legacy_entry_seen_by_dest_only_survives_unless_relinked() {
        let dir = tempfile::tempdir().unwrap();
        let links = store(&dir);
        fs::write(
            links.path(),
            r#"[{"obs_uuid":"home-1","rem_uuid":"r-bike","score":1.0}]"#,
        )
        .unwrap();

        let scope = scope("work", &["w1"], &["r-inv", "r-bike"]);
        let report = links
            .persist(&scope, &[SyncLink::new("w1", "r-inv", 1.0)])
            .unwrap();
        assert_eq!(report.foreign, 1);
        assert_eq!(report.replaced, 0);
        let all = links.load_strict().unwrap();
        assert!(all.iter().any(|l| l.is_legacy() && l.dest_id == "r-bike"));

        let report = links
            .persist(&scope, &[SyncLink::new("w1", "r-bike", 1.0)])
            .unwrap();
        assert_eq!(report.replaced, 2);
        let all = links.load_strict().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].belongs_to("work"));
    }

    #[test]
    fn unchanged_persist_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let links = store(&dir);
        let scope = scope("a", &["s1"], &["d1"]);
        let link = SyncLink::new("s1", "d1", 1.0);

        assert!(links.persist(&scope, &[link.clone()]).unwrap().changed);
        let first = fs::read(links.path()).unwrap();
        assert!(!links.persist(&scope, &[link]).unwrap().changed);
        assert_eq!(fs::read(links.path()).unwrap(), first);
    }

    #[test]
    fn newer_format_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let links = store(&dir);
        fs::write(links.path(), r#"{"version":9,"links":[]}"#).unwrap();
        assert!(links.load_strict().is_err());
    }
}
