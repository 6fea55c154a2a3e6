//! Duplicate detection across both stores, independent of matching.
//!
//! Tasks are clustered by normalized text. A linked pair sitting in one
//! cluster is a single unit: a synced task is not its own duplicate.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::link::{LinkSet, SyncLink};
use crate::store::TaskStore;
use crate::task::{Side, Task};
use crate::text::normalize_text;

/// Link between two members of the same cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedPair {
    pub dest_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCluster {
    /// Normalized text shared by every member
    pub key: String,
    pub source_tasks: Vec<Task>,
    pub dest_tasks: Vec<Task>,
    /// Source id to its linked dest counterpart inside this cluster
    pub linked: BTreeMap<String, LinkedPair>,
}

impl DuplicateCluster {
    /// Members, counting each in-cluster linked pair once.
    pub fn units(&self) -> usize {
        self.source_tasks.len() + self.dest_tasks.len() - self.linked.len()
    }

    /// Two source tasks, or two dest tasks in one container.
    pub fn has_same_store_duplicates(&self) -> bool {
        if self.source_tasks.len() >= 2 {
            return true;
        }
        let mut per_container: HashMap<&str, usize> = HashMap::new();
        for task in &self.dest_tasks {
            let count = per_container.entry(task.container.as_str()).or_default();
            *count += 1;
            if *count >= 2 {
                return true;
            }
        }
        false
    }

    pub fn has_duplicates(&self) -> bool {
        self.has_same_store_duplicates() || self.units() >= 3
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupReport {
    /// Duplicate clusters only, ordered by key
    pub clusters: Vec<DuplicateCluster>,
    pub total_tasks: usize,
    pub duplicate_task_count: usize,
}

/// A task chosen for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteTarget {
    pub side: Side,
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteReport {
    pub source_deleted: Vec<String>,
    pub dest_deleted: Vec<String>,
    /// Targets left alone because they were created during this run
    pub skipped: Vec<String>,
    pub links_removed: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, sources: &[Task], dests: &[Task], links: &[SyncLink]) -> DedupReport {
        let mut buckets: BTreeMap<String, (Vec<Task>, Vec<Task>)> = BTreeMap::new();
        for task in sources {
            buckets
                .entry(normalize_text(&task.text))
                .or_default()
                .0
                .push(task.clone());
        }
        for task in dests {
            buckets
                .entry(normalize_text(&task.text))
                .or_default()
                .1
                .push(task.clone());
        }

        let mut report = DedupReport {
            total_tasks: sources.len() + dests.len(),
            ..DedupReport::default()
        };

        for (key, (mut source_tasks, mut dest_tasks)) in buckets {
            if source_tasks.len() + dest_tasks.len() < 2 {
                continue;
            }
            source_tasks.sort_by(|a, b| a.id.cmp(&b.id));
            dest_tasks.sort_by(|a, b| a.id.cmp(&b.id));

            let source_ids: HashSet<&str> = source_tasks.iter().map(|t| t.id.as_str()).collect();
            let dest_ids: HashSet<&str> = dest_tasks.iter().map(|t| t.id.as_str()).collect();
            let mut linked = BTreeMap::new();
            let mut linked_dests: HashSet<&str> = HashSet::new();
            for link in links {
                if source_ids.contains(link.source_id.as_str())
                    && dest_ids.contains(link.dest_id.as_str())
                    && !linked.contains_key(&link.source_id)
                    && linked_dests.insert(link.dest_id.as_str())
                {
                    linked.insert(
                        link.source_id.clone(),
                        LinkedPair {
                            dest_id: link.dest_id.clone(),
                            score: link.score,
                        },
                    );
                }
            }

            let cluster = DuplicateCluster {
                key,
                source_tasks,
                dest_tasks,
                linked,
            };
            if cluster.has_duplicates() {
                report.duplicate_task_count += cluster.units() - 1;
                report.clusters.push(cluster);
            }
        }

        debug!(
            clusters = report.clusters.len(),
            duplicates = report.duplicate_task_count,
            "duplicate analysis finished"
        );
        report
    }

    /// Members to delete so one copy (or one linked pair) remains.
    ///
    /// Keeps the best in-cluster linked pair (highest score, then smallest
    /// source id); without one keeps the earliest source and the earliest
    /// dest task.
    pub fn plan_deletions(&self, cluster: &DuplicateCluster) -> Vec<DeleteTarget> {
        let best_pair = cluster
            .linked
            .iter()
            .max_by(|(a_id, a), (b_id, b)| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b_id.cmp(a_id))
            })
            .map(|(source_id, pair)| (source_id.clone(), pair.dest_id.clone()));

        let (keep_source, keep_dest) = match best_pair {
            Some((source_id, dest_id)) => (Some(source_id), Some(dest_id)),
            None => (
                earliest(&cluster.source_tasks),
                earliest(&cluster.dest_tasks),
            ),
        };

        let mut targets = Vec::new();
        for task in &cluster.source_tasks {
            if keep_source.as_deref() != Some(task.id.as_str()) {
                targets.push(DeleteTarget {
                    side: Side::Source,
                    id: task.id.clone(),
                    text: task.text.clone(),
                });
            }
        }
        for task in &cluster.dest_tasks {
            if keep_dest.as_deref() != Some(task.id.as_str()) {
                targets.push(DeleteTarget {
                    side: Side::Dest,
                    id: task.id.clone(),
                    text: task.text.clone(),
                });
            }
        }
        targets
    }

    /// Delete targets through the stores and drop links to deleted tasks.
    ///
    /// A dry run makes no store calls and leaves `links` untouched.
    pub fn delete(
        &self,
        targets: &[DeleteTarget],
        source: &mut dyn TaskStore,
        dest: &mut dyn TaskStore,
        links: &mut LinkSet,
        created_this_run: &HashSet<String>,
        dry_run: bool,
    ) -> Result<DeleteReport> {
        let mut report = DeleteReport {
            dry_run,
            ..DeleteReport::default()
        };

        for target in targets {
            if created_this_run.contains(&target.id) {
                report.skipped.push(target.id.clone());
                continue;
            }
            if dry_run {
                match target.side {
                    Side::Source => report.source_deleted.push(target.id.clone()),
                    Side::Dest => report.dest_deleted.push(target.id.clone()),
                }
                continue;
            }

            let removed = match target.side {
                Side::Source => {
                    let deleted = source.delete(&target.id)?;
                    if deleted {
                        report.source_deleted.push(target.id.clone());
                    }
                    links.remove_source(&target.id)
                }
                Side::Dest => {
                    let deleted = dest.delete(&target.id)?;
                    if deleted {
                        report.dest_deleted.push(target.id.clone());
                    }
                    links.remove_dest(&target.id)
                }
            };
            if removed.is_some() {
                report.links_removed += 1;
            }
            info!(side = %target.side, id = %target.id, "deleted duplicate task");
        }

        Ok(report)
    }
}

fn earliest(tasks: &[Task]) -> Option<String> {
    tasks
        .iter()
        .min_by(|a, b| {
            a.created_at
                .is_none()
                .cmp(&b.created_at.is_none())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|task| task.id.clone())
}
