//! One sync pass for one partition
//!
//! Steps, in order:
//!
//! 1. list both stores and load the partition's links
//! 2. heal links recorded against temporary source ids
//! 3. match unlinked tasks
//! 4. classify orphaned links (again after step 5, before acting on them)
//! 5. create counterparts for unmatched open tasks
//! 6. reconcile fields of every linked pair and reroute moved dest tasks,
//!    then remove duplicates when `sync.dedupe` is set
//! 7. merge the partition's links back into the shared link file
//!
//! Any store error aborts the pass before step 7, leaving the link file as
//! it was.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{Config, MatchingConfig, PartitionConfig, SyncConfig};
use crate::dedup::{DeleteTarget, Deduplicator};
use crate::error::Result;
use crate::identity::normalize_links;
use crate::link::{LinkSet, SyncLink};
use crate::matcher::Matcher;
use crate::report::{DropReason, RunMode, SyncAction, SyncIssue, SyncReport};
use crate::resolver::{plan_changes, resolve, Winner};
use crate::routing::{RouteDecision, TagRouter};
use crate::storage::{LinkStore, PartitionScope};
use crate::store::{TaskFilter, TaskStore};
use crate::task::{NewTask, Side, Task};
use crate::text::{normalize_tag, tag_set};

/// A link whose endpoint disappeared.
#[derive(Debug, Clone, PartialEq)]
pub struct Orphan {
    pub link: SyncLink,
    pub reason: DropReason,
}

/// Classify stale links (links with at least one endpoint missing).
///
/// A surviving endpoint that is already linked again, or was created in this
/// pass, is never treated as something to delete.
pub fn detect_orphans(
    stale: &[SyncLink],
    source_ids: &HashSet<String>,
    dest_ids: &HashSet<String>,
    active: &LinkSet,
    created: &HashSet<String>,
) -> Vec<Orphan> {
    stale
        .iter()
        .map(|link| {
            let source_present = source_ids.contains(&link.source_id);
            let dest_present = dest_ids.contains(&link.dest_id);
            let reason = match (source_present, dest_present) {
                (false, true)
                    if active.contains_dest(&link.dest_id) || created.contains(&link.dest_id) =>
                {
                    DropReason::Rematched
                }
                (false, true) => DropReason::SourceDeleted,
                (true, false) => DropReason::DestDeleted,
                (false, false) => DropReason::BothDeleted,
                (true, true) => DropReason::Rematched,
            };
            Orphan {
                link: link.clone(),
                reason,
            }
        })
        .collect()
}

pub struct SyncEngine {
    partition: PartitionConfig,
    sync: SyncConfig,
    matcher: Matcher,
    router: TagRouter,
    link_store: LinkStore,
    /// Dest containers no other partition reads
    exclusive_containers: HashSet<String>,
}

impl SyncEngine {
    /// Engine for one configured partition writing to `link_file`.
    pub fn new(config: &Config, partition_id: &str, link_file: impl Into<PathBuf>) -> Result<Self> {
        let partition = config.partition(partition_id)?.clone();
        let shared: HashSet<String> = config
            .partitions
            .iter()
            .filter(|other| other.id != partition.id)
            .flat_map(|other| TagRouter::for_partition(other).containers())
            .collect();
        let exclusive: Vec<String> = TagRouter::for_partition(&partition)
            .containers()
            .into_iter()
            .filter(|container| !shared.contains(container))
            .collect();
        Ok(Self::from_parts(
            partition,
            config.matching,
            config.sync.clone(),
            LinkStore::new(link_file, config.lock_timeout_ms),
        )
        .with_exclusive_containers(exclusive))
    }

    /// Engine built from explicit parts. Every container counts as shared
    /// with other partitions until [`SyncEngine::with_exclusive_containers`]
    /// says otherwise.
    pub fn from_parts(
        partition: PartitionConfig,
        matching: MatchingConfig,
        sync: SyncConfig,
        link_store: LinkStore,
    ) -> Self {
        let router = TagRouter::for_partition(&partition);
        Self {
            partition,
            sync,
            matcher: Matcher::new(matching),
            router,
            link_store,
            exclusive_containers: HashSet::new(),
        }
    }

    /// Containers only this partition reads. A legacy link found through a
    /// dest task in one of them is owned outright, source or not.
    pub fn with_exclusive_containers(
        mut self,
        containers: impl IntoIterator<Item = String>,
    ) -> Self {
        self.exclusive_containers = containers.into_iter().collect();
        self
    }

    pub fn partition_id(&self) -> &str {
        &self.partition.id
    }

    pub fn link_store(&self) -> &LinkStore {
        &self.link_store
    }

    pub fn run(
        &self,
        source: &mut dyn TaskStore,
        dest: &mut dyn TaskStore,
        mode: RunMode,
    ) -> Result<SyncReport> {
        let now = Utc::now();
        let mut pass = Pass::new(self, mode, now);
        info!(
            run_id = %pass.report.run_id,
            partition = %self.partition.id,
            mode = %mode,
            "sync pass started"
        );

        // 1. Load
        let mut sources = source.list(&TaskFilter::all())?;
        let mut dests = dest.list(&TaskFilter::in_containers(self.router.containers()))?;
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        dests.sort_by(|a, b| a.id.cmp(&b.id));
        pass.report.counts.source_tasks = sources.len();
        pass.report.counts.dest_tasks = dests.len();

        let source_ids: HashSet<String> = sources.iter().map(|t| t.id.clone()).collect();
        let dest_ids: HashSet<String> = dests.iter().map(|t| t.id.clone()).collect();
        let load_scope = PartitionScope::new(
            self.partition.id.clone(),
            source_ids.iter().cloned(),
            dest_ids.iter().cloned(),
        );
        let loaded = self.link_store.load_partition(&load_scope)?;
        if let Some(message) = loaded.corrupt {
            pass.issue(SyncIssue::LinkFileCorrupt {
                path: self.link_store.path().to_path_buf(),
                message,
            });
        }

        // 2. Identity normalization
        let normalized = normalize_links(loaded.links, &sources, &dests, &self.matcher);
        for remap in &normalized.remapped {
            pass.report.counts.remapped += 1;
            pass.report.actions.push(SyncAction::RemapIdentity {
                stale_id: remap.stale_id.clone(),
                canonical_id: remap.canonical_id.clone(),
                dest_id: remap.dest_id.clone(),
            });
        }
        let mut held_keys: HashSet<(String, String)> = HashSet::new();
        let mut held_dests: HashSet<String> = HashSet::new();
        let mut held_candidates: HashSet<String> = HashSet::new();
        for ambiguous in &normalized.ambiguous {
            held_keys.insert((ambiguous.stale_id.clone(), ambiguous.dest_id.clone()));
            held_dests.insert(ambiguous.dest_id.clone());
            held_candidates.extend(ambiguous.candidates.iter().cloned());
            pass.issue(SyncIssue::AmbiguousIdentity {
                stale_id: ambiguous.stale_id.clone(),
                dest_id: ambiguous.dest_id.clone(),
                candidates: ambiguous.candidates.clone(),
            });
        }

        // A legacy link reached only through a dest in a shared list may be
        // another vault's. It stays in the file as it is and this pass leaves
        // its dest alone.
        let dest_containers: HashMap<&str, &str> = dests
            .iter()
            .map(|t| (t.id.as_str(), t.container.as_str()))
            .collect();
        let mut held: Vec<SyncLink> = Vec::new();
        let mut existing: Vec<SyncLink> = Vec::new();
        for link in &normalized.links {
            if held_keys.contains(&link.key()) {
                held.push(link.clone());
            } else if load_scope.claims_by_dest_only(link)
                && !dest_containers
                    .get(link.dest_id.as_str())
                    .is_some_and(|container| self.exclusive_containers.contains(*container))
            {
                debug!(
                    source_id = %link.source_id,
                    dest_id = %link.dest_id,
                    "legacy link left to the partition owning its source"
                );
                held_dests.insert(link.dest_id.clone());
            } else {
                existing.push(link.clone());
            }
        }

        // 3. Match
        let match_dests: Vec<Task> = dests
            .iter()
            .filter(|task| !held_dests.contains(&task.id))
            .cloned()
            .collect();
        let matched = self.matcher.find_matches(&sources, &match_dests, &existing);
        let mut links = matched.links;
        pass.report.counts.preserved = matched.preserved;
        for candidate in &matched.new {
            if let Some(link) = links.by_source_mut(&candidate.source_id) {
                link.last_synced = Some(now);
            }
            pass.report.counts.matched += 1;
            pass.report.actions.push(SyncAction::Link {
                source_id: candidate.source_id.clone(),
                dest_id: candidate.dest_id.clone(),
                score: candidate.score,
            });
        }
        for link in &matched.released {
            pass.drop_link(link, DropReason::Released);
        }
        for link in &matched.superseded {
            pass.drop_link(link, DropReason::Superseded);
        }

        // 4. Orphans, first look: dest tasks about to be deleted are not
        // imported as new source tasks.
        let planned = detect_orphans(
            &matched.stale,
            &source_ids,
            &dest_ids,
            &links,
            &HashSet::new(),
        );
        let doomed_dests: HashSet<String> = planned
            .iter()
            .filter(|orphan| {
                orphan.reason == DropReason::SourceDeleted && self.sync.propagate_deletions
            })
            .map(|orphan| orphan.link.dest_id.clone())
            .collect();

        // 5. Counterparts
        let mut source_map: BTreeMap<String, Task> =
            sources.iter().map(|t| (t.id.clone(), t.clone())).collect();
        let mut dest_map: BTreeMap<String, Task> =
            dests.iter().map(|t| (t.id.clone(), t.clone())).collect();
        let mut created_sources: HashSet<String> = HashSet::new();
        let mut created_dests: HashSet<String> = HashSet::new();
        // Tasks given a counterpart this pass, in any mode
        let mut paired: HashSet<String> = HashSet::new();
        let mut deleted_dests: HashSet<String> = HashSet::new();

        for task in &sources {
            if links.contains_source(&task.id)
                || task.is_done()
                || held_candidates.contains(&task.id)
            {
                continue;
            }
            let container = match self.router.route(&task.tags) {
                RouteDecision::Miss => {
                    pass.issue(SyncIssue::RoutingMiss {
                        source_id: task.id.clone(),
                        text: task.text.clone(),
                        tags: task.tags.clone(),
                    });
                    continue;
                }
                decision => decision.container().unwrap_or_default().to_string(),
            };

            let dest_id = if mode.writes_stores() {
                let created = dest.create(&container, &task.to_draft())?;
                let id = created.id.clone();
                let mut link = SyncLink::new(task.id.clone(), id.clone(), 1.0);
                link.last_synced = Some(now);
                links.upsert(link);
                created_dests.insert(id.clone());
                dest_map.insert(id.clone(), created);
                Some(id)
            } else {
                None
            };
            paired.insert(task.id.clone());
            debug!(source_id = %task.id, %container, "dest counterpart");
            pass.report.counts.created_dest += 1;
            pass.report.actions.push(SyncAction::CreateDest {
                source_id: task.id.clone(),
                dest_id,
                container,
                text: task.text.clone(),
            });
        }

        for task in &dests {
            if links.contains_dest(&task.id)
                || task.is_done()
                || held_dests.contains(&task.id)
                || doomed_dests.contains(&task.id)
                || !self.router.imports_from(&task.container)
            {
                continue;
            }
            let draft = self.import_draft(task);
            let source_id = if mode.writes_stores() {
                let created = source.create(&self.partition.inbox, &draft)?;
                let id = created.id.clone();
                let mut link = SyncLink::new(id.clone(), task.id.clone(), 1.0);
                link.last_synced = Some(now);
                links.upsert(link);
                created_sources.insert(id.clone());
                source_map.insert(id.clone(), created);
                Some(id)
            } else {
                None
            };
            paired.insert(task.id.clone());
            debug!(dest_id = %task.id, inbox = %self.partition.inbox, "source counterpart");
            pass.report.counts.created_source += 1;
            pass.report.actions.push(SyncAction::CreateSource {
                dest_id: task.id.clone(),
                source_id,
                container: self.partition.inbox.clone(),
                text: task.text.clone(),
            });
        }

        // 4, again: act on orphans now that counterparts exist.
        let created: HashSet<String> = created_sources.union(&created_dests).cloned().collect();
        let orphans = detect_orphans(&matched.stale, &source_ids, &dest_ids, &links, &created);
        for orphan in orphans {
            let link = &orphan.link;
            if orphan.reason == DropReason::SourceDeleted
                && self.sync.propagate_deletions
                && !created.contains(&link.dest_id)
            {
                if mode.writes_stores() {
                    dest.delete(&link.dest_id)?;
                }
                dest_map.remove(&link.dest_id);
                deleted_dests.insert(link.dest_id.clone());
                info!(dest_id = %link.dest_id, source_id = %link.source_id, "propagated deletion");
                pass.report.counts.deleted_dest += 1;
                pass.report.actions.push(SyncAction::DeleteDest {
                    dest_id: link.dest_id.clone(),
                    source_id: link.source_id.clone(),
                });
            }
            pass.drop_link(link, orphan.reason);
        }

        // 6. Reconcile
        let keys: Vec<(String, String)> = links.iter().map(SyncLink::key).collect();
        for (source_id, dest_id) in keys {
            let (Some(source_task), Some(dest_task)) =
                (source_map.get(&source_id), dest_map.get(&dest_id))
            else {
                continue;
            };

            let mut outcome = resolve(source_task, dest_task);
            let mut move_to = None;
            if let RouteDecision::Routed { container, .. } = self.router.route(&source_task.tags) {
                if container != dest_task.container {
                    if tag_set(&source_task.tags) != tag_set(&dest_task.tags) {
                        outcome.tags = Winner::Source;
                    }
                    move_to = Some(container);
                }
            }
            let mut changes = plan_changes(&outcome, source_task, dest_task);
            let dest_fields = changes.dest.fields();
            if let Some(container) = &move_to {
                changes.dest.container = Some(container.clone());
            }
            if changes.source.is_empty() && changes.dest.is_empty() {
                continue;
            }

            if !changes.source.is_empty() {
                pass.report.counts.updated_source += 1;
                pass.report.actions.push(SyncAction::Update {
                    side: Side::Source,
                    id: source_id.clone(),
                    fields: changes.source.fields().iter().map(|f| f.to_string()).collect(),
                });
            }
            if !dest_fields.is_empty() {
                pass.report.counts.updated_dest += 1;
                pass.report.actions.push(SyncAction::Update {
                    side: Side::Dest,
                    id: dest_id.clone(),
                    fields: dest_fields.iter().map(|f| f.to_string()).collect(),
                });
            }
            if let Some(container) = &move_to {
                pass.report.counts.moved += 1;
                pass.report.actions.push(SyncAction::MoveDest {
                    dest_id: dest_id.clone(),
                    from: dest_task.container.clone(),
                    to: container.clone(),
                });
            }

            if !mode.writes_stores() {
                continue;
            }
            if !changes.source.is_empty() {
                match source.update(&source_id, &changes.source)? {
                    Some(updated) => {
                        source_map.insert(source_id.clone(), updated);
                    }
                    None => pass.vanished(Side::Source, &source_id),
                }
            }
            if !changes.dest.is_empty() {
                match dest.update(&dest_id, &changes.dest)? {
                    Some(updated) => {
                        dest_map.insert(dest_id.clone(), updated);
                    }
                    None => pass.vanished(Side::Dest, &dest_id),
                }
            }
            if let Some(link) = links.by_source_mut(&source_id) {
                link.last_synced = Some(now);
            }
        }

        // 6b. Duplicates
        if self.sync.dedupe {
            let mut protected: HashSet<String> = created.iter().cloned().collect();
            protected.extend(paired.iter().cloned());
            let sources: Vec<Task> = source_map
                .values()
                .filter(|t| !t.is_done() && !held_candidates.contains(&t.id))
                .cloned()
                .collect();
            let dests: Vec<Task> = dest_map
                .values()
                .filter(|t| !t.is_done() && !held_dests.contains(&t.id))
                .cloned()
                .collect();
            let current: Vec<SyncLink> = links.iter().cloned().collect();

            let dedup = Deduplicator::new();
            let analysis = dedup.analyze(&sources, &dests, &current);
            let targets: Vec<DeleteTarget> = analysis
                .clusters
                .iter()
                .flat_map(|cluster| dedup.plan_deletions(cluster))
                .collect();
            let deleted = dedup.delete(
                &targets,
                source,
                dest,
                &mut links,
                &protected,
                !mode.writes_stores(),
            )?;
            if !deleted.skipped.is_empty() {
                debug!(skipped = ?deleted.skipped, "duplicates paired this pass kept");
            }
            pass.report.counts.links_dropped += deleted.links_removed;
            for target in &targets {
                let removed = match target.side {
                    Side::Source => deleted.source_deleted.contains(&target.id),
                    Side::Dest => deleted.dest_deleted.contains(&target.id),
                };
                if !removed {
                    continue;
                }
                match target.side {
                    Side::Source => {
                        source_map.remove(&target.id);
                    }
                    Side::Dest => {
                        dest_map.remove(&target.id);
                        deleted_dests.insert(target.id.clone());
                    }
                }
                pass.report.counts.deleted_duplicates += 1;
                pass.report.actions.push(SyncAction::DeleteDuplicate {
                    side: target.side,
                    id: target.id.clone(),
                    text: target.text.clone(),
                });
            }
        }

        // 7. Persist
        let mut final_links = links.into_vec();
        final_links.extend(held);
        pass.report.links = final_links.len();

        let persist_scope = PartitionScope::new(
            self.partition.id.clone(),
            source_ids.iter().chain(created_sources.iter()).cloned(),
            dest_ids
                .iter()
                .chain(created_dests.iter())
                .filter(|id| !deleted_dests.contains(*id))
                .cloned(),
        );
        match mode {
            RunMode::Apply => {
                self.link_store.persist(&persist_scope, &final_links)?;
                pass.report.persisted = true;
            }
            RunMode::Evaluate if normalized.is_dirty() => {
                // Healed and held links, plus links whose dest still awaits
                // a propagated deletion.
                let healed: Vec<SyncLink> = normalized
                    .links
                    .iter()
                    .filter(|link| {
                        source_ids.contains(&link.source_id)
                            || held_keys.contains(&link.key())
                            || doomed_dests.contains(&link.dest_id)
                    })
                    .cloned()
                    .collect();
                self.link_store.persist(&persist_scope, &healed)?;
                pass.report.persisted = true;
            }
            RunMode::Evaluate | RunMode::DryRun => {}
        }

        let report = pass.report;
        info!(
            run_id = %report.run_id,
            partition = %report.partition_id,
            created_dest = report.counts.created_dest,
            created_source = report.counts.created_source,
            updated_source = report.counts.updated_source,
            updated_dest = report.counts.updated_dest,
            deleted_dest = report.counts.deleted_dest,
            issues = report.issues.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Draft for a source task imported from a dest task: the provenance tag
    /// plus the tag routing back to the dest container.
    fn import_draft(&self, task: &Task) -> NewTask {
        let mut draft = task.to_draft();
        let mut extra = vec![self.sync.provenance_tag.clone()];
        if let Some(tag) = self.router.reverse_tag(&task.container) {
            extra.push(tag);
        }
        for tag in extra {
            let key = normalize_tag(&tag);
            if !draft.tags.iter().any(|existing| normalize_tag(existing) == key) {
                draft.tags.push(tag);
            }
        }
        draft
    }
}

/// Per-pass bookkeeping.
struct Pass {
    report: SyncReport,
}

impl Pass {
    fn new(engine: &SyncEngine, mode: RunMode, now: DateTime<Utc>) -> Self {
        Self {
            report: SyncReport::new(engine.partition.id.clone(), mode, now),
        }
    }

    fn issue(&mut self, issue: SyncIssue) {
        warn!(partition = %self.report.partition_id, "{issue}");
        self.report.issues.push(issue);
    }

    fn vanished(&mut self, side: Side, id: &str) {
        self.issue(SyncIssue::TaskVanished {
            side,
            id: id.to_string(),
        });
    }

    fn drop_link(&mut self, link: &SyncLink, reason: DropReason) {
        debug!(source_id = %link.source_id, dest_id = %link.dest_id, %reason, "dropping link");
        self.report.counts.links_dropped += 1;
        self.report.actions.push(SyncAction::DropLink {
            source_id: link.source_id.clone(),
            dest_id: link.dest_id.clone(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphan_classification() {
        let source_ids: HashSet<String> = ["s1".to_string()].into_iter().collect();
        let dest_ids: HashSet<String> = ["d2".to_string(), "d3".to_string()].into_iter().collect();
        let active = LinkSet::from_links(vec![SyncLink::new("s9", "d3", 1.0)]);
        let stale = vec![
            SyncLink::new("s1", "gone", 1.0),
            SyncLink::new("gone", "d2", 1.0),
            SyncLink::new("gone", "d3", 1.0),
            SyncLink::new("gone", "gone-too", 1.0),
        ];

        let orphans = detect_orphans(&stale, &source_ids, &dest_ids, &active, &HashSet::new());
        let reasons: Vec<DropReason> = orphans.iter().map(|o| o.reason).collect();
        assert_eq!(
            reasons,
            vec![
                DropReason::DestDeleted,
                DropReason::SourceDeleted,
                DropReason::Rematched,
                DropReason::BothDeleted,
            ]
        );
    }

    #[test]
    fn created_dest_is_never_a_deletion_target() {
        let dest_ids: HashSet<String> = ["d1".to_string()].into_iter().collect();
        let created: HashSet<String> = ["d1".to_string()].into_iter().collect();
        let stale = vec![SyncLink::new("gone", "d1", 1.0)];
        let orphans = detect_orphans(&stale, &HashSet::new(), &dest_ids, &LinkSet::new(), &created);
        assert_eq!(orphans[0].reason, DropReason::Rematched);
    }
}
