//! Healing links that point at temporary source ids.
//!
//! A source task may be created under a temporary id and receive its
//! canonical id once the vault is re-indexed. A link recorded against the
//! temporary id then refers to nothing. Before matching, such links are
//! re-pointed at the unlinked source task that best fits their dest
//! counterpart.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::link::SyncLink;
use crate::matcher::Matcher;
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityResolution {
    Matched(String),
    /// Several candidates tie for best; ids in ascending order
    Ambiguous(Vec<String>),
    NotFound,
}

/// A link re-pointed from a stale source id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remap {
    pub stale_id: String,
    pub canonical_id: String,
    pub dest_id: String,
}

/// A link left unresolved because no candidate stood out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousLink {
    pub stale_id: String,
    pub dest_id: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedLinks {
    pub links: Vec<SyncLink>,
    pub remapped: Vec<Remap>,
    pub ambiguous: Vec<AmbiguousLink>,
}

impl NormalizedLinks {
    /// True when the link set changed and must be persisted.
    pub fn is_dirty(&self) -> bool {
        !self.remapped.is_empty()
    }
}

/// Pick the source task a stale link should adopt.
///
/// A sole candidate is adopted outright. Among several, the best scorer
/// against `dest` wins if it reaches `min_score` and beats the runner-up.
pub fn resolve_identity(dest: &Task, candidates: &[&Task], matcher: &Matcher) -> IdentityResolution {
    match candidates {
        [] => IdentityResolution::NotFound,
        [only] => IdentityResolution::Matched(only.id.clone()),
        _ => {
            let mut scored: Vec<(f64, &str)> = candidates
                .iter()
                .map(|task| (matcher.score(task, dest), task.id.as_str()))
                .filter(|(score, _)| *score >= matcher.config().min_score)
                .collect();
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(b.1))
            });
            match scored.as_slice() {
                [] => IdentityResolution::NotFound,
                [(_, id)] => IdentityResolution::Matched((*id).to_string()),
                [(best, id), (runner_up, _), ..] if best > runner_up => {
                    IdentityResolution::Matched((*id).to_string())
                }
                [(best, _), ..] => {
                    let best = *best;
                    let mut tied: Vec<String> = scored
                        .iter()
                        .filter(|(score, _)| *score == best)
                        .map(|(_, id)| (*id).to_string())
                        .collect();
                    tied.sort();
                    IdentityResolution::Ambiguous(tied)
                }
            }
        }
    }
}

/// Re-point links whose source id vanished while their dest task remains.
pub fn normalize_links(
    links: Vec<SyncLink>,
    sources: &[Task],
    dests: &[Task],
    matcher: &Matcher,
) -> NormalizedLinks {
    let source_ids: HashSet<&str> = sources.iter().map(|t| t.id.as_str()).collect();
    let dest_by_id: HashMap<&str, &Task> = dests.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut linked_sources: HashSet<String> = links
        .iter()
        .filter(|link| source_ids.contains(link.source_id.as_str()))
        .map(|link| link.source_id.clone())
        .collect();

    let mut links = links;
    links.sort_by(|a, b| a.source_id.cmp(&b.source_id).then_with(|| a.dest_id.cmp(&b.dest_id)));

    let mut result = NormalizedLinks::default();
    for mut link in links {
        if source_ids.contains(link.source_id.as_str()) {
            result.links.push(link);
            continue;
        }
        let Some(dest) = dest_by_id.get(link.dest_id.as_str()) else {
            result.links.push(link);
            continue;
        };

        let candidates: Vec<&Task> = sources
            .iter()
            .filter(|task| !linked_sources.contains(&task.id))
            .collect();
        match resolve_identity(dest, &candidates, matcher) {
            IdentityResolution::Matched(canonical_id) => {
                info!(
                    stale = %link.source_id,
                    canonical = %canonical_id,
                    dest = %link.dest_id,
                    "remapped link to canonical source id"
                );
                result.remapped.push(Remap {
                    stale_id: link.source_id.clone(),
                    canonical_id: canonical_id.clone(),
                    dest_id: link.dest_id.clone(),
                });
                linked_sources.insert(canonical_id.clone());
                link.source_id = canonical_id;
                result.links.push(link);
            }
            IdentityResolution::Ambiguous(candidates) => {
                warn!(
                    stale = %link.source_id,
                    dest = %link.dest_id,
                    candidates = ?candidates,
                    "ambiguous source identity, link left unresolved"
                );
                result.ambiguous.push(AmbiguousLink {
                    stale_id: link.source_id.clone(),
                    dest_id: link.dest_id.clone(),
                    candidates,
                });
                result.links.push(link);
            }
            IdentityResolution::NotFound => result.links.push(link),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchingConfig;

    fn matcher() -> Matcher {
        Matcher::new(MatchingConfig::default())
    }

    #[test]
    fn sole_unlinked_candidate_is_adopted() {
        let links = vec![SyncLink::new("tmp-001", "R1", 1.0)];
        let sources = vec![Task::new("stable-abcd", "Buy milk")];
        let dests = vec![Task::new("R1", "Buy milk")];

        let normalized = normalize_links(links, &sources, &dests, &matcher());
        assert!(normalized.is_dirty());
        assert_eq!(normalized.links[0].source_id, "stable-abcd");
        assert_eq!(normalized.remapped[0].stale_id, "tmp-001");
    }

    #[test]
    fn missing_dest_skips_normalization() {
        let links = vec![SyncLink::new("tmp-001", "R1", 1.0)];
        let sources = vec![Task::new("stable-abcd", "Buy milk")];
        let normalized = normalize_links(links, &sources, &[], &matcher());
        assert!(!normalized.is_dirty());
        assert_eq!(normalized.links[0].source_id, "tmp-001");
    }

    #[test]
    fn best_scoring_candidate_wins() {
        let dest = Task::new("R1", "Buy milk");
        let a = Task::new("a", "Buy milk");
        let b = Task::new("b", "Walk dog");
        assert_eq!(
            resolve_identity(&dest, &[&b, &a], &matcher()),
            IdentityResolution::Matched("a".to_string())
        );
    }

    #[test]
    fn tied_candidates_are_ambiguous() {
        let links = vec![SyncLink::new("tmp-001", "R1", 1.0)];
        let sources = vec![Task::new("b", "Buy milk"), Task::new("a", "Buy milk")];
        let dests = vec![Task::new("R1", "Buy milk")];

        let normalized = normalize_links(links, &sources, &dests, &matcher());
        assert!(!normalized.is_dirty());
        assert_eq!(normalized.ambiguous.len(), 1);
        assert_eq!(normalized.ambiguous[0].candidates, vec!["a", "b"]);
        assert_eq!(normalized.links[0].source_id, "tmp-001");
    }

    #[test]
    fn linked_sources_are_not_candidates() {
        let links = vec![
            SyncLink::new("s1", "R0", 1.0),
            SyncLink::new("tmp-001", "R1", 1.0),
        ];
        let sources = vec![Task::new("s1", "Buy milk"), Task::new("s2", "Buy bread")];
        let dests = vec![Task::new("R0", "Buy milk"), Task::new("R1", "Buy bread")];

        let normalized = normalize_links(links, &sources, &dests, &matcher());
        let healed: Vec<_> = normalized.links.iter().map(|l| l.key()).collect();
        assert!(healed.contains(&("s2".to_string(), "R1".to_string())));
        assert!(healed.contains(&("s1".to_string(), "R0".to_string())));
    }

    #[test]
    fn no_candidate_above_threshold_is_not_found() {
        let dest = Task::new("R1", "Buy milk");
        let a = Task::new("a", "Walk dog");
        let b = Task::new("b", "Call bank");
        assert_eq!(
            resolve_identity(&dest, &[&a, &b], &matcher()),
            IdentityResolution::NotFound
        );
    }
}
