//! Fuzzy pairing of unlinked tasks across the two stores.
//!
//! Existing links whose endpoints are still present and still look alike are
//! preserved. The remaining tasks are scored pairwise and assigned with the
//! Hungarian algorithm, or greedily when either side exceeds
//! `assignment_limit`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::MatchingConfig;
use crate::link::{LinkSet, MatchCandidate, SyncLink};
use crate::task::Task;
use crate::text::text_similarity;

const TEXT_WEIGHT: f64 = 0.75;
const DUE_WEIGHT: f64 = 0.15;
const STATUS_WEIGHT: f64 = 0.10;

/// Resolution of scores handed to the assignment solver.
const SCORE_SCALE: f64 = 1_000_000.0;

/// Result of one matching round.
#[derive(Debug, Default)]
pub struct MatchSet {
    /// Active links, ordered by source id
    pub links: LinkSet,
    /// Existing links carried over unchanged
    pub preserved: usize,
    /// Links created by this round
    pub new: Vec<MatchCandidate>,
    /// Existing links with at least one endpoint missing
    pub stale: Vec<SyncLink>,
    /// Existing links that lost an endpoint to a new pairing
    pub released: Vec<SyncLink>,
    /// Existing links that lost a conflict with another link on the same id
    pub superseded: Vec<SyncLink>,
}

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    config: MatchingConfig,
}

impl Matcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Similarity of a source/dest pair in `[0, 1]`.
    pub fn score(&self, source: &Task, dest: &Task) -> f64 {
        let text = text_similarity(&source.text, &dest.text);
        let due = match (source.due, dest.due) {
            (None, None) => 1.0,
            (Some(a), Some(b)) => {
                if (a - b).num_days().unsigned_abs() <= u64::from(self.config.days_tolerance) {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.5,
        };
        let status = if source.status == dest.status { 1.0 } else { 0.0 };
        TEXT_WEIGHT * text + DUE_WEIGHT * due + STATUS_WEIGHT * status
    }

    pub fn find_matches(
        &self,
        sources: &[Task],
        dests: &[Task],
        existing: &[SyncLink],
    ) -> MatchSet {
        let source_by_id: HashMap<&str, &Task> =
            sources.iter().map(|task| (task.id.as_str(), task)).collect();
        let dest_by_id: HashMap<&str, &Task> =
            dests.iter().map(|task| (task.id.as_str(), task)).collect();

        let mut result = MatchSet::default();

        // Existing links with both endpoints present, best first.
        let mut reusable: Vec<(f64, SyncLink)> = Vec::new();
        for link in existing {
            match (
                source_by_id.get(link.source_id.as_str()),
                dest_by_id.get(link.dest_id.as_str()),
            ) {
                (Some(source), Some(dest)) => {
                    reusable.push((self.score(source, dest), link.clone()));
                }
                _ => result.stale.push(link.clone()),
            }
        }
        reusable.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| a.dest_id.cmp(&b.dest_id))
        });

        let mut claimed_sources: HashSet<String> = HashSet::new();
        let mut claimed_dests: HashSet<String> = HashSet::new();
        let mut weak: Vec<SyncLink> = Vec::new();
        for (current, link) in reusable {
            if claimed_sources.contains(&link.source_id) || claimed_dests.contains(&link.dest_id) {
                result.superseded.push(link);
                continue;
            }
            claimed_sources.insert(link.source_id.clone());
            claimed_dests.insert(link.dest_id.clone());
            if current >= self.config.min_score {
                result.links.upsert(link);
                result.preserved += 1;
            } else {
                weak.push(link);
            }
        }

        // Weak links compete in the pool again.
        for link in &weak {
            claimed_sources.remove(&link.source_id);
            claimed_dests.remove(&link.dest_id);
        }

        let open_sources: Vec<&Task> = sorted_unclaimed(sources, &claimed_sources);
        let open_dests: Vec<&Task> = sorted_unclaimed(dests, &claimed_dests);
        let candidates = self.candidates(&open_sources, &open_dests);

        let side = open_sources.len().max(open_dests.len());
        let assigned = if side <= self.config.assignment_limit {
            assign_optimal(&candidates)
        } else {
            debug!(
                side,
                limit = self.config.assignment_limit,
                "matching greedily above assignment limit"
            );
            assign_greedy(&candidates)
        };

        let mut newly_sourced: HashSet<&str> = HashSet::new();
        let mut newly_dested: HashSet<&str> = HashSet::new();
        for candidate in &assigned {
            newly_sourced.insert(candidate.source_id.as_str());
            newly_dested.insert(candidate.dest_id.as_str());
        }

        for link in weak {
            if newly_sourced.contains(link.source_id.as_str())
                || newly_dested.contains(link.dest_id.as_str())
            {
                result.released.push(link);
            } else {
                result.links.upsert(link);
                result.preserved += 1;
            }
        }

        for candidate in assigned {
            result.links.upsert(SyncLink::new(
                candidate.source_id.clone(),
                candidate.dest_id.clone(),
                candidate.score,
            ));
            result.new.push(candidate);
        }
        result
            .new
            .sort_by(|a, b| a.source_id.cmp(&b.source_id));

        debug!(
            preserved = result.preserved,
            new = result.new.len(),
            stale = result.stale.len(),
            released = result.released.len(),
            "matching finished"
        );
        result
    }

    /// Every pair reaching `min_score`, in deterministic order.
    fn candidates(&self, sources: &[&Task], dests: &[&Task]) -> Vec<MatchCandidate> {
        let mut candidates = Vec::new();
        for source in sources {
            for dest in dests {
                let score = self.score(source, dest);
                if score >= self.config.min_score {
                    candidates.push(MatchCandidate {
                        source_id: source.id.clone(),
                        dest_id: dest.id.clone(),
                        score,
                    });
                }
            }
        }
        candidates.sort_by(compare_candidates);
        candidates
    }
}

fn sorted_unclaimed<'a>(tasks: &'a [Task], claimed: &HashSet<String>) -> Vec<&'a Task> {
    let mut open: Vec<&Task> = tasks
        .iter()
        .filter(|task| !claimed.contains(&task.id))
        .collect();
    open.sort_by(|a, b| a.id.cmp(&b.id));
    open.dedup_by(|a, b| a.id == b.id);
    open
}

/// Score descending, then source id, then dest id.
fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.source_id.cmp(&b.source_id))
        .then_with(|| a.dest_id.cmp(&b.dest_id))
}

/// Highest score first, no backtracking. Expects sorted candidates.
fn assign_greedy(candidates: &[MatchCandidate]) -> Vec<MatchCandidate> {
    let mut used_sources: HashSet<&str> = HashSet::new();
    let mut used_dests: HashSet<&str> = HashSet::new();
    let mut assigned = Vec::new();
    for candidate in candidates {
        if used_sources.contains(candidate.source_id.as_str())
            || used_dests.contains(candidate.dest_id.as_str())
        {
            continue;
        }
        used_sources.insert(&candidate.source_id);
        used_dests.insert(&candidate.dest_id);
        assigned.push(candidate.clone());
    }
    assigned
}

/// Maximum-weight assignment over the candidate graph.
///
/// Weights are integer-scaled scores plus a small bias toward smaller source
/// and dest ids, so equal totals resolve the same way as the greedy order.
/// Pairs absent from `candidates` get weight 0 and are discarded afterwards.
fn assign_optimal(candidates: &[MatchCandidate]) -> Vec<MatchCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut source_ids: Vec<&str> = candidates.iter().map(|c| c.source_id.as_str()).collect();
    let mut dest_ids: Vec<&str> = candidates.iter().map(|c| c.dest_id.as_str()).collect();
    source_ids.sort_unstable();
    source_ids.dedup();
    dest_ids.sort_unstable();
    dest_ids.dedup();

    let rows = source_ids.len();
    let cols = dest_ids.len();
    let source_index: HashMap<&str, usize> =
        source_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let dest_index: HashMap<&str, usize> =
        dest_ids.iter().enumerate().map(|(j, id)| (*id, j)).collect();

    let bias_scale = ((rows + cols) * rows.min(cols) + 1) as i64;
    let mut weights = vec![vec![0i64; cols]; rows];
    let mut by_cell: HashMap<(usize, usize), &MatchCandidate> = HashMap::new();
    for candidate in candidates {
        let i = source_index[candidate.source_id.as_str()];
        let j = dest_index[candidate.dest_id.as_str()];
        let scaled = (candidate.score * SCORE_SCALE).round() as i64;
        let bias = (rows - i + cols - j) as i64;
        weights[i][j] = scaled * bias_scale + bias;
        by_cell.insert((i, j), candidate);
    }

    let pairs: Vec<(usize, usize)> = if rows <= cols {
        hungarian_max(&weights)
            .into_iter()
            .enumerate()
            .collect()
    } else {
        let transposed: Vec<Vec<i64>> = (0..cols)
            .map(|j| (0..rows).map(|i| weights[i][j]).collect())
            .collect();
        hungarian_max(&transposed)
            .into_iter()
            .enumerate()
            .map(|(j, i)| (i, j))
            .collect()
    };

    let mut assigned: Vec<MatchCandidate> = pairs
        .into_iter()
        .filter(|&(i, j)| weights[i][j] > 0)
        .filter_map(|cell| by_cell.get(&cell).map(|candidate| (*candidate).clone()))
        .collect();
    assigned.sort_by(compare_candidates);
    assigned
}

/// Hungarian algorithm (potentials form) maximizing total weight.
///
/// Requires `rows <= cols`; returns the column assigned to each row.
fn hungarian_max(weights: &[Vec<i64>]) -> Vec<usize> {
    let n = weights.len();
    let m = weights.first().map(Vec::len).unwrap_or(0);
    if n == 0 || m == 0 {
        return Vec::new();
    }

    let max_weight = weights
        .iter()
        .flat_map(|row| row.iter().copied())
        .max()
        .unwrap_or(0);
    let cost = |i: usize, j: usize| max_weight - weights[i][j];

    let inf = i64::MAX / 4;
    let mut u = vec![0i64; n + 1];
    let mut v = vec![0i64; m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![inf; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost(i0 - 1, j - 1) - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=m {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use chrono::NaiveDate;

    fn matcher() -> Matcher {
        Matcher::new(MatchingConfig::default())
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn identical_tasks_score_one() {
        let score = matcher().score(&Task::new("s", "Buy milk"), &Task::new("d", "Buy milk"));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn due_tolerance_and_one_sided_due() {
        let m = matcher();
        let source = Task::new("s", "Pay rent").with_due(date(1));
        assert_eq!(m.score(&source, &Task::new("d", "Pay rent").with_due(date(2))), 1.0);
        let far = m.score(&source, &Task::new("d", "Pay rent").with_due(date(9)));
        assert!((far - 0.85).abs() < 1e-9);
        let one_sided = m.score(&source, &Task::new("d", "Pay rent"));
        assert!((one_sided - 0.925).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_produce_empty_set() {
        let set = matcher().find_matches(&[], &[], &[]);
        assert!(set.links.is_empty());
        assert_eq!(set.preserved, 0);
        assert!(set.new.is_empty());
    }

    #[test]
    fn below_threshold_pairs_are_not_linked() {
        let sources = vec![Task::new("s1", "Buy milk")];
        let dests = vec![Task::new("d1", "Walk the dog")];
        let set = matcher().find_matches(&sources, &dests, &[]);
        assert!(set.links.is_empty());
    }

    #[test]
    fn optimal_assignment_beats_greedy_choice() {
        // Greedy would take (s1, d1) and leave s2 unmatched.
        let sources = vec![
            Task::new("s1", "alpha beta gamma delta"),
            Task::new("s2", "alpha beta gamma"),
        ];
        let dests = vec![
            Task::new("d1", "alpha beta gamma delta"),
            Task::new("d2", "alpha beta gamma delta epsilon"),
        ];
        let m = matcher();
        let s2_d2 = m.score(&sources[1], &dests[1]);
        assert!(s2_d2 < 0.75, "s2 cannot pair with d2: {s2_d2}");

        let set = m.find_matches(&sources, &dests, &[]);
        assert_eq!(set.links.len(), 2);
        assert_eq!(set.links.by_source("s1").unwrap().dest_id, "d2");
        assert_eq!(set.links.by_source("s2").unwrap().dest_id, "d1");
    }

    #[test]
    fn greedy_fallback_above_limit() {
        let sources = vec![
            Task::new("s1", "alpha beta gamma delta"),
            Task::new("s2", "alpha beta gamma"),
        ];
        let dests = vec![
            Task::new("d1", "alpha beta gamma delta"),
            Task::new("d2", "alpha beta gamma delta epsilon"),
        ];
        let config = MatchingConfig {
            assignment_limit: 1,
            ..MatchingConfig::default()
        };
        let set = Matcher::new(config).find_matches(&sources, &dests, &[]);
        assert_eq!(set.links.by_source("s1").unwrap().dest_id, "d1");
        assert!(!set.links.contains_source("s2"));
    }

    #[test]
    fn equal_scores_prefer_smaller_source_id() {
        let sources = vec![Task::new("s2", "Buy milk"), Task::new("s1", "Buy milk")];
        let dests = vec![Task::new("d1", "Buy milk")];
        let set = matcher().find_matches(&sources, &dests, &[]);
        assert_eq!(set.links.len(), 1);
        assert!(set.links.contains_source("s1"));
    }

    #[test]
    fn existing_link_is_preserved_over_new_pair() {
        let sources = vec![
            Task::new("s1", "Buy milk today!"),
            Task::new("s2", "Buy milk today"),
        ];
        let dests = vec![Task::new("d1", "Buy milk today")];
        let existing = vec![SyncLink::new("s1", "d1", 1.0)];
        let set = matcher().find_matches(&sources, &dests, &existing);
        assert_eq!(set.preserved, 1);
        assert!(set.new.is_empty());
        assert_eq!(set.links.by_dest("d1").unwrap().source_id, "s1");
    }

    #[test]
    fn weak_link_without_competition_is_retained() {
        let sources = vec![Task::new("s1", "Buy oat milk at the store")];
        let dests = vec![Task::new("d1", "Call the bank")];
        let existing = vec![SyncLink::new("s1", "d1", 1.0)];
        let set = matcher().find_matches(&sources, &dests, &existing);
        assert_eq!(set.preserved, 1);
        assert!(set.released.is_empty());
        assert!(set.links.contains_source("s1"));
    }

    #[test]
    fn weak_link_is_released_when_endpoint_rematches() {
        let sources = vec![
            Task::new("s1", "Call the bank"),
            Task::new("s2", "Buy milk"),
        ];
        let dests = vec![Task::new("d1", "Buy milk")];
        let existing = vec![SyncLink::new("s1", "d1", 1.0)];
        let set = matcher().find_matches(&sources, &dests, &existing);
        assert_eq!(set.released.len(), 1);
        assert_eq!(set.links.by_dest("d1").unwrap().source_id, "s2");
        assert_eq!(set.new.len(), 1);
    }

    #[test]
    fn stale_and_conflicting_links_are_split_out() {
        let sources = vec![Task::new("s1", "Buy milk"), Task::new("s2", "Buy milk")];
        let dests = vec![Task::new("d1", "Buy milk")];
        let existing = vec![
            SyncLink::new("s2", "d1", 1.0),
            SyncLink::new("s1", "d1", 1.0),
            SyncLink::new("gone", "d1", 1.0),
        ];
        let set = matcher().find_matches(&sources, &dests, &existing);
        assert_eq!(set.stale.len(), 1);
        assert_eq!(set.superseded.len(), 1);
        assert_eq!(set.superseded[0].source_id, "s2");
        assert_eq!(set.links.by_dest("d1").unwrap().source_id, "s1");
    }

    #[test]
    fn status_mismatch_lowers_score() {
        let source = Task::new("s", "Buy milk").with_status(TaskStatus::Done);
        let score = matcher().score(&source, &Task::new("d", "Buy milk"));
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn hungarian_handles_rectangular_input() {
        let weights = vec![vec![1, 5, 3], vec![4, 2, 6]];
        let assignment = hungarian_max(&weights);
        assert_eq!(assignment, vec![1, 2]);
    }
}
