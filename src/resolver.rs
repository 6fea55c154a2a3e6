//! Per-field conflict resolution for a linked task pair.
//!
//! Last writer wins on `modified_at`; tags are unioned when both sides carry
//! different non-empty sets. Everything here is pure.

use serde::Serialize;

use crate::task::{Task, TaskChanges};
use crate::text::{normalize_tag, normalize_text, tag_set};

/// Which side's value a field should converge to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    /// Values agree, or there is no basis for choosing
    #[default]
    None,
    Source,
    Dest,
    /// Union of both sides (tags only)
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConflictOutcome {
    pub status: Winner,
    pub text: Winner,
    pub due: Winner,
    pub priority: Winner,
    pub tags: Winner,
}

impl ConflictOutcome {
    pub fn is_noop(&self) -> bool {
        *self == ConflictOutcome::default()
    }
}

/// Field changes for each side of a pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairChanges {
    pub source: TaskChanges,
    pub dest: TaskChanges,
}

/// Compare a linked pair field by field.
pub fn resolve(source: &Task, dest: &Task) -> ConflictOutcome {
    let newer = newer_side(source, dest);
    let pick = |equal: bool| if equal { Winner::None } else { newer };

    ConflictOutcome {
        status: pick(source.status == dest.status),
        text: pick(normalize_text(&source.text) == normalize_text(&dest.text)),
        due: pick(source.due == dest.due),
        priority: pick(source.priority == dest.priority),
        tags: resolve_tags(&source.tags, &dest.tags),
    }
}

fn newer_side(source: &Task, dest: &Task) -> Winner {
    match (source.modified_at, dest.modified_at) {
        (Some(s), Some(d)) if s > d => Winner::Source,
        (Some(s), Some(d)) if d > s => Winner::Dest,
        _ => Winner::None,
    }
}

fn resolve_tags(source: &[String], dest: &[String]) -> Winner {
    let source_set = tag_set(source);
    let dest_set = tag_set(dest);
    if source_set == dest_set {
        return Winner::None;
    }
    match (source_set.is_empty(), dest_set.is_empty()) {
        (false, true) => Winner::Source,
        (true, false) => Winner::Dest,
        (false, false) => Winner::Merge,
        (true, true) => Winner::None,
    }
}

/// Union of two tag lists: source tags first, then dest tags not already
/// present (compared normalized). Original spelling is kept.
pub fn merge_tags(source: &[String], dest: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for tag in source.iter().chain(dest.iter()) {
        let key = normalize_tag(tag);
        if key.is_empty() {
            continue;
        }
        if seen.insert(key) {
            merged.push(tag.clone());
        }
    }
    merged
}

/// Turn an outcome into the updates each side needs.
pub fn plan_changes(outcome: &ConflictOutcome, source: &Task, dest: &Task) -> PairChanges {
    let mut changes = PairChanges::default();

    match outcome.status {
        Winner::Source => changes.dest.status = Some(source.status),
        Winner::Dest => changes.source.status = Some(dest.status),
        _ => {}
    }
    match outcome.text {
        Winner::Source => changes.dest.text = Some(source.text.clone()),
        Winner::Dest => changes.source.text = Some(dest.text.clone()),
        _ => {}
    }
    match outcome.due {
        Winner::Source => changes.dest.due = Some(source.due),
        Winner::Dest => changes.source.due = Some(dest.due),
        _ => {}
    }
    match outcome.priority {
        Winner::Source => changes.dest.priority = Some(source.priority),
        Winner::Dest => changes.source.priority = Some(dest.priority),
        _ => {}
    }
    match outcome.tags {
        Winner::Source => changes.dest.tags = Some(source.tags.clone()),
        Winner::Dest => changes.source.tags = Some(dest.tags.clone()),
        Winner::Merge => {
            let merged = merge_tags(&source.tags, &dest.tags);
            let merged_set = tag_set(&merged);
            if tag_set(&source.tags) != merged_set {
                changes.source.tags = Some(merged.clone());
            }
            if tag_set(&dest.tags) != merged_set {
                changes.dest.tags = Some(merged);
            }
        }
        Winner::None => {}
    }

    changes
}
