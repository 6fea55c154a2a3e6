//! What a sync pass did (or would do).

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::task::Side;

/// How much a pass is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Write both stores and the link file
    Apply,
    /// No store writes; the link file is written only to heal identities
    Evaluate,
    /// No writes at all
    DryRun,
}

impl RunMode {
    pub fn writes_stores(&self) -> bool {
        matches!(self, RunMode::Apply)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Apply => write!(f, "apply"),
            RunMode::Evaluate => write!(f, "evaluate"),
            RunMode::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Why a link was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    SourceDeleted,
    DestDeleted,
    BothDeleted,
    /// The surviving endpoint was matched to another task
    Rematched,
    /// A new pairing claimed one of a weak link's endpoints
    Released,
    /// Another link held the same id with a better score
    Superseded,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DropReason::SourceDeleted => "source deleted",
            DropReason::DestDeleted => "dest deleted",
            DropReason::BothDeleted => "both deleted",
            DropReason::Rematched => "rematched",
            DropReason::Released => "released",
            DropReason::Superseded => "superseded",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncAction {
    RemapIdentity {
        stale_id: String,
        canonical_id: String,
        dest_id: String,
    },
    Link {
        source_id: String,
        dest_id: String,
        score: f64,
    },
    CreateDest {
        source_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dest_id: Option<String>,
        container: String,
        text: String,
    },
    CreateSource {
        dest_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        container: String,
        text: String,
    },
    Update {
        side: Side,
        id: String,
        fields: Vec<String>,
    },
    MoveDest {
        dest_id: String,
        from: String,
        to: String,
    },
    DeleteDest {
        dest_id: String,
        source_id: String,
    },
    DeleteDuplicate {
        side: Side,
        id: String,
        text: String,
    },
    DropLink {
        source_id: String,
        dest_id: String,
        reason: DropReason,
    },
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::RemapIdentity {
                stale_id,
                canonical_id,
                dest_id,
            } => write!(f, "remap {stale_id} -> {canonical_id} (dest {dest_id})"),
            SyncAction::Link {
                source_id,
                dest_id,
                score,
            } => write!(f, "link {source_id} <-> {dest_id} ({score:.2})"),
            SyncAction::CreateDest {
                source_id,
                container,
                text,
                ..
            } => write!(f, "create dest in {container}: {text} (from {source_id})"),
            SyncAction::CreateSource {
                dest_id,
                container,
                text,
                ..
            } => write!(f, "create source in {container}: {text} (from {dest_id})"),
            SyncAction::Update { side, id, fields } => {
                write!(f, "update {side} {id}: {}", fields.join(", "))
            }
            SyncAction::MoveDest { dest_id, from, to } => {
                write!(f, "move {dest_id}: {from} -> {to}")
            }
            SyncAction::DeleteDest { dest_id, source_id } => {
                write!(f, "delete dest {dest_id} (source {source_id} gone)")
            }
            SyncAction::DeleteDuplicate { side, id, text } => {
                write!(f, "delete duplicate {side} {id}: {text}")
            }
            SyncAction::DropLink {
                source_id,
                dest_id,
                reason,
            } => write!(f, "drop link {source_id} <-> {dest_id} ({reason})"),
        }
    }
}

/// A recoverable condition; the pass continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIssue {
    LinkFileCorrupt {
        path: PathBuf,
        message: String,
    },
    AmbiguousIdentity {
        stale_id: String,
        dest_id: String,
        candidates: Vec<String>,
    },
    RoutingMiss {
        source_id: String,
        text: String,
        tags: Vec<String>,
    },
    TaskVanished {
        side: Side,
        id: String,
    },
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncIssue::LinkFileCorrupt { path, message } => {
                write!(f, "link file {} unreadable, starting empty: {message}", path.display())
            }
            SyncIssue::AmbiguousIdentity {
                stale_id,
                dest_id,
                candidates,
            } => write!(
                f,
                "link {stale_id} <-> {dest_id} is ambiguous between {}",
                candidates.join(", ")
            ),
            SyncIssue::RoutingMiss { source_id, text, .. } => {
                write!(f, "no container for {source_id} ({text}); set a default_container or a route")
            }
            SyncIssue::TaskVanished { side, id } => {
                write!(f, "{side} task {id} vanished during the pass")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub source_tasks: usize,
    pub dest_tasks: usize,
    pub preserved: usize,
    pub matched: usize,
    pub remapped: usize,
    pub created_source: usize,
    pub created_dest: usize,
    pub updated_source: usize,
    pub updated_dest: usize,
    pub moved: usize,
    pub deleted_dest: usize,
    pub deleted_duplicates: usize,
    pub links_dropped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub partition_id: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub counts: SyncCounts,
    pub actions: Vec<SyncAction>,
    pub issues: Vec<SyncIssue>,
    /// Links held by the partition at the end of the pass
    pub links: usize,
    /// Whether the link file was written
    pub persisted: bool,
}

impl SyncReport {
    pub fn new(partition_id: impl Into<String>, mode: RunMode, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            partition_id: partition_id.into(),
            mode,
            started_at,
            counts: SyncCounts::default(),
            actions: Vec::new(),
            issues: Vec::new(),
            links: 0,
            persisted: false,
        }
    }

    /// True when the pass changed (or would change) nothing in either store.
    pub fn is_quiet(&self) -> bool {
        let c = &self.counts;
        c.created_source == 0
            && c.created_dest == 0
            && c.updated_source == 0
            && c.updated_dest == 0
            && c.moved == 0
            && c.deleted_dest == 0
            && c.deleted_duplicates == 0
    }

    pub fn creations(&self) -> usize {
        self.counts.created_source + self.counts.created_dest
    }
}
