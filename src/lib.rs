//! tasklink - two-way task reconciliation library
//!
//! Links tasks held in a note vault (the *source* store) with tasks held in
//! a reminder service (the *dest* store) and keeps each linked pair in
//! agreement across repeated sync passes.
//!
//! # Core Concepts
//!
//! - **Links**: persisted (source id, dest id, score) records, scoped to a
//!   partition
//! - **Partitions**: one per vault; a pass only ever touches its own links
//! - **Matching**: fuzzy pairing of unlinked tasks, optimal or greedy
//! - **Resolution**: per-field conflict winners, newer edit wins
//! - **Routing**: tag-driven choice of dest container
//! - **Deduplication**: clusters of same-text tasks, sync pairs exempt
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `tasklink.toml`
//! - `error`: Error types and result aliases
//! - `task`, `text`: task model and text normalization
//! - `link`: sync links and the one-to-one link set
//! - `matcher`: scoring and assignment
//! - `resolver`: field-level conflict resolution
//! - `routing`: tag routes and import modes
//! - `identity`: healing links recorded against temporary source ids
//! - `dedup`: duplicate clusters and deletion
//! - `engine`: one sync pass
//! - `storage`: the shared JSON link file
//! - `store`: the task store seam plus file and in-memory stores
//! - `lock`: file locking and atomic writes

pub mod cli;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod identity;
pub mod link;
pub mod lock;
pub mod matcher;
pub mod output;
pub mod report;
pub mod resolver;
pub mod routing;
pub mod storage;
pub mod store;
pub mod task;
pub mod text;

pub use error::{Error, Result};
