//! Command-line interface for tasklink
//!
//! Argument parsing only: every command resolves its inputs into explicit
//! values and hands them to the library.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::{Config, PartitionConfig, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::OutputOptions;

mod dedupe;
mod links;
mod sync;

/// tasklink - two-way task reconciliation
///
/// Keeps a note vault's tasks and a reminder store's tasks in step, one
/// partition (vault) per pass.
#[derive(Parser, Debug)]
#[command(name = "tasklink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tasklink.toml (defaults to ./tasklink.toml)
    #[arg(long, global = true, env = "TASKLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one sync pass for a partition
    Sync {
        /// Partition id (optional when exactly one is configured)
        #[arg(short, long)]
        partition: Option<String>,

        /// Source (vault) task file
        #[arg(long)]
        source: PathBuf,

        /// Dest (reminder) task file
        #[arg(long)]
        dest: PathBuf,

        /// Compute the pass without writing anything
        #[arg(long, conflicts_with = "evaluate")]
        dry_run: bool,

        /// Leave the stores untouched; only heal link identities
        #[arg(long)]
        evaluate: bool,

        /// Also remove duplicate tasks (overrides sync.dedupe)
        #[arg(long)]
        dedupe: bool,
    },

    /// Report duplicate tasks across both stores
    Dedupe {
        #[arg(short, long)]
        partition: Option<String>,

        #[arg(long)]
        source: PathBuf,

        #[arg(long)]
        dest: PathBuf,

        /// Delete duplicates, keeping one copy (or one linked pair)
        #[arg(long)]
        delete: bool,

        /// With --delete, list what would be deleted
        #[arg(long, requires = "delete")]
        dry_run: bool,
    },

    /// List persisted links
    Links {
        /// Only links of this partition
        #[arg(short, long)]
        partition: Option<String>,
    },
}

/// Loaded configuration and the directory relative paths resolve against.
pub struct LoadedConfig {
    pub config: Config,
    pub dir: PathBuf,
}

impl LoadedConfig {
    pub fn link_file(&self) -> PathBuf {
        self.config.resolve_link_file(&self.dir)
    }

    /// Explicit partition, or the only configured one.
    pub fn partition(&self, requested: Option<&str>) -> Result<&PartitionConfig> {
        match requested {
            Some(id) => self.config.partition(id),
            None => match self.config.partitions.as_slice() {
                [only] => Ok(only),
                [] => Err(Error::InvalidConfig(
                    "no partitions configured".to_string(),
                )),
                _ => Err(Error::InvalidArgument(
                    "several partitions configured; pass --partition".to_string(),
                )),
            },
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::InvalidArgument(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok(LoadedConfig {
                config: Config::load(path)?,
                dir,
            })
        }
        None => {
            let dir = std::env::current_dir()?;
            let config = Config::load_or_default(&dir)?;
            tracing::debug!(dir = %dir.display(), file = CONFIG_FILE, "config resolved");
            Ok(LoadedConfig { config, dir })
        }
    }
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let loaded = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Sync {
                partition,
                source,
                dest,
                dry_run,
                evaluate,
                dedupe,
            } => sync::run(sync::SyncOptions {
                loaded,
                partition,
                source,
                dest,
                dry_run,
                evaluate,
                dedupe,
                output,
            }),
            Commands::Dedupe {
                partition,
                source,
                dest,
                delete,
                dry_run,
            } => dedupe::run(dedupe::DedupeOptions {
                loaded,
                partition,
                source,
                dest,
                delete,
                dry_run,
                output,
            }),
            Commands::Links { partition } => links::run(links::LinksOptions {
                loaded,
                partition,
                output,
            }),
        }
    }
}
