//! Configuration loading and management
//!
//! Handles parsing of `tasklink.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::routing::{ImportMode, TagRoute};

/// Default config file name
pub const CONFIG_FILE: &str = "tasklink.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the JSON link file shared by all partitions
    #[serde(default = "default_link_file")]
    pub link_file: PathBuf,

    /// How long to wait for the link file lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Matching configuration
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Pass-level behaviour
    #[serde(default)]
    pub sync: SyncConfig,

    /// One entry per vault
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link_file: default_link_file(),
            lock_timeout_ms: default_lock_timeout_ms(),
            matching: MatchingConfig::default(),
            sync: SyncConfig::default(),
            partitions: Vec::new(),
        }
    }
}

fn default_link_file() -> PathBuf {
    PathBuf::from("links.json")
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

/// Fuzzy matching configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum pair score to link two tasks
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Due dates this many days apart still agree
    #[serde(default = "default_days_tolerance")]
    pub days_tolerance: u32,

    /// Largest side length solved optimally; above it matching is greedy
    #[serde(default = "default_assignment_limit")]
    pub assignment_limit: usize,
}

fn default_min_score() -> f64 {
    0.75
}

fn default_days_tolerance() -> u32 {
    1
}

fn default_assignment_limit() -> usize {
    400
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            days_tolerance: default_days_tolerance(),
            assignment_limit: default_assignment_limit(),
        }
    }
}

/// Pass-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delete the dest counterpart when a linked source task disappears
    #[serde(default = "default_true")]
    pub propagate_deletions: bool,

    /// Tag stamped on source tasks created from dest tasks
    #[serde(default = "default_provenance_tag")]
    pub provenance_tag: String,

    /// Remove same-text duplicates at the end of every pass
    #[serde(default)]
    pub dedupe: bool,
}

fn default_true() -> bool {
    true
}

fn default_provenance_tag() -> String {
    "from-reminders".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            propagate_deletions: true,
            provenance_tag: default_provenance_tag(),
            dedupe: false,
        }
    }
}

/// A vault and the dest lists it syncs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Stable partition id recorded on every link
    pub id: String,

    /// Dest container for tasks no tag route claims
    #[serde(default)]
    pub default_container: Option<String>,

    /// Source container receiving tasks imported from the dest store
    #[serde(default = "default_inbox")]
    pub inbox: String,

    /// Ordered tag routes
    #[serde(default)]
    pub routes: Vec<TagRoute>,
}

fn default_inbox() -> String {
    "Inbox.md".to_string()
}

impl PartitionConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_container: None,
            inbox: default_inbox(),
            routes: Vec::new(),
        }
    }

    pub fn with_default_container(mut self, container: impl Into<String>) -> Self {
        self.default_container = Some(container.into());
        self
    }

    pub fn with_route(
        mut self,
        tag: impl Into<String>,
        container: impl Into<String>,
        import_mode: ImportMode,
    ) -> Self {
        self.routes.push(TagRoute::new(tag, container, import_mode));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "partitions.id cannot be empty".to_string(),
            ));
        }
        if self.inbox.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "partitions.{}.inbox cannot be empty",
                self.id
            )));
        }
        if let Some(container) = &self.default_container {
            if container.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "partitions.{}.default_container cannot be empty",
                    self.id
                )));
            }
        }

        let mut tags = HashSet::new();
        for route in &self.routes {
            let tag = crate::text::normalize_tag(&route.tag);
            if tag.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "partitions.{}.routes: tag cannot be empty",
                    self.id
                )));
            }
            if route.container.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "partitions.{}.routes: container for '{}' cannot be empty",
                    self.id, route.tag
                )));
            }
            if !tags.insert(tag.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "partitions.{}.routes has duplicate tag '{tag}'",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

impl MatchingConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::InvalidConfig(format!(
                "matching.min_score must be within [0, 1], got {}",
                self.min_score
            )));
        }
        if self.assignment_limit == 0 {
            return Err(Error::InvalidConfig(
                "matching.assignment_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a `tasklink.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory, or return defaults when the file
    /// is absent
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Look up a partition by id
    pub fn partition(&self, id: &str) -> Result<&PartitionConfig> {
        self.partitions
            .iter()
            .find(|partition| partition.id == id)
            .ok_or_else(|| Error::PartitionNotFound(id.to_string()))
    }

    /// Resolve a relative link file path against the config file's directory
    pub fn resolve_link_file(&self, config_dir: &Path) -> PathBuf {
        if self.link_file.is_absolute() {
            self.link_file.clone()
        } else {
            config_dir.join(&self.link_file)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.link_file.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "link_file cannot be empty".to_string(),
            ));
        }
        if self.sync.provenance_tag.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "sync.provenance_tag cannot be empty".to_string(),
            ));
        }
        self.matching.validate()?;

        let mut ids = HashSet::new();
        for partition in &self.partitions {
            partition.validate()?;
            if !ids.insert(partition.id.trim().to_string()) {
                return Err(Error::InvalidConfig(format!(
                    "partitions has duplicate id '{}'",
                    partition.id
                )));
            }
        }
        Ok(())
    }
}
