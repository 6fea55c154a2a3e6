#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tasklink::config::{MatchingConfig, PartitionConfig, SyncConfig};
use tasklink::engine::SyncEngine;
use tasklink::link::SyncLink;
use tasklink::storage::{LinkStore, PartitionScope};
use tasklink::task::Task;
use tempfile::TempDir;

pub const DEFAULT_LIST: &str = "Reminders";

/// Scratch directory holding a link file, task files and a config.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn link_path(&self) -> PathBuf {
        self.dir.path().join("links.json")
    }

    pub fn link_store(&self) -> LinkStore {
        LinkStore::new(self.link_path(), 1000)
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn write_config(&self, contents: &str) -> PathBuf {
        self.write_file("tasklink.toml", contents)
    }

    /// Write a `{"tasks": [...]}` document.
    pub fn write_tasks(&self, rel_path: &str, tasks: &[Task]) -> PathBuf {
        let json = serde_json::json!({ "tasks": tasks });
        self.write_file(
            rel_path,
            &serde_json::to_string_pretty(&json).expect("serialize tasks"),
        )
    }

    pub fn read_tasks(&self, rel_path: &str) -> Vec<Task> {
        let raw = fs::read_to_string(self.dir.path().join(rel_path)).expect("read tasks");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("parse tasks");
        serde_json::from_value(value["tasks"].clone()).expect("tasks array")
    }

    pub fn link_bytes(&self) -> Option<Vec<u8>> {
        fs::read(self.link_path()).ok()
    }

    pub fn links(&self) -> Vec<SyncLink> {
        self.link_store().load_strict().expect("load links")
    }

    pub fn partition_links(&self, partition_id: &str) -> Vec<SyncLink> {
        self.links()
            .into_iter()
            .filter(|link| link.belongs_to(partition_id))
            .collect()
    }

    /// Seed the link file with entries for one partition.
    pub fn seed_links(&self, partition_id: &str, links: &[SyncLink]) {
        let scope = PartitionScope::new(
            partition_id.to_string(),
            std::iter::empty::<String>(),
            std::iter::empty::<String>(),
        );
        self.link_store()
            .persist(&scope, links)
            .expect("seed links");
    }

    pub fn engine(&self, partition: PartitionConfig) -> SyncEngine {
        self.engine_with(partition, SyncConfig::default())
    }

    pub fn engine_with(&self, partition: PartitionConfig, sync: SyncConfig) -> SyncEngine {
        SyncEngine::from_parts(
            partition,
            MatchingConfig::default(),
            sync,
            self.link_store(),
        )
    }
}

/// Partition sending everything unrouted to [`DEFAULT_LIST`].
pub fn partition(id: &str) -> PartitionConfig {
    PartitionConfig::new(id).with_default_container(DEFAULT_LIST)
}

pub fn note(id: &str, text: &str) -> Task {
    Task::new(id, text).with_container("Tasks.md")
}

pub fn reminder(id: &str, text: &str, list: &str) -> Task {
    Task::new(id, text).with_container(list)
}
