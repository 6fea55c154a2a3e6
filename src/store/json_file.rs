use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT_MS};
use crate::store::{TaskFilter, TaskStore};
use crate::task::{NewTask, Task, TaskChanges};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskDocument {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Task store backed by a JSON snapshot file.
///
/// Every mutation is a locked read-modify-write of the whole document, so
/// an external process may edit the file between passes.
#[derive(Debug, Clone)]
pub struct JsonTaskFile {
    name: String,
    path: PathBuf,
    lock_timeout_ms: u64,
}

impl JsonTaskFile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<TaskDocument> {
        match lock::read_optional(&self.path) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).map_err(|err| {
                Error::store_unavailable(
                    &self.name,
                    format!("{} is not a task file: {err}", self.path.display()),
                )
            }),
            Ok(None) => Ok(TaskDocument::default()),
            Err(Error::Io(err)) => Err(Error::store_unavailable(&self.name, err.to_string())),
            Err(err) => Err(err),
        }
    }

    fn modify<T>(&self, f: impl FnOnce(&mut TaskDocument) -> T) -> Result<T> {
        lock::with_lock(&self.path, self.lock_timeout_ms, || {
            let mut document = self.read()?;
            let result = f(&mut document);
            let json = serde_json::to_string_pretty(&document)?;
            lock::write_atomic(&self.path, json.as_bytes())?;
            Ok(result)
        })
    }
}

impl TaskStore for JsonTaskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let document = self.read()?;
        Ok(document
            .tasks
            .into_iter()
            .filter(|task| filter.accepts(task))
            .collect())
    }

    fn create(&mut self, container: &str, draft: &NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Ulid::new().to_string(),
            text: draft.text.clone(),
            status: draft.status,
            due: draft.due,
            priority: draft.priority,
            tags: draft.tags.clone(),
            created_at: Some(now),
            modified_at: Some(now),
            container: container.to_string(),
            location: None,
        };
        let created = task.clone();
        self.modify(move |document| document.tasks.push(task))?;
        debug!(store = %self.name, id = %created.id, container, "task created");
        Ok(created)
    }

    fn update(&mut self, id: &str, changes: &TaskChanges) -> Result<Option<Task>> {
        self.modify(|document| {
            document
                .tasks
                .iter_mut()
                .find(|task| task.id == id)
                .map(|task| {
                    task.apply(changes);
                    task.modified_at = Some(Utc::now());
                    task.clone()
                })
        })
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        self.modify(|document| {
            let before = document.tasks.len();
            document.tasks.retain(|task| task.id != id);
            document.tasks.len() != before
        })
    }
}
