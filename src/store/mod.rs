//! Task store seam
//!
//! The engine talks to both sides through [`TaskStore`]. Concrete adapters
//! for a markdown vault or a native reminder framework live outside this
//! crate; two generic adapters ship here:
//!
//! - [`MemoryTaskStore`]: in-process store with failure injection
//! - [`JsonTaskFile`]: `{"tasks": [...]}` snapshot file with locked writes

mod json_file;
mod memory;

pub use json_file::JsonTaskFile;
pub use memory::{FailOn, MemoryTaskStore};

use crate::error::Result;
use crate::task::{NewTask, Task, TaskChanges};

/// Which tasks a `list` call returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Restrict to these containers; `None` lists every container
    pub containers: Option<Vec<String>>,
    pub include_completed: bool,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self {
            containers: None,
            include_completed: true,
        }
    }

    pub fn in_containers(containers: Vec<String>) -> Self {
        Self {
            containers: Some(containers),
            include_completed: true,
        }
    }

    pub fn open_only(mut self) -> Self {
        self.include_completed = false;
        self
    }

    pub fn accepts(&self, task: &Task) -> bool {
        if !self.include_completed && task.is_done() {
            return false;
        }
        match &self.containers {
            Some(containers) => containers.iter().any(|c| c == &task.container),
            None => true,
        }
    }
}

/// One side of the sync.
///
/// Calls are blocking; any error aborts the pass.
pub trait TaskStore {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    fn create(&mut self, container: &str, task: &NewTask) -> Result<Task>;

    /// Returns `None` if the task no longer exists.
    fn update(&mut self, id: &str, changes: &TaskChanges) -> Result<Option<Task>>;

    /// Returns `false` if the task no longer exists.
    fn delete(&mut self, id: &str) -> Result<bool>;
}
