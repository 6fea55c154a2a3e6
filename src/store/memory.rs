use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::store::{TaskFilter, TaskStore};
use crate::task::{NewTask, Task, TaskChanges};

/// Operation that should fail on a [`MemoryTaskStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    List,
    Create,
    Update,
    Delete,
}

/// In-memory store keyed by id.
///
/// Ids are `<prefix>-<n>`; every mutating call is counted so callers can
/// assert a pass made no writes.
#[derive(Debug, Clone)]
pub struct MemoryTaskStore {
    name: String,
    prefix: String,
    next_id: u64,
    tasks: BTreeMap<String, Task>,
    writes: usize,
    fail_on: Option<FailOn>,
}

impl MemoryTaskStore {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            prefix: name.clone(),
            name,
            next_id: 1,
            tasks: BTreeMap::new(),
            writes: 0,
            fail_on: None,
        }
    }

    pub fn with_tasks(name: impl Into<String>, tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut store = Self::new(name);
        for task in tasks {
            store.insert(task);
        }
        store
    }

    /// Put a task in place without counting a write.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Remove a task without counting a write.
    pub fn remove(&mut self, id: &str) -> Option<Task> {
        self.tasks.remove(id)
    }

    /// Mutate a task in place without counting a write.
    pub fn edit(&mut self, id: &str, f: impl FnOnce(&mut Task)) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    /// Make the next matching call (and every one after it) fail.
    pub fn fail_on(&mut self, op: FailOn) {
        self.fail_on = Some(op);
    }

    pub fn clear_failure(&mut self) {
        self.fail_on = None;
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of create/update/delete calls that reached the store.
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn check(&self, op: FailOn) -> Result<()> {
        if self.fail_on == Some(op) {
            return Err(Error::store_unavailable(
                &self.name,
                format!("injected {op:?} failure"),
            ));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> String {
        loop {
            let id = format!("{}-{}", self.prefix, self.next_id);
            self.next_id += 1;
            if !self.tasks.contains_key(&id) {
                return id;
            }
        }
    }
}

impl TaskStore for MemoryTaskStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.check(FailOn::List)?;
        Ok(self
            .tasks
            .values()
            .filter(|task| filter.accepts(task))
            .cloned()
            .collect())
    }

    fn create(&mut self, container: &str, draft: &NewTask) -> Result<Task> {
        self.check(FailOn::Create)?;
        let now = Utc::now();
        let task = Task {
            id: self.allocate_id(),
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
        self.writes += 1;
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn update(&mut self, id: &str, changes: &TaskChanges) -> Result<Option<Task>> {
        self.check(FailOn::Update)?;
        self.writes += 1;
        match self.tasks.get_mut(id) {
            Some(task) => {
                task.apply(changes);
                task.modified_at = Some(Utc::now());
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        self.check(FailOn::Delete)?;
        self.writes += 1;
        Ok(self.tasks.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    #[test]
    fn create_allocates_prefixed_ids() {
        let mut store = MemoryTaskStore::with_tasks("rem", [Task::new("rem-1", "taken")]);
        let task = Task::new("x", "Buy milk");
        let created = store.create("Groceries", &task.to_draft()).unwrap();
        assert_eq!(created.id, "rem-2");
        assert_eq!(created.container, "Groceries");
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn list_honors_filter() {
        let store = MemoryTaskStore::with_tasks(
            "rem",
            [
                Task::new("a", "one").with_container("Work"),
                Task::new("b", "two")
                    .with_container("Home")
                    .with_status(TaskStatus::Done),
                Task::new("c", "three").with_container("Home"),
            ],
        );
        let home = store
            .list(&TaskFilter::in_containers(vec!["Home".to_string()]))
            .unwrap();
        assert_eq!(home.len(), 2);
        let open = store.list(&TaskFilter::all().open_only()).unwrap();
        assert_eq!(open.len(), 2);
    }

    #[test]
    fn injected_failure_surfaces_store_unavailable() {
        let mut store = MemoryTaskStore::new("vault");
        store.fail_on(FailOn::Create);
        let err = store
            .create("Inbox.md", &Task::new("x", "y").to_draft())
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable { .. }));
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn update_and_delete_report_missing_tasks() {
        let mut store = MemoryTaskStore::new("vault");
        assert!(store
            .update("nope", &TaskChanges::default())
            .unwrap()
            .is_none());
        assert!(!store.delete("nope").unwrap());
    }
}
