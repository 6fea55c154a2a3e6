//! Task projection shared by both stores.
//!
//! The engine never sees store-specific task shapes. Adapters convert their
//! own records into [`Task`] and accept [`NewTask`] / [`TaskChanges`] back.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which store a task (or link endpoint) lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The markdown vault
    Source,
    /// The reminder store
    Dest,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Dest => write!(f, "dest"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    Done,
}

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "todo" | "open" | "" => Ok(TaskStatus::Todo),
            "done" | "x" | "completed" => Ok(TaskStatus::Done),
            other => Err(Error::InvalidArgument(format!(
                "Invalid task status '{}'. Expected: todo, done",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" | "!" => Ok(Priority::Low),
            "medium" | "!!" => Ok(Priority::Medium),
            "high" | "!!!" => Ok(Priority::High),
            other => Err(Error::InvalidArgument(format!(
                "Invalid priority '{}'. Expected: low, medium, high",
                other
            ))),
        }
    }
}

/// The projection of a store task the engine works with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// List identifier or note path the task lives in
    #[serde(default)]
    pub container: String,
    /// Opaque store-specific position (e.g. `file.md:12`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            status: TaskStatus::Todo,
            due: None,
            priority: None,
            tags: Vec::new(),
            created_at: None,
            modified_at: None,
            container: String::new(),
            location: None,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_due(mut self, due: NaiveDate) -> Self {
        self.due = Some(due);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn with_modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = Some(at);
        self
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// Draft carrying the synced fields of this task, used to create its
    /// counterpart in the other store.
    pub fn to_draft(&self) -> NewTask {
        NewTask {
            text: self.text.clone(),
            status: self.status,
            due: self.due,
            priority: self.priority,
            tags: self.tags.clone(),
        }
    }

    /// Apply a change set in memory (used by adapters and dry-run previews).
    pub fn apply(&mut self, changes: &TaskChanges) {
        if let Some(text) = &changes.text {
            self.text = text.clone();
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(due) = changes.due {
            self.due = due;
        }
        if let Some(priority) = changes.priority {
            self.priority = priority;
        }
        if let Some(tags) = &changes.tags {
            self.tags = tags.clone();
        }
        if let Some(container) = &changes.container {
            self.container = container.clone();
        }
    }
}

/// Fields for a task about to be created in a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub text: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Field-level update sent to a store. `None` means "leave unchanged";
/// for optional fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Option<Priority>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl TaskChanges {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.status.is_none()
            && self.due.is_none()
            && self.priority.is_none()
            && self.tags.is_none()
            && self.container.is_none()
    }

    /// Names of the fields this change set touches, for reporting.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
        }
        if self.text.is_some() {
            fields.push("text");
        }
        if self.due.is_some() {
            fields.push("due");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.container.is_some() {
            fields.push("container");
        }
        fields
    }
}
