use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_TASK_TITLE_CHARS, required_name};
use crate::{NoteId, StoreResult, TaskId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: UserId,
    #[serde(default)]
    pub note_id: Option<NoteId>,
    pub title: String,
    pub is_completed: bool,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub note_id: Option<NoteId>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn normalized_title(&self) -> StoreResult<String> {
        required_name("title", &self.title, MAX_TASK_TITLE_CHARS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub is_completed: Option<bool>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub note_id: Option<Option<NoteId>>,
}

impl TaskPatch {
    pub fn completed(is_completed: bool) -> Self {
        Self {
            is_completed: Some(is_completed),
            ..Self::default()
        }
    }

    pub fn normalized_title(&self) -> StoreResult<Option<String>> {
        self.title
            .as_deref()
            .map(|title| required_name("title", title, MAX_TASK_TITLE_CHARS))
            .transpose()
    }
}
