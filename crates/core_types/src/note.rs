use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_CONTENT_CHARS, MAX_TITLE_CHARS, check_len};
use crate::{NoteId, NotebookId, StoreResult, TagId, UserId};

pub const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: NoteId,
    pub owner_id: UserId,
    pub notebook_id: Option<NotebookId>,
    pub title: String,
    pub content: String,
    pub plain_text: String,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    pub is_pinned: bool,
    pub is_favorite: bool,
    pub is_trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trashed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// First `max_chars` characters of the plain text, for list previews.
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.plain_text.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.plain_text[..idx],
            None => &self.plain_text,
        }
    }
}

/// Everything needed to create a note row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub plain_text: String,
    #[serde(default)]
    pub notebook_id: Option<NotebookId>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
}

impl NoteDraft {
    /// The title that gets stored: blank titles become [`UNTITLED`].
    pub fn effective_title(&self) -> &str {
        effective_title(&self.title)
    }

    pub fn validate(&self) -> StoreResult<()> {
        check_len("title", &self.title, MAX_TITLE_CHARS)?;
        check_len("content", &self.content, MAX_CONTENT_CHARS)?;
        check_len("plain_text", &self.plain_text, MAX_CONTENT_CHARS)?;
        Ok(())
    }
}

/// Allow-listed partial update of a note. `None` leaves a field untouched.
///
/// `notebook_id: Some(None)` unlinks the notebook; `tag_ids: Some(vec![])`
/// clears every tag link. Setting `is_trashed` also stamps or clears
/// `trashed_at` on the stored row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub plain_text: Option<String>,
    pub notebook_id: Option<Option<NotebookId>>,
    pub tag_ids: Option<Vec<TagId>>,
    pub is_pinned: Option<bool>,
    pub is_favorite: Option<bool>,
    pub is_trashed: Option<bool>,
}

impl NotePatch {
    /// A patch that overwrites every editable field with the draft.
    pub fn from_draft(draft: &NoteDraft) -> Self {
        Self {
            title: Some(draft.effective_title().to_string()),
            content: Some(draft.content.clone()),
            plain_text: Some(draft.plain_text.clone()),
            notebook_id: Some(draft.notebook_id),
            tag_ids: Some(draft.tag_ids.clone()),
            ..Self::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            title: Some(effective_title(&title).to_string()),
            ..Self::default()
        }
    }

    pub fn notebook(notebook_id: Option<NotebookId>) -> Self {
        Self {
            notebook_id: Some(notebook_id),
            ..Self::default()
        }
    }

    pub fn tags(tag_ids: Vec<TagId>) -> Self {
        Self {
            tag_ids: Some(tag_ids),
            ..Self::default()
        }
    }

    pub fn pinned(is_pinned: bool) -> Self {
        Self {
            is_pinned: Some(is_pinned),
            ..Self::default()
        }
    }

    pub fn favorite(is_favorite: bool) -> Self {
        Self {
            is_favorite: Some(is_favorite),
            ..Self::default()
        }
    }

    pub fn trashed(is_trashed: bool) -> Self {
        Self {
            is_trashed: Some(is_trashed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> StoreResult<()> {
        if let Some(title) = &self.title {
            check_len("title", title, MAX_TITLE_CHARS)?;
        }
        if let Some(content) = &self.content {
            check_len("content", content, MAX_CONTENT_CHARS)?;
        }
        if let Some(plain_text) = &self.plain_text {
            check_len("plain_text", plain_text, MAX_CONTENT_CHARS)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFilter {
    #[serde(default)]
    pub notebook_id: Option<NotebookId>,
    #[serde(default)]
    pub tag_id: Option<TagId>,
    #[serde(default)]
    pub trashed: bool,
}

impl NoteFilter {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn trashed() -> Self {
        Self {
            trashed: true,
            ..Self::default()
        }
    }
}

fn effective_title(title: &str) -> &str {
    if title.trim().is_empty() {
        UNTITLED
    } else {
        title
    }
}
