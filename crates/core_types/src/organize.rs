use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::{
    DEFAULT_NOTEBOOK_COLOR, MAX_NOTEBOOK_NAME_CHARS, MAX_TAG_NAME_CHARS, is_hex_color,
    required_name,
};
use crate::{NotebookId, StoreError, StoreResult, TagId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notebook {
    pub id: NotebookId,
    pub owner_id: UserId,
    pub name: String,
    pub color: String,
    pub is_default: bool,
    /// Non-trashed notes linked to this notebook.
    #[serde(default)]
    pub note_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotebookDraft {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl NotebookDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }

    /// Returns the trimmed name and the color to store. An unusable color
    /// falls back to the default instead of failing the create.
    pub fn normalize(&self) -> StoreResult<(String, String)> {
        let name = required_name("name", &self.name, MAX_NOTEBOOK_NAME_CHARS)?;
        let color = match self.color.as_deref() {
            Some(color) if is_hex_color(color) => color.to_string(),
            _ => DEFAULT_NOTEBOOK_COLOR.to_string(),
        };
        Ok((name, color))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotebookPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub is_default: Option<bool>,
}

impl NotebookPatch {
    /// Unlike create, an invalid color on update is an error.
    pub fn normalize(&self) -> StoreResult<Self> {
        let name = match &self.name {
            Some(name) => Some(required_name("name", name, MAX_NOTEBOOK_NAME_CHARS)?),
            None => None,
        };
        if let Some(color) = &self.color {
            if !is_hex_color(color) {
                return Err(StoreError::validation("color", "expected #RRGGBB"));
            }
        }
        Ok(Self {
            name,
            color: self.color.clone(),
            is_default: self.is_default,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub owner_id: UserId,
    pub name: String,
    #[serde(default)]
    pub note_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn normalize_name(name: &str) -> StoreResult<String> {
        required_name("name", name, MAX_TAG_NAME_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_color_on_create_uses_default() {
        let draft = NotebookDraft {
            name: " Work ".to_string(),
            color: Some("red".to_string()),
        };
        let (name, color) = draft.normalize().expect("normalize");
        assert_eq!(name, "Work");
        assert_eq!(color, DEFAULT_NOTEBOOK_COLOR);
    }

    #[test]
    fn invalid_color_on_update_is_rejected() {
        let patch = NotebookPatch {
            color: Some("#12345".to_string()),
            ..NotebookPatch::default()
        };
        assert!(matches!(
            patch.normalize(),
            Err(StoreError::Validation { field: "color", .. })
        ));
    }

    #[test]
    fn tag_names_are_bounded() {
        assert_eq!(Tag::normalize_name(" rust ").expect("name"), "rust");
        assert!(Tag::normalize_name(&"t".repeat(MAX_TAG_NAME_CHARS + 1)).is_err());
    }
}
