use core_types::{NotebookId, TagId};

/// One snapshot of the editor document: the rich-text markup and its
/// plain-text rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorContent {
    pub html: String,
    pub plain_text: String,
}

impl EditorContent {
    pub fn new(html: impl Into<String>, plain_text: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            plain_text: plain_text.into(),
        }
    }
}

/// Callbacks an editing surface fires at whoever persists the note.
///
/// The surface makes no promises about frequency: `on_content_change` may
/// fire on every keystroke.
pub trait EditorListener: Send + Sync {
    fn on_content_change(&self, html: &str, plain_text: &str);
    fn on_title_blur(&self, title: &str);
    fn on_notebook_select(&self, notebook_id: Option<NotebookId>);
    fn on_tags_change(&self, tag_ids: &[TagId]);
    fn on_manual_save_request(&self);
}

/// The same callbacks as values, for surfaces that hand over a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    ContentChanged(EditorContent),
    TitleEdited(String),
    TitleBlurred(String),
    NotebookSelected(Option<NotebookId>),
    TagsChanged(Vec<TagId>),
    PinToggled(bool),
    FavoriteToggled(bool),
    SaveRequested,
}
