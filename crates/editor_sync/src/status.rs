use core_types::NoteId;

/// Whether the note being edited has a stored row yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Existing(NoteId),
}

impl Phase {
    pub fn note_id(&self) -> Option<NoteId> {
        match self {
            Phase::New => None,
            Phase::Existing(id) => Some(*id),
        }
    }
}

/// Save indicator shown next to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Saved,
    Unsaved,
    Saving,
    Failed(String),
}

impl SaveStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SaveStatus::Saved => "Saved",
            SaveStatus::Unsaved => "Unsaved changes",
            SaveStatus::Saving => "Saving...",
            SaveStatus::Failed(_) => "Failed to save",
        }
    }

    /// Saved and failed are terminal until the next edit.
    pub fn is_settled(&self) -> bool {
        matches!(self, SaveStatus::Saved | SaveStatus::Failed(_))
    }
}
