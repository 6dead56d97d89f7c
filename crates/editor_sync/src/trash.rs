use std::sync::Arc;

use core_types::{Note, NoteEndpoint, NoteFilter, NoteId, StoreError, StoreResult};
use futures::future::join_all;
use tracing::{info, warn};

/// Soft delete, restore and permanent delete for one caller's notes.
pub struct TrashBin {
    endpoint: Arc<dyn NoteEndpoint>,
}

/// Per-note outcome of [`TrashBin::empty`].
#[derive(Debug, Default)]
pub struct EmptyTrashReport {
    pub deleted: Vec<NoteId>,
    pub failed: Vec<(NoteId, StoreError)>,
}

impl EmptyTrashReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl TrashBin {
    pub fn new(endpoint: Arc<dyn NoteEndpoint>) -> Self {
        Self { endpoint }
    }

    pub async fn list(&self) -> StoreResult<Vec<Note>> {
        self.endpoint.list_notes(NoteFilter::trashed()).await
    }

    pub async fn move_to_trash(&self, id: NoteId) -> StoreResult<Note> {
        self.endpoint.trash_note(id).await
    }

    pub async fn restore(&self, id: NoteId) -> StoreResult<Note> {
        self.endpoint.restore_note(id).await
    }

    pub async fn delete_permanently(&self, id: NoteId) -> StoreResult<()> {
        self.endpoint.delete_note(id).await
    }

    /// Permanently deletes every note currently in the trash.
    ///
    /// Deletes run concurrently and independently: one failure leaves the
    /// others untouched and shows up in the report instead of an `Err`. Only
    /// failing to list the trash is an error.
    pub async fn empty(&self) -> StoreResult<EmptyTrashReport> {
        let trashed = self.list().await?;
        let results = join_all(trashed.iter().map(|note| async move {
            (note.id, self.endpoint.delete_note(note.id).await)
        }))
        .await;

        let mut report = EmptyTrashReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.deleted.push(id),
                Err(err) => {
                    warn!(note_id = %id, error = %err, "permanent delete failed");
                    report.failed.push((id, err));
                }
            }
        }
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "trash emptied"
        );
        Ok(report)
    }
}
