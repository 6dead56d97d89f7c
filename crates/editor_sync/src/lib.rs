mod editor;
mod reconciler;
mod scratch_pad;
mod status;
mod trash;

#[cfg(test)]
mod testing;

pub use editor::{EditorContent, EditorEvent, EditorListener};
pub use reconciler::{DEFAULT_QUIET_PERIOD, SaveError, SaveReconciler};
pub use scratch_pad::{DEFAULT_SCRATCH_PAD_QUIET_PERIOD, ScratchPadSaver};
pub use status::{Phase, SaveStatus};
pub use trash::{EmptyTrashReport, TrashBin};
