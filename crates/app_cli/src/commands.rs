use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use config::AppConfig;
use core_types::{
    Note, NoteEndpoint, NoteFilter, NoteId, NotePatch, NotebookDraft, NotebookId, NotebookPatch,
    ScratchPadEndpoint, TagId, TaskDraft, TaskPatch,
};
use editor_sync::{
    EditorContent, EditorEvent, SaveReconciler, SaveStatus, ScratchPadSaver, TrashBin,
};
use futures::Stream;
use serde::Serialize;
use storage_sqlite::{SqliteStorage, UserScope};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{Command, Invocation, USAGE};

const PREVIEW_CHARS: usize = 60;

pub async fn run(config: &AppConfig, data_dir: &Path, invocation: Invocation) -> Result<()> {
    if invocation.command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let db_path = config.storage.database_path(data_dir);
    let storage = SqliteStorage::connect_with_pool_size(&db_path, config.storage.max_connections)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let user = storage
        .ensure_user(
            &config.profile.email,
            config.profile.display_name.as_deref(),
        )
        .await
        .context("failed to register local profile")?;
    info!(user_id = %user.id, db = %db_path.display(), "session ready");

    let session = Session {
        scope: storage.scope(user.id),
        config,
        output: Output {
            json: invocation.json,
        },
    };
    session.execute(invocation.command).await
}

struct Session<'a> {
    scope: UserScope,
    config: &'a AppConfig,
    output: Output,
}

impl Session<'_> {
    async fn execute(&self, command: Command) -> Result<()> {
        let scope = &self.scope;
        let out = &self.output;
        match command {
            Command::Help => println!("{USAGE}"),
            Command::Notes {
                trashed,
                notebook_id,
                tag_id,
            } => {
                let filter = NoteFilter {
                    notebook_id,
                    tag_id,
                    trashed,
                };
                out.records(&scope.list_notes(filter).await?, note_line)?;
            }
            Command::Show(id) => {
                let note = scope.get_note(id).await?;
                out.record(&note, |note| {
                    format!("{}\n\n{}", note_line(note), note.plain_text)
                })?;
            }
            Command::Write {
                note_id,
                title,
                notebook_id,
                tag_ids,
            } => {
                let note = self.write(note_id, title, notebook_id, tag_ids).await?;
                out.record(&note, |note| format!("saved {}", note_line(note)))?;
            }
            Command::Search(query) => {
                out.records(&scope.search_notes(&query).await?, note_line)?;
            }
            Command::Pin { id, on } => {
                let note = scope.update_note(id, NotePatch::pinned(on)).await?;
                out.record(&note, note_line)?;
            }
            Command::Favorite { id, on } => {
                let note = scope.update_note(id, NotePatch::favorite(on)).await?;
                out.record(&note, note_line)?;
            }
            Command::Trash(id) => {
                let note = self.trash_bin().move_to_trash(id).await?;
                out.record(&note, |note| format!("trashed {}", note_line(note)))?;
            }
            Command::Restore(id) => {
                let note = self.trash_bin().restore(id).await?;
                out.record(&note, |note| format!("restored {}", note_line(note)))?;
            }
            Command::Purge(id) => {
                self.trash_bin().delete_permanently(id).await?;
                out.message(&format!("deleted {id}"), serde_json::json!({ "deleted": [id] }))?;
            }
            Command::EmptyTrash => {
                let report = self.trash_bin().empty().await?;
                let failed: Vec<_> = report
                    .failed
                    .iter()
                    .map(|(id, err)| serde_json::json!({ "id": id, "error": err.to_string() }))
                    .collect();
                let mut text = format!("deleted {} note(s)", report.deleted.len());
                for (id, err) in &report.failed {
                    text.push_str(&format!("\nfailed {id}: {err}"));
                }
                out.message(
                    &text,
                    serde_json::json!({ "deleted": report.deleted, "failed": failed }),
                )?;
            }
            Command::Notebooks => {
                out.records(&scope.list_notebooks().await?, |nb| {
                    let default = if nb.is_default { " (default)" } else { "" };
                    format!("{}  {} {}{}  [{}]", nb.id, nb.color, nb.name, default, nb.note_count)
                })?;
            }
            Command::NotebookAdd { name, color } => {
                let notebook = scope
                    .create_notebook(NotebookDraft { name, color })
                    .await?;
                out.record(&notebook, |nb| format!("created notebook {} {}", nb.id, nb.name))?;
            }
            Command::NotebookRename { id, name } => {
                let notebook = scope
                    .update_notebook(
                        id,
                        NotebookPatch {
                            name: Some(name),
                            ..NotebookPatch::default()
                        },
                    )
                    .await?;
                out.record(&notebook, |nb| format!("renamed notebook {} {}", nb.id, nb.name))?;
            }
            Command::NotebookRemove(id) => {
                scope.delete_notebook(id).await?;
                out.message(
                    &format!("deleted notebook {id}"),
                    serde_json::json!({ "deleted": [id] }),
                )?;
            }
            Command::Tags => {
                out.records(&scope.list_tags().await?, |tag| {
                    format!("{}  #{}  [{}]", tag.id, tag.name, tag.note_count)
                })?;
            }
            Command::TagAdd(name) => {
                let tag = scope.create_tag(&name).await?;
                out.record(&tag, |tag| format!("created tag {} #{}", tag.id, tag.name))?;
            }
            Command::TagRemove(id) => {
                scope.delete_tag(id).await?;
                out.message(
                    &format!("deleted tag {id}"),
                    serde_json::json!({ "deleted": [id] }),
                )?;
            }
            Command::Tasks => {
                out.records(&scope.list_tasks().await?, |task| {
                    let check = if task.is_completed { "x" } else { " " };
                    let due = task
                        .due_date
                        .map(|due| format!("  due {}", due.format("%Y-%m-%d")))
                        .unwrap_or_default();
                    format!("{}  [{check}] {}{due}", task.id, task.title)
                })?;
            }
            Command::TaskAdd {
                title,
                note_id,
                due_date,
            } => {
                let task = scope
                    .create_task(TaskDraft {
                        title,
                        note_id,
                        due_date,
                    })
                    .await?;
                out.record(&task, |task| format!("created task {} {}", task.id, task.title))?;
            }
            Command::TaskDone { id, done } => {
                let task = scope.update_task(id, TaskPatch::completed(done)).await?;
                out.record(&task, |task| {
                    let state = if task.is_completed { "done" } else { "open" };
                    format!("{state} {} {}", task.id, task.title)
                })?;
            }
            Command::TaskRemove(id) => {
                scope.delete_task(id).await?;
                out.message(
                    &format!("deleted task {id}"),
                    serde_json::json!({ "deleted": [id] }),
                )?;
            }
            Command::Scratch => {
                let pad = scope.load_scratch_pad().await?;
                out.record(&pad, |pad| pad.content.clone())?;
            }
            Command::ScratchWrite => {
                let saver = ScratchPadSaver::load(Arc::new(scope.clone()))
                    .await?
                    .with_quiet_period(self.config.editor.scratch_pad_quiet_period());
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                let mut body = Vec::new();
                while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
                    body.push(line);
                    saver.on_change(body.join("\n"));
                }
                saver.flush().await?;
                let pad = scope.load_scratch_pad().await?;
                out.record(&pad, |pad| {
                    format!("scratch pad saved ({} chars)", pad.content.chars().count())
                })?;
            }
        }
        Ok(())
    }

    fn trash_bin(&self) -> TrashBin {
        TrashBin::new(Arc::new(self.scope.clone()))
    }

    /// Streams stdin through an autosaving editor session, one line per
    /// document change.
    async fn write(
        &self,
        note_id: Option<NoteId>,
        title: Option<String>,
        notebook_id: Option<NotebookId>,
        tag_ids: Vec<TagId>,
    ) -> Result<Note> {
        let endpoint: Arc<dyn NoteEndpoint> = Arc::new(self.scope.clone());
        let reconciler = match note_id {
            Some(id) => {
                let note = self.scope.get_note(id).await?;
                SaveReconciler::open_existing(Arc::clone(&endpoint), &note)
            }
            None => SaveReconciler::open_new(Arc::clone(&endpoint)),
        }
        .with_quiet_period(self.config.editor.autosave_quiet_period());

        if let Some(title) = title {
            reconciler.on_title_blur(title);
        }
        if notebook_id.is_some() {
            reconciler.on_notebook_select(notebook_id);
        }
        if !tag_ids.is_empty() {
            reconciler.on_tags_change(tag_ids);
        }

        let reporter = tokio::spawn(report_status(reconciler.subscribe()));
        reconciler.drive(stdin_events()).await;
        let id = reconciler.flush().await?;
        drop(reconciler);
        if let Err(err) = reporter.await {
            warn!(error = %err, "status reporter stopped");
        }

        Ok(endpoint.get_note(id).await?)
    }
}

/// Each line read so far, as the document an editor would hold.
fn stdin_events() -> impl Stream<Item = EditorEvent> {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    futures::stream::unfold((lines, Vec::new()), |(mut lines, mut body)| async move {
        match lines.next_line().await {
            Ok(Some(line)) => {
                body.push(line);
                let event = EditorEvent::ContentChanged(render_document(&body));
                Some((event, (lines, body)))
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "failed to read stdin");
                None
            }
        }
    })
}

fn render_document(lines: &[String]) -> EditorContent {
    let html = lines
        .iter()
        .map(|line| format!("<p>{}</p>", escape_html(line)))
        .collect::<String>();
    EditorContent::new(html, lines.join("\n"))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Mirrors the editor's save indicator on stderr until the session ends.
async fn report_status(mut status: watch::Receiver<SaveStatus>) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        match &current {
            SaveStatus::Failed(message) => eprintln!("[{}] {message}", current.label()),
            _ => eprintln!("[{}]", current.label()),
        }
    }
}

fn note_line(note: &Note) -> String {
    let mut flags = String::new();
    if note.is_pinned {
        flags.push_str("[P]");
    }
    if note.is_favorite {
        flags.push_str("[F]");
    }
    if !flags.is_empty() {
        flags.push(' ');
    }
    format!(
        "{}  {flags}{}  {}",
        note.id,
        note.title,
        note.preview(PREVIEW_CHARS).replace('\n', " ")
    )
}

struct Output {
    json: bool,
}

impl Output {
    fn records<T: Serialize>(&self, records: &[T], line: impl Fn(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(records)?);
        } else if records.is_empty() {
            println!("(none)");
        } else {
            for record in records {
                println!("{}", line(record));
            }
        }
        Ok(())
    }

    fn record<T: Serialize>(&self, record: &T, line: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(record)?);
        } else {
            println!("{}", line(record));
        }
        Ok(())
    }

    fn message(&self, text: &str, json: serde_json::Value) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&json)?);
        } else {
            println!("{text}");
        }
        Ok(())
    }
}
