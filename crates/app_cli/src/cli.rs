use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{NoteId, NotebookId, TagId, TaskId};
use uuid::Uuid;

pub const USAGE: &str = "\
usage: notekeep [--json] <command> [args]

notes:
  notes [--trashed] [--notebook ID] [--tag ID]
  show ID
  write [--title T] [--notebook ID] [--tag ID]...   new note, body read from stdin
  edit ID [--title T] [--notebook ID] [--tag ID]... replace body from stdin
  search QUERY
  pin ID | unpin ID | favorite ID | unfavorite ID
  trash ID | restore ID | purge ID | empty-trash

organizing:
  notebooks | notebook-add NAME [--color #RRGGBB] | notebook-rename ID NAME | notebook-rm ID
  tags | tag-add NAME | tag-rm ID

tasks:
  tasks | task-add TITLE [--note ID] [--due YYYY-MM-DD] | task-done ID | task-undo ID | task-rm ID

scratch pad:
  scratch | scratch-write   (body read from stdin)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub json: bool,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Notes {
        trashed: bool,
        notebook_id: Option<NotebookId>,
        tag_id: Option<TagId>,
    },
    Show(NoteId),
    Write {
        note_id: Option<NoteId>,
        title: Option<String>,
        notebook_id: Option<NotebookId>,
        tag_ids: Vec<TagId>,
    },
    Search(String),
    Pin { id: NoteId, on: bool },
    Favorite { id: NoteId, on: bool },
    Trash(NoteId),
    Restore(NoteId),
    Purge(NoteId),
    EmptyTrash,
    Notebooks,
    NotebookAdd { name: String, color: Option<String> },
    NotebookRename { id: NotebookId, name: String },
    NotebookRemove(NotebookId),
    Tags,
    TagAdd(String),
    TagRemove(TagId),
    Tasks,
    TaskAdd {
        title: String,
        note_id: Option<NoteId>,
        due_date: Option<DateTime<Utc>>,
    },
    TaskDone { id: TaskId, done: bool },
    TaskRemove(TaskId),
    Scratch,
    ScratchWrite,
}

impl Invocation {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.to_vec();
        let json = take_flag(&mut args, "--json");
        if args.is_empty() {
            return Ok(Self {
                json,
                command: Command::Help,
            });
        }

        let name = args.remove(0);
        let command = match name.as_str() {
            "help" | "-h" | "--help" => Command::Help,
            "notes" => {
                let trashed = take_flag(&mut args, "--trashed");
                let notebook_id = take_id_option(&mut args, "--notebook")?;
                let tag_id = take_id_option(&mut args, "--tag")?;
                no_more(&args)?;
                Command::Notes {
                    trashed,
                    notebook_id,
                    tag_id,
                }
            }
            "show" => Command::Show(one_id(args, "note id")?),
            "write" | "edit" => {
                let title = take_option(&mut args, "--title")?;
                let notebook_id = take_id_option(&mut args, "--notebook")?;
                let mut tag_ids = Vec::new();
                while let Some(tag_id) = take_id_option(&mut args, "--tag")? {
                    tag_ids.push(tag_id);
                }
                let note_id = if name == "edit" {
                    Some(one_id(args, "note id")?)
                } else {
                    no_more(&args)?;
                    None
                };
                Command::Write {
                    note_id,
                    title,
                    notebook_id,
                    tag_ids,
                }
            }
            "search" => Command::Search(joined(args, "search query")?),
            "pin" | "unpin" => Command::Pin {
                id: one_id(args, "note id")?,
                on: name == "pin",
            },
            "favorite" | "unfavorite" => Command::Favorite {
                id: one_id(args, "note id")?,
                on: name == "favorite",
            },
            "trash" => Command::Trash(one_id(args, "note id")?),
            "restore" => Command::Restore(one_id(args, "note id")?),
            "purge" => Command::Purge(one_id(args, "note id")?),
            "empty-trash" => {
                no_more(&args)?;
                Command::EmptyTrash
            }
            "notebooks" => {
                no_more(&args)?;
                Command::Notebooks
            }
            "notebook-add" => {
                let color = take_option(&mut args, "--color")?;
                Command::NotebookAdd {
                    name: joined(args, "notebook name")?,
                    color,
                }
            }
            "notebook-rename" => {
                if args.is_empty() {
                    bail!("expected a notebook id");
                }
                let id = parse_id(&args.remove(0))?;
                Command::NotebookRename {
                    id,
                    name: joined(args, "notebook name")?,
                }
            }
            "notebook-rm" => Command::NotebookRemove(one_id(args, "notebook id")?),
            "tags" => {
                no_more(&args)?;
                Command::Tags
            }
            "tag-add" => Command::TagAdd(joined(args, "tag name")?),
            "tag-rm" => Command::TagRemove(one_id(args, "tag id")?),
            "tasks" => {
                no_more(&args)?;
                Command::Tasks
            }
            "task-add" => {
                let note_id = take_id_option(&mut args, "--note")?;
                let due_date = take_option(&mut args, "--due")?
                    .map(|raw| parse_due_date(&raw))
                    .transpose()?;
                Command::TaskAdd {
                    title: joined(args, "task title")?,
                    note_id,
                    due_date,
                }
            }
            "task-done" | "task-undo" => Command::TaskDone {
                id: one_id(args, "task id")?,
                done: name == "task-done",
            },
            "task-rm" => Command::TaskRemove(one_id(args, "task id")?),
            "scratch" => {
                no_more(&args)?;
                Command::Scratch
            }
            "scratch-write" => {
                no_more(&args)?;
                Command::ScratchWrite
            }
            other => bail!("unknown command `{other}`"),
        };

        Ok(Self { json, command })
    }
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|arg| arg != flag);
    args.len() != before
}

fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|arg| arg == name) else {
        return Ok(None);
    };
    args.remove(pos);
    if pos >= args.len() {
        bail!("{name} needs a value");
    }
    Ok(Some(args.remove(pos)))
}

fn take_id_option(args: &mut Vec<String>, name: &str) -> Result<Option<Uuid>> {
    take_option(args, name)?
        .map(|raw| parse_id(&raw))
        .transpose()
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("`{raw}` is not a valid id"))
}

fn parse_due_date(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("`{raw}` is not a YYYY-MM-DD date"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("`{raw}` has no midnight"))?;
    Ok(midnight.and_utc())
}

fn one_id(args: Vec<String>, what: &str) -> Result<Uuid> {
    match <[String; 1]>::try_from(args) {
        Ok([raw]) => parse_id(&raw),
        Err(_) => bail!("expected exactly one {what}"),
    }
}

fn joined(args: Vec<String>, what: &str) -> Result<String> {
    if let Some(flag) = args.iter().find(|arg| arg.starts_with("--")) {
        bail!("unexpected option `{flag}`");
    }
    let text = args.join(" ");
    if text.trim().is_empty() {
        bail!("expected a {what}");
    }
    Ok(text)
}

fn no_more(args: &[String]) -> Result<()> {
    match args.first() {
        Some(extra) => bail!("unexpected argument `{extra}`"),
        None => Ok(()),
    }
}
