use std::fmt;

use thiserror::Error;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    User,
    Note,
    Notebook,
    Tag,
    Task,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::User => "user",
            Entity::Note => "note",
            Entity::Notebook => "notebook",
            Entity::Tag => "tag",
            Entity::Task => "task",
        };
        f.write_str(name)
    }
}

/// Failure taxonomy shared by the store and everything that talks to it.
///
/// Only [`StoreError::Backend`] is worth retrying without user action; the
/// other variants describe a request that will fail the same way again.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{entity} `{id}` not found")]
    NotFound { entity: Entity, id: Uuid },

    #[error("{entity} `{id}` does not belong to the caller")]
    Forbidden { entity: Entity, id: Uuid },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: Entity, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn forbidden(entity: Entity, id: Uuid) -> Self {
        Self::Forbidden { entity, id }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
