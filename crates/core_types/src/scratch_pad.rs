use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_SCRATCH_PAD_CHARS, check_len};
use crate::{StoreResult, UserId};

/// One free-form text area per user. A user who never wrote to it reads an
/// empty pad with no timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScratchPad {
    pub owner_id: UserId,
    pub content: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScratchPad {
    pub fn empty(owner_id: UserId) -> Self {
        Self {
            owner_id,
            content: String::new(),
            updated_at: None,
        }
    }

    pub fn validate_content(content: &str) -> StoreResult<()> {
        check_len("content", content, MAX_SCRATCH_PAD_CHARS)
    }
}
