//! Field limits enforced before any write reaches storage.

use crate::StoreError;

pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_CONTENT_CHARS: usize = 500_000;
pub const MAX_NOTEBOOK_NAME_CHARS: usize = 200;
pub const MAX_TAG_NAME_CHARS: usize = 100;
pub const MAX_TASK_TITLE_CHARS: usize = 500;
pub const MAX_SCRATCH_PAD_CHARS: usize = 50_000;
pub const MAX_SEARCH_QUERY_CHARS: usize = 200;
pub const SEARCH_RESULT_LIMIT: u32 = 20;
pub const DEFAULT_NOTEBOOK_COLOR: &str = "#4CAF50";

pub fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), StoreError> {
    if value.chars().count() > max {
        return Err(StoreError::TooLong { field, max });
    }
    Ok(())
}

/// Trims `value` and rejects it when empty or longer than `max`.
pub fn required_name(field: &'static str, value: &str, max: usize) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::validation(field, "is required"));
    }
    check_len(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

/// `#RRGGBB`, case-insensitive.
pub fn is_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit())
}
