//! Field checks applied by the server before anything reaches the store.
//! Limits are byte lengths of the UTF-8 encoding.

use crate::constants::{
    MAX_BAN_REASON_BYTES, MAX_CONTENT_BYTES, MAX_DESCRIPTION_BYTES, MAX_ICON_BYTES,
    MAX_NAME_BYTES,
};
use crate::error::ValidationError;

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

fn check_not_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

fn check_single_line(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters { field });
    }
    Ok(())
}

/// User, network and frequency names: one non-blank line.
pub fn name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    check_not_blank(field, value)?;
    check_len(field, value, MAX_NAME_BYTES)?;
    check_single_line(field, value)
}

/// Profile description. May be empty and may span lines.
pub fn description(value: &str) -> Result<(), ValidationError> {
    check_len("description", value, MAX_DESCRIPTION_BYTES)?;
    if value.chars().any(|c| c.is_control() && c != '\n') {
        return Err(ValidationError::ControlCharacters {
            field: "description",
        });
    }
    Ok(())
}

pub fn icon(value: &str) -> Result<(), ValidationError> {
    check_len("icon", value, MAX_ICON_BYTES)?;
    check_single_line("icon", value)
}

/// `#RRGGBB`, either case.
pub fn hex_color(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let valid = value.len() == 7
        && value.starts_with('#')
        && value[1..].bytes().all(|b| b.is_ascii_hexdigit());
    if !valid {
        return Err(ValidationError::BadColor { field });
    }
    Ok(())
}

/// Message body. Newlines and tabs are allowed, other control
/// characters are not.
pub fn content(value: &str) -> Result<(), ValidationError> {
    check_not_blank("content", value)?;
    check_len("content", value, MAX_CONTENT_BYTES)?;
    if value
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t')
    {
        return Err(ValidationError::ControlCharacters { field: "content" });
    }
    Ok(())
}

pub fn ban_reason(value: &str) -> Result<(), ValidationError> {
    check_not_blank("ban_reason", value)?;
    check_len("ban_reason", value, MAX_BAN_REASON_BYTES)?;
    check_single_line("ban_reason", value)
}
