//! Input checks shared by the handlers. Everything here runs before any write.

use crate::error::ApiError;

pub const MAX_MESSAGE_CHARS: usize = 4000;
pub const MAX_DISPLAY_NAME_CHARS: usize = 50;

/// A present, non-blank field.
pub fn required<T>(value: Option<T>, field: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::invalid(format!("missing field: {field}")))
}

/// A present, non-blank string, trimmed.
pub fn required_text(value: Option<String>, field: &str) -> Result<String, ApiError> {
    let value = required(value, field)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::invalid(format!("missing field: {field}")));
    }
    Ok(trimmed.to_string())
}

/// Language tags are short lowercase codes like `en` or `pt-br`.
pub fn language(value: &str) -> Result<String, ApiError> {
    let tag = value.trim().to_ascii_lowercase();
    let valid = (2..=10).contains(&tag.len())
        && tag.chars().all(|c| c.is_ascii_lowercase() || c == '-')
        && !tag.starts_with('-');
    if !valid {
        return Err(ApiError::invalid(format!("invalid language: {value}")));
    }
    Ok(tag)
}

pub fn display_name(value: Option<String>, field: &str) -> Result<String, ApiError> {
    let name = required_text(value, field)?;
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ApiError::invalid(format!(
            "{field} must be at most {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }
    Ok(name)
}

/// Message body: non-blank text or an attachment, never both missing.
pub fn message_text(text: Option<String>, has_attachment: bool) -> Result<String, ApiError> {
    let text = text.unwrap_or_default();
    if text.trim().is_empty() && !has_attachment {
        return Err(ApiError::invalid("message text or attachment required"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::invalid(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(text)
}

/// Absolute http(s) base for generated links, without a trailing slash.
pub fn base_url(value: Option<String>, fallback: &str) -> Result<String, ApiError> {
    let raw = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string());
    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        return Err(ApiError::invalid("baseUrl must be an http(s) URL"));
    }
    Ok(raw.trim_end_matches('/').to_string())
}
