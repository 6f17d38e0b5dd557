use std::path::PathBuf;

/// Trims `raw`, treating an empty result as unset.
pub fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_path(raw: &str) -> Option<PathBuf> {
    non_empty(raw).map(PathBuf::from)
}
