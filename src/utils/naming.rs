//! Name cleaning helpers
//!
//! Anchor names and live titles end up in folder and file names, so they are
//! stripped of path separators, shell-hostile punctuation and emoji.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum number of characters of a live title kept in paths
pub const MAX_TITLE_CHARS: usize = 30;

fn forbidden_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[/\\:*？?"<>|&#.。,， ~！·]"#).unwrap())
}

fn emoji() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            "[\u{1F1E0}-\u{1F1FF}\u{1F300}-\u{1F5FF}\u{1F600}-\u{1F64F}\u{1F680}-\u{1F6FF}\
             \u{1F700}-\u{1F77F}\u{1F780}-\u{1F7FF}\u{1F800}-\u{1F8FF}\u{1F900}-\u{1F9FF}\
             \u{1FA00}-\u{1FA6F}\u{1FA70}-\u{1FAFF}\u{2702}-\u{27B0}]+",
        )
        .unwrap()
    })
}

/// Remove emoji, replacing each run with `replacement`
pub fn remove_emojis(text: &str, replacement: &str) -> String {
    emoji().replace_all(text, replacement).into_owned()
}

/// Make a name safe for use as a path component.
///
/// Returns `default` when nothing usable is left.
pub fn clean_name(input: &str, default: Option<&str>) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return default.map(str::to_string);
    }

    let normalized = trimmed.replace('（', "(").replace('）', ")");
    let replaced = forbidden_chars().replace_all(&normalized, "_");
    let mut cleaned = remove_emojis(&replaced, "_");
    while cleaned.contains("__") {
        cleaned = cleaned.replace("__", "_");
    }
    let cleaned = cleaned.trim_matches('_');

    if cleaned.is_empty() {
        default.map(str::to_string)
    } else {
        Some(cleaned.to_string())
    }
}

/// Shorten a live title for folder and file names
pub fn truncate_title(title: &str) -> Option<String> {
    if title.is_empty() {
        return None;
    }
    let shortened: String = title.chars().take(MAX_TITLE_CHARS).collect();
    Some(shortened.replace('，', ",").replace(' ', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_name_replaces_separators() {
        assert_eq!(clean_name("a/b\\c:d", None).as_deref(), Some("a_b_c_d"));
    }

    #[test]
    fn test_clean_name_collapses_and_trims_underscores() {
        assert_eq!(clean_name("  ..hello  world.. ", None).as_deref(), Some("hello_world"));
    }

    #[test]
    fn test_clean_name_falls_back_to_default() {
        assert_eq!(clean_name("   ", Some("room")).as_deref(), Some("room"));
        assert_eq!(clean_name("???", Some("room")).as_deref(), Some("room"));
        assert_eq!(clean_name("", None), None);
    }

    #[test]
    fn test_clean_name_strips_emoji() {
        assert_eq!(clean_name("star\u{1F600}name", None).as_deref(), Some("star_name"));
    }

    #[test]
    fn test_truncate_title() {
        let long = "a".repeat(40);
        assert_eq!(truncate_title(&long).map(|t| t.len()), Some(30));
        assert_eq!(truncate_title("late night show").as_deref(), Some("latenightshow"));
        assert_eq!(truncate_title(""), None);
    }
}
