//! Slug rules shared by worktree naming and feature allocation.

/// Upper bound on a slug so derived folder names stay filesystem-safe.
pub const MAX_SLUG_LEN: usize = 64;

/// Most significant words kept from a feature description.
pub const MAX_FEATURE_WORDS: usize = 4;

/// Shortest word considered significant.
pub const MIN_WORD_LEN: usize = 3;

pub const STOP_WORDS: &[&str] = &[
    "i", "a", "an", "the", "to", "for", "of", "in", "on", "at", "by", "with", "from", "into",
    "and", "or", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "can", "may", "might", "must", "shall",
    "this", "that", "these", "those", "my", "your", "our", "their", "it", "its", "some", "want",
    "need", "add", "get", "set", "build", "create", "implement", "develop", "make", "new",
];

/// Lower-cases, collapses every non-alphanumeric run into one dash, trims
/// leading/trailing dashes and truncates to [`MAX_SLUG_LEN`].
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if out.len() > MAX_SLUG_LEN {
        out.truncate(MAX_SLUG_LEN);
    }
    out.trim_end_matches('-').to_string()
}

/// Words of `description` that survive stop-word and length filtering, in order.
pub fn significant_words(description: &str, extra_stop_words: &[String]) -> Vec<String> {
    description
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .filter(|word| word.len() >= MIN_WORD_LEN)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .filter(|word| !extra_stop_words.iter().any(|extra| extra.eq_ignore_ascii_case(word)))
        .collect()
}

/// Slug of the first significant words of a feature description, or `None`
/// when nothing significant remains.
pub fn feature_slug(description: &str, extra_stop_words: &[String]) -> Option<String> {
    let words = significant_words(description, extra_stop_words);
    if words.is_empty() {
        return None;
    }
    let joined = words
        .into_iter()
        .take(MAX_FEATURE_WORDS)
        .collect::<Vec<_>>()
        .join("-");
    Some(slugify(&joined))
}

/// Numeric feature prefix of `NNN-rest` names.
pub fn numeric_prefix(name: &str) -> Option<u32> {
    let digits = name.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 || !name[digits..].starts_with('-') {
        return None;
    }
    name[..digits].parse().ok()
}

pub fn format_feature_number(number: u32, width: usize) -> String {
    format!("{number:0width$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators_and_lowercases() {
        assert_eq!(slugify("feat/X"), "feat-x");
        assert_eq!(slugify("--Fix  Bug__123--"), "fix-bug-123");
        assert_eq!(slugify("fix/bug-123"), "fix-bug-123");
        assert_eq!(slugify("///"), "");
    }

    #[test]
    fn slugify_truncates_without_trailing_dash() {
        let long = format!("{}-{}", "a".repeat(MAX_SLUG_LEN - 1), "tail");
        let slug = slugify(&long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn distinct_branches_can_share_a_slug() {
        assert_eq!(slugify("feat/a-b"), slugify("feat-a/b"));
    }

    #[test]
    fn feature_slug_drops_stop_words_and_keeps_order() {
        assert_eq!(
            feature_slug("Build dashboard for analytics", &[]).as_deref(),
            Some("dashboard-analytics")
        );
        assert_eq!(
            feature_slug(
                "I want to add user authentication with oauth tokens and refresh rotation",
                &[]
            )
            .as_deref(),
            Some("user-authentication-oauth-tokens")
        );
    }

    #[test]
    fn feature_slug_honours_extra_stop_words() {
        let extra = vec!["Dashboard".to_string()];
        assert_eq!(
            feature_slug("Build dashboard for analytics", &extra).as_deref(),
            Some("analytics")
        );
    }

    #[test]
    fn feature_slug_is_none_without_significant_words() {
        assert_eq!(feature_slug("add a new thing to it", &["thing".to_string()]), None);
        assert_eq!(feature_slug("   ", &[]), None);
    }

    #[test]
    fn numeric_prefix_requires_digits_then_dash() {
        assert_eq!(numeric_prefix("012-search"), Some(12));
        assert_eq!(numeric_prefix("7-x"), Some(7));
        assert_eq!(numeric_prefix("v1-x"), None);
        assert_eq!(numeric_prefix("123"), None);
        assert_eq!(numeric_prefix("main"), None);
    }

    #[test]
    fn feature_numbers_pad_to_width() {
        assert_eq!(format_feature_number(2, 3), "002");
        assert_eq!(format_feature_number(1234, 3), "1234");
    }
}
