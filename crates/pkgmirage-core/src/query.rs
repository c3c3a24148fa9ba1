//! Query normalization and candidate-name cleaning.
//!
//! - [`normalize_query`] produces the query-tier cache key.
//! - [`clean_candidate`] turns one line of model output into a candidate name.
//! - [`canonical_name`] is the lookup form used by the existence index.
//! - [`is_valid_package_name`] gates names that end up in file paths.

use std::sync::OnceLock;

use regex::Regex;

/// Lowercase and trim. Idempotent.
pub fn normalize_query(query: &str) -> String {
    query.to_lowercase().trim().to_string()
}

/// Lowercase with underscores folded to hyphens.
pub fn canonical_name(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

fn package_name_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"))
}

/// Letters, digits, `.`, `_` and `-`, starting with a letter or digit, and
/// no `..` anywhere. Anything else is refused before a path is built from it.
///
/// ```
/// use pkgmirage_core::query::is_valid_package_name;
/// assert!(is_valid_package_name("zope.interface"));
/// assert!(!is_valid_package_name("../../etc"));
/// ```
pub fn is_valid_package_name(name: &str) -> bool {
    package_name_shape().is_match(name) && !name.contains("..")
}

fn list_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[*\-–—\s\d.]+\s*").expect("static regex"))
}

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w.\-]+").expect("static regex"))
}

/// Clean one line of a plain-text name list.
///
/// Strips bullets and numbering, then every character that is not a word
/// character, hyphen, or dot. Returns `None` for results shorter than two
/// characters.
///
/// ```
/// use pkgmirage_core::query::clean_candidate;
/// assert_eq!(clean_candidate("1. `prompt-toolkit`").as_deref(), Some("prompt-toolkit"));
/// assert_eq!(clean_candidate("- x"), None);
/// ```
pub fn clean_candidate(line: &str) -> Option<String> {
    let stripped = list_marker().replace(line.trim(), "");
    let cleaned = disallowed_chars().replace_all(&stripped, "");
    if cleaned.chars().count() > 1 {
        Some(cleaned.into_owned())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(
            normalize_query("  Terminal Text Editors \n"),
            "terminal text editors"
        );
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            lead in "[ \t\n]{0,3}",
            body in "\\PC{0,40}",
            trail in "[ \t\n]{0,3}",
        ) {
            let q = format!("{lead}{body}{trail}");
            let once = normalize_query(&q);
            prop_assert_eq!(normalize_query(&once), once.clone());
            prop_assert_eq!(once.trim(), once.as_str());
        }

        #[test]
        fn canonical_names_of_valid_names_stay_valid(name in "[A-Za-z0-9][A-Za-z0-9_-]{0,20}") {
            prop_assert!(is_valid_package_name(&canonical_name(&name)));
        }
    }

    #[test]
    fn normalize_keeps_inner_whitespace() {
        assert_eq!(normalize_query("a  b"), "a  b");
    }

    #[test]
    fn canonical_folds_underscores() {
        assert_eq!(canonical_name("Prompt_Toolkit"), "prompt-toolkit");
        assert_eq!(canonical_name("zope.interface"), "zope.interface");
    }

    #[test]
    fn package_names_that_escape_a_directory_are_invalid() {
        for ok in ["rich", "Prompt_Toolkit", "zope.interface", "py3-x", "0x"] {
            assert!(is_valid_package_name(ok), "{:?} should be valid", ok);
        }
        for bad in [
            "", "../../escaped", "..", "a..b", "a/b", "a\\b", "/abs", ".hidden", "-flag",
            "name with space", "nul\0",
        ] {
            assert!(!is_valid_package_name(bad), "{:?} should be invalid", bad);
        }
    }

    #[test]
    fn clean_strips_markers_and_numbering() {
        assert_eq!(clean_candidate("- requests").as_deref(), Some("requests"));
        assert_eq!(clean_candidate("* httpx").as_deref(), Some("httpx"));
        assert_eq!(clean_candidate("12. textual").as_deref(), Some("textual"));
        assert_eq!(clean_candidate("— rich").as_deref(), Some("rich"));
        assert_eq!(clean_candidate("  3) urwid").as_deref(), Some("urwid"));
    }

    #[test]
    fn clean_strips_punctuation_but_keeps_dots_and_hyphens() {
        assert_eq!(
            clean_candidate("**zope.interface**,").as_deref(),
            Some("zope.interface")
        );
        assert_eq!(
            clean_candidate("prompt-toolkit: REPL library").as_deref(),
            Some("prompt-toolkitREPLlibrary")
        );
        assert_eq!(clean_candidate("\"pydantic_core\"").as_deref(), Some("pydantic_core"));
    }

    #[test]
    fn clean_rejects_empty_and_single_char() {
        assert_eq!(clean_candidate(""), None);
        assert_eq!(clean_candidate("   "), None);
        assert_eq!(clean_candidate("- "), None);
        assert_eq!(clean_candidate("1. x"), None);
        assert_eq!(clean_candidate("!!!"), None);
    }
}
