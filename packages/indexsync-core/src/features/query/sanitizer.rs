//! Escaping of untrusted strings for the index query syntax
//!
//! Every character in [`SPECIAL_CHARS`] is prefixed with a backslash; all
//! other characters (whitespace included) pass through untouched. The
//! inverse, [`parse_literal_term`], reads an escaped term back the way the
//! query parser does, so `parse_literal_term(&escape(s)) == Ok(s)` for all
//! `s`.

use thiserror::Error;

/// Characters with syntactic meaning in the index query language.
pub const SPECIAL_CHARS: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
    '/',
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("Identifier must not be blank")]
    BlankId,

    #[error("Dangling escape at end of term")]
    DanglingEscape,

    #[error("Unescaped special character '{ch}' at offset {offset}")]
    UnescapedSpecial { ch: char, offset: usize },
}

#[inline]
fn is_special(ch: char) -> bool {
    SPECIAL_CHARS.contains(&ch)
}

/// Backslash-escape every special character of `input`.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    for ch in input.chars() {
        if is_special(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escape `input` and wrap it in double quotes (phrase literal).
pub fn escape_and_quote(input: &str) -> String {
    let escaped = escape(input);
    let mut out = String::with_capacity(escaped.len() + 2);
    out.push('"');
    out.push_str(&escaped);
    out.push('"');
    out
}

/// Validate and escape an object or repository identifier.
///
/// Blank identifiers (empty or whitespace only) are rejected; callers
/// holding an `Option` map `None` to the same error via
/// [`sanitize_optional_id`]. Surrounding whitespace is trimmed before
/// escaping.
pub fn sanitize_id(id: &str) -> Result<String, SanitizeError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(SanitizeError::BlankId);
    }
    Ok(escape(trimmed))
}

pub fn sanitize_optional_id(id: Option<&str>) -> Result<String, SanitizeError> {
    id.ok_or(SanitizeError::BlankId).and_then(sanitize_id)
}

pub fn contains_special_chars(input: &str) -> bool {
    input.chars().any(is_special)
}

/// Read an escaped term as the query parser would interpret it literally.
///
/// A backslash makes the following character literal. An unescaped special
/// character is a syntax error for a literal term.
pub fn parse_literal_term(term: &str) -> Result<String, SanitizeError> {
    let mut out = String::with_capacity(term.len());
    let mut chars = term.char_indices();
    while let Some((offset, ch)) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => return Err(SanitizeError::DanglingEscape),
            }
        } else if is_special(ch) {
            return Err(SanitizeError::UnescapedSpecial { ch, offset });
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(escape("a+b"), "a\\+b");
        assert_eq!(escape("path/to:file"), "path\\/to\\:file");
        assert_eq!(escape("\\"), "\\\\");
        assert_eq!(escape("(x && y) || !z"), "\\(x \\&\\& y\\) \\|\\| \\!z");
    }

    #[test]
    fn test_escape_every_listed_char() {
        for ch in SPECIAL_CHARS {
            let escaped = escape(&ch.to_string());
            assert_eq!(escaped, format!("\\{}", ch));
        }
    }

    #[test]
    fn test_escape_leaves_plain_text() {
        assert_eq!(escape("hello world 123 éü"), "hello world 123 éü");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn test_escape_and_quote() {
        assert_eq!(escape_and_quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(escape_and_quote(""), "\"\"");
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("  doc-1 ").unwrap(), "doc\\-1");
        assert_eq!(sanitize_id(""), Err(SanitizeError::BlankId));
        assert_eq!(sanitize_id(" \t\n"), Err(SanitizeError::BlankId));
        assert_eq!(sanitize_optional_id(None), Err(SanitizeError::BlankId));
        assert_eq!(sanitize_optional_id(Some("abc")).unwrap(), "abc");
    }

    #[test]
    fn test_contains_special_chars() {
        assert!(contains_special_chars("a:b"));
        assert!(contains_special_chars("/"));
        assert!(!contains_special_chars("abc def"));
        assert!(!contains_special_chars(""));
    }

    #[test]
    fn test_parse_literal_term_errors() {
        assert_eq!(parse_literal_term("abc\\"), Err(SanitizeError::DanglingEscape));
        assert_eq!(
            parse_literal_term("a:b"),
            Err(SanitizeError::UnescapedSpecial { ch: ':', offset: 1 })
        );
    }

    proptest! {
        #[test]
        fn prop_escape_round_trip(s in any::<String>()) {
            prop_assert_eq!(parse_literal_term(&escape(&s)).unwrap(), s);
        }

        #[test]
        fn prop_escaped_term_has_no_bare_specials(s in "[a-z+\\-&|!(){}\\[\\]^\"~*?:\\\\/ ]{0,32}") {
            let escaped = escape(&s);
            prop_assert!(parse_literal_term(&escaped).is_ok());
            prop_assert_eq!(contains_special_chars(&s), escaped.len() > s.len());
        }
    }
}
