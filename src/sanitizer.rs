//! String escaping and character-class checks for script input.

/// Replacement table applied by [`escape`], longest pattern first.
///
/// Each entry maps a literal pattern to its escaped form. Patterns are
/// matched left to right over the input in a single pass, so replacement
/// output is never rescanned.
const ESCAPES: &[(&str, &str)] = &[
    ("\\0", "\\\\0"),
    (";", "\\x1a"),
    ("\\", "\\\\"),
    ("'", "\\'"),
    ("\n", "\\n"),
    ("\r", "\\r"),
    ("\"", "\\\""),
    ("\u{1a}", "\\Z"),
];

/// Escapes characters that are meaningful to a downstream text store.
///
/// This is a best-effort neutralizer for values that end up inside quoted
/// storage literals, not a parser-level defense. Semicolons become the
/// literal text `\x1a`; quotes, backslashes, line breaks and the SUB control
/// character are backslash-escaped.
///
/// # Examples
///
/// ```
/// use script_bridge::escape;
///
/// assert_eq!(escape("it's"), "it\\'s");
/// assert_eq!(escape("a;b"), "a\\x1ab");
/// assert_eq!(escape("plain"), "plain");
/// ```
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    'outer: while !rest.is_empty() {
        for (pattern, replacement) in ESCAPES {
            if let Some(tail) = rest.strip_prefix(pattern) {
                out.push_str(replacement);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// True when every character is an ASCII letter or a space, and there is
/// at least one.
pub fn letters_and_spaces(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic() || c == ' ')
}

/// Like [`letters_and_spaces`] but also allowing `-`.
pub fn letters_hyphens_and_spaces(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == ' ' || c == '-')
}
