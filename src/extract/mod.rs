//! Static dependency extraction from source text.
//!
//! A lexical scan for `require("...")` call sites. String, template, comment,
//! and regex-literal contexts are skipped so quoted or commented-out
//! occurrences never count, and member (`.require`) forms are rejected.
//! Results keep first-occurrence order and are deduplicated.

use rustc_hash::FxHashSet;

/// Extract the declared dependency identifiers from `source`.
pub fn extract(source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut found = Vec::new();
    let mut seen = FxHashSet::default();

    // Last significant byte outside of skipped contexts; decides whether a
    // `/` opens a regex literal and whether an identifier is a member access.
    let mut prev: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' | b'\'' | b'`' => {
                i = skip_quoted(bytes, i);
                prev = Some(b);
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = skip_line_comment(bytes, i);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
            }
            b'/' if regex_can_follow(prev) => {
                i = skip_quoted(bytes, i);
                prev = Some(b'/');
            }
            _ if is_ident_start(b) => {
                let end = ident_end(bytes, i);
                let word = &source[i..end];
                if word == "require" && prev != Some(b'.') {
                    if let Some((id, after)) = call_argument(source, end) {
                        if seen.insert(id.to_string()) {
                            found.push(id.to_string());
                        }
                        prev = Some(b')');
                        i = after;
                        continue;
                    }
                }
                prev = Some(bytes[end - 1]);
                i = end;
            }
            _ => {
                if !b.is_ascii_whitespace() {
                    prev = Some(b);
                }
                i += 1;
            }
        }
    }

    found
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() && is_ident_continue(bytes[i]) {
        i += 1;
    }
    i
}

/// Skip a `"…"`, `'…'`, `` `…` `` or `/…/` span, honoring backslash escapes.
/// Returns the index just past the closing delimiter.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let delim = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == delim => return i + 1,
            b'\n' if delim == b'/' => return i,
            _ => i += 1,
        }
    }
    i
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// A `/` opens a regex literal when no value expression can precede it.
fn regex_can_follow(prev: Option<u8>) -> bool {
    match prev {
        None => true,
        Some(b) => matches!(
            b,
            b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b'}' | b';' | b'\n'
        ),
    }
}

/// Parse `("id")` or `('id')` immediately after a `require` identifier.
/// Returns the identifier and the index just past the closing parenthesis.
fn call_argument(source: &str, from: usize) -> Option<(&str, usize)> {
    let bytes = source.as_bytes();
    let mut i = skip_ws(bytes, from);
    if bytes.get(i) != Some(&b'(') {
        return None;
    }
    i = skip_ws(bytes, i + 1);
    let quote = *bytes.get(i)?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let start = i + 1;
    let end = source[start..].find(quote as char)? + start;
    let mut after = skip_ws(bytes, end + 1);
    if bytes.get(after) != Some(&b')') {
        return None;
    }
    after += 1;
    let id = &source[start..end];
    (!id.is_empty()).then_some((id, after))
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_call_sites() {
        let src = r#"
            var a = require("./a");
            var b = require('../lib/b');
        "#;
        assert_eq!(extract(src), vec!["./a", "../lib/b"]);
    }

    #[test]
    fn test_deduplicates_preserving_order() {
        let src = r#"require("b"); require("a"); require("b");"#;
        assert_eq!(extract(src), vec!["b", "a"]);
    }

    #[test]
    fn test_ignores_strings_and_comments() {
        let src = r#"
            // require("line-comment")
            /* require("block-comment") */
            var s = "require('in-string')";
            var t = 'require("also")';
            require("real");
        "#;
        assert_eq!(extract(src), vec!["real"]);
    }

    #[test]
    fn test_ignores_member_and_prefixed_forms() {
        let src = r#"
            obj.require("skip");
            $require("skip-too");
            my_require("nope");
            require("yes");
        "#;
        assert_eq!(extract(src), vec!["yes"]);
    }

    #[test]
    fn test_ignores_regex_literals() {
        let src = r#"
            var re = /require\("fake"\)/;
            var x = 1 / 2;
            require("ok");
        "#;
        assert_eq!(extract(src), vec!["ok"]);
    }

    #[test]
    fn test_requires_literal_argument() {
        let src = r#"
            require(name);
            require();
            require("good");
        "#;
        assert_eq!(extract(src), vec!["good"]);
    }

    #[test]
    fn test_tolerates_spacing() {
        let src = r#"require ( "spaced" ) ;"#;
        assert_eq!(extract(src), vec!["spaced"]);
    }

    #[test]
    fn test_empty_source() {
        assert!(extract("").is_empty());
        assert!(extract("var x = 1;").is_empty());
    }
}
