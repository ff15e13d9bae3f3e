// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wildcard templates for expected output.
//!
//! A template is literal text in which `*` stands for any sequence of characters (possibly
//! empty, possibly spanning lines). `\*` is a literal asterisk; every other character, including
//! other backslashes, is literal.
//!
//! Both the template and the actual text are [normalized](normalize) before comparison, so
//! trailing whitespace and trailing blank lines never cause a mismatch.

use crate::errors::NonMatching;
use regex::Regex;

/// A compiled output template.
#[derive(Clone, Debug)]
pub struct Template {
    pattern: String,
    regex: Regex,
}

impl Template {
    /// Compiles a template from its source text.
    pub fn new(pattern: &str) -> Self {
        let pattern = normalize(pattern);
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push_str("(?s)^");

        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'*') => {
                    chars.next();
                    literal.push('*');
                }
                '*' => {
                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(".*?");
                }
                c => literal.push(c),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');

        // Every literal fragment is escaped, so the only syntax is ours.
        let regex = Regex::new(&source).expect("escaped template is a valid regex");
        Self { pattern, regex }
    }

    /// Returns the normalized template text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if `actual` conforms to the template after normalization.
    pub fn is_match(&self, actual: &str) -> bool {
        self.regex.is_match(&normalize(actual))
    }

    /// Checks that `actual` conforms to the template.
    ///
    /// On mismatch, the error carries both normalized strings.
    pub fn assert_match(&self, actual: &str) -> Result<(), NonMatching> {
        let actual = normalize(actual);
        if self.regex.is_match(&actual) {
            Ok(())
        } else {
            Err(NonMatching::new(self.pattern.clone(), actual))
        }
    }
}

/// Normalizes text for comparison: trailing whitespace is trimmed from every line and trailing
/// blank lines are dropped.
pub fn normalize(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Escapes `text` so that, used as a template, it matches exactly itself.
///
/// Plain `*` needs no escape since a wildcard also matches a literal asterisk; only `\*` would
/// otherwise be read as an escape.
pub fn escape(text: &str) -> String {
    text.replace(r"\*", r"\\*")
}

/// Normalizes a whole file blob: like [`normalize`], and additionally trimmed at both ends.
pub fn normalize_blob(text: &str) -> String {
    normalize(text).trim().to_owned()
}

/// Compares file contents exactly, after [`normalize_blob`] on both sides. No wildcards apply.
pub fn assert_blob_eq(expected: &str, actual: &str) -> Result<(), NonMatching> {
    let expected = normalize_blob(expected);
    let actual = normalize_blob(actual);
    if expected == actual {
        Ok(())
    } else {
        Err(NonMatching::new(expected, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("Hello * !", "Hello World !" ; "wildcard in the middle")]
    #[test_case("done", "done\n" ; "trailing newline")]
    #[test_case("done  \n\n", "done" ; "trailing whitespace in template")]
    #[test_case("*", "" ; "wildcard matches empty")]
    #[test_case("a*b", "a\nline\nb" ; "wildcard spans lines")]
    #[test_case("cost: 5\\*", "cost: 5*" ; "escaped asterisk")]
    #[test_case("C:\\temp", "C:\\temp" ; "other backslashes are literal")]
    #[test_case("(x) [y] +.?", "(x) [y] +.?" ; "regex metacharacters are literal")]
    #[test_case("first   \nsecond", "first\nsecond   \n  \n" ; "per-line trimming")]
    fn matches(pattern: &str, actual: &str) {
        let template = Template::new(pattern);
        assert!(template.is_match(actual), "{pattern:?} should match {actual:?}");
        template.assert_match(actual).expect("assert_match agrees");
    }

    #[test_case("Hello * !", "Hello World" ; "missing suffix")]
    #[test_case("done", "not done" ; "anchored at start")]
    #[test_case("done", "done!" ; "anchored at end")]
    #[test_case("cost: 5\\*", "cost: 50" ; "escaped asterisk is not a wildcard")]
    #[test_case("  indented", "indented" ; "leading whitespace is significant")]
    fn does_not_match(pattern: &str, actual: &str) {
        let template = Template::new(pattern);
        assert!(!template.is_match(actual), "{pattern:?} should not match {actual:?}");
    }

    #[test]
    fn non_matching_carries_normalized_text() {
        let error = Template::new("Hello * !  \n")
            .assert_match("Hello World   \n\n")
            .expect_err("suffix is missing");
        assert_eq!(error.expected(), "Hello * !");
        assert_eq!(error.actual(), "Hello World");
    }

    #[test]
    fn multiline_template() {
        let template = Template::new(indoc! {"
            Traceback (most recent call last):
              *
            ValueError: bad value
        "});
        assert!(template.is_match(indoc! {r#"
            Traceback (most recent call last):
              File "examplepythoncode.py", line 3, in <module>
                raise ValueError("bad value")
            ValueError: bad value
        "#}));
    }

    #[test]
    fn blob_comparison_has_no_wildcards() {
        assert_blob_eq("\n  hello\nworld  \n\n", "hello\nworld").expect("trimmed equal");
        let error = assert_blob_eq("hello *", "hello world").expect_err("no wildcards");
        assert_eq!(error.expected(), "hello *");
        assert_eq!(error.actual(), "hello world");
    }

    fn literal_text() -> impl Strategy<Value = String> {
        // No asterisks, so the text is its own literal template.
        "[a-zA-Z0-9 \\t\\n.()\\[\\]+?\\\\]{0,40}"
    }

    proptest! {
        #[test]
        fn non_wildcard_matches_iff_normalized_equal(
            pattern in literal_text(),
            actual in literal_text(),
        ) {
            let matched = Template::new(&pattern).is_match(&actual);
            prop_assert_eq!(matched, normalize(&pattern) == normalize(&actual));
        }

        #[test]
        fn text_matches_itself(text in literal_text()) {
            prop_assert!(Template::new(&text).is_match(&text));
        }

        #[test]
        fn matching_is_idempotent(pattern in "[a-z* \\n]{0,20}", actual in "[a-z \\n]{0,20}") {
            let template = Template::new(&pattern);
            let first = template.is_match(&actual);
            prop_assert_eq!(first, template.is_match(&actual));
            prop_assert_eq!(first, Template::new(template.pattern()).is_match(&normalize(&actual)));
        }

        #[test]
        fn escaped_text_matches_itself(text in "[a-z*\\\\ \\n]{0,30}") {
            prop_assert!(Template::new(&escape(&text)).is_match(&text));
        }

        #[test]
        fn normalize_is_idempotent(text in "[a-z \\t\\n]{0,40}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once.clone());
        }
    }
}
