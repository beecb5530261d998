//! Wildcard patterns
//!
//! `*` matches any run of characters, `?` exactly one character, and a
//! backslash makes the next character literal. Matching ignores ASCII case,
//! which is exactly what SQLite's `LIKE` does, so `matches` and the `LIKE`
//! translation agree on every input.

use std::fmt;

/// Escape character used in generated `LIKE ... ESCAPE` clauses
pub const LIKE_ESCAPE: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyRun,
    AnyOne,
}

/// Compiled wildcard pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
    source: String,
    tokens: Vec<Token>,
}

impl Wildcard {
    pub fn new(pattern: &str) -> Self {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            let token = match c {
                '\\' => Token::Literal(chars.next().unwrap_or('\\')),
                '*' => Token::AnyRun,
                '?' => Token::AnyOne,
                c => Token::Literal(c),
            };
            // Consecutive runs collapse
            if token == Token::AnyRun && tokens.last() == Some(&Token::AnyRun) {
                continue;
            }
            tokens.push(token);
        }
        Self {
            source: pattern.to_string(),
            tokens,
        }
    }

    /// Escape a literal string so it matches only itself
    pub fn escape(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(c, '*' | '?' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if the pattern contains `*` or `?`
    pub fn has_wildcards(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::AnyRun | Token::AnyOne))
    }

    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let tokens = &self.tokens;
        let (mut p, mut t) = (0usize, 0usize);
        // Last `*` seen: (token index, text index it currently absorbs up to)
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            match tokens.get(p) {
                Some(Token::AnyOne) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(Token::Literal(c)) if c.eq_ignore_ascii_case(&text[t]) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(Token::AnyRun) => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                _ => {}
            }
            match star {
                Some((sp, st)) => {
                    star = Some((sp, st + 1));
                    p = sp + 1;
                    t = st + 1;
                }
                None => return false,
            }
        }
        while tokens.get(p) == Some(&Token::AnyRun) {
            p += 1;
        }
        p == tokens.len()
    }

    /// Equivalent `LIKE` pattern, to be used with `ESCAPE '\'`
    pub fn to_like(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::AnyRun => out.push('%'),
                Token::AnyOne => out.push('_'),
                Token::Literal(c) => {
                    if matches!(*c, '%' | '_' | LIKE_ESCAPE) {
                        out.push(LIKE_ESCAPE);
                    }
                    out.push(*c);
                }
            }
        }
        out
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for Wildcard {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_star() {
        let w = Wildcard::new("au*");
        assert!(w.matches("author"));
        assert!(w.matches("auth"));
        assert!(w.matches("au"));
        assert!(!w.matches("a"));
        assert!(!w.matches(""));
    }

    #[test]
    fn test_single_char() {
        let w = Wildcard::new("a?thor");
        assert!(w.matches("author"));
        assert!(w.matches("anthor"));
        assert!(!w.matches("auuuthor"));
        assert!(!w.matches("athor"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty() {
        let w = Wildcard::new("");
        assert!(w.matches(""));
        assert!(!w.matches("x"));
        assert_eq!(w.to_like(), "");
    }

    #[test]
    fn test_case_insensitive() {
        assert!(Wildcard::new("LEWIS*").matches("lewis carrol"));
        assert!(Wildcard::new("*carrol").matches("Lewis CARROL"));
    }

    #[test]
    fn test_backtracking() {
        let w = Wildcard::new("*ab*ab");
        assert!(w.matches("xxabyyab"));
        assert!(w.matches("abab"));
        assert!(!w.matches("abba"));
        assert!(Wildcard::new("*").matches(""));
        assert!(Wildcard::new("**?").matches("x"));
    }

    #[test]
    fn test_escaping() {
        let w = Wildcard::new(r"what\?");
        assert!(w.matches("what?"));
        assert!(!w.matches("whatx"));
        assert!(!w.has_wildcards());

        let star = Wildcard::new(r"5\*");
        assert!(star.matches("5*"));
        assert!(!star.matches("55"));

        let backslash = Wildcard::new(r"a\\b");
        assert!(backslash.matches(r"a\b"));
    }

    #[test]
    fn test_escape_round_trip() {
        let raw = r"50% off * now? \o/";
        let w = Wildcard::new(&Wildcard::escape(raw));
        assert!(w.matches(raw));
        assert!(!w.has_wildcards());
    }

    #[test]
    fn test_like_translation() {
        assert_eq!(Wildcard::new("au*").to_like(), "au%");
        assert_eq!(Wildcard::new("a?thor").to_like(), "a_thor");
        assert_eq!(Wildcard::new("100%_x").to_like(), r"100\%\_x");
        assert_eq!(Wildcard::new(r"a\*b").to_like(), "a*b");
        assert_eq!(Wildcard::new(r"a\\b").to_like(), r"a\\b");
    }
}
