//! Byte cursor for navigating template source text.
//!
//! Provides low-level lookahead and consumption methods. Unlike the
//! expression side (which is token-based), template markup interleaves raw
//! text with syntax, so the cursor works directly on the source bytes.

use weft_ir::Span;

/// Cursor over template source.
///
/// Tracks the current byte position. Positions are always on UTF-8
/// character boundaries.
pub struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Cursor { source, pos: 0 }
    }

    #[inline]
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Current byte position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Jump forward to a byte position.
    ///
    /// Used after the expression parser has consumed a span of the source.
    pub fn set_pos(&mut self, pos: usize) {
        debug_assert!(pos >= self.pos, "set_pos only moves forwards");
        debug_assert!(pos <= self.source.len());
        self.pos = pos;
    }

    /// Move back to a previously saved position, for speculative parsing.
    pub fn rewind(&mut self, pos: usize) {
        debug_assert!(pos <= self.pos, "rewind only moves backwards");
        self.pos = pos;
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    /// The remaining unconsumed source.
    #[inline]
    pub fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    /// Peek the current character without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Peek the character after the current one.
    pub fn peek_second(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    /// Consume and return the current character.
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Check whether the remaining source starts with `prefix`.
    #[inline]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    /// Consume `prefix` if the remaining source starts with it.
    pub fn eat(&mut self, prefix: &str) -> bool {
        if self.starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    /// Skip all whitespace including newlines.
    pub fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// True if the cursor sits at the start of a line.
    pub fn at_line_start(&self) -> bool {
        self.pos == 0 || self.source.as_bytes()[self.pos - 1] == b'\n'
    }

    /// Consume an identifier-like name (`[A-Za-z][A-Za-z0-9_-]*`), if any.
    pub fn eat_name(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let end = chars
            .find(|&(_, c)| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .map_or(rest.len(), |(i, _)| i);
        let name = &rest[..end];
        self.pos += end;
        Some(name)
    }

    /// Span from `start` to the current position.
    #[inline]
    pub fn span_from(&self, start: usize) -> Span {
        Span::from_range(start..self.pos)
    }

    /// Span of the single character at the current position.
    pub fn here(&self) -> Span {
        let end = (self.pos + 1).min(self.source.len());
        Span::from_range(self.pos..end.max(self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eat_consumes_only_on_match() {
        let mut cursor = Cursor::new("{{x}}");
        assert!(!cursor.eat("<"));
        assert!(cursor.eat("{{"));
        assert_eq!(cursor.pos(), 2);
    }

    #[test]
    fn eat_name_stops_at_punctuation() {
        let mut cursor = Cursor::new("tool-call id=1");
        assert_eq!(cursor.eat_name(), Some("tool-call"));
        assert_eq!(cursor.peek(), Some(' '));
    }

    #[test]
    fn line_start_tracking() {
        let mut cursor = Cursor::new("a\nb");
        assert!(cursor.at_line_start());
        cursor.bump();
        assert!(!cursor.at_line_start());
        cursor.bump();
        assert!(cursor.at_line_start());
    }
}
