//! Attribute tokenizer for assembled directive bodies.
//!
//! Pulls successive `name="value"` pairs out of a directive body:
//! `[WS]<tag>[WS]=[WS]['|"]<value>['|"|WS]`. Names are lowercased as
//! they are read; values may be single-quoted, double-quoted, or bare
//! (ending at whitespace).

use ssiflow_core::text::decode_entities;

/// Cursor over a directive body's attribute list.
pub struct TagParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TagParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Next `(tag, value)` pair. `None` when the body is exhausted; a
    /// pair with no value (`Some((tag, None))`) is always an error for
    /// the caller. The value is entity-decoded when `decode` is set.
    pub fn next_pair(&mut self, decode: bool) -> Option<(String, Option<String>)> {
        self.skip_whitespace();
        if self.peek().is_none() || self.peek() == Some(b'=') {
            // nothing left, or a valueless '=': the list is done
            return None;
        }

        let tag_start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'=' || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        let tag = self.input[tag_start..self.pos].to_ascii_lowercase();

        // find the '=' separating tag from value
        self.skip_whitespace();
        if self.peek() != Some(b'=') {
            // a tag with no value
            return Some((tag, None));
        }
        self.pos += 1;
        self.skip_whitespace();

        // quoted values allow embedded whitespace
        let term = match self.peek() {
            Some(q @ (b'"' | b'\'')) => {
                self.pos += 1;
                Some(q)
            }
            _ => None,
        };

        let mut value = Vec::new();
        while let Some(b) = self.peek() {
            let ended = match term {
                Some(q) => b == q,
                None => b.is_ascii_whitespace(),
            };
            if ended {
                self.pos += 1;
                break;
            }
            if b == b'\\' {
                self.pos += 1;
                match self.peek() {
                    // the backslash is elided before the active quote
                    Some(e) if Some(e) == term => {
                        value.push(e);
                        self.pos += 1;
                    }
                    Some(e) => {
                        value.push(b'\\');
                        value.push(e);
                        self.pos += 1;
                    }
                    None => {
                        value.push(b'\\');
                        break;
                    }
                }
                continue;
            }
            value.push(b);
            self.pos += 1;
        }

        let mut value = String::from_utf8_lossy(&value).into_owned();
        if decode {
            value = decode_entities(&value);
        }
        Some((tag, Some(value)))
    }
}
