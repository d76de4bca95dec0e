//! Stream scanner: locates directive delimiters across segment and
//! chunk boundaries.
//!
//! The scanner is a single pass over the brigade bytes. It matches the
//! start delimiter `<!--#` and the end delimiter `-->` byte by byte,
//! with a one-byte lookback so inputs like `<<!--#` and `--->` still
//! find the real delimiter after a failed partial match. Once
//! `bytes_parsed` crosses [`FLUSH_THRESHOLD`] the driver is told to
//! forward the scanned prefix so downstream sees incremental progress.

use ssiflow_core::brigade::{Brigade, Span};
use ssiflow_core::config::SsiConfig;

pub const START_SEQUENCE: &[u8] = b"<!--#";
pub const END_SEQUENCE: &[u8] = b"-->";

/// Bytes scanned before the buffered prefix is forced downstream.
pub const FLUSH_THRESHOLD: usize = 8192;

/// Scan phase. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    /// Looking for the start delimiter, nothing matched yet.
    #[default]
    PreHead,
    /// Partway through the start delimiter.
    ParseHead,
    /// Inside the directive name.
    ParseDirective,
    /// Inside the attribute list.
    ParseTag,
    /// Partway through the end delimiter.
    ParseTail,
    /// A complete directive has been identified.
    Parsed,
}

/// Per-request condition and formatting flags.
#[derive(Debug, Clone, Copy)]
pub struct Flags {
    /// Scanned output is currently emitted (false inside a failed
    /// conditional branch).
    pub printing: bool,
    /// Some branch of the current `if` chain has already matched.
    pub cond_true: bool,
    /// Refuse `include` of non-text content.
    pub no_exec: bool,
    /// `fsize` renders an exact comma-grouped byte count.
    pub size_in_bytes: bool,
}

/// What the scanner wants the driver to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    /// Forward (or drop, when not printing) everything before `at`,
    /// rebase, and keep scanning.
    Flush { at: Span },
    /// A full directive is assembled between `tag_start` and
    /// `tail_start`; its delimiters span `head_start..tail_end`.
    Directive,
    /// Input exhausted mid-scan.
    NeedMore,
}

/// Scanner state for one request filter instance.
#[derive(Debug)]
pub struct ScanContext {
    pub state: ParseState,
    /// How many bytes of the current delimiter have matched.
    pub parse_pos: usize,
    /// The `<` of the start delimiter.
    pub head_start: Option<Span>,
    /// First byte of the directive body.
    pub tag_start: Option<Span>,
    /// First byte of the end delimiter.
    pub tail_start: Option<Span>,
    /// One past the final `>`.
    pub tail_end: Option<Span>,
    /// Body bytes seen so far.
    pub tag_length: usize,
    /// Leading directive-name bytes.
    pub directive_length: usize,
    /// Bytes scanned since the last downstream flush.
    pub bytes_parsed: usize,
    pub flags: Flags,
    /// `if` blocks entered while printing was already off.
    pub if_depth: usize,
    /// Current `#config errmsg` value.
    pub error_template: String,
    /// Current `#config timefmt` value.
    pub time_format: String,
}

impl ScanContext {
    pub fn new(config: &SsiConfig) -> Self {
        Self {
            state: ParseState::PreHead,
            parse_pos: 0,
            head_start: None,
            tag_start: None,
            tail_start: None,
            tail_end: None,
            tag_length: 0,
            directive_length: 0,
            bytes_parsed: 0,
            flags: Flags {
                printing: true,
                cond_true: true,
                no_exec: config.no_exec,
                size_in_bytes: false,
            },
            if_depth: 0,
            error_template: config.error_message.clone(),
            time_format: config.time_format.clone(),
        }
    }

    /// Forget the current directive bookkeeping. Flags, nesting depth,
    /// and templates are deliberately untouched.
    pub fn reset_directive(&mut self) {
        self.state = ParseState::PreHead;
        self.parse_pos = 0;
        self.head_start = None;
        self.tag_start = None;
        self.tail_start = None;
        self.tail_end = None;
        self.tag_length = 0;
        self.directive_length = 0;
    }

    /// Rewrite every retained span after the brigade prefix before
    /// `at` was removed.
    pub fn rebase(&mut self, at: Span) {
        for span in [
            &mut self.head_start,
            &mut self.tag_start,
            &mut self.tail_start,
            &mut self.tail_end,
        ]
        .into_iter()
        .flatten()
        {
            span.rebase(at);
        }
    }

    /// Advance the scan from `pos` until something needs the driver.
    pub fn scan(&mut self, brigade: &Brigade, pos: &mut Span) -> ScanEvent {
        loop {
            match self.state {
                ParseState::PreHead | ParseState::ParseHead => {
                    if let Some(ev) = self.scan_start(brigade, pos) {
                        return ev;
                    }
                    // full start delimiter seen; fall through to the
                    // end-delimiter phase
                }
                ParseState::ParseDirective | ParseState::ParseTag | ParseState::ParseTail => {
                    return self.scan_end(brigade, pos);
                }
                ParseState::Parsed => return ScanEvent::Directive,
            }
        }
    }

    /// Match bytes against `<!--#`. Returns `None` once the full
    /// delimiter has matched and the state moved to `ParseDirective`.
    fn scan_start(&mut self, brigade: &Brigade, pos: &mut Span) -> Option<ScanEvent> {
        while let Some(b) = brigade.byte_at(*pos) {
            if self.bytes_parsed >= FLUSH_THRESHOLD {
                let at = match self.state {
                    ParseState::ParseHead => self.head_start.expect("matching head"),
                    _ => *pos,
                };
                return Some(ScanEvent::Flush { at });
            }

            if b == START_SEQUENCE[self.parse_pos] {
                if self.state == ParseState::PreHead {
                    self.state = ParseState::ParseHead;
                    self.head_start = Some(*pos);
                }
                self.parse_pos += 1;
                *pos = brigade.advance(*pos);
                self.bytes_parsed += 1;
                if self.parse_pos == START_SEQUENCE.len() {
                    self.state = ParseState::ParseDirective;
                    self.parse_pos = 0;
                    self.tag_length = 0;
                    self.directive_length = 0;
                    self.tag_start = Some(*pos);
                    return None;
                }
                continue;
            }

            if self.parse_pos != 0 {
                // One-byte lookback: a mismatch after a partial match
                // may itself open a real delimiter, as in `<<!--#`.
                if b == START_SEQUENCE[0] {
                    self.parse_pos = 1;
                    self.state = ParseState::ParseHead;
                    self.head_start = Some(*pos);
                } else {
                    self.parse_pos = 0;
                    self.state = ParseState::PreHead;
                    self.head_start = None;
                }
            }
            *pos = brigade.advance(*pos);
            self.bytes_parsed += 1;
        }
        Some(ScanEvent::NeedMore)
    }

    /// Match bytes against `-->` while accounting directive-name and
    /// body lengths.
    fn scan_end(&mut self, brigade: &Brigade, pos: &mut Span) -> ScanEvent {
        while let Some(b) = brigade.byte_at(*pos) {
            if self.bytes_parsed >= FLUSH_THRESHOLD {
                return ScanEvent::Flush {
                    at: self.head_start.expect("directive in progress"),
                };
            }

            if b == END_SEQUENCE[self.parse_pos] {
                if self.state != ParseState::ParseTail {
                    self.state = ParseState::ParseTail;
                    self.tail_start = Some(*pos);
                }
                self.parse_pos += 1;
                *pos = brigade.advance(*pos);
                self.bytes_parsed += 1;
                if self.parse_pos == END_SEQUENCE.len() {
                    self.state = ParseState::Parsed;
                    self.parse_pos = 0;
                    self.tail_end = Some(*pos);
                    return ScanEvent::Directive;
                }
                continue;
            }

            match self.state {
                ParseState::ParseDirective => {
                    if self.tag_length == 0 {
                        if !b.is_ascii_whitespace() {
                            self.tag_start = Some(*pos);
                            self.tag_length = 1;
                            self.directive_length = 1;
                        }
                    } else {
                        if !b.is_ascii_whitespace() {
                            self.directive_length += 1;
                        } else {
                            self.state = ParseState::ParseTag;
                        }
                        self.tag_length += 1;
                    }
                }
                ParseState::ParseTag => self.tag_length += 1,
                ParseState::ParseTail => {
                    if b == END_SEQUENCE[0] {
                        // A dash run such as `--->`: slide the candidate
                        // window one byte; the displaced dash belongs to
                        // the body and the current byte keeps the
                        // two-dash partial alive.
                        self.tag_length += 1;
                        let ts = self.tail_start.expect("tail in progress");
                        self.tail_start = Some(brigade.advance(ts));
                    } else {
                        // False tail: the tentative bytes and this one
                        // were ordinary body bytes.
                        self.tag_length += self.parse_pos + 1;
                        self.state = ParseState::ParseTag;
                        self.tail_start = None;
                        self.parse_pos = 0;
                    }
                }
                _ => unreachable!("scan_end in start phase"),
            }
            *pos = brigade.advance(*pos);
            self.bytes_parsed += 1;
        }
        ScanEvent::NeedMore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ctx() -> ScanContext {
        ScanContext::new(&SsiConfig::default())
    }

    fn brigade(parts: &[&str]) -> Brigade {
        let mut b = Brigade::new();
        for p in parts {
            b.push(Bytes::copy_from_slice(p.as_bytes()));
        }
        b
    }

    fn body_of(ctx: &ScanContext, b: &Brigade) -> String {
        let raw = b.copy_range(ctx.tag_start.unwrap(), ctx.tail_start.unwrap());
        String::from_utf8(raw).unwrap()
    }

    #[test]
    fn finds_a_simple_directive() {
        let b = brigade(&[r#"pre<!--#echo var="X"-->post"#]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(c.state, ParseState::Parsed);
        assert_eq!(c.head_start, Some(Span::new(0, 3)));
        assert_eq!(body_of(&c, &b), r#"echo var="X""#);
        assert_eq!(c.directive_length, 4);
        assert_eq!(b.byte_at(c.tail_end.unwrap()), Some(b'p'));
    }

    #[test]
    fn no_directive_exhausts_input() {
        let b = brigade(&["just some text"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::NeedMore);
        assert_eq!(c.state, ParseState::PreHead);
        assert_eq!(pos, b.end());
    }

    #[test]
    fn html_comment_is_not_a_directive() {
        let b = brigade(&["<!-- plain comment -->"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::NeedMore);
        assert_eq!(c.state, ParseState::PreHead);
    }

    #[test]
    fn lookback_catches_double_open() {
        let b = brigade(&["<<!--#x-->"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        // head starts at the second '<'
        assert_eq!(c.head_start, Some(Span::new(0, 1)));
        assert_eq!(body_of(&c, &b), "x");
    }

    #[test]
    fn dash_run_finds_the_real_tail() {
        let b = brigade(&["<!--#echo var=\"X\" --->rest"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        // the extra dash belongs to the body
        assert_eq!(body_of(&c, &b), "echo var=\"X\" -");
        assert_eq!(b.byte_at(c.tail_end.unwrap()), Some(b'r'));
    }

    #[test]
    fn longer_dash_run_finds_the_real_tail() {
        let b = brigade(&["<!--#echo var=\"X\" ---->rest"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(body_of(&c, &b), "echo var=\"X\" --");
        assert_eq!(b.byte_at(c.tail_end.unwrap()), Some(b'r'));
    }

    #[test]
    fn false_tail_returns_to_the_body() {
        let b = brigade(&["<!--#set var=\"a-b\" value=\"c\"-->x"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(body_of(&c, &b), "set var=\"a-b\" value=\"c\"");
        assert_eq!(c.directive_length, 3);
    }

    #[test]
    fn directive_split_across_segments() {
        let b = brigade(&["a<!--", "#echo ", "var=\"X\"--", ">z"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(c.head_start, Some(Span::new(0, 1)));
        assert_eq!(body_of(&c, &b), "echo var=\"X\"");
        assert_eq!(b.byte_at(c.tail_end.unwrap()), Some(b'z'));
    }

    #[test]
    fn partial_head_reports_need_more() {
        let b = brigade(&["text<!-"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::NeedMore);
        assert_eq!(c.state, ParseState::ParseHead);
        assert_eq!(c.parse_pos, 3);
        assert_eq!(c.head_start, Some(Span::new(0, 4)));
    }

    #[test]
    fn partial_head_resumes_on_next_segment() {
        let mut b = brigade(&["<<!--"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::NeedMore);
        b.push(Bytes::from_static(b"#echo var=\"X\"-->"));
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(c.head_start, Some(Span::new(0, 1)));
        assert_eq!(body_of(&c, &b), "echo var=\"X\"");
    }

    #[test]
    fn failed_partial_head_falls_back() {
        let mut b = brigade(&["ab<!-"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::NeedMore);
        b.push(Bytes::from_static(b"oops"));
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::NeedMore);
        assert_eq!(c.state, ParseState::PreHead);
        assert_eq!(c.head_start, None);
    }

    #[test]
    fn name_and_tag_lengths() {
        let b = brigade(&["<!--#flastmod file=\"x\"-->"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(c.directive_length, "flastmod".len());
    }

    #[test]
    fn threshold_forces_flush() {
        let big = "x".repeat(FLUSH_THRESHOLD + 10);
        let b = brigade(&[&big]);
        let mut c = ctx();
        let mut pos = b.start();
        match c.scan(&b, &mut pos) {
            ScanEvent::Flush { at } => assert_eq!(at, Span::new(0, FLUSH_THRESHOLD)),
            other => panic!("expected flush, got {:?}", other),
        }
    }

    #[test]
    fn threshold_flush_splits_at_tentative_head() {
        let mut text = "y".repeat(FLUSH_THRESHOLD - 2);
        text.push_str("<!--");
        let b = brigade(&[&text]);
        let mut c = ctx();
        let mut pos = b.start();
        match c.scan(&b, &mut pos) {
            ScanEvent::Flush { at } => assert_eq!(at, Span::new(0, FLUSH_THRESHOLD - 2)),
            other => panic!("expected flush, got {:?}", other),
        }
    }

    #[test]
    fn rebase_keeps_spans_valid_after_flush() {
        let mut b = brigade(&["abcdef<!--#echo"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::NeedMore);
        let head = c.head_start.unwrap();
        assert_eq!(head, Span::new(0, 6));

        b.split_to(head);
        c.rebase(head);
        pos.rebase(head);
        assert_eq!(c.head_start, Some(Span::new(0, 0)));
        assert_eq!(b.byte_at(c.head_start.unwrap()), Some(b'<'));

        b.push(Bytes::from_static(b" var=\"X\"-->t"));
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(body_of(&c, &b), "echo var=\"X\"");
    }

    #[test]
    fn empty_body_directive() {
        let b = brigade(&["<!--#-->"]);
        let mut c = ctx();
        let mut pos = b.start();
        assert_eq!(c.scan(&b, &mut pos), ScanEvent::Directive);
        assert_eq!(c.tag_length, 0);
        assert_eq!(c.directive_length, 0);
    }
}
