//! Chunked byte-stream model.
//!
//! Input and output are ordered sequences of segments. A [`Brigade`] owns
//! its segments; a [`Span`] addresses a byte position inside one. All
//! splits are zero-copy slices of the underlying [`Bytes`], so the
//! scanner only ever moves indices around.

use bytes::Bytes;

/// A position in a brigade: segment index plus byte offset within that
/// segment. `off == 0` with `seg == segment_count()` is the end position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub seg: usize,
    pub off: usize,
}

impl Span {
    pub fn new(seg: usize, off: usize) -> Self {
        Self { seg, off }
    }

    /// Rewrite this span after the brigade was split at `at` and the
    /// prefix removed. The span must lie at or after the split point.
    pub fn rebase(&mut self, at: Span) {
        debug_assert!(*self >= at);
        if self.seg == at.seg {
            self.off -= at.off;
        }
        self.seg -= at.seg;
    }
}

/// An ordered sequence of non-empty byte segments.
#[derive(Debug, Default)]
pub struct Brigade {
    segs: Vec<Bytes>,
}

impl Brigade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment. Empty chunks are dropped so that every stored
    /// segment has at least one byte.
    pub fn push(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.segs.push(data);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.segs.len()
    }

    pub fn segment(&self, seg: usize) -> &Bytes {
        &self.segs[seg]
    }

    pub fn byte_len(&self) -> usize {
        self.segs.iter().map(|s| s.len()).sum()
    }

    /// First byte position, i.e. `(0, 0)` normalized.
    pub fn start(&self) -> Span {
        Span::new(0, 0)
    }

    /// One past the last byte.
    pub fn end(&self) -> Span {
        Span::new(self.segs.len(), 0)
    }

    /// Canonical form of a position: offsets never point past the end of
    /// a segment (segments are non-empty, so `(seg, len)` becomes
    /// `(seg + 1, 0)`).
    pub fn normalize(&self, span: Span) -> Span {
        if span.seg < self.segs.len() && span.off >= self.segs[span.seg].len() {
            debug_assert_eq!(span.off, self.segs[span.seg].len());
            Span::new(span.seg + 1, 0)
        } else {
            span
        }
    }

    pub fn byte_at(&self, span: Span) -> Option<u8> {
        self.segs.get(span.seg).and_then(|s| s.get(span.off).copied())
    }

    /// Position of the next byte after `span`.
    pub fn advance(&self, span: Span) -> Span {
        self.normalize(Span::new(span.seg, span.off + 1))
    }

    /// Split the brigade at `at` and return the prefix. `self` keeps the
    /// bytes from `at` on. Spans held by the caller that point at or
    /// after `at` must be rewritten with [`Span::rebase`].
    pub fn split_to(&mut self, at: Span) -> Brigade {
        let at = self.normalize(at);
        let mut prefix: Vec<Bytes> = self.segs.drain(..at.seg).collect();
        if at.off > 0 {
            let head = self.segs[0].split_to(at.off);
            prefix.push(head);
        }
        Brigade { segs: prefix }
    }

    /// Take the whole brigade, leaving it empty.
    pub fn take(&mut self) -> Brigade {
        Brigade {
            segs: std::mem::take(&mut self.segs),
        }
    }

    /// Copy the bytes of `[from, to)` into one buffer.
    pub fn copy_range(&self, from: Span, to: Span) -> Vec<u8> {
        let from = self.normalize(from);
        let to = self.normalize(to);
        let mut out = Vec::new();
        let mut pos = from;
        while pos < to && pos.seg < self.segs.len() {
            let seg = &self.segs[pos.seg];
            let end = if to.seg == pos.seg { to.off } else { seg.len() };
            out.extend_from_slice(&seg[pos.off..end]);
            pos = Span::new(pos.seg + 1, 0);
        }
        out
    }

    /// Delete `[from, to)` and insert `with` in its place. Returns the
    /// new position of the first byte that followed the deleted range
    /// (i.e. where scanning should resume).
    pub fn replace_range(&mut self, from: Span, to: Span, with: Vec<Bytes>) -> Span {
        let from = self.normalize(from);
        let to = self.normalize(to);
        debug_assert!(from <= to);

        let mut rebuilt: Vec<Bytes> = Vec::with_capacity(self.segs.len() + with.len());
        rebuilt.extend(self.segs[..from.seg].iter().cloned());
        if from.off > 0 {
            rebuilt.push(self.segs[from.seg].slice(..from.off));
        }
        rebuilt.extend(with.into_iter().filter(|b| !b.is_empty()));
        let resume_seg = rebuilt.len();
        if to.seg < self.segs.len() && to.off < self.segs[to.seg].len() {
            rebuilt.push(self.segs[to.seg].slice(to.off..));
        }
        rebuilt.extend(self.segs[to.seg.min(self.segs.len())..].iter().skip(1).cloned());
        self.segs = rebuilt;
        self.normalize(Span::new(resume_seg, 0))
    }

    /// Consume the brigade into its segments.
    pub fn into_segments(self) -> Vec<Bytes> {
        self.segs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brigade(parts: &[&str]) -> Brigade {
        let mut b = Brigade::new();
        for p in parts {
            b.push(Bytes::copy_from_slice(p.as_bytes()));
        }
        b
    }

    fn collect(b: &Brigade) -> String {
        let all = b.copy_range(b.start(), b.end());
        String::from_utf8(all).unwrap()
    }

    #[test]
    fn push_drops_empty_segments() {
        let b = brigade(&["a", "", "b"]);
        assert_eq!(b.segment_count(), 2);
        assert_eq!(b.byte_len(), 2);
    }

    #[test]
    fn split_to_mid_segment() {
        let mut b = brigade(&["hello", "world"]);
        let prefix = b.split_to(Span::new(1, 2));
        assert_eq!(collect(&prefix), "hellowo");
        assert_eq!(collect(&b), "rld");
    }

    #[test]
    fn split_to_segment_boundary() {
        let mut b = brigade(&["hello", "world"]);
        let prefix = b.split_to(Span::new(1, 0));
        assert_eq!(collect(&prefix), "hello");
        assert_eq!(collect(&b), "world");
        assert_eq!(b.segment_count(), 1);
    }

    #[test]
    fn span_rebase_tracks_split() {
        let mut b = brigade(&["abcdef"]);
        // span pointing at 'e'
        let mut span = Span::new(0, 4);
        assert_eq!(b.byte_at(span), Some(b'e'));
        b.split_to(Span::new(0, 2));
        span.rebase(Span::new(0, 2));
        assert_eq!(b.byte_at(span), Some(b'e'));
    }

    #[test]
    fn span_rebase_across_segments() {
        let mut b = brigade(&["ab", "cd", "ef"]);
        let mut span = Span::new(2, 1); // 'f'
        b.split_to(Span::new(1, 1));
        span.rebase(Span::new(1, 1));
        assert_eq!(b.byte_at(span), Some(b'f'));
    }

    #[test]
    fn replace_range_inserts_and_resumes() {
        let mut b = brigade(&["a<!--#x-->", "b"]);
        let resume = b.replace_range(
            Span::new(0, 1),
            Span::new(1, 0),
            vec![Bytes::from_static(b"XY")],
        );
        assert_eq!(collect(&b), "aXYb");
        assert_eq!(b.byte_at(resume), Some(b'b'));
    }

    #[test]
    fn replace_range_delete_only() {
        let mut b = brigade(&["abcd"]);
        let resume = b.replace_range(Span::new(0, 1), Span::new(0, 3), vec![]);
        assert_eq!(collect(&b), "ad");
        assert_eq!(b.byte_at(resume), Some(b'd'));
    }

    #[test]
    fn replace_range_at_end() {
        let mut b = brigade(&["ab<!--#x-->"]);
        let resume = b.replace_range(Span::new(0, 2), b.end(), vec![Bytes::from_static(b"!")]);
        assert_eq!(collect(&b), "ab!");
        assert_eq!(b.byte_at(resume), None);
        assert_eq!(resume, b.end());
    }

    #[test]
    fn copy_range_spanning_segments() {
        let b = brigade(&["ab", "cd", "ef"]);
        let bytes = b.copy_range(Span::new(0, 1), Span::new(2, 1));
        assert_eq!(bytes, b"bcde");
    }

    #[test]
    fn advance_normalizes_over_boundaries() {
        let b = brigade(&["ab", "c"]);
        let mut pos = b.start();
        let mut seen = Vec::new();
        while let Some(byte) = b.byte_at(pos) {
            seen.push(byte);
            pos = b.advance(pos);
        }
        assert_eq!(seen, b"abc");
        assert_eq!(pos, b.end());
    }
}
