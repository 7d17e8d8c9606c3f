use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInfo<'src> {
    pub line: usize,
    pub column: usize,
    pub line_text: &'src [u8],
}

/// Byte range into the source buffer. Line and column are derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    pub fn line_info<'src>(&self, source: &'src [u8]) -> Option<LineInfo<'src>> {
        if self.start > self.end || self.end > source.len() {
            return None;
        }

        let line = memchr::memchr_iter(b'\n', &source[..self.start]).count() + 1;
        let line_start = memchr::memrchr(b'\n', &source[..self.start])
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let column = self.start - line_start + 1;

        let line_end = memchr::memchr(b'\n', &source[self.start..])
            .map(|pos| self.start + pos)
            .unwrap_or(source.len());

        Some(LineInfo {
            line,
            column,
            line_text: &source[line_start..line_end],
        })
    }

    /// 1-based line number, or 0 when the span does not belong to `source`.
    pub fn line(&self, source: &[u8]) -> u32 {
        self.line_info(source).map(|li| li.line as u32).unwrap_or(0)
    }

    /// Out-of-range spans yield an empty slice instead of panicking.
    pub fn as_str<'src>(&self, source: &'src [u8]) -> &'src [u8] {
        source.get(self.start..self.end).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_info_reports_one_based_positions() {
        let src = b"<?php\n  $a = 1;\n";
        let span = Span::new(8, 10);
        let info = span.line_info(src).unwrap();
        assert_eq!(info.line, 2);
        assert_eq!(info.column, 3);
        assert_eq!(info.line_text, b"  $a = 1;");
    }

    #[test]
    fn out_of_range_span_is_harmless() {
        let span = Span::new(4, 40);
        assert!(span.line_info(b"abc").is_none());
        assert_eq!(span.as_str(b"abc"), b"");
    }
}
