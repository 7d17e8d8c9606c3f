/// Byte offset to line lookups, built once per source file.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Offset of the start of each line.
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(source: &[u8]) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(memchr::memchr_iter(b'\n', source).map(|i| i + 1));
        Self {
            line_starts,
            len: source.len(),
        }
    }

    /// Returns (line, column) for a given byte offset. Both are 0-based.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        match self.line_starts.binary_search(&offset) {
            Ok(line) => (line, 0),
            Err(insert_idx) => {
                let line = insert_idx - 1;
                (line, offset - self.line_starts[line])
            }
        }
    }

    /// 1-based line number.
    pub fn line(&self, offset: usize) -> u32 {
        self.line_col(offset).0 as u32 + 1
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_one_based() {
        let index = LineIndex::new(b"a\nbc\n\nd");
        assert_eq!(index.line(0), 1);
        assert_eq!(index.line(2), 2);
        assert_eq!(index.line(3), 2);
        assert_eq!(index.line(5), 3);
        assert_eq!(index.line(6), 4);
        assert_eq!(index.line_col(3), (1, 1));
        assert_eq!(index.line(100), 4);
        assert_eq!(index.line_count(), 4);
    }
}
