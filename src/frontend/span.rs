// src/frontend/span.rs

use miette::SourceSpan;

/// A half-open byte range into a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(self) -> bool {
        self.end <= self.start
    }

    /// Smallest span covering both operands.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new((span.start as usize).into(), span.len() as usize)
    }
}

/// Precomputed byte offsets of each line start, for span -> line:col mapping.
#[derive(Debug, Clone, Default)]
pub struct LineOffsets {
    offsets: Vec<u32>,
}

impl LineOffsets {
    pub fn compute(source: &str) -> Self {
        let mut offsets = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                offsets.push(i as u32 + 1);
            }
        }
        Self { offsets }
    }

    /// 1-based (line, column) of a byte offset.
    pub fn line_col(&self, byte: u32) -> (u32, u32) {
        let line = match self.offsets.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line as u32 + 1, byte - self.offsets[line] + 1)
    }

    pub fn line_count(&self) -> usize {
        self.offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_maps_across_newlines() {
        let offsets = LineOffsets::compute("ab\ncd\ne");
        assert_eq!(offsets.line_col(0), (1, 1));
        assert_eq!(offsets.line_col(1), (1, 2));
        assert_eq!(offsets.line_col(3), (2, 1));
        assert_eq!(offsets.line_col(6), (3, 1));
    }

    #[test]
    fn merge_covers_both_spans() {
        let a = Span::new(4, 8);
        let b = Span::new(10, 12);
        assert_eq!(a.merge(b), Span::new(4, 12));
    }
}
