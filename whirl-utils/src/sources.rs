/// Identifies one scanned source file for the lifetime of a compilation.
/// Handed out sequentially by whoever drives the scanner.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Default)]
pub struct SourceId(usize);

impl From<usize> for SourceId {
    fn from(other: usize) -> SourceId {
        SourceId(other)
    }
}

impl From<SourceId> for usize {
    fn from(other: SourceId) -> usize {
        other.0
    }
}

/// A byte range within one source file. Every AST leaf, symbol, and
/// diagnostic carries one so errors land on the text that produced them.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub struct Span {
    source: SourceId,
    start:  usize,
    len:    usize,
}

impl Span {
    pub fn anchored(
        source: SourceId,
        start: usize,
        len: usize,
    ) -> Self {
        Self { source, start, len }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn offset(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the range.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// The smallest span containing both ranges. Branch spans are built this
    /// way from their children.
    pub fn cover(
        &self,
        other: Span,
    ) -> Span {
        debug_assert!(self.source == other.source, "cannot cover spans from different files");
        let start = self.start.min(other.start);
        Span {
            source: self.source,
            start,
            len: self.end().max(other.end()) - start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_is_order_independent() {
        let source = SourceId::from(0);
        let a = Span::anchored(source, 4, 3);
        let b = Span::anchored(source, 10, 5);

        let covered = a.cover(b);
        assert_eq!(covered.offset(), 4);
        assert_eq!(covered.end(), 15);
        assert_eq!(covered, b.cover(a));
    }

    #[test]
    fn cover_of_nested_spans_is_the_outer_one() {
        let source = SourceId::from(1);
        let outer = Span::anchored(source, 2, 20);
        let inner = Span::anchored(source, 6, 4);
        assert_eq!(outer.cover(inner), outer);
        assert!(!outer.is_empty());
    }
}
