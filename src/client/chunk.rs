//! Pure chunk arithmetic: slice `[0, total_size)` into fixed-size spans.

/// One contiguous byte range of the source file. `index` is 0-based; the
/// wire-level part number is `index + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

/// Number of chunks a file of `total_size` bytes splits into.
pub fn num_chunks(total_size: u64, chunk_size: u64) -> u64 {
    total_size.div_ceil(chunk_size)
}

/// Ordered spans covering `[0, total_size)` with no gaps or overlaps.
///
/// Every span is `chunk_size` bytes except the last, which holds the
/// remainder and is always non-empty.
pub fn chunk_spans(total_size: u64, chunk_size: u64) -> impl Iterator<Item = ChunkSpan> {
    debug_assert!(chunk_size > 0);
    (0..num_chunks(total_size, chunk_size)).map(move |index| {
        let offset = index * chunk_size;
        ChunkSpan {
            index,
            offset,
            len: chunk_size.min(total_size - offset),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_tile_the_file_exactly() {
        let chunk = 8;
        for total in 1..=3 * chunk + 1 {
            let spans: Vec<_> = chunk_spans(total, chunk).collect();
            assert_eq!(spans.len() as u64, total.div_ceil(chunk));

            let mut cursor = 0;
            for (i, span) in spans.iter().enumerate() {
                assert_eq!(span.index, i as u64);
                assert_eq!(span.offset, cursor);
                assert!(span.len > 0);
                cursor += span.len;
            }
            assert_eq!(cursor, total);
        }
    }

    #[test]
    fn last_span_holds_the_remainder() {
        let spans: Vec<_> = chunk_spans(20, 8).collect();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].len, 8);
        assert_eq!(spans[1].len, 8);
        assert_eq!(spans[2].len, 4);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let spans: Vec<_> = chunk_spans(16, 8).collect();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].len, 8);
    }

    #[test]
    fn empty_file_yields_no_spans() {
        assert_eq!(chunk_spans(0, 8).count(), 0);
        assert_eq!(num_chunks(0, 8), 0);
    }
}
