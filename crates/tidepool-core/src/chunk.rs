//! Row-range chunk planning.
//!
//! A table of `total_rows` rows is covered by fixed-size, half-open ordinal
//! ranges `[lower, upper)`. The last range may extend past `total_rows`; the
//! source simply returns fewer rows for it.

use std::num::NonZeroU64;

/// A half-open row-ordinal range fetched as one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Zero-based position of this chunk in the plan.
    pub index: usize,
    /// Inclusive lower ordinal.
    pub lower: u64,
    /// Exclusive upper ordinal.
    pub upper: u64,
}

impl ChunkRange {
    /// Number of rows the range can hold.
    pub fn len(&self) -> u64 {
        self.upper - self.lower
    }

    pub fn is_empty(&self) -> bool {
        self.upper == self.lower
    }
}

/// Lazy sequence of [`ChunkRange`]s covering `[0, total_rows)`.
///
/// Pure function of its inputs: cloning the plan restarts it.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    total_rows: u64,
    chunk_size: u64,
    next_index: u64,
    chunk_count: u64,
}

impl ChunkPlan {
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Total number of chunks in the plan, regardless of iteration progress.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count as usize
    }
}

/// Plan the chunks for a table of `total_rows` rows.
///
/// Yields `ceil(total_rows / chunk_size)` ranges, none for an empty table.
pub fn plan_chunks(total_rows: u64, chunk_size: NonZeroU64) -> ChunkPlan {
    let chunk_size = chunk_size.get();
    ChunkPlan {
        total_rows,
        chunk_size,
        next_index: 0,
        chunk_count: total_rows.div_ceil(chunk_size),
    }
}

impl Iterator for ChunkPlan {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        if self.next_index >= self.chunk_count {
            return None;
        }
        let lower = self.next_index * self.chunk_size;
        let range = ChunkRange {
            index: self.next_index as usize,
            lower,
            upper: lower.saturating_add(self.chunk_size),
        };
        self.next_index += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.chunk_count - self.next_index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkPlan {}
