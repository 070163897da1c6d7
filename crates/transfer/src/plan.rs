use std::ops::Range;

/// Largest output delivered as a single object.
pub const SINGLE_SHOT_LIMIT: usize = 50 * 1024 * 1024;
/// Size of every chunk except possibly the last.
pub const CHUNK_SIZE: usize = 20 * 1024 * 1024;
/// Most chunks per batch call.
pub const BATCH_LIMIT: usize = 10;

/// Ordered byte ranges of an oversized output, grouped into batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    ranges: Vec<Range<usize>>,
    batch_limit: usize,
}

impl ChunkPlan {
    /// Split `len` bytes into `chunk_size` ranges. The last range may be shorter.
    #[must_use]
    pub fn new(len: usize, chunk_size: usize, batch_limit: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let ranges = (0..len)
            .step_by(chunk_size)
            .map(|start| start..(start + chunk_size).min(len))
            .collect();
        Self {
            ranges,
            batch_limit: batch_limit.max(1),
        }
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.ranges.len().div_ceil(self.batch_limit)
    }

    #[must_use]
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Batches in offset order; all but the last are full.
    pub fn batches(&self) -> impl Iterator<Item = &[Range<usize>]> {
        self.ranges.chunks(self.batch_limit)
    }
}

/// `{final_name}.partNNN`, 1-based.
#[must_use]
pub fn chunk_name(final_name: &str, index: usize) -> String {
    format!("{final_name}.part{:03}", index + 1)
}
