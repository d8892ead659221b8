use tracing::debug;

use crate::segments::SegmentInfo;

/// Chunks are never bisected below this size.
pub const MIN_CHUNK_SIZE: usize = 40;
/// Only chunks longer than this are bisected to feed idle workers.
pub const BISECT_THRESHOLD: usize = 80;

/// Partitioning of the remaining frames across parallel workers.
///
/// Chunk sizes ramp up as `k * base_size` for the first `workers` chunks so
/// every worker starts quickly, then stay flat at `max_chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub workers:          usize,
    pub base_size:        usize,
    pub max_chunk_size:   usize,
    pub min_chunk_size:   usize,
    pub bisect_threshold: usize,
}

impl SplitPlan {
    /// Plan whose ramp covers `frames_left` in at most `workers` chunks when
    /// the frames are contiguous.
    #[inline]
    pub fn new(workers: usize, frames_left: usize) -> Self {
        let workers = workers.max(1);
        let ramp = workers * (workers + 1) / 2;
        let base_size = frames_left.div_ceil(ramp).max(MIN_CHUNK_SIZE);

        Self {
            workers,
            base_size,
            max_chunk_size: base_size * workers,
            min_chunk_size: MIN_CHUNK_SIZE,
            bisect_threshold: BISECT_THRESHOLD,
        }
    }

    fn ideal_chunk(&self, index: usize) -> usize {
        if index <= self.workers { index * self.base_size } else { self.max_chunk_size }
    }

    #[inline]
    pub fn split(&self, left: &[SegmentInfo]) -> Vec<SegmentInfo> {
        if self.workers <= 1 {
            return left.to_vec();
        }

        let mut chunks = Vec::with_capacity(left.len().max(self.workers));
        let mut index = 1;
        for gap in left {
            let mut start = gap.start;
            loop {
                let remaining = gap.end - start + 1;
                let ideal = self.ideal_chunk(index);
                index += 1;
                // Splitting must not leave a sliver shorter than the base size
                if remaining > ideal + self.base_size {
                    chunks.push(SegmentInfo::new(start, start + ideal - 1));
                    start += ideal;
                } else {
                    chunks.push(SegmentInfo::new(start, gap.end));
                    break;
                }
            }
        }

        while chunks.len() < self.workers {
            let Some((position, largest)) = chunks
                .iter()
                .copied()
                .enumerate()
                .rev()
                .max_by_key(|(_, chunk)| chunk.length())
            else {
                break;
            };
            let half = largest.length() / 2;
            if largest.length() <= self.bisect_threshold || half < self.min_chunk_size {
                break;
            }

            chunks[position] = SegmentInfo::new(largest.start, largest.start + half - 1);
            chunks.insert(position + 1, SegmentInfo::new(largest.start + half, largest.end));
        }

        debug!(
            "Split {} remaining ranges into {} chunks for {} workers",
            left.len(),
            chunks.len(),
            self.workers
        );
        chunks
    }
}
