use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

pub mod scanner;
pub mod splitter;

/// Inclusive frame range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub start: usize,
    pub end:   usize,
}

impl SegmentInfo {
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(end >= start, "segment {}-{} ends before it starts", start, end);
        Self {
            start,
            end,
        }
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.end - self.start + 1
    }
}

impl fmt::Display for SegmentInfo {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// An encoded output file covering `frames` frames from `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub path:   PathBuf,
    pub start:  usize,
    pub frames: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentAnalysis {
    pub total_frames: usize,
    /// Encoded ranges, sorted and disjoint
    pub done:         Vec<SegmentInfo>,
    /// What remains of `[0, total_frames)`
    pub left:         Vec<SegmentInfo>,
    /// Fragment files backing `done`, in the same order
    pub fragments:    Vec<PathBuf>,
}

impl SegmentAnalysis {
    #[inline]
    pub fn frames_left(&self) -> usize {
        self.left.iter().map(SegmentInfo::length).sum()
    }

    #[inline]
    pub fn frames_done(&self) -> usize {
        self.done.iter().map(SegmentInfo::length).sum()
    }

    /// All frames of a known, non-empty source are encoded.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.total_frames > 0 && self.left.is_empty()
    }

    /// First frame not yet encoded.
    #[inline]
    pub fn resume_position(&self) -> usize {
        self.left.first().map_or(self.total_frames, |segment| segment.start)
    }
}

/// Result of laying fragments out over a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentLayout {
    pub done:     Vec<SegmentInfo>,
    pub left:     Vec<SegmentInfo>,
    pub accepted: Vec<Fragment>,
    /// Empty, out of range or overlapping fragments
    pub rejected: Vec<Fragment>,
}

/// Sort fragments into encoded ranges and compute the gaps between them up
/// to `total_frames`.
#[inline]
pub fn compute_segments(mut fragments: Vec<Fragment>, total_frames: usize) -> SegmentLayout {
    fragments.sort_by_key(|fragment| fragment.start);

    let mut layout = SegmentLayout::default();
    let mut next_free = 0;
    for fragment in fragments {
        if fragment.frames == 0 || fragment.start >= total_frames || fragment.start < next_free {
            layout.rejected.push(fragment);
            continue;
        }

        let end = (fragment.start + fragment.frames - 1).min(total_frames - 1);
        if fragment.start > next_free {
            layout.left.push(SegmentInfo::new(next_free, fragment.start - 1));
        }
        layout.done.push(SegmentInfo::new(fragment.start, end));
        layout.accepted.push(fragment);
        next_free = end + 1;
    }
    if next_free < total_frames {
        layout.left.push(SegmentInfo::new(next_free, total_frames - 1));
    }

    layout
}
