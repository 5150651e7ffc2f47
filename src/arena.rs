// SPDX-License-Identifier: MIT

//! Fixed-capacity storage for the parsed report graph.
//!
//! Reports and segments live in two index-keyed pools whose capacity
//! is reserved once and never grows; nodes refer to each other by
//! pool index instead of pointers. The pools are sized to fit the
//! 4 KiB budget the firmware reserves for descriptor state. A whole
//! parse either fits or fails visibly; there is no fallback heap
//! allocation and no per-node free; [`Arena::reset`] drops everything
//! at once, which invalidates every index handed out before.

use std::mem::size_of;

use crate::{Report, Segment};

/// Total byte budget for parsed descriptor state.
const ARENA_SIZE: usize = 4 * 1024;

pub(crate) const MAX_REPORTS: usize = 8;
pub(crate) const MAX_SEGMENTS: usize = 160;

const _: () = assert!(
    MAX_REPORTS * size_of::<Report>() + MAX_SEGMENTS * size_of::<Segment>() <= ARENA_SIZE,
    "report and segment pools exceed the arena budget"
);

/// Pool index of a [`Report`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReportIdx(u16);

/// Pool index of a [`Segment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SegmentIdx(u16);

#[derive(Debug)]
pub(crate) struct Arena {
    reports: Vec<Report>,
    segments: Vec<Segment>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            reports: Vec::with_capacity(MAX_REPORTS),
            segments: Vec::with_capacity(MAX_SEGMENTS),
        }
    }

    /// Drop all nodes. Indices from earlier parses are invalid after
    /// this call.
    pub fn reset(&mut self) {
        self.reports.clear();
        self.segments.clear();
    }

    pub fn alloc_report(&mut self, report: Report) -> Option<ReportIdx> {
        if self.reports.len() == MAX_REPORTS {
            log::warn!("arena out of space for report records");
            return None;
        }
        self.reports.push(report);
        Some(ReportIdx((self.reports.len() - 1) as u16))
    }

    pub fn alloc_segment(&mut self, segment: Segment) -> Option<SegmentIdx> {
        if self.segments.len() == MAX_SEGMENTS {
            log::warn!("arena out of space for segment records");
            return None;
        }
        self.segments.push(segment);
        Some(SegmentIdx((self.segments.len() - 1) as u16))
    }

    pub fn report(&self, idx: ReportIdx) -> &Report {
        &self.reports[idx.0 as usize]
    }

    pub fn report_mut(&mut self, idx: ReportIdx) -> &mut Report {
        &mut self.reports[idx.0 as usize]
    }

    pub fn segment(&self, idx: SegmentIdx) -> &Segment {
        &self.segments[idx.0 as usize]
    }

    pub fn segment_mut(&mut self, idx: SegmentIdx) -> &mut Segment {
        &mut self.segments[idx.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_fill_up_and_reset() {
        let mut arena = Arena::new();
        for _ in 0..MAX_SEGMENTS {
            assert!(arena.alloc_segment(Segment::default()).is_some());
        }
        assert!(arena.alloc_segment(Segment::default()).is_none());

        arena.reset();
        assert!(arena.alloc_segment(Segment::default()).is_some());
    }

    #[test]
    fn indices_are_stable_within_a_parse() {
        let mut arena = Arena::new();
        let a = arena.alloc_segment(Segment::default()).unwrap();
        let b = arena.alloc_segment(Segment::default()).unwrap();
        assert_ne!(a, b);
        arena.segment_mut(a).start_bit = 7;
        assert_eq!(arena.segment(a).start_bit, 7);
        assert_eq!(arena.segment(b).start_bit, 0);
    }
}
