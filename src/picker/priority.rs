use rand::Rng;

use super::{PieceStats, SelectorKind};
use crate::bitfield::{Bitfield, BlockTracker};

/// Wraps another selector with an explicit first-chance index list:
/// the first listed index that is still a candidate wins, and only
/// when none is does the wrapped selector run.
#[derive(Clone, Debug)]
pub struct PrioritySelector {
    preferred: Vec<usize>,
    inner: Box<SelectorKind>,
}

impl PrioritySelector {
    pub fn new(preferred: Vec<usize>, inner: SelectorKind) -> PrioritySelector {
        PrioritySelector {
            preferred,
            inner: Box::new(inner),
        }
    }

    pub fn set_preferred(&mut self, preferred: Vec<usize>) {
        self.preferred = preferred;
    }

    pub fn select<R: Rng>(
        &mut self,
        candidates: &Bitfield,
        tracker: &BlockTracker,
        stats: &PieceStats,
        rng: &mut R,
    ) -> Option<usize> {
        if let Some(&idx) = self.preferred.iter().find(|&&i| candidates.has_bit(i)) {
            return Some(idx);
        }
        self.inner.select(candidates, tracker, stats, rng)
    }
}
