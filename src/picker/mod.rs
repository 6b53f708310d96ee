use rand::Rng;

use crate::bitfield::{Bitfield, BlockTracker};
use crate::config::{Config, SelectorChoice};

mod geom;
mod inorder;
mod priority;
mod random;
mod rarest;
mod sparse;

#[cfg(test)]
mod tests;

pub use self::priority::PrioritySelector;

/// Swarm-wide piece availability, one counter per index. Fed by the
/// storage layer as peers announce, join and leave; read by the
/// rarest-first selector.
#[derive(Clone, Debug)]
pub struct PieceStats {
    counts: Vec<u32>,
}

impl PieceStats {
    pub fn new(pieces: usize) -> PieceStats {
        PieceStats {
            counts: vec![0; pieces],
        }
    }

    pub fn count(&self, index: usize) -> u32 {
        self.counts.get(index).cloned().unwrap_or(0)
    }

    pub fn add_index(&mut self, index: usize) {
        if let Some(c) = self.counts.get_mut(index) {
            *c += 1;
        }
    }

    pub fn sub_index(&mut self, index: usize) {
        if let Some(c) = self.counts.get_mut(index) {
            *c = c.saturating_sub(1);
        }
    }

    pub fn add_bitfield(&mut self, peer: &Bitfield) {
        for idx in peer.iter() {
            self.add_index(idx);
        }
    }

    pub fn sub_bitfield(&mut self, peer: &Bitfield) {
        for idx in peer.iter() {
            self.sub_index(idx);
        }
    }
}

/// The closed set of piece selection strategies. Given the candidate
/// plane (missing, unclaimed, filter-selected, peer-held bits), each
/// picks the next index to request or reports that nothing is
/// eligible.
#[derive(Clone, Debug)]
pub enum SelectorKind {
    Rarest(rarest::Selector),
    InOrder(inorder::Selector),
    Random(random::Selector),
    Geom(geom::Selector),
    Sparse(sparse::Selector),
    Priority(PrioritySelector),
}

impl SelectorKind {
    pub fn from_choice(choice: SelectorChoice, config: &Config) -> SelectorKind {
        match choice {
            SelectorChoice::Rarest => SelectorKind::Rarest(rarest::Selector::new()),
            SelectorChoice::Inorder => SelectorKind::InOrder(inorder::Selector::new()),
            SelectorChoice::Random => SelectorKind::Random(random::Selector::new()),
            SelectorChoice::Geom => SelectorKind::Geom(geom::Selector::new(config.geom_ratio)),
            SelectorChoice::Sparse => SelectorKind::Sparse(sparse::Selector::new()),
        }
    }

    pub fn select<R: Rng>(
        &mut self,
        candidates: &Bitfield,
        tracker: &BlockTracker,
        stats: &PieceStats,
        rng: &mut R,
    ) -> Option<usize> {
        match self {
            SelectorKind::Rarest(s) => s.select(candidates, stats, rng),
            SelectorKind::InOrder(s) => s.select(candidates),
            SelectorKind::Random(s) => s.select(candidates, rng),
            SelectorKind::Geom(s) => s.select(candidates, rng),
            SelectorKind::Sparse(s) => s.select(candidates, tracker),
            SelectorKind::Priority(s) => s.select(candidates, tracker, stats, rng),
        }
    }
}
