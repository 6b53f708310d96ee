use rand::Rng;

use crate::bitfield::Bitfield;
use crate::util::random_sample;

/// Uniformly random candidate.
#[derive(Clone, Debug)]
pub struct Selector;

impl Selector {
    pub fn new() -> Selector {
        Selector
    }

    pub fn select<R: Rng>(&mut self, candidates: &Bitfield, rng: &mut R) -> Option<usize> {
        random_sample(candidates.iter(), rng)
    }
}
