use rand::Rng;

use crate::bitfield::Bitfield;

/// Mostly sequential with occasional skips: walking the candidates in
/// ascending order, each is taken with probability `(ratio-1)/ratio`,
/// giving a geometric bias toward low indices that still tolerates
/// seeking. Falls back to the lowest candidate when the walk runs off
/// the end.
#[derive(Clone, Debug)]
pub struct Selector {
    ratio: f64,
}

impl Selector {
    pub fn new(ratio: f64) -> Selector {
        Selector { ratio }
    }

    pub fn select<R: Rng>(&mut self, candidates: &Bitfield, rng: &mut R) -> Option<usize> {
        let p = (self.ratio - 1.0) / self.ratio;
        let mut first = None;
        for idx in candidates.iter() {
            if first.is_none() {
                first = Some(idx);
            }
            if rng.gen::<f64>() < p {
                return Some(idx);
            }
        }
        first
    }
}
