use crate::bitfield::Bitfield;

/// Lowest candidate index, for sequential playback style downloads.
#[derive(Clone, Debug)]
pub struct Selector;

impl Selector {
    pub fn new() -> Selector {
        Selector
    }

    pub fn select(&mut self, candidates: &Bitfield) -> Option<usize> {
        candidates.iter().next()
    }
}
