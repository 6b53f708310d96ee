use crate::bitfield::{Bitfield, BlockTracker};

/// Longest sequence: extend the largest contiguous region still
/// missing, keeping integrated multi-source downloads mostly
/// sequential for early playability. Delegates to the tracker's run
/// scan, which also knows which neighboring blocks are claimed.
#[derive(Clone, Debug)]
pub struct Selector;

impl Selector {
    pub fn new() -> Selector {
        Selector
    }

    pub fn select(&mut self, candidates: &Bitfield, tracker: &BlockTracker) -> Option<usize> {
        // invert the candidate plane into an ignore plane
        let mut ignore = Bitfield::new(candidates.len());
        for i in 0..candidates.len() {
            if !candidates.has_bit(i) {
                ignore.set_bit(i);
            }
        }
        tracker.sparse_missing_unused_index(Some(&ignore))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_run_start() {
        let mut tracker = BlockTracker::new(16, 16 * 10);
        tracker.set_bit(0);
        tracker.set_bit(4);
        let cand = tracker.missing_unused_bitfield(None);
        // runs [1..4) and [5..10); the longer one starts at 5
        assert_eq!(Selector::new().select(&cand, &tracker), Some(5));
    }

    #[test]
    fn test_candidate_mask_respected() {
        let tracker = BlockTracker::new(16, 16 * 10);
        let mut cand = Bitfield::new(10);
        for i in 6..9 {
            cand.set_bit(i);
        }
        assert_eq!(Selector::new().select(&cand, &tracker), Some(6));
        assert_eq!(Selector::new().select(&Bitfield::new(10), &tracker), None);
    }
}
