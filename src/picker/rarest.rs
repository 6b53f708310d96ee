use rand::Rng;

use super::PieceStats;
use crate::bitfield::Bitfield;
use crate::util::random_sample;

/// Rarest first: among the candidates, pick uniformly among those with
/// the lowest swarm availability. Random tie-breaking keeps a swarm of
/// clients from herding onto the same low index.
#[derive(Clone, Debug)]
pub struct Selector;

impl Selector {
    pub fn new() -> Selector {
        Selector
    }

    pub fn select<R: Rng>(
        &mut self,
        candidates: &Bitfield,
        stats: &PieceStats,
        rng: &mut R,
    ) -> Option<usize> {
        let min = candidates.iter().map(|i| stats.count(i)).min()?;
        random_sample(candidates.iter().filter(|&i| stats.count(i) == min), rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_picks_rarest() {
        let mut stats = PieceStats::new(4);
        // availability: [3, 1, 2, 1]
        for _ in 0..3 {
            stats.add_index(0);
        }
        stats.add_index(1);
        stats.add_index(2);
        stats.add_index(2);
        stats.add_index(3);

        let mut cand = Bitfield::new(4);
        cand.set_bit(0);
        cand.set_bit(2);
        let mut rng = StdRng::from_seed([3u8; 32]);
        let mut sel = Selector::new();
        // 2 is the rarest candidate; 1 and 3 are not candidates
        assert_eq!(sel.select(&cand, &stats, &mut rng), Some(2));

        cand.set_bit(1);
        cand.set_bit(3);
        // ties at availability 1: both 1 and 3 must be reachable
        let mut seen = [false; 4];
        for _ in 0..64 {
            let idx = sel.select(&cand, &stats, &mut rng).unwrap();
            seen[idx] = true;
        }
        assert!(seen[1] && seen[3]);
        assert!(!seen[0] && !seen[2]);
    }

    #[test]
    fn test_no_candidates() {
        let stats = PieceStats::new(4);
        let cand = Bitfield::new(4);
        let mut rng = StdRng::from_seed([3u8; 32]);
        assert_eq!(Selector::new().select(&cand, &stats, &mut rng), None);
    }
}
