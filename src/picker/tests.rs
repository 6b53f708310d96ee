use rand::StdRng;
use rand::SeedableRng;

use super::*;
use crate::config::Config;

fn setup() -> (BlockTracker, PieceStats, StdRng) {
    (
        BlockTracker::new(16_384, 16_384 * 8),
        PieceStats::new(8),
        StdRng::from_seed([11u8; 32]),
    )
}

#[test]
fn test_from_choice_dispatch() {
    let config: Config = Default::default();
    let (tracker, stats, mut rng) = setup();
    let mut cand = Bitfield::new(8);
    cand.set_bit(3);

    for &choice in &[
        SelectorChoice::Rarest,
        SelectorChoice::Inorder,
        SelectorChoice::Random,
        SelectorChoice::Geom,
        SelectorChoice::Sparse,
    ] {
        let mut sel = SelectorKind::from_choice(choice, &config);
        assert_eq!(
            sel.select(&cand, &tracker, &stats, &mut rng),
            Some(3),
            "{:?} must find the only candidate",
            choice
        );
        assert_eq!(
            sel.select(&Bitfield::new(8), &tracker, &stats, &mut rng),
            None,
            "{:?} must report an empty candidate set",
            choice
        );
    }
}

#[test]
fn test_stats_follow_peers() {
    let mut stats = PieceStats::new(4);
    let mut peer = Bitfield::new(4);
    peer.set_bit(0);
    peer.set_bit(2);
    stats.add_bitfield(&peer);
    stats.add_index(2);
    assert_eq!(stats.count(0), 1);
    assert_eq!(stats.count(2), 2);
    stats.sub_bitfield(&peer);
    assert_eq!(stats.count(0), 0);
    assert_eq!(stats.count(2), 1);
    // counters never underflow when a peer leaves twice
    stats.sub_index(0);
    assert_eq!(stats.count(0), 0);
}

#[test]
fn test_rarest_tracks_availability_changes() {
    let (tracker, mut stats, mut rng) = setup();
    let mut sel = SelectorKind::from_choice(SelectorChoice::Rarest, &Default::default());
    let mut cand = Bitfield::new(8);
    cand.set_bit(1);
    cand.set_bit(5);
    for _ in 0..4 {
        stats.add_index(1);
    }
    stats.add_index(5);
    assert_eq!(sel.select(&cand, &tracker, &stats, &mut rng), Some(5));
    for _ in 0..5 {
        stats.add_index(5);
    }
    assert_eq!(sel.select(&cand, &tracker, &stats, &mut rng), Some(1));
}

#[test]
fn test_priority_wrapping_rarest() {
    let (tracker, stats, mut rng) = setup();
    let inner = SelectorKind::from_choice(SelectorChoice::Rarest, &Default::default());
    let mut sel = SelectorKind::Priority(PrioritySelector::new(vec![6], inner));
    let mut cand = Bitfield::new(8);
    cand.set_bit(2);
    cand.set_bit(6);
    assert_eq!(sel.select(&cand, &tracker, &stats, &mut rng), Some(6));
    cand.unset_bit(6);
    assert_eq!(sel.select(&cand, &tracker, &stats, &mut rng), Some(2));
}
