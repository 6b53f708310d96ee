use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use rand::Rng;
use sha1::{Digest, Sha1};

use crate::bitfield::BlockTracker;
use crate::util::FHashSet;

/// Request granularity inside a piece.
pub const BLOCK_LEN: u64 = 16_384;

/// One downloadable unit: a BitTorrent piece, a checksum chunk, or a
/// generic segment. Subdivided into 16 KiB blocks tracked by an
/// internal have/use plane pair, with an incremental SHA-1 context
/// that stays valid only while data arrives in order.
///
/// Identity is the index alone: two pieces with the same index are the
/// same logical piece regardless of length or contents.
#[derive(Clone)]
pub struct Piece {
    index: usize,
    length: u64,
    blocks: BlockTracker,
    hash: Option<Sha1>,
    hashed: u64,
    out_of_order: bool,
    owners: FHashSet<u64>,
    cached: bool,
}

impl Piece {
    pub fn new(index: usize, length: u64) -> Piece {
        Piece {
            index,
            length,
            blocks: BlockTracker::new(BLOCK_LEN, length),
            hash: None,
            hashed: 0,
            out_of_order: false,
            owners: FHashSet::default(),
            cached: false,
        }
    }

    /// A piece for a stream of as yet unknown length. It has no block
    /// plane until the length is fixed with `set_length`.
    pub fn new_unknown(index: usize) -> Piece {
        Piece::new(index, 0)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Fixes or revises the byte length. The block plane is rebuilt,
    /// so any completion state is discarded; callers only use this
    /// before data tracking starts or when growing an unknown-length
    /// stream piece.
    pub fn set_length(&mut self, length: u64) {
        self.length = length;
        self.blocks = BlockTracker::new(BLOCK_LEN, length);
    }

    pub fn block_count(&self) -> usize {
        self.blocks.blocks()
    }

    pub fn block_len_at(&self, block: usize) -> u64 {
        self.blocks.block_len_at(block)
    }

    pub fn has_block(&self, block: usize) -> bool {
        self.blocks.is_bit_set(block)
    }

    pub fn is_block_used(&self, block: usize) -> bool {
        self.blocks.is_use_bit_set(block)
    }

    /// Marks a block received: have set, claim released.
    pub fn complete_block(&mut self, block: usize) {
        self.blocks.set_bit(block);
        self.blocks.unset_use_bit(block);
    }

    /// Releases a claim without touching completion, for requests
    /// cancelled before their data arrived.
    pub fn cancel_block(&mut self, block: usize) {
        self.blocks.unset_use_bit(block);
    }

    /// Lowest unclaimed missing block, claimed before returning so the
    /// caller sees check-and-mark as one step.
    pub fn missing_unused_block_index(&mut self) -> Option<usize> {
        let idx = self.blocks.first_missing_unused_index(None)?;
        self.blocks.set_use_bit(idx);
        Some(idx)
    }

    /// Random missing block regardless of claims (end-game racing),
    /// also claimed before returning.
    pub fn missing_block_index<R: Rng>(&mut self, rng: &mut R) -> Option<usize> {
        let idx = self.blocks.get_missing_index_any(rng)?;
        self.blocks.set_use_bit(idx);
        Some(idx)
    }

    pub fn all_missing_block_indexes(&self) -> Vec<usize> {
        self.blocks.all_missing_indexes(None)
    }

    pub fn count_completed_block(&self) -> usize {
        self.block_count() - self.blocks.count_missing_block()
    }

    pub fn count_missing_block(&self) -> usize {
        self.blocks.count_missing_block()
    }

    pub fn completed_length(&self) -> u64 {
        self.blocks.completed_len()
    }

    pub fn piece_complete(&self) -> bool {
        self.block_count() > 0 && self.blocks.is_all_bit_set()
    }

    pub fn clear_all_blocks(&mut self) {
        self.blocks.clear_all();
        self.blocks.clear_all_use();
        self.destroy_hash();
    }

    pub fn set_all_blocks(&mut self) {
        self.blocks.set_all();
        self.blocks.clear_all_use();
    }

    pub fn bitfield_bytes(&self) -> Box<[u8]> {
        self.blocks.bytes()
    }

    pub fn bitfield_len(&self) -> usize {
        self.blocks.bitfield_bytes()
    }

    pub fn set_bitfield_bytes(&mut self, data: &[u8]) -> bool {
        self.blocks.set_bytes(data)
    }

    // Incremental hashing. The context is only valid while bytes are
    // fed strictly in order; an out-of-order feed invalidates it and
    // the digest must be recomputed from disk once the piece is whole.

    pub fn update_hash(&mut self, offset: u64, data: &[u8]) {
        if self.out_of_order {
            return;
        }
        if offset != self.hashed {
            self.out_of_order = true;
            self.hash = None;
            return;
        }
        self.hash.get_or_insert_with(Sha1::new).update(data);
        self.hashed += data.len() as u64;
    }

    /// True when the streaming context covers the whole piece, i.e.
    /// the fast path is available and no reread is needed.
    pub fn is_hash_calculated(&self) -> bool {
        !self.out_of_order && self.hash.is_some() && self.hashed == self.length
    }

    pub fn take_digest(&mut self) -> Option<[u8; 20]> {
        if !self.is_hash_calculated() {
            return None;
        }
        self.hash.take().map(|ctx| ctx.finalize().into())
    }

    pub fn destroy_hash(&mut self) {
        self.hash = None;
        self.hashed = 0;
        self.out_of_order = false;
    }

    // End-game bookkeeping: which connections are feeding this piece.

    pub fn add_owner(&mut self, cuid: u64) {
        self.owners.insert(cuid);
    }

    pub fn remove_owner(&mut self, cuid: u64) {
        self.owners.remove(&cuid);
    }

    pub fn has_owner(&self, cuid: u64) -> bool {
        self.owners.contains(&cuid)
    }

    pub fn unowned(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

impl PartialEq for Piece {
    fn eq(&self, other: &Piece) -> bool {
        self.index == other.index
    }
}

impl Eq for Piece {}

impl PartialOrd for Piece {
    fn partial_cmp(&self, other: &Piece) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Piece {
    fn cmp(&self, other: &Piece) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl Hash for Piece {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl ::std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(
            f,
            "Piece {{ index: {}, length: {}, blocks: {}/{} }}",
            self.index,
            self.length,
            self.count_completed_block(),
            self.block_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::sha1_hash;
    use std::collections::HashSet;

    #[test]
    fn test_block_lifecycle() {
        let mut p = Piece::new(3, BLOCK_LEN * 2 + 100);
        assert_eq!(p.block_count(), 3);
        assert_eq!(p.block_len_at(2), 100);

        let b = p.missing_unused_block_index().unwrap();
        assert_eq!(b, 0);
        // claimed, so the next claim skips it
        assert_eq!(p.missing_unused_block_index(), Some(1));
        p.cancel_block(1);
        assert_eq!(p.missing_unused_block_index(), Some(1));

        p.complete_block(0);
        assert!(p.has_block(0));
        assert!(!p.is_block_used(0));
        assert!(!p.piece_complete());
        p.complete_block(1);
        p.complete_block(2);
        assert!(p.piece_complete());
        assert_eq!(p.missing_unused_block_index(), None);
    }

    #[test]
    fn test_completed_length_short_tail() {
        let mut p = Piece::new(0, BLOCK_LEN + 10);
        p.complete_block(1);
        assert_eq!(p.completed_length(), 10);
        p.complete_block(0);
        assert_eq!(p.completed_length(), BLOCK_LEN + 10);
    }

    #[test]
    fn test_equality_is_index_only() {
        let a = Piece::new(4, 100);
        let b = Piece::new(4, 999);
        let c = Piece::new(5, 100);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(Piece::new(4, 100));
        assert!(!set.insert(Piece::new(4, 999)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_sequential_hash_fast_path() {
        let data = vec![0xabu8; 300];
        let mut p = Piece::new(0, 300);
        p.update_hash(0, &data[..100]);
        p.update_hash(100, &data[100..]);
        assert!(p.is_hash_calculated());
        assert_eq!(p.take_digest(), Some(sha1_hash(&data)));
    }

    #[test]
    fn test_out_of_order_hash_invalidates() {
        let mut p = Piece::new(0, 300);
        p.update_hash(100, &[0u8; 100]);
        assert!(!p.is_hash_calculated());
        p.update_hash(0, &[0u8; 100]);
        p.update_hash(200, &[0u8; 100]);
        assert!(!p.is_hash_calculated());
        assert_eq!(p.take_digest(), None);
    }

    #[test]
    fn test_clear_resets_hash() {
        let mut p = Piece::new(0, 100);
        p.update_hash(0, &[1u8; 100]);
        assert!(p.is_hash_calculated());
        p.clear_all_blocks();
        assert!(!p.is_hash_calculated());
        // a fresh sequential feed works again
        p.update_hash(0, &[1u8; 100]);
        assert!(p.is_hash_calculated());
    }

    #[test]
    fn test_owners() {
        let mut p = Piece::new(0, 100);
        assert!(p.unowned());
        p.add_owner(11);
        p.add_owner(12);
        assert!(p.has_owner(11));
        p.remove_owner(11);
        assert!(!p.unowned());
        p.remove_owner(12);
        assert!(p.unowned());
    }

    #[test]
    fn test_unknown_length_growth() {
        let mut p = Piece::new_unknown(0);
        assert_eq!(p.block_count(), 0);
        assert!(!p.piece_complete());
        p.set_length(5000);
        assert_eq!(p.block_count(), 1);
        p.complete_block(0);
        assert!(p.piece_complete());
        assert_eq!(p.completed_length(), 5000);
    }
}
