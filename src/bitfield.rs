use std::fmt;

use rand::Rng;

/// A fixed-length bit plane over block indices. The backing buffer is
/// sized at construction and never grows; copies are deep.
#[derive(Clone, PartialEq)]
pub struct Bitfield {
    len: usize,
    data: Box<[u8]>,
    set: usize,
}

impl Bitfield {
    pub fn new(len: usize) -> Bitfield {
        let size = div_round_up!(len, 8);
        Bitfield {
            len,
            data: vec![0; size].into_boxed_slice(),
            set: 0,
        }
    }

    /// Builds a plane from raw bytes. Spare bits beyond `len` are
    /// dropped, not carried.
    pub fn from_bytes(b: &[u8], len: usize) -> Bitfield {
        let size = div_round_up!(len, 8);
        let mut vec = b.to_vec();
        vec.resize(size, 0);
        if len % 8 > 0 && size > 0 {
            vec[size - 1] &= 0xff << (8 - len % 8);
        }
        let set = vec.iter().map(|b| b.count_ones() as usize).sum();
        Bitfield {
            len,
            data: vec.into_boxed_slice(),
            set,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&self) -> usize {
        self.set
    }

    pub fn bytes(&self) -> usize {
        self.data.len()
    }

    /// Raw bytes with spare bits zeroed, suitable for the wire and the
    /// control file.
    pub fn data(&self) -> Box<[u8]> {
        self.data.clone()
    }

    pub fn byte_at(&self, pos: usize) -> u8 {
        self.data[pos]
    }

    pub fn complete(&self) -> bool {
        self.set == self.len
    }

    pub fn has_bit(&self, pos: usize) -> bool {
        if pos >= self.len {
            return false;
        }
        self.data[pos / 8] & (128 >> (pos % 8)) != 0
    }

    pub fn set_bit(&mut self, pos: usize) -> bool {
        if pos >= self.len {
            return false;
        }
        let mask = 128 >> (pos % 8);
        if self.data[pos / 8] & mask == 0 {
            self.data[pos / 8] |= mask;
            self.set += 1;
        }
        true
    }

    pub fn unset_bit(&mut self, pos: usize) -> bool {
        if pos >= self.len {
            return false;
        }
        let mask = 128 >> (pos % 8);
        if self.data[pos / 8] & mask != 0 {
            self.data[pos / 8] &= !mask;
            self.set -= 1;
        }
        true
    }

    pub fn set_all(&mut self) {
        for i in 0..self.len {
            self.set_bit(i);
        }
    }

    pub fn clear_all(&mut self) {
        for b in self.data.iter_mut() {
            *b = 0;
        }
        self.set = 0;
    }

    /// Replaces the plane's contents. The byte length must match; a
    /// mismatched plane is rejected without modification.
    pub fn set_data(&mut self, b: &[u8]) -> bool {
        if b.len() != self.data.len() {
            return false;
        }
        self.data.copy_from_slice(b);
        if self.len % 8 > 0 && !self.data.is_empty() {
            let last = self.data.len() - 1;
            self.data[last] &= 0xff << (8 - self.len % 8);
        }
        self.set = self.data.iter().map(|b| b.count_ones() as usize).sum();
        true
    }

    pub fn iter(&self) -> BitfieldIter<'_> {
        BitfieldIter { bf: self, idx: 0 }
    }
}

impl fmt::Debug for Bitfield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitfield {{ len: {}, bits: ", self.len)?;
        for i in 0..self.len {
            write!(f, "{}", if self.has_bit(i) { "1" } else { "0" })?;
        }
        write!(f, " }}")
    }
}

pub struct BitfieldIter<'a> {
    bf: &'a Bitfield,
    idx: usize,
}

impl<'a> Iterator for BitfieldIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.idx < self.bf.len() {
            self.idx += 1;
            if self.bf.has_bit(self.idx - 1) {
                return Some(self.idx - 1);
            }
        }
        None
    }
}

/// Tracks which fixed-size blocks of a download have been received
/// ("have" plane), which are claimed by an in-flight request ("use"
/// plane), and optionally which are wanted at all (additive filter
/// plane consulted only while enabled). The last block may be shorter
/// than `block_len`; byte-length queries account for it.
#[derive(Clone)]
pub struct BlockTracker {
    block_len: u64,
    total_len: u64,
    blocks: usize,
    have: Bitfield,
    used: Bitfield,
    filter: Option<Bitfield>,
    filter_enabled: bool,
}

impl BlockTracker {
    /// A tracker with `block_len <= 0` or `total_len == 0` holds zero
    /// blocks; every query over it is vacuous.
    pub fn new(block_len: u64, total_len: u64) -> BlockTracker {
        let blocks = if block_len == 0 || total_len == 0 {
            0
        } else {
            div_round_up!(total_len, block_len) as usize
        };
        BlockTracker {
            block_len,
            total_len,
            blocks,
            have: Bitfield::new(blocks),
            used: Bitfield::new(blocks),
            filter: None,
            filter_enabled: false,
        }
    }

    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn max_index(&self) -> Option<usize> {
        self.blocks.checked_sub(1)
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn block_len(&self) -> u64 {
        self.block_len
    }

    pub fn last_block_len(&self) -> u64 {
        self.total_len - self.block_len * (self.blocks as u64 - 1)
    }

    /// Logical length of the block at `index`, 0 out of range.
    pub fn block_len_at(&self, index: usize) -> u64 {
        if self.blocks == 0 || index >= self.blocks {
            0
        } else if index == self.blocks - 1 {
            self.last_block_len()
        } else {
            self.block_len
        }
    }

    pub fn bitfield_bytes(&self) -> usize {
        self.have.bytes()
    }

    pub fn have(&self) -> &Bitfield {
        &self.have
    }

    // Bit manipulation

    pub fn set_bit(&mut self, index: usize) -> bool {
        self.have.set_bit(index)
    }

    pub fn unset_bit(&mut self, index: usize) -> bool {
        self.have.unset_bit(index)
    }

    pub fn is_bit_set(&self, index: usize) -> bool {
        self.have.has_bit(index)
    }

    pub fn set_use_bit(&mut self, index: usize) -> bool {
        self.used.set_bit(index)
    }

    pub fn unset_use_bit(&mut self, index: usize) -> bool {
        self.used.unset_bit(index)
    }

    pub fn is_use_bit_set(&self, index: usize) -> bool {
        self.used.has_bit(index)
    }

    pub fn set_all(&mut self) {
        self.have.set_all();
    }

    pub fn clear_all(&mut self) {
        self.have.clear_all();
    }

    pub fn set_all_use(&mut self) {
        self.used.set_all();
    }

    pub fn clear_all_use(&mut self) {
        self.used.clear_all();
    }

    pub fn set_bit_range(&mut self, start: usize, end: usize) {
        for i in start..=end {
            self.set_bit(i);
        }
    }

    pub fn unset_bit_range(&mut self, start: usize, end: usize) {
        for i in start..=end {
            self.unset_bit(i);
        }
    }

    pub fn is_bit_range_set(&self, start: usize, end: usize) -> bool {
        (start..=end).all(|i| self.is_bit_set(i))
    }

    /// True if every block overlapping [offset, offset+length) is set.
    pub fn is_offset_range_set(&self, offset: u64, mut length: u64) -> bool {
        if length == 0 || offset >= self.total_len {
            return false;
        }
        if self.total_len < offset + length {
            length = self.total_len - offset;
        }
        let start = (offset / self.block_len) as usize;
        let end = ((offset + length - 1) / self.block_len) as usize;
        self.is_bit_range_set(start, end)
    }

    /// Raw have-plane bytes, spare bits zeroed.
    pub fn bytes(&self) -> Box<[u8]> {
        self.have.data()
    }

    /// Replaces the have plane wholesale and drops every use bit, as
    /// when adopting a resumed or validated bitmap. A byte-length
    /// mismatch is rejected.
    pub fn set_bytes(&mut self, data: &[u8]) -> bool {
        if !self.have.set_data(data) {
            return false;
        }
        self.used.clear_all();
        true
    }

    // Candidate selection. Each query builds the candidate mask a byte
    // at a time: peer & !have [& !used] [& filter].

    fn candidate_byte(&self, i: usize, peer: Option<&Bitfield>, exclude_used: bool) -> u8 {
        let mut b = !self.have.byte_at(i);
        if let Some(p) = peer {
            b &= p.byte_at(i);
        }
        if exclude_used {
            b &= !self.used.byte_at(i);
        }
        if self.filter_enabled {
            if let Some(f) = self.filter.as_ref() {
                b &= f.byte_at(i);
            }
        }
        if i == self.have.bytes() - 1 && self.blocks % 8 > 0 {
            b &= 0xff << (8 - self.blocks % 8);
        }
        b
    }

    fn peer_len_ok(&self, peer: Option<&Bitfield>) -> bool {
        peer.map_or(true, |p| p.len() == self.blocks)
    }

    fn count_candidates(&self, peer: Option<&Bitfield>, exclude_used: bool) -> usize {
        (0..self.have.bytes())
            .map(|i| self.candidate_byte(i, peer, exclude_used).count_ones() as usize)
            .sum()
    }

    /// Picks the Nth candidate bit with N uniform over the candidate
    /// count, so repeated queries spread across the candidate set
    /// instead of herding on the first missing index.
    fn random_candidate<R: Rng>(
        &self,
        peer: Option<&Bitfield>,
        exclude_used: bool,
        rng: &mut R,
    ) -> Option<usize> {
        if self.blocks == 0 || !self.peer_len_ok(peer) {
            return None;
        }
        let count = self.count_candidates(peer, exclude_used);
        if count == 0 {
            return None;
        }
        let mut nth = rng.gen_range(0, count) + 1;
        for i in 0..self.have.bytes() {
            let b = self.candidate_byte(i, peer, exclude_used);
            let ones = b.count_ones() as usize;
            if ones < nth {
                nth -= ones;
                continue;
            }
            for bit in 0..8 {
                if b & (128 >> bit) != 0 {
                    nth -= 1;
                    if nth == 0 {
                        return Some(i * 8 + bit);
                    }
                }
            }
        }
        None
    }

    fn first_candidate(&self, peer: Option<&Bitfield>, exclude_used: bool) -> Option<usize> {
        if self.blocks == 0 || !self.peer_len_ok(peer) {
            return None;
        }
        for i in 0..self.have.bytes() {
            let b = self.candidate_byte(i, peer, exclude_used);
            if b != 0 {
                return Some(i * 8 + b.leading_zeros() as usize);
            }
        }
        None
    }

    pub fn has_missing(&self, peer: &Bitfield) -> bool {
        self.first_candidate(Some(peer), false).is_some()
    }

    pub fn has_missing_unused(&self, peer: &Bitfield) -> bool {
        self.first_candidate(Some(peer), true).is_some()
    }

    pub fn get_missing_index<R: Rng>(&self, peer: &Bitfield, rng: &mut R) -> Option<usize> {
        self.random_candidate(Some(peer), false, rng)
    }

    pub fn get_missing_unused_index<R: Rng>(&self, peer: &Bitfield, rng: &mut R) -> Option<usize> {
        self.random_candidate(Some(peer), true, rng)
    }

    pub fn get_missing_index_any<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        self.random_candidate(None, false, rng)
    }

    pub fn get_missing_unused_index_any<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        self.random_candidate(None, true, rng)
    }

    /// Deterministic lowest-index candidate, for sequential segment
    /// downloads.
    pub fn first_missing_unused_index(&self, peer: Option<&Bitfield>) -> Option<usize> {
        self.first_candidate(peer, true)
    }

    pub fn first_missing_index(&self, peer: Option<&Bitfield>) -> Option<usize> {
        self.first_candidate(peer, false)
    }

    /// All missing indices in ascending order, recomputed per call.
    pub fn all_missing_indexes(&self, peer: Option<&Bitfield>) -> Vec<usize> {
        self.collect_candidates(peer, false).iter().collect()
    }

    /// Candidate plane `peer & !have [& filter]`.
    pub fn missing_bitfield(&self, peer: Option<&Bitfield>) -> Bitfield {
        self.collect_candidates(peer, false)
    }

    /// Candidate plane `peer & !have & !used [& filter]`.
    pub fn missing_unused_bitfield(&self, peer: Option<&Bitfield>) -> Bitfield {
        self.collect_candidates(peer, true)
    }

    fn collect_candidates(&self, peer: Option<&Bitfield>, exclude_used: bool) -> Bitfield {
        let mut out = Bitfield::new(self.blocks);
        if !self.peer_len_ok(peer) {
            return out;
        }
        let bytes: Vec<u8> = (0..self.have.bytes())
            .map(|i| self.candidate_byte(i, peer, exclude_used))
            .collect();
        out.set_data(&bytes);
        out
    }

    /// Picks the start of the longest run of unclaimed missing blocks;
    /// when the block just before the run is itself claimed, splits the
    /// run instead so two sources do not chase the same boundary.
    /// Drives mostly-sequential multi-connection segment downloads.
    pub fn sparse_missing_unused_index(&self, ignore: Option<&Bitfield>) -> Option<usize> {
        if self.blocks == 0 || !self.peer_len_ok(ignore) {
            return None;
        }
        let blocked = |i: usize| {
            self.is_bit_set(i)
                || self.is_use_bit_set(i)
                || ignore.map_or(false, |b| b.has_bit(i))
                || (self.filter_enabled
                    && self.filter.as_ref().map_or(false, |f| !f.has_bit(i)))
        };
        let mut best: Option<(usize, usize)> = None;
        let mut i = 0;
        while i < self.blocks {
            if blocked(i) {
                i += 1;
                continue;
            }
            let start = i;
            while i < self.blocks && !blocked(i) {
                i += 1;
            }
            if best.map_or(true, |(s, e)| i - start > e - s) {
                best = Some((start, i));
            }
        }
        best.map(|(start, end)| {
            if start == 0 || !self.is_use_bit_set(start - 1) {
                start
            } else {
                start + (end - start) / 2
            }
        })
    }

    /// Contiguous unclaimed length starting at `index`, in bytes.
    pub fn missing_unused_length_from(&self, index: usize) -> u64 {
        let mut length = 0;
        for i in index..self.blocks {
            if self.is_bit_set(i) || self.is_use_bit_set(i) {
                break;
            }
            length += self.block_len_at(i);
        }
        length
    }

    // Counts and lengths. All of these respect the filter while it is
    // enabled.

    pub fn count_missing_block(&self) -> usize {
        self.count_candidates(None, false)
    }

    pub fn count_block(&self) -> usize {
        if self.filter_enabled {
            self.filter.as_ref().map_or(0, |f| f.set())
        } else {
            self.blocks
        }
    }

    pub fn is_all_bit_set(&self) -> bool {
        self.have.complete()
    }

    pub fn is_filtered_all_bit_set(&self) -> bool {
        if !self.filter_enabled {
            return self.is_all_bit_set();
        }
        match self.filter.as_ref() {
            Some(f) => (0..self.have.bytes())
                .all(|i| self.have.byte_at(i) & f.byte_at(i) == f.byte_at(i)),
            None => self.is_all_bit_set(),
        }
    }

    fn completed_len_of(&self, plane: &Bitfield) -> u64 {
        let completed = plane.set() as u64;
        if completed == 0 {
            0
        } else if plane.has_bit(self.blocks - 1) {
            (completed - 1) * self.block_len + self.last_block_len()
        } else {
            completed * self.block_len
        }
    }

    pub fn completed_len(&self) -> u64 {
        if self.blocks == 0 {
            return 0;
        }
        self.completed_len_of(&self.have)
    }

    pub fn filtered_completed_len(&self) -> u64 {
        if self.blocks == 0 {
            return 0;
        }
        if !self.filter_enabled {
            return self.completed_len();
        }
        let f = match self.filter.as_ref() {
            Some(f) => f,
            None => return self.completed_len(),
        };
        let bytes: Vec<u8> = (0..self.have.bytes())
            .map(|i| self.have.byte_at(i) & f.byte_at(i))
            .collect();
        let mut masked = Bitfield::new(self.blocks);
        masked.set_data(&bytes);
        self.completed_len_of(&masked)
    }

    pub fn filtered_total_len(&self) -> u64 {
        if !self.filter_enabled {
            return self.total_len;
        }
        let f = match self.filter.as_ref() {
            Some(f) => f,
            None => return self.total_len,
        };
        self.completed_len_of(f)
    }

    // Filter construction. The filter is additive: each call widens the
    // selected block range, and it only takes effect once enabled.

    fn ensure_filter(&mut self) -> &mut Bitfield {
        let blocks = self.blocks;
        self.filter.get_or_insert_with(|| Bitfield::new(blocks))
    }

    pub fn add_filter(&mut self, offset: u64, length: u64) {
        if length == 0 || self.blocks == 0 {
            self.ensure_filter();
            return;
        }
        let start = (offset / self.block_len) as usize;
        let end = ((offset + length - 1) / self.block_len) as usize;
        let blocks = self.blocks;
        let f = self.ensure_filter();
        for i in start..=end.min(blocks - 1) {
            f.set_bit(i);
        }
    }

    pub fn remove_filter(&mut self, offset: u64, length: u64) {
        if length == 0 || self.blocks == 0 {
            return;
        }
        let start = (offset / self.block_len) as usize;
        let end = ((offset + length - 1) / self.block_len) as usize;
        let blocks = self.blocks;
        let f = self.ensure_filter();
        for i in start..=end.min(blocks - 1) {
            f.unset_bit(i);
        }
    }

    pub fn enable_filter(&mut self) {
        self.ensure_filter();
        self.filter_enabled = true;
    }

    pub fn disable_filter(&mut self) {
        self.filter_enabled = false;
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.filter_enabled = false;
    }

    pub fn is_filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    /// Whether the index is wanted under the current filter; always
    /// true while filtering is disabled.
    pub fn in_filter(&self, index: usize) -> bool {
        !self.filter_enabled || self.filter.as_ref().map_or(true, |f| f.has_bit(index))
    }
}

impl fmt::Debug for BlockTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockTracker {{ blocks: {}, block_len: {}, total_len: {}, have: {}/{}, used: {} }}",
            self.blocks,
            self.block_len,
            self.total_len,
            self.have.set(),
            self.blocks,
            self.used.set(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::from_seed([7u8; 32])
    }

    #[test]
    fn test_plane_set_unset() {
        let mut bf = Bitfield::new(10);
        for i in 0..10 {
            assert!(!bf.has_bit(i));
            assert!(bf.set_bit(i));
            assert!(bf.has_bit(i));
        }
        assert!(bf.complete());
        assert!(bf.unset_bit(3));
        assert!(!bf.has_bit(3));
        assert_eq!(bf.set(), 9);
        assert!(!bf.set_bit(10));
    }

    #[test]
    fn test_plane_spare_bits() {
        let bf = Bitfield::from_bytes(&[0xff, 0xff], 11);
        let data = bf.data();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0], 0xff);
        assert_eq!(data[1], 0xe0);
        assert_eq!(bf.set(), 11);
    }

    #[test]
    fn test_round_trip() {
        let mut t = BlockTracker::new(1024, 10 * 1024);
        for i in 0..10 {
            assert!(t.set_bit(i));
            assert!(t.is_bit_set(i));
            assert!(t.unset_bit(i));
            assert!(!t.is_bit_set(i));
        }
        assert!(!t.set_bit(10));
    }

    #[test]
    fn test_short_last_block() {
        let mut t = BlockTracker::new(100, 250);
        assert_eq!(t.blocks(), 3);
        assert_eq!(t.last_block_len(), 50);
        t.set_bit(0);
        t.set_bit(1);
        t.set_bit(2);
        assert_eq!(t.completed_len(), 250);
    }

    #[test]
    fn test_completed_len_without_last() {
        let mut t = BlockTracker::new(100, 250);
        t.set_bit(0);
        t.set_bit(1);
        assert_eq!(t.completed_len(), 200);
        t.unset_bit(1);
        t.set_bit(2);
        assert_eq!(t.completed_len(), 150);
    }

    #[test]
    fn test_scenario_block_geometry() {
        let mut t = BlockTracker::new(16_384, 40_000);
        assert_eq!(t.blocks(), 3);
        assert_eq!(t.last_block_len(), 7232);
        assert_eq!(t.all_missing_indexes(None), vec![0, 1, 2]);
        t.set_bit(0);
        t.set_bit(1);
        t.set_bit(2);
        assert!(t.is_all_bit_set());
        assert_eq!(t.count_missing_block(), 0);
    }

    #[test]
    fn test_zero_blocks() {
        let t = BlockTracker::new(0, 0);
        assert_eq!(t.blocks(), 0);
        assert_eq!(t.all_missing_indexes(None), Vec::<usize>::new());
        assert_eq!(t.get_missing_index_any(&mut rng()), None);
        // vacuously complete
        assert!(t.is_all_bit_set());
        assert_eq!(t.completed_len(), 0);
    }

    #[test]
    fn test_missing_unused_exclusion() {
        let mut t = BlockTracker::new(16, 16 * 8);
        let mut peer = Bitfield::new(8);
        for i in 0..8 {
            peer.set_bit(i);
        }
        // claim everything except 5
        for i in 0..8 {
            if i != 5 {
                t.set_use_bit(i);
            }
        }
        let mut r = rng();
        for _ in 0..32 {
            assert_eq!(t.get_missing_unused_index(&peer, &mut r), Some(5));
        }
        t.set_use_bit(5);
        assert_eq!(t.get_missing_unused_index(&peer, &mut r), None);
        // the used-agnostic query still sees all of them
        assert!(t.get_missing_index(&peer, &mut r).is_some());
    }

    #[test]
    fn test_missing_respects_peer() {
        let t = BlockTracker::new(16, 16 * 10);
        let mut peer = Bitfield::new(10);
        peer.set_bit(4);
        let mut r = rng();
        for _ in 0..16 {
            assert_eq!(t.get_missing_index(&peer, &mut r), Some(4));
        }
        let short = Bitfield::new(3);
        assert_eq!(t.get_missing_index(&short, &mut r), None);
    }

    #[test]
    fn test_filter_isolation() {
        let mut t = BlockTracker::new(100, 300);
        t.add_filter(0, 100);
        t.enable_filter();
        assert_eq!(t.count_block(), 1);
        assert_eq!(t.filtered_total_len(), 100);
        assert!(!t.is_filtered_all_bit_set());
        t.set_bit(0);
        assert!(t.is_filtered_all_bit_set());
        assert!(!t.is_all_bit_set());
        assert_eq!(t.count_missing_block(), 0);
        t.disable_filter();
        assert_eq!(t.count_missing_block(), 2);
    }

    #[test]
    fn test_filter_additive() {
        let mut t = BlockTracker::new(100, 1000);
        t.add_filter(0, 100);
        t.add_filter(850, 100);
        t.enable_filter();
        assert_eq!(t.count_block(), 3);
        assert_eq!(t.all_missing_indexes(None), vec![0, 8, 9]);
        t.clear_filter();
        assert_eq!(t.count_block(), 10);
    }

    #[test]
    fn test_filtered_completed_len() {
        let mut t = BlockTracker::new(100, 250);
        t.add_filter(200, 50);
        t.enable_filter();
        t.set_bit(0);
        assert_eq!(t.filtered_completed_len(), 0);
        t.set_bit(2);
        assert_eq!(t.filtered_completed_len(), 50);
        assert_eq!(t.completed_len(), 150);
    }

    #[test]
    fn test_first_missing_unused() {
        let mut t = BlockTracker::new(16, 16 * 4);
        t.set_bit(0);
        t.set_use_bit(1);
        assert_eq!(t.first_missing_unused_index(None), Some(2));
        assert_eq!(t.first_missing_index(None), Some(1));
    }

    #[test]
    fn test_set_bytes_clears_use() {
        let mut t = BlockTracker::new(16, 16 * 10);
        t.set_use_bit(3);
        let mut plane = Bitfield::new(10);
        plane.set_bit(0);
        plane.set_bit(9);
        assert!(t.set_bytes(&plane.data()));
        assert!(t.is_bit_set(0));
        assert!(t.is_bit_set(9));
        assert!(!t.is_use_bit_set(3));
        assert!(!t.set_bytes(&[0u8; 1]));
    }

    #[test]
    fn test_offset_range() {
        let mut t = BlockTracker::new(100, 1000);
        t.set_bit_range(2, 4);
        assert!(t.is_offset_range_set(200, 300));
        assert!(!t.is_offset_range_set(150, 300));
        assert!(!t.is_offset_range_set(200, 0));
        assert!(!t.is_offset_range_set(1000, 10));
    }

    #[test]
    fn test_sparse_longest_run() {
        let mut t = BlockTracker::new(16, 16 * 10);
        // runs: [1..3] free, [5..10] free
        t.set_bit(0);
        t.set_bit(3);
        t.set_bit(4);
        assert_eq!(t.sparse_missing_unused_index(None), Some(5));
        // claiming the block just before the run splits it
        t.set_use_bit(5);
        t.unset_bit(4);
        // runs now [1..3], [4..5)->blocked at 5.. actually [4] then [6..10]
        assert_eq!(t.sparse_missing_unused_index(None), Some(8));
    }

    #[test]
    fn test_missing_unused_length() {
        let mut t = BlockTracker::new(100, 250);
        assert_eq!(t.missing_unused_length_from(0), 250);
        t.set_use_bit(1);
        assert_eq!(t.missing_unused_length_from(0), 100);
        assert_eq!(t.missing_unused_length_from(2), 50);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut a = BlockTracker::new(16, 64);
        let b = a.clone();
        a.set_bit(0);
        assert!(!b.is_bit_set(0));
    }
}
