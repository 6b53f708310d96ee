use std::cmp;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::StdRng;
use rand::FromEntropy;
use sha1::{Digest, Sha1};

use super::{HaveEntry, PieceOutcome, PieceStorage};
use crate::bitfield::{Bitfield, BlockTracker};
use crate::config::Config;
use crate::disk::{DirectDiskAdaptor, DiskAdaptor, MultiDiskAdaptor, WriteCache};
use crate::error::Result;
use crate::info::Info;
use crate::picker::{PieceStats, SelectorKind};
use crate::piece::{Piece, BLOCK_LEN};

/// Piece storage for downloads whose total length is known up front:
/// the master have/use bitmap, the pool of in-flight pieces, swarm
/// rarity statistics and the disk adaptor all live here. The
/// in-flight pool is keyed and iterated by index so cache flushes
/// walk the file in ascending offset order.
///
/// Exclusive access per download is assumed; all mutation happens on
/// the scheduler's single logical thread.
pub struct IndexedStorage {
    info: Arc<Info>,
    config: Config,
    tracker: BlockTracker,
    pieces: BTreeMap<usize, Piece>,
    stats: PieceStats,
    selector: SelectorKind,
    stream_selector: SelectorKind,
    adaptor: Box<dyn DiskAdaptor>,
    cache: Option<WriteCache>,
    haves: Vec<HaveEntry>,
    advert_seq: u64,
    end_game: bool,
    rng: StdRng,
}

impl IndexedStorage {
    /// Builds storage over the download's destination: one direct
    /// adaptor for a single file, a splitting adaptor for several.
    pub fn new<P: AsRef<Path>>(info: Arc<Info>, config: Config, base: P) -> IndexedStorage {
        let adaptor: Box<dyn DiskAdaptor> = if info.single_file() {
            let path = base.as_ref().join(
                info.files
                    .get(0)
                    .map(|f| f.path.clone())
                    .unwrap_or_else(|| info.name.clone().into()),
            );
            Box::new(DirectDiskAdaptor::new(path, info.total_len))
        } else {
            debug!("instantiating multi file adaptor for {}", info.name);
            Box::new(MultiDiskAdaptor::new(base.as_ref(), info.clone()))
        };
        IndexedStorage::with_adaptor(info, config, adaptor)
    }

    pub fn with_adaptor(
        info: Arc<Info>,
        config: Config,
        adaptor: Box<dyn DiskAdaptor>,
    ) -> IndexedStorage {
        IndexedStorage::with_rng(info, config, adaptor, StdRng::from_entropy())
    }

    /// Full dependency injection, used by anything that needs
    /// reproducible selection.
    pub fn with_rng(
        info: Arc<Info>,
        config: Config,
        adaptor: Box<dyn DiskAdaptor>,
        rng: StdRng,
    ) -> IndexedStorage {
        let tracker = BlockTracker::new(u64::from(info.piece_len), info.total_len);
        let pieces = info.pieces();
        let cache = if config.write_cache_limit > 0 {
            Some(WriteCache::new(config.write_cache_limit))
        } else {
            None
        };
        IndexedStorage {
            tracker,
            pieces: BTreeMap::new(),
            stats: PieceStats::new(pieces),
            selector: SelectorKind::from_choice(config.selector, &config),
            stream_selector: SelectorKind::from_choice(config.stream_selector, &config),
            adaptor,
            cache,
            haves: Vec::new(),
            advert_seq: 0,
            end_game: false,
            rng,
            info,
            config,
        }
    }

    pub fn info(&self) -> &Arc<Info> {
        &self.info
    }

    pub fn tracker(&self) -> &BlockTracker {
        &self.tracker
    }

    pub fn adaptor_mut(&mut self) -> &mut dyn DiskAdaptor {
        &mut *self.adaptor
    }

    pub fn open(&mut self) -> Result<()> {
        self.adaptor.open()
    }

    pub fn open_existing(&mut self) -> Result<()> {
        self.adaptor.open_existing()
    }

    /// Flushes everything buffered and closes file handles. Cache
    /// entries survive only as written bytes after this.
    pub fn close(&mut self) -> Result<()> {
        if let Some(c) = self.cache.as_mut() {
            c.flush_all(&mut *self.adaptor)?;
        }
        self.adaptor.flush()?;
        self.adaptor.close();
        Ok(())
    }

    // End game

    pub fn is_end_game(&self) -> bool {
        self.end_game || self.tracker.count_missing_block() <= self.config.end_game_pieces
    }

    pub fn enter_end_game(&mut self) {
        self.end_game = true;
    }

    // Checkout and selection

    /// Claims `index` and returns the shared in-flight piece for it,
    /// creating one if this is the first claimant. In end game several
    /// owners may hold the same piece at once.
    pub fn check_out_piece(&mut self, index: usize, cuid: u64) -> &mut Piece {
        self.tracker.set_use_bit(index);
        let length = self.tracker.block_len_at(index);
        let cached = self.cache.is_some();
        let piece = self
            .pieces
            .entry(index)
            .or_insert_with(|| Piece::new(index, length));
        piece.add_owner(cuid);
        if cached {
            piece.set_cached(true);
        }
        piece
    }

    pub fn piece(&self, index: usize) -> Option<&Piece> {
        self.pieces.get(&index)
    }

    pub fn piece_mut(&mut self, index: usize) -> Option<&mut Piece> {
        self.pieces.get_mut(&index)
    }

    fn candidates(&self, peer: Option<&Bitfield>) -> Bitfield {
        if self.is_end_game() {
            self.tracker.missing_bitfield(peer)
        } else {
            self.tracker.missing_unused_bitfield(peer)
        }
    }

    fn select_from(&mut self, candidates: &Bitfield) -> Option<usize> {
        self.selector
            .select(candidates, &self.tracker, &self.stats, &mut self.rng)
    }

    /// Checks out enough pieces that their missing block counts sum to
    /// at least `min_blocks`, letting a connection pipeline several
    /// requests. `excluded` indices are never picked.
    pub fn get_missing_pieces(
        &mut self,
        peer: &Bitfield,
        min_blocks: usize,
        excluded: &[usize],
        cuid: u64,
    ) -> Vec<usize> {
        let mut cand = self.candidates(Some(peer));
        for &e in excluded {
            cand.unset_bit(e);
        }
        let mut out = Vec::new();
        let mut blocks = 0;
        while blocks < min_blocks {
            let idx = match self.select_from(&cand) {
                Some(idx) => idx,
                None => break,
            };
            cand.unset_bit(idx);
            let missing = {
                let piece = self.check_out_piece(idx, cuid);
                cmp::max(piece.count_missing_block(), 1)
            };
            blocks += missing;
            out.push(idx);
        }
        out
    }

    /// Explicit-index variant: only succeeds when the piece is still
    /// wanted, unclaimed, and filter-selected.
    pub fn get_missing_piece_at(&mut self, index: usize, cuid: u64) -> Option<usize> {
        if self.has_piece(index) || self.is_piece_used(index) || !self.tracker.in_filter(index) {
            return None;
        }
        self.check_out_piece(index, cuid);
        Some(index)
    }

    /// Segment selection for HTTP/FTP style downloads: no peer
    /// bitmaps, the stream selector picks straight off the master
    /// tracker.
    pub fn get_missing_stream_piece(&mut self, cuid: u64) -> Option<usize> {
        let cand = self.tracker.missing_unused_bitfield(None);
        let idx = self
            .stream_selector
            .select(&cand, &self.tracker, &self.stats, &mut self.rng)?;
        self.check_out_piece(idx, cuid);
        Some(idx)
    }

    // Data path

    /// Accepts one received block: dedups end-game duplicates, feeds
    /// the incremental hash, writes through the cache or straight to
    /// disk, and reports whether the piece is now whole.
    pub fn write_block(&mut self, index: usize, begin: u64, data: &[u8]) -> Result<bool> {
        let offset = self.info.piece_offset(index) + begin;
        let piece = match self.pieces.get_mut(&index) {
            Some(p) => p,
            // a slower source finishing after the piece was committed
            None if self.tracker.is_bit_set(index) => return Ok(true),
            None => bail!("piece {} is not checked out", index),
        };
        let block = (begin / BLOCK_LEN) as usize;
        if piece.has_block(block) {
            // duplicate data from an end-game race loses quietly
            return Ok(piece.piece_complete());
        }
        piece.update_hash(begin, data);
        piece.complete_block(block);
        if piece.is_cached() {
            self.cache
                .as_mut()
                .unwrap()
                .append(&mut *self.adaptor, index, offset, data.to_vec())?;
        } else {
            self.adaptor.write_data(data, offset)?;
        }
        Ok(self.pieces[&index].piece_complete())
    }

    fn read_piece_digest(&mut self, index: usize) -> Result<[u8; 20]> {
        let mut ctx = Sha1::new();
        let mut offset = self.info.piece_offset(index);
        let mut remaining = self.info.piece_len(index);
        let mut buf = vec![0u8; self.config.validate_read_len];
        while remaining > 0 {
            let want = cmp::min(remaining, buf.len() as u64) as usize;
            let got = self.adaptor.read_data(&mut buf[..want], offset)?;
            if got == 0 {
                break;
            }
            ctx.update(&buf[..got]);
            offset += got as u64;
            remaining -= got as u64;
        }
        Ok(ctx.finalize().into())
    }

    fn commit_piece(&mut self, index: usize) {
        self.pieces.remove(&index);
        if let Some(c) = self.cache.as_mut() {
            c.release(index);
        }
        self.tracker.set_bit(index);
        self.tracker.unset_use_bit(index);
        self.stats.add_index(index);
    }

    // Availability bookkeeping

    pub fn add_peer_bitfield(&mut self, peer: &Bitfield) {
        self.stats.add_bitfield(peer);
    }

    pub fn sub_peer_bitfield(&mut self, peer: &Bitfield) {
        self.stats.sub_bitfield(peer);
    }

    pub fn peer_has_piece(&mut self, index: usize) {
        self.stats.add_index(index);
    }

    pub fn stats(&self) -> &PieceStats {
        &self.stats
    }

    // Selective download

    /// Restricts completion queries to the requested files. Skipped
    /// entirely when everything is requested.
    pub fn setup_file_filter(&mut self) {
        if self.info.all_requested() {
            return;
        }
        let ranges: Vec<(u64, u64)> = self
            .info
            .files
            .iter()
            .enumerate()
            .filter(|&(_, f)| f.requested)
            .map(|(i, f)| (self.info.file_offset(i), f.length))
            .collect();
        for (offset, length) in ranges {
            self.tracker.add_filter(offset, length);
        }
        self.tracker.enable_filter();
    }

    pub fn clear_file_filter(&mut self) {
        self.tracker.clear_filter();
    }

    // Resume support

    pub fn count_in_flight(&self) -> usize {
        self.pieces.len()
    }

    /// In-flight pieces in ascending index order.
    pub fn in_flight_pieces(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.values()
    }

    /// Registers resumed in-flight pieces. They stay unclaimed until a
    /// connection checks them out again.
    pub fn add_in_flight(&mut self, pieces: Vec<Piece>) {
        for piece in pieces {
            self.pieces.insert(piece.index(), piece);
        }
    }
}

impl PieceStorage for IndexedStorage {
    fn has_missing_piece(&self, peer: &Bitfield) -> Result<bool> {
        Ok(self.tracker.has_missing(peer))
    }

    fn get_missing_piece(&mut self, peer: &Bitfield, cuid: u64) -> Result<Option<usize>> {
        let cand = self.candidates(Some(peer));
        let idx = match self.select_from(&cand) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        self.check_out_piece(idx, cuid);
        Ok(Some(idx))
    }

    fn get_missing_fast_piece(
        &mut self,
        peer: &Bitfield,
        allowed: &[usize],
        cuid: u64,
    ) -> Result<Option<usize>> {
        let mut fast = Bitfield::new(self.tracker.blocks());
        for &idx in allowed {
            if peer.has_bit(idx) && !self.tracker.is_bit_set(idx) {
                fast.set_bit(idx);
            }
        }
        let cand = self.candidates(Some(&fast));
        let idx = match self.select_from(&cand) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        self.check_out_piece(idx, cuid);
        Ok(Some(idx))
    }

    fn get_piece(&self, index: usize) -> Option<Piece> {
        if index >= self.tracker.blocks() {
            return None;
        }
        if let Some(piece) = self.pieces.get(&index) {
            return Some(piece.clone());
        }
        let mut piece = Piece::new(index, self.tracker.block_len_at(index));
        if self.has_piece(index) {
            piece.set_all_blocks();
        }
        Some(piece)
    }

    fn complete_piece(&mut self, index: usize) -> Result<PieceOutcome> {
        if !self.pieces.contains_key(&index) {
            bail!("piece {} is not checked out", index);
        }
        // rereads below must observe every buffered write
        if let Some(c) = self.cache.as_mut() {
            c.flush_piece(&mut *self.adaptor, index)?;
        }
        let outcome = if self.info.hashed() {
            let expected = match self.info.piece_hash(index) {
                Some(h) => *h,
                None => bail!("no digest recorded for piece {}", index),
            };
            let fast = self
                .pieces
                .get_mut(&index)
                .and_then(|piece| piece.take_digest());
            let actual = match fast {
                Some(digest) => digest,
                None => self.read_piece_digest(index)?,
            };
            if actual == expected {
                PieceOutcome::Valid
            } else {
                PieceOutcome::WrongPiece
            }
        } else {
            PieceOutcome::Unverified
        };

        if outcome == PieceOutcome::WrongPiece {
            debug!("piece {} failed its digest, clearing", index);
            let piece = self.pieces.get_mut(&index).unwrap();
            piece.clear_all_blocks();
            return Ok(outcome);
        }

        self.commit_piece(index);
        if self.download_finished() {
            if let Some(c) = self.cache.as_mut() {
                c.flush_all(&mut *self.adaptor)?;
            }
            self.adaptor.flush()?;
            info!("download of {} finished", self.info.name);
        }
        Ok(outcome)
    }

    fn cancel_piece(&mut self, index: usize, cuid: u64) {
        let end_game = self.is_end_game();
        let drop_piece = match self.pieces.get_mut(&index) {
            Some(piece) => {
                piece.remove_owner(cuid);
                if piece.unowned() {
                    self.tracker.unset_use_bit(index);
                }
                piece.unowned() && !end_game && piece.completed_length() == 0
            }
            None => false,
        };
        if drop_piece {
            self.pieces.remove(&index);
            if let Some(c) = self.cache.as_mut() {
                c.release(index);
            }
        }
    }

    fn has_piece(&self, index: usize) -> bool {
        self.tracker.is_bit_set(index)
    }

    fn is_piece_used(&self, index: usize) -> bool {
        self.tracker.is_use_bit_set(index)
    }

    fn total_length(&self) -> u64 {
        self.tracker.total_len()
    }

    fn filtered_total_length(&self) -> u64 {
        self.tracker.filtered_total_len()
    }

    fn completed_length(&self) -> u64 {
        let in_flight: u64 = self.pieces.values().map(|p| p.completed_length()).sum();
        cmp::min(self.tracker.completed_len() + in_flight, self.total_length())
    }

    fn filtered_completed_length(&self) -> u64 {
        let in_flight: u64 = self.pieces.values().map(|p| p.completed_length()).sum();
        self.tracker.filtered_completed_len() + in_flight
    }

    fn download_finished(&self) -> bool {
        self.tracker.is_filtered_all_bit_set()
    }

    fn all_download_finished(&self) -> bool {
        self.tracker.is_all_bit_set()
    }

    fn bitfield_bytes(&self) -> Box<[u8]> {
        self.tracker.bytes()
    }

    fn set_bitfield_bytes(&mut self, data: &[u8]) {
        self.tracker.set_bytes(data);
    }

    fn mark_all_pieces_done(&mut self) {
        self.tracker.set_all();
    }

    fn mark_pieces_done(&mut self, length: u64) -> Result<()> {
        if length > self.total_length() {
            return Err(
                crate::error::ErrorKind::LengthMismatch(self.total_length(), length).into(),
            );
        }
        if length == self.total_length() {
            self.tracker.set_all();
            return Ok(());
        }
        let piece_len = self.tracker.block_len();
        let full = (length / piece_len) as usize;
        if full > 0 {
            self.tracker.set_bit_range(0, full - 1);
        }
        let tail_blocks = ((length % piece_len) / BLOCK_LEN) as usize;
        if tail_blocks > 0 {
            let mut piece = Piece::new(full, self.tracker.block_len_at(full));
            for i in 0..tail_blocks {
                piece.complete_block(i);
            }
            self.pieces.insert(full, piece);
        }
        Ok(())
    }

    fn mark_piece_missing(&mut self, index: usize) -> Result<()> {
        self.tracker.unset_bit(index);
        Ok(())
    }

    fn advertise_piece(&mut self, cuid: u64, index: usize) -> u64 {
        self.advert_seq += 1;
        self.haves.push(HaveEntry {
            cuid,
            index,
            seq: self.advert_seq,
            when: Instant::now(),
        });
        self.advert_seq
    }

    fn advertised_since(&self, cuid: u64, since: u64) -> (u64, Vec<usize>) {
        let start = self.haves.partition_point(|e| e.seq <= since);
        let indexes = self.haves[start..]
            .iter()
            .filter(|e| e.cuid != cuid)
            .map(|e| e.index)
            .collect();
        (self.advert_seq, indexes)
    }

    fn expire_advertised(&mut self, age: Duration) {
        let cut = self.haves.partition_point(|e| e.when.elapsed() >= age);
        if cut > 0 {
            debug!("dropping {} stale have entries", cut);
            self.haves.drain(..cut);
        }
    }
}
