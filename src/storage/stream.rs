use std::time::Duration;

use super::{PieceOutcome, PieceStorage};
use crate::bitfield::{Bitfield, BlockTracker};
use crate::disk::DiskAdaptor;
use crate::error::{ErrorKind, Result};
use crate::piece::Piece;

/// Piece storage for a streamed download whose length is unknown until
/// it ends: one growable piece at index 0, finalized when the stream
/// completes. Never used for swarm downloads, so peer-driven queries
/// are typed `Unsupported` errors rather than aborts.
pub struct StreamStorage {
    adaptor: Box<dyn DiskAdaptor>,
    piece: Option<Piece>,
    checked_out: bool,
    total_len: u64,
    finished: bool,
    tracker: Option<BlockTracker>,
}

impl StreamStorage {
    pub fn new(adaptor: Box<dyn DiskAdaptor>) -> StreamStorage {
        StreamStorage {
            adaptor,
            piece: None,
            checked_out: false,
            total_len: 0,
            finished: false,
            tracker: None,
        }
    }

    pub fn adaptor_mut(&mut self) -> &mut dyn DiskAdaptor {
        &mut *self.adaptor
    }

    pub fn open(&mut self) -> Result<()> {
        self.adaptor.open()
    }

    /// Hands out the single stream piece, or nothing while it is
    /// already claimed or the download is done.
    pub fn get_missing_stream_piece(&mut self, _cuid: u64) -> Option<usize> {
        if self.finished || self.checked_out {
            return None;
        }
        if self.piece.is_none() {
            self.piece = Some(Piece::new_unknown(0));
        }
        self.checked_out = true;
        Some(0)
    }

    pub fn piece(&self) -> Option<&Piece> {
        self.piece.as_ref()
    }

    /// Appends received bytes at the stream head, growing the piece's
    /// observed length.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let piece = match self.piece.as_mut() {
            Some(p) => p,
            None => bail!("no stream piece checked out"),
        };
        let offset = piece.length();
        self.adaptor.write_data(data, offset)?;
        piece.set_length(offset + data.len() as u64);
        Ok(())
    }

    fn unsupported<T>(op: &'static str) -> Result<T> {
        Err(ErrorKind::Unsupported(op).into())
    }
}

impl PieceStorage for StreamStorage {
    fn has_missing_piece(&self, _peer: &Bitfield) -> Result<bool> {
        StreamStorage::unsupported("has_missing_piece")
    }

    fn get_missing_piece(&mut self, _peer: &Bitfield, _cuid: u64) -> Result<Option<usize>> {
        StreamStorage::unsupported("get_missing_piece")
    }

    fn get_missing_fast_piece(
        &mut self,
        _peer: &Bitfield,
        _allowed: &[usize],
        _cuid: u64,
    ) -> Result<Option<usize>> {
        StreamStorage::unsupported("get_missing_fast_piece")
    }

    fn get_piece(&self, index: usize) -> Option<Piece> {
        if index != 0 {
            return None;
        }
        if let Some(piece) = self.piece.as_ref() {
            return Some(piece.clone());
        }
        if self.finished {
            let mut piece = Piece::new(0, self.total_len);
            piece.set_all_blocks();
            return Some(piece);
        }
        None
    }

    /// Finishing the stream freezes the observed length as the
    /// download's total and marks everything complete.
    fn complete_piece(&mut self, index: usize) -> Result<PieceOutcome> {
        let matches = self.piece.as_ref().map_or(false, |p| p.index() == index);
        if !matches {
            bail!("piece {} is not the stream piece", index);
        }
        let piece = self.piece.take().unwrap();
        self.total_len = piece.length();
        self.finished = true;
        self.checked_out = false;
        let mut tracker = BlockTracker::new(self.total_len.max(1), self.total_len);
        tracker.set_all();
        self.tracker = Some(tracker);
        self.adaptor.flush()?;
        Ok(PieceOutcome::Unverified)
    }

    fn cancel_piece(&mut self, index: usize, _cuid: u64) {
        if self.piece.as_ref().map_or(false, |p| p.index() == index) {
            self.checked_out = false;
        }
    }

    fn has_piece(&self, index: usize) -> bool {
        index == 0 && self.finished
    }

    fn is_piece_used(&self, index: usize) -> bool {
        index == 0 && self.checked_out
    }

    fn total_length(&self) -> u64 {
        self.total_len
    }

    fn filtered_total_length(&self) -> u64 {
        self.total_len
    }

    fn completed_length(&self) -> u64 {
        if self.finished {
            self.total_len
        } else {
            self.piece.as_ref().map_or(0, |p| p.length())
        }
    }

    fn filtered_completed_length(&self) -> u64 {
        self.completed_length()
    }

    fn download_finished(&self) -> bool {
        self.finished
    }

    fn all_download_finished(&self) -> bool {
        self.finished
    }

    fn bitfield_bytes(&self) -> Box<[u8]> {
        self.tracker
            .as_ref()
            .map(|t| t.bytes())
            .unwrap_or_else(|| Vec::new().into_boxed_slice())
    }

    fn set_bitfield_bytes(&mut self, _data: &[u8]) {}

    fn mark_all_pieces_done(&mut self) {
        self.finished = true;
    }

    fn mark_pieces_done(&mut self, _length: u64) -> Result<()> {
        StreamStorage::unsupported("mark_pieces_done")
    }

    fn mark_piece_missing(&mut self, _index: usize) -> Result<()> {
        StreamStorage::unsupported("mark_piece_missing")
    }

    fn advertise_piece(&mut self, _cuid: u64, _index: usize) -> u64 {
        0
    }

    fn advertised_since(&self, _cuid: u64, _since: u64) -> (u64, Vec<usize>) {
        (0, Vec::new())
    }

    fn expire_advertised(&mut self, _age: Duration) {}
}
