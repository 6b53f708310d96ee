mod indexed;
mod stream;

pub use self::indexed::IndexedStorage;
pub use self::stream::StreamStorage;

use std::time::{Duration, Instant};

use crate::bitfield::Bitfield;
use crate::error::Result;
use crate::piece::Piece;

/// How a piece completion resolved. A wrong hash is an expected swarm
/// event, reported as a value so the caller can re-request from other
/// peers; errors are reserved for I/O and wiring failures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PieceOutcome {
    /// Hash checked and matched.
    Valid,
    /// Hash checked and differed; the piece was cleared for
    /// re-download and remains checked out.
    WrongPiece,
    /// No hashes available for this download; committed unchecked.
    Unverified,
}

/// One "have" announcement, kept so connections can relay piece
/// availability to each other incrementally. `seq` ascends with
/// insertion, so both polling reads and age-based expiry binary
/// search the log instead of scanning it.
#[derive(Clone, Debug)]
pub struct HaveEntry {
    pub cuid: u64,
    pub index: usize,
    pub seq: u64,
    pub when: Instant,
}

/// Storage surface shared by the known-length and unknown-length
/// variants. Swarm-only operations are typed errors on storages that
/// cannot support them rather than process aborts; a scheduler can
/// log and drop the command that hit the wiring bug.
pub trait PieceStorage {
    /// True if the peer has any piece this download still wants.
    fn has_missing_piece(&self, peer: &Bitfield) -> Result<bool>;

    /// Picks and checks out a piece the peer can serve. The returned
    /// index stays claimed until completed or cancelled.
    fn get_missing_piece(&mut self, peer: &Bitfield, cuid: u64) -> Result<Option<usize>>;

    /// Same, restricted to the peer's allowed-fast index set.
    fn get_missing_fast_piece(
        &mut self,
        peer: &Bitfield,
        allowed: &[usize],
        cuid: u64,
    ) -> Result<Option<usize>>;

    /// A detached mirror of the piece at `index` reflecting current
    /// completion state. Never registers anything in flight.
    fn get_piece(&self, index: usize) -> Option<Piece>;

    /// Resolves a checked-out piece: verifies its hash where hashes
    /// exist, commits it to the master bitmap on success.
    fn complete_piece(&mut self, index: usize) -> Result<PieceOutcome>;

    /// Withdraws one owner's claim; a piece left unowned with zero
    /// progress is discarded outside end game.
    fn cancel_piece(&mut self, index: usize, cuid: u64);

    fn has_piece(&self, index: usize) -> bool;

    fn is_piece_used(&self, index: usize) -> bool;

    fn total_length(&self) -> u64;

    fn filtered_total_length(&self) -> u64;

    /// Completed bytes including partial in-flight pieces.
    fn completed_length(&self) -> u64;

    fn filtered_completed_length(&self) -> u64;

    /// Every filter-selected block is done.
    fn download_finished(&self) -> bool;

    /// Every block is done, filter ignored; decides whether the
    /// download can keep seeding.
    fn all_download_finished(&self) -> bool;

    fn bitfield_bytes(&self) -> Box<[u8]>;

    fn set_bitfield_bytes(&mut self, data: &[u8]);

    fn mark_all_pieces_done(&mut self);

    /// Trusts the first `length` bytes as done, marking whole pieces
    /// in the master bitmap and the remainder as an in-flight piece.
    fn mark_pieces_done(&mut self, length: u64) -> Result<()>;

    fn mark_piece_missing(&mut self, index: usize) -> Result<()>;

    /// Logs a "have" announcement, returning its sequence number.
    fn advertise_piece(&mut self, cuid: u64, index: usize) -> u64;

    /// Indices advertised by other connections after `since`,
    /// together with the current log sequence to resume from.
    fn advertised_since(&self, cuid: u64, since: u64) -> (u64, Vec<usize>);

    /// Trims announcements older than `age` off the log's prefix.
    fn expire_advertised(&mut self, age: Duration);
}
