use std::cmp;

use sha1::{Digest, Sha1};

use crate::bitfield::Bitfield;
use crate::error::{ErrorKind, Result};
use crate::storage::{IndexedStorage, PieceStorage};

/// Verifies a whole download against one expected digest, one bounded
/// read per call so the scheduler can interleave other work. The
/// result is all-or-nothing: a match marks every piece done, a
/// mismatch resets the bitmap since a single digest cannot localize
/// the damage. Re-entry after `finished()` is a no-op.
pub struct ChecksumValidator {
    expected: [u8; 20],
    offset: u64,
    total: u64,
    ctx: Option<Sha1>,
    scratch: Bitfield,
    finished: bool,
    valid: Option<bool>,
    read_len: usize,
}

impl ChecksumValidator {
    pub fn new(expected: [u8; 20], total: u64, pieces: usize, read_len: usize) -> ChecksumValidator {
        ChecksumValidator {
            expected,
            offset: 0,
            total,
            ctx: Some(Sha1::new()),
            scratch: Bitfield::new(pieces),
            finished: false,
            valid: None,
            read_len,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// `Some(true)` once validation passed, `Some(false)` once it
    /// failed, `None` while still running.
    pub fn valid(&self) -> Option<bool> {
        self.valid
    }

    /// Advances by one read. On the final chunk the digest comparison
    /// is committed to the storage bitmap exactly once; a mismatch is
    /// also surfaced as an `Integrity` error after the bitmap reset.
    pub fn validate_chunk(&mut self, storage: &mut IndexedStorage) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let mut buf = vec![0u8; cmp::min(self.read_len as u64, self.total - self.offset) as usize];
        let got = if buf.is_empty() {
            0
        } else {
            storage.adaptor_mut().read_data(&mut buf, self.offset)?
        };
        if got > 0 {
            self.ctx.as_mut().unwrap().update(&buf[..got]);
            self.offset += got as u64;
        }
        if self.offset < self.total && got > 0 {
            return Ok(());
        }
        // end of data: either the full length was hashed or the file
        // ran short, which can never produce a matching digest
        self.finished = true;
        let digest: [u8; 20] = self.ctx.take().unwrap().finalize().into();
        let valid = self.offset == self.total && digest == self.expected;
        self.valid = Some(valid);
        if valid {
            self.scratch.set_all();
            storage.set_bitfield_bytes(&self.scratch.data());
            Ok(())
        } else {
            storage.set_bitfield_bytes(&self.scratch.data());
            Err(ErrorKind::Integrity("whole file digest mismatch".to_owned()).into())
        }
    }
}

/// Verifies one piece per call against the download's per-piece
/// digests, accumulating results in a scratch plane committed in one
/// shot at the end. A mismatched or unreadable piece only loses its
/// own bit, so a resumed download re-fetches exactly the bad pieces.
pub struct ChunkChecksumValidator {
    index: usize,
    scratch: Bitfield,
    finished: bool,
    read_len: usize,
}

impl ChunkChecksumValidator {
    pub fn new(pieces: usize, read_len: usize) -> ChunkChecksumValidator {
        ChunkChecksumValidator {
            index: 0,
            scratch: Bitfield::new(pieces),
            finished: pieces == 0,
            read_len,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn cursor(&self) -> usize {
        self.index
    }

    fn hash_piece(&self, storage: &mut IndexedStorage, index: usize) -> Result<[u8; 20]> {
        let info = storage.info().clone();
        let mut ctx = Sha1::new();
        let mut offset = info.piece_offset(index);
        let mut remaining = info.piece_len(index);
        let mut buf = vec![0u8; self.read_len];
        while remaining > 0 {
            let want = cmp::min(remaining, buf.len() as u64) as usize;
            let got = storage.adaptor_mut().read_data(&mut buf[..want], offset)?;
            if got == 0 {
                // truncated file region; the partial digest fails the
                // comparison on its own
                break;
            }
            ctx.update(&buf[..got]);
            offset += got as u64;
            remaining -= got as u64;
        }
        Ok(ctx.finalize().into())
    }

    pub fn validate_chunk(&mut self, storage: &mut IndexedStorage) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let index = self.index;
        let expected = storage.info().piece_hash(index).cloned();
        let ok = match expected {
            Some(expected) => match self.hash_piece(storage, index) {
                Ok(digest) => digest == expected,
                // an unreadable piece is re-downloaded like a bad one
                Err(e) => {
                    debug!("piece {} unreadable during validation: {}", index, e);
                    false
                }
            },
            None => false,
        };
        if ok {
            self.scratch.set_bit(index);
        }
        self.index += 1;
        if self.index == self.scratch.len() {
            self.finished = true;
            storage.set_bitfield_bytes(&self.scratch.data());
        }
        Ok(())
    }
}
