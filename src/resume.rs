use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bitfield::BlockTracker;
use crate::error::{ErrorKind, Result};
use crate::piece::Piece;
use crate::storage::{IndexedStorage, PieceStorage};

const VERSION: u16 = 0x0001;
const EXT_INFO_HASH: u32 = 1;

/// The on-disk resume state: master bitmap plus the block bitmaps of
/// in-flight pieces, all integers network byte order.
///
/// Layout, version 1:
///   version          u16
///   extension flags  u32   (bit 0: info hash present)
///   info hash len    u32
///   info hash        [len]
///   piece length     u32
///   total length     u64
///   upload length    u64
///   bitfield len     u32
///   bitfield         [len]
///   in-flight count  u32
///   per piece: index u32, length u32, bitfield len u32, bitfield [len]
pub struct ProgressFile {
    path: PathBuf,
}

fn corrupt<T>(reason: String) -> Result<T> {
    Err(ErrorKind::ControlFile(reason).into())
}

/// Short files surface as a distinct control file error, not a bare
/// I/O failure.
fn read_err(e: io::Error) -> crate::error::Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ErrorKind::ControlFile("unexpected end of file".to_owned()).into()
    } else {
        e.into()
    }
}

impl ProgressFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> ProgressFile {
        ProgressFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Serializes the storage's progress, writing to a temporary file
    /// first so an interrupted save never clobbers a good one.
    pub fn save(&self, storage: &IndexedStorage, uploaded: u64) -> Result<()> {
        debug!("saving control file {:?}", self.path);
        let mut temp = self.path.clone().into_os_string();
        temp.push(".temp");
        let temp = PathBuf::from(temp);
        {
            let mut o = io::BufWriter::new(
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&temp)?,
            );
            o.write_u16::<BigEndian>(VERSION)?;
            let info_hash = storage.info().info_hash;
            o.write_u32::<BigEndian>(if info_hash.is_some() { EXT_INFO_HASH } else { 0 })?;
            match info_hash {
                Some(hash) => {
                    o.write_u32::<BigEndian>(hash.len() as u32)?;
                    o.write_all(&hash)?;
                }
                None => o.write_u32::<BigEndian>(0)?,
            }
            o.write_u32::<BigEndian>(storage.info().piece_len)?;
            o.write_u64::<BigEndian>(storage.total_length())?;
            o.write_u64::<BigEndian>(uploaded)?;
            let bitfield = storage.bitfield_bytes();
            o.write_u32::<BigEndian>(bitfield.len() as u32)?;
            o.write_all(&bitfield)?;
            o.write_u32::<BigEndian>(storage.count_in_flight() as u32)?;
            for piece in storage.in_flight_pieces() {
                o.write_u32::<BigEndian>(piece.index() as u32)?;
                o.write_u32::<BigEndian>(piece.length() as u32)?;
                let bits = piece.bitfield_bytes();
                o.write_u32::<BigEndian>(bits.len() as u32)?;
                o.write_all(&bits)?;
            }
            o.flush()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    /// Loads resume state into a fresh storage, cross-validating
    /// against the live download's geometry. Returns the recorded
    /// session upload length.
    ///
    /// A changed piece length converts the old bitmap to the new
    /// granularity when configured to, keeping only pieces whose whole
    /// range was complete at the old granularity; otherwise it is an
    /// error, since conversion discards partial progress.
    pub fn load(&self, storage: &mut IndexedStorage, allow_piece_length_change: bool) -> Result<u64> {
        debug!("loading control file {:?}", self.path);
        let mut i = io::BufReader::new(fs::File::open(&self.path)?);

        let version = i.read_u16::<BigEndian>().map_err(read_err)?;
        if version != VERSION {
            return corrupt(format!("unsupported version: {:#06x}", version));
        }
        let extensions = i.read_u32::<BigEndian>().map_err(read_err)?;

        let info_hash_len = i.read_u32::<BigEndian>().map_err(read_err)? as usize;
        if info_hash_len > 1024 {
            return corrupt(format!("absurd info hash length: {}", info_hash_len));
        }
        if extensions & EXT_INFO_HASH != 0 && info_hash_len == 0 {
            return corrupt("info hash flagged but absent".to_owned());
        }
        let mut saved_hash = vec![0u8; info_hash_len];
        i.read_exact(&mut saved_hash).map_err(read_err)?;
        if let (Some(expected), true) = (storage.info().info_hash, info_hash_len > 0) {
            if saved_hash[..] != expected[..] {
                return corrupt("info hash mismatch".to_owned());
            }
        }

        let piece_len = i.read_u32::<BigEndian>().map_err(read_err)?;
        let total_len = i.read_u64::<BigEndian>().map_err(read_err)?;
        if total_len != storage.total_length() {
            return Err(
                ErrorKind::LengthMismatch(storage.total_length(), total_len).into(),
            );
        }
        let uploaded = i.read_u64::<BigEndian>().map_err(read_err)?;

        let bitfield_len = i.read_u32::<BigEndian>().map_err(read_err)? as usize;
        if piece_len == 0 {
            return corrupt("zero piece length".to_owned());
        }
        let expected_len =
            (div_round_up!(total_len, u64::from(piece_len)) as usize + 7) / 8;
        if bitfield_len != expected_len {
            return corrupt(format!(
                "bitfield length mismatch, expected: {}, actual: {}",
                expected_len, bitfield_len
            ));
        }
        let mut bitfield = vec![0u8; bitfield_len];
        i.read_exact(&mut bitfield).map_err(read_err)?;

        let in_flight = i.read_u32::<BigEndian>().map_err(read_err)? as usize;

        if piece_len == storage.info().piece_len {
            storage.set_bitfield_bytes(&bitfield);
            let mut pieces = Vec::with_capacity(in_flight);
            for _ in 0..in_flight {
                let index = i.read_u32::<BigEndian>().map_err(read_err)? as usize;
                if index >= storage.info().pieces() {
                    return corrupt(format!("piece index out of range: {}", index));
                }
                let length = u64::from(i.read_u32::<BigEndian>().map_err(read_err)?);
                if length > u64::from(piece_len) {
                    return corrupt(format!("piece length out of range: {}", length));
                }
                let mut piece = Piece::new(index, length);
                let bits_len = i.read_u32::<BigEndian>().map_err(read_err)? as usize;
                if bits_len != piece.bitfield_len() {
                    return corrupt(format!(
                        "piece bitfield length mismatch, expected: {}, actual: {}",
                        piece.bitfield_len(),
                        bits_len
                    ));
                }
                let mut bits = vec![0u8; bits_len];
                i.read_exact(&mut bits).map_err(read_err)?;
                piece.set_bitfield_bytes(&bits);
                pieces.push(piece);
            }
            storage.add_in_flight(pieces);
        } else {
            let mut src = BlockTracker::new(u64::from(piece_len), total_len);
            src.set_bytes(&bitfield);
            if (src.completed_len() > 0 || in_flight > 0) && !allow_piece_length_change {
                return corrupt(format!(
                    "piece length changed from {} to {}",
                    piece_len,
                    storage.info().piece_len
                ));
            }
            let dest = convert_tracker(&src, u64::from(storage.info().piece_len));
            storage.set_bitfield_bytes(&dest.bytes());
            info!(
                "converted resume bitmap from {} byte to {} byte pieces",
                piece_len,
                storage.info().piece_len
            );
        }
        Ok(uploaded)
    }
}

/// Re-expresses a bitmap at a different block granularity. A new block
/// is complete only when its entire byte range was complete before, so
/// conversion never invents data.
fn convert_tracker(src: &BlockTracker, block_len: u64) -> BlockTracker {
    let mut dest = BlockTracker::new(block_len, src.total_len());
    for i in 0..dest.blocks() {
        let offset = block_len * i as u64;
        if src.is_offset_range_set(offset, dest.block_len_at(i)) {
            dest.set_bit(i);
        }
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::disk::DirectDiskAdaptor;
    use crate::info::{FileEntry, Info};
    use assert_matches::assert_matches;
    use rand::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn storage(dir: &TempDir, piece_len: u32, total: u64) -> IndexedStorage {
        let mut info = Info::new("r", piece_len, vec![FileEntry::new("r.bin", total)]);
        info.info_hash = Some([0xaa; 20]);
        IndexedStorage::with_rng(
            Arc::new(info),
            Config {
                end_game_pieces: 0,
                ..Default::default()
            },
            Box::new(DirectDiskAdaptor::new(dir.path().join("r.bin"), total)),
            StdRng::from_seed([4u8; 32]),
        )
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        // 3 pieces of 4 blocks each
        let piece_len = crate::piece::BLOCK_LEN as u32 * 4;
        let total = u64::from(piece_len) * 3;
        let mut s = storage(&dir, piece_len, total);
        s.open().unwrap();

        // piece 0 complete, piece 1 in flight with 2 of 4 blocks done
        s.check_out_piece(0, 1).set_all_blocks();
        s.complete_piece(0).unwrap();
        let p = s.check_out_piece(1, 1);
        p.complete_block(0);
        p.complete_block(2);

        let file = ProgressFile::new(dir.path().join("r.qry"));
        file.save(&s, 4242).unwrap();
        assert!(file.exists());

        let mut fresh = storage(&dir, piece_len, total);
        let uploaded = file.load(&mut fresh, false).unwrap();
        assert_eq!(uploaded, 4242);
        assert!(fresh.has_piece(0));
        assert!(!fresh.has_piece(1));
        assert!(!fresh.has_piece(2));
        assert_eq!(fresh.count_in_flight(), 1);
        {
            let p = fresh.piece(1).unwrap();
            assert_eq!(p.count_completed_block(), 2);
            assert!(p.has_block(0));
            assert!(p.has_block(2));
        }
        // the resumed piece is not claimed until checked out again
        assert!(!fresh.is_piece_used(1));

        file.remove().unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_version_and_hash_validation() {
        let dir = TempDir::new().unwrap();
        let piece_len = crate::piece::BLOCK_LEN as u32;
        let total = u64::from(piece_len) * 2;
        let s = storage(&dir, piece_len, total);
        let file = ProgressFile::new(dir.path().join("r.qry"));
        file.save(&s, 0).unwrap();

        // bad version
        let mut data = fs::read(file.path()).unwrap();
        data[1] = 9;
        fs::write(file.path(), &data).unwrap();
        let mut fresh = storage(&dir, piece_len, total);
        assert_matches!(
            file.load(&mut fresh, false),
            Err(crate::error::Error(ErrorKind::ControlFile(_), _))
        );

        // info hash mismatch
        let mut data = fs::read(file.path()).unwrap();
        data[1] = 1;
        data[10] ^= 0xff;
        fs::write(file.path(), &data).unwrap();
        assert_matches!(
            file.load(&mut fresh, false),
            Err(crate::error::Error(ErrorKind::ControlFile(_), _))
        );
    }

    #[test]
    fn test_total_length_mismatch() {
        let dir = TempDir::new().unwrap();
        let piece_len = crate::piece::BLOCK_LEN as u32;
        let s = storage(&dir, piece_len, u64::from(piece_len) * 2);
        let file = ProgressFile::new(dir.path().join("r.qry"));
        file.save(&s, 0).unwrap();

        let mut fresh = storage(&dir, piece_len, u64::from(piece_len) * 3);
        assert_matches!(
            file.load(&mut fresh, false),
            Err(crate::error::Error(ErrorKind::LengthMismatch(_, _), _))
        );
    }

    #[test]
    fn test_truncated_file() {
        let dir = TempDir::new().unwrap();
        let piece_len = crate::piece::BLOCK_LEN as u32;
        let total = u64::from(piece_len) * 2;
        let s = storage(&dir, piece_len, total);
        let file = ProgressFile::new(dir.path().join("r.qry"));
        file.save(&s, 0).unwrap();

        let data = fs::read(file.path()).unwrap();
        fs::write(file.path(), &data[..10]).unwrap();
        let mut fresh = storage(&dir, piece_len, total);
        assert_matches!(
            file.load(&mut fresh, false),
            Err(crate::error::Error(ErrorKind::ControlFile(_), _))
        );
    }

    #[test]
    fn test_piece_length_change() {
        let dir = TempDir::new().unwrap();
        let old_len = crate::piece::BLOCK_LEN as u32 * 2;
        let total = u64::from(old_len) * 4;
        let mut s = storage(&dir, old_len, total);
        s.open().unwrap();
        s.check_out_piece(0, 1).set_all_blocks();
        s.complete_piece(0).unwrap();
        s.check_out_piece(1, 1).set_all_blocks();
        s.complete_piece(1).unwrap();
        let file = ProgressFile::new(dir.path().join("r.qry"));
        file.save(&s, 0).unwrap();

        // refused while conversion is not allowed
        let new_len = crate::piece::BLOCK_LEN as u32 * 4;
        let mut fresh = storage(&dir, new_len, total);
        assert_matches!(
            file.load(&mut fresh, false),
            Err(crate::error::Error(ErrorKind::ControlFile(_), _))
        );

        // allowed: old pieces 0+1 exactly cover new piece 0
        let uploaded = file.load(&mut fresh, true).unwrap();
        assert_eq!(uploaded, 0);
        assert!(fresh.has_piece(0));
        assert!(!fresh.has_piece(1));
    }

    #[test]
    fn test_convert_tracker_partial_coverage() {
        let mut src = BlockTracker::new(100, 1000);
        src.set_bit_range(0, 4);
        src.set_bit(6);
        // halving granularity keeps fully covered ranges only
        let dest = convert_tracker(&src, 200);
        assert!(dest.is_bit_set(0));
        assert!(dest.is_bit_set(1));
        // blocks 4+5: only 4 was set
        assert!(!dest.is_bit_set(2));
        assert!(!dest.is_bit_set(3));
        assert!(!dest.is_bit_set(4));
    }
}
