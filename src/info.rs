use std::cmp;
use std::fmt;
use std::path::PathBuf;

use crate::disk::Location;

/// One destination file of a download. `requested` marks it wanted
/// under selective download; a fresh entry wants everything.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
    pub requested: bool,
}

impl FileEntry {
    pub fn new<P: Into<PathBuf>>(path: P, length: u64) -> FileEntry {
        FileEntry {
            path: path.into(),
            length,
            requested: true,
        }
    }
}

/// Static geometry of a download: destination files, piece length and
/// the hashes to verify against. Piece indices map to byte offsets
/// here, and byte ranges map to runs inside the destination files.
#[derive(Clone)]
pub struct Info {
    pub name: String,
    pub piece_len: u32,
    pub total_len: u64,
    pub files: Vec<FileEntry>,
    /// Per piece digests; empty when the download has none (plain
    /// HTTP/FTP without chunk checksums).
    pub piece_hashes: Vec<[u8; 20]>,
    /// Swarm downloads carry the metainfo hash for resume validation.
    pub info_hash: Option<[u8; 20]>,
    /// Expected digest of the entire payload, when known.
    pub digest: Option<[u8; 20]>,
}

impl Info {
    pub fn new(name: &str, piece_len: u32, files: Vec<FileEntry>) -> Info {
        let total_len = files.iter().map(|f| f.length).sum();
        Info {
            name: name.to_owned(),
            piece_len,
            total_len,
            files,
            piece_hashes: Vec::new(),
            info_hash: None,
            digest: None,
        }
    }

    pub fn pieces(&self) -> usize {
        if self.piece_len == 0 || self.total_len == 0 {
            0
        } else {
            div_round_up!(self.total_len, u64::from(self.piece_len)) as usize
        }
    }

    /// Byte length of the piece at `idx`; the final piece is short
    /// unless the total divides evenly.
    pub fn piece_len(&self, idx: usize) -> u64 {
        if idx + 1 == self.pieces() {
            self.total_len - u64::from(self.piece_len) * (self.pieces() as u64 - 1)
        } else {
            u64::from(self.piece_len)
        }
    }

    pub fn piece_offset(&self, idx: usize) -> u64 {
        u64::from(self.piece_len) * idx as u64
    }

    pub fn single_file(&self) -> bool {
        self.files.len() <= 1
    }

    pub fn hashed(&self) -> bool {
        !self.piece_hashes.is_empty()
    }

    pub fn piece_hash(&self, idx: usize) -> Option<&[u8; 20]> {
        self.piece_hashes.get(idx)
    }

    /// Splits the piece at `idx` into per-file runs.
    pub fn piece_locs(&self, idx: usize) -> Vec<Location> {
        self.calc_locs(self.piece_offset(idx), self.piece_len(idx))
    }

    /// Splits [offset, offset + len) into runs, one per destination
    /// file touched. `start`/`end` index into the caller's buffer,
    /// `offset` is the position within that file.
    pub fn calc_locs(&self, offset: u64, mut len: u64) -> Vec<Location> {
        let mut cur_start = offset;
        let mut data_start = 0usize;
        let mut fidx = 0u64;
        let mut locs = Vec::new();
        for (i, f) in self.files.iter().enumerate() {
            fidx += f.length;
            if cur_start < fidx {
                let file_write_len = cmp::min(fidx - cur_start, len);
                let foffset = cur_start - (fidx - f.length);
                locs.push(Location::new(
                    i,
                    foffset,
                    data_start,
                    data_start + file_write_len as usize,
                ));
                if file_write_len == len {
                    break;
                }
                len -= file_write_len;
                cur_start += file_write_len;
                data_start += file_write_len as usize;
            }
        }
        locs
    }

    /// Byte offset of a file's first byte within the logical payload.
    pub fn file_offset(&self, file: usize) -> u64 {
        self.files.iter().take(file).map(|f| f.length).sum()
    }

    pub fn all_requested(&self) -> bool {
        self.files.iter().all(|f| f.requested)
    }
}

impl fmt::Debug for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Info {{ name: {:?}, piece_len: {}, total_len: {}, files: {} }}",
            self.name,
            self.piece_len,
            self.total_len,
            self.files.len()
        )
    }
}

#[cfg(test)]
impl Info {
    /// Geometry-only metadata for tests: `pieces` pieces of 16 KiB in
    /// a single unnamed file.
    pub fn with_pieces(pieces: usize) -> Info {
        Info::new(
            "test",
            16_384,
            vec![FileEntry::new("test.bin", 16_384 * pieces as u64)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi() -> Info {
        Info::new(
            "multi",
            100,
            vec![
                FileEntry::new("a", 250),
                FileEntry::new("b", 130),
                FileEntry::new("c", 620),
            ],
        )
    }

    #[test]
    fn test_geometry() {
        let info = multi();
        assert_eq!(info.total_len, 1000);
        assert_eq!(info.pieces(), 10);
        assert_eq!(info.piece_len(0), 100);
        assert_eq!(info.piece_len(9), 100);

        let uneven = Info::new("u", 300, vec![FileEntry::new("a", 1000)]);
        assert_eq!(uneven.pieces(), 4);
        assert_eq!(uneven.piece_len(3), 100);
    }

    #[test]
    fn test_locs_single_file() {
        let info = multi();
        let locs = info.piece_locs(0);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].file, 0);
        assert_eq!(locs[0].offset, 0);
        assert_eq!(locs[0].start, 0);
        assert_eq!(locs[0].end, 100);
    }

    #[test]
    fn test_locs_spanning_files() {
        let info = multi();
        // piece 2 covers bytes [200, 300): 50 bytes of `a`, 50 of `b`
        let locs = info.piece_locs(2);
        assert_eq!(locs.len(), 2);
        assert_eq!((locs[0].file, locs[0].offset), (0, 200));
        assert_eq!((locs[0].start, locs[0].end), (0, 50));
        assert_eq!((locs[1].file, locs[1].offset), (1, 0));
        assert_eq!((locs[1].start, locs[1].end), (50, 100));
        // piece 3 covers [300, 400): 80 bytes of `b`, 20 of `c`
        let locs = info.piece_locs(3);
        assert_eq!((locs[0].file, locs[0].offset), (1, 50));
        assert_eq!((locs[1].file, locs[1].offset), (2, 0));
        assert_eq!((locs[1].start, locs[1].end), (80, 100));
    }

    #[test]
    fn test_file_offsets() {
        let info = multi();
        assert_eq!(info.file_offset(0), 0);
        assert_eq!(info.file_offset(1), 250);
        assert_eq!(info.file_offset(2), 380);
    }
}
