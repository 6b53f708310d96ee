mod adaptor;
mod cache;

pub use self::adaptor::{Allocator, DirectDiskAdaptor, DiskAdaptor, MultiDiskAdaptor};
pub use self::cache::WriteCache;

use std::fmt;

/// A contiguous run within one destination file, carved out of a
/// logical byte range by `Info::calc_locs`. `start`/`end` index into
/// the buffer being transferred; `offset` is the in-file position.
pub struct Location {
    pub file: usize,
    pub offset: u64,
    pub start: usize,
    pub end: usize,
}

impl Location {
    pub fn new(file: usize, offset: u64, start: usize, end: usize) -> Location {
        Location {
            file,
            offset,
            start,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Location {{ file: {}, off: {}, s: {}, e: {} }}",
            self.file, self.offset, self.start, self.end
        )
    }
}
