use std::cmp;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::info::Info;
use crate::util::UHashMap;

/// Boundary between piece bookkeeping and the filesystem. Offsets are
/// logical download offsets; multi-file adaptors split them across
/// destination files internally. Reads stopping short of the buffer
/// mean the file ends there, not an error, since resumed downloads
/// routinely read past the previously written length.
pub trait DiskAdaptor {
    /// Creates the destination files and sizes them out.
    fn open(&mut self) -> Result<()>;

    /// Opens files that must already exist, as when resuming.
    fn open_existing(&mut self) -> Result<()>;

    fn close(&mut self);

    fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()>;

    /// Fills as much of `buf` as backing data allows, returning the
    /// byte count read.
    fn read_data(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Bytes currently backed on disk.
    fn size(&self) -> Result<u64>;

    fn set_read_only(&mut self, ro: bool);

    fn flush(&mut self) -> Result<()>;
}

fn open_at(path: &Path, create: bool, write: bool) -> io::Result<fs::File> {
    if create {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
    }
    fs::OpenOptions::new()
        .read(true)
        .write(write)
        .create(create)
        .open(path)
}

/// Single destination file addressed directly by logical offset.
pub struct DirectDiskAdaptor {
    path: PathBuf,
    total_len: u64,
    file: Option<fs::File>,
    read_only: bool,
}

impl DirectDiskAdaptor {
    pub fn new<P: Into<PathBuf>>(path: P, total_len: u64) -> DirectDiskAdaptor {
        DirectDiskAdaptor {
            path: path.into(),
            total_len,
            file: None,
            read_only: false,
        }
    }

    fn file(&mut self) -> Result<&mut fs::File> {
        if self.file.is_none() {
            self.file = Some(open_at(&self.path, false, !self.read_only)?);
        }
        Ok(self.file.as_mut().unwrap())
    }
}

impl DiskAdaptor for DirectDiskAdaptor {
    fn open(&mut self) -> Result<()> {
        let f = open_at(&self.path, true, true)?;
        f.set_len(self.total_len)?;
        self.file = Some(f);
        Ok(())
    }

    fn open_existing(&mut self) -> Result<()> {
        let write = !self.read_only;
        self.file = Some(open_at(&self.path, false, write)?);
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let f = self.file()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let f = self.file()?;
        let end = f.metadata()?.len();
        if offset >= end {
            return Ok(0);
        }
        f.seek(SeekFrom::Start(offset))?;
        let want = cmp::min(buf.len() as u64, end - offset) as usize;
        f.read_exact(&mut buf[..want])?;
        Ok(want)
    }

    fn size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0))
    }

    fn set_read_only(&mut self, ro: bool) {
        if ro != self.read_only {
            self.read_only = ro;
            self.file = None;
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(f) = self.file.as_mut() {
            f.flush()?;
        }
        Ok(())
    }
}

/// Many destination files presented as one logical byte range, with
/// offset splitting driven by the download's `Info`. Files open
/// lazily and stay open until `close`.
pub struct MultiDiskAdaptor {
    info: Arc<Info>,
    base: PathBuf,
    files: UHashMap<fs::File>,
    read_only: bool,
}

impl MultiDiskAdaptor {
    pub fn new<P: Into<PathBuf>>(base: P, info: Arc<Info>) -> MultiDiskAdaptor {
        MultiDiskAdaptor {
            info,
            base: base.into(),
            files: UHashMap::default(),
            read_only: false,
        }
    }

    fn file_path(&self, idx: usize) -> PathBuf {
        self.base.join(&self.info.files[idx].path)
    }

    fn file(&mut self, idx: usize) -> Result<&mut fs::File> {
        if !self.files.contains_key(&idx) {
            let f = open_at(&self.file_path(idx), false, !self.read_only)?;
            self.files.insert(idx, f);
        }
        Ok(self.files.get_mut(&idx).unwrap())
    }
}

impl DiskAdaptor for MultiDiskAdaptor {
    fn open(&mut self) -> Result<()> {
        for i in 0..self.info.files.len() {
            let len = self.info.files[i].length;
            let f = open_at(&self.file_path(i), true, true)?;
            f.set_len(len)?;
            self.files.insert(i, f);
        }
        Ok(())
    }

    fn open_existing(&mut self) -> Result<()> {
        for i in 0..self.info.files.len() {
            let write = !self.read_only;
            let f = open_at(&self.file_path(i), false, write)?;
            self.files.insert(i, f);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.files.clear();
    }

    fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        for loc in self.info.calc_locs(offset, data.len() as u64) {
            let foffset = loc.offset;
            let f = self.file(loc.file)?;
            f.seek(SeekFrom::Start(foffset))?;
            f.write_all(&data[loc.start..loc.end])?;
        }
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut total = 0;
        for loc in self.info.calc_locs(offset, buf.len() as u64) {
            let foffset = loc.offset;
            let want = loc.len();
            let f = self.file(loc.file)?;
            let end = f.metadata()?.len();
            if foffset >= end {
                break;
            }
            let avail = cmp::min(want as u64, end - foffset) as usize;
            f.seek(SeekFrom::Start(foffset))?;
            f.read_exact(&mut buf[loc.start..loc.start + avail])?;
            total += avail;
            if avail < want {
                break;
            }
        }
        Ok(total)
    }

    fn size(&self) -> Result<u64> {
        let mut total = 0;
        for i in 0..self.info.files.len() {
            total += fs::metadata(self.file_path(i)).map(|m| m.len()).unwrap_or(0);
        }
        Ok(total)
    }

    fn set_read_only(&mut self, ro: bool) {
        if ro != self.read_only {
            self.read_only = ro;
            self.files.clear();
        }
    }

    fn flush(&mut self) -> Result<()> {
        for f in self.files.values_mut() {
            f.flush()?;
        }
        Ok(())
    }
}

/// Pre-allocates the destination byte range in bounded steps so file
/// allocation can be interleaved with other work on the scheduler
/// tick.
pub struct Allocator {
    cursor: u64,
    total: u64,
    zeros: Vec<u8>,
}

impl Allocator {
    pub fn new(total: u64, step: usize) -> Allocator {
        Allocator {
            cursor: 0,
            total,
            zeros: vec![0; step],
        }
    }

    pub fn finished(&self) -> bool {
        self.cursor >= self.total
    }

    /// Writes one step of zeros; returns true when allocation is done.
    pub fn step(&mut self, adaptor: &mut dyn DiskAdaptor) -> Result<bool> {
        if self.finished() {
            return Ok(true);
        }
        let want = cmp::min(self.zeros.len() as u64, self.total - self.cursor) as usize;
        adaptor.write_data(&self.zeros[..want], self.cursor)?;
        self.cursor += want as u64;
        Ok(self.finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::FileEntry;
    use tempfile::TempDir;

    fn multi_info() -> Arc<Info> {
        Arc::new(Info::new(
            "multi",
            100,
            vec![
                FileEntry::new("a.bin", 250),
                FileEntry::new("sub/b.bin", 130),
                FileEntry::new("c.bin", 620),
            ],
        ))
    }

    #[test]
    fn test_direct_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut ad = DirectDiskAdaptor::new(dir.path().join("f.bin"), 300);
        ad.open().unwrap();
        ad.write_data(&[7u8; 100], 150).unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(ad.read_data(&mut buf, 150).unwrap(), 100);
        assert_eq!(&buf[..], &[7u8; 100][..]);
        assert_eq!(ad.size().unwrap(), 300);
    }

    #[test]
    fn test_direct_short_read() {
        let dir = TempDir::new().unwrap();
        let mut ad = DirectDiskAdaptor::new(dir.path().join("f.bin"), 300);
        ad.open().unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(ad.read_data(&mut buf, 250).unwrap(), 50);
        assert_eq!(ad.read_data(&mut buf, 300).unwrap(), 0);
        assert_eq!(ad.read_data(&mut buf, 500).unwrap(), 0);
    }

    #[test]
    fn test_multi_spanning_write() {
        let dir = TempDir::new().unwrap();
        let mut ad = MultiDiskAdaptor::new(dir.path(), multi_info());
        ad.open().unwrap();
        // bytes [200, 300) straddle a.bin and sub/b.bin
        let data: Vec<u8> = (0..100).collect();
        ad.write_data(&data, 200).unwrap();

        let mut buf = [0u8; 100];
        assert_eq!(ad.read_data(&mut buf, 200).unwrap(), 100);
        assert_eq!(&buf[..], &data[..]);

        // verify the physical split
        let a = fs::read(dir.path().join("a.bin")).unwrap();
        assert_eq!(&a[200..250], &data[..50]);
        let b = fs::read(dir.path().join("sub/b.bin")).unwrap();
        assert_eq!(&b[..50], &data[50..]);
    }

    #[test]
    fn test_multi_short_read_on_missing_tail() {
        let dir = TempDir::new().unwrap();
        let info = multi_info();
        let mut ad = MultiDiskAdaptor::new(dir.path(), info.clone());
        ad.open().unwrap();
        // truncate the middle file to simulate a partial download
        fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("sub/b.bin"))
            .unwrap()
            .set_len(20)
            .unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(ad.read_data(&mut buf, 200).unwrap(), 70);
    }

    #[test]
    fn test_allocator_steps() {
        let dir = TempDir::new().unwrap();
        let mut ad = DirectDiskAdaptor::new(dir.path().join("f.bin"), 0);
        ad.open().unwrap();
        let mut alloc = Allocator::new(250, 100);
        assert!(!alloc.step(&mut ad).unwrap());
        assert!(!alloc.step(&mut ad).unwrap());
        assert!(alloc.step(&mut ad).unwrap());
        assert!(alloc.finished());
        assert_eq!(ad.size().unwrap(), 250);
    }
}
