use std::collections::BTreeMap;

use super::adaptor::DiskAdaptor;
use crate::error::Result;

/// Buffered block writes, grouped per piece. Entries are appended as
/// blocks arrive (possibly out of order) and flushed sorted by offset;
/// whole-cache flushes walk pieces in ascending index order so the
/// resulting writes ascend through the file.
///
/// Every entry acquired for a piece must be released exactly once, on
/// completion, zero-progress cancellation, or storage teardown.
pub struct WriteCache {
    pieces: BTreeMap<usize, Vec<Span>>,
    bytes: usize,
    limit: usize,
}

struct Span {
    offset: u64,
    data: Vec<u8>,
}

impl WriteCache {
    /// `limit` bounds buffered bytes; appends that would exceed it
    /// force the lowest-index piece out to disk first.
    pub fn new(limit: usize) -> WriteCache {
        WriteCache {
            pieces: BTreeMap::new(),
            bytes: 0,
            limit,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.pieces.contains_key(&index)
    }

    pub fn append(
        &mut self,
        adaptor: &mut dyn DiskAdaptor,
        index: usize,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        while self.bytes > 0 && self.bytes + data.len() > self.limit {
            let victim = match self
                .pieces
                .iter()
                .find(|&(_, spans)| !spans.is_empty())
                .map(|(&i, _)| i)
            {
                Some(i) => i,
                None => break,
            };
            self.flush_piece(adaptor, victim)?;
        }
        self.bytes += data.len();
        self.pieces
            .entry(index)
            .or_insert_with(Vec::new)
            .push(Span { offset, data });
        Ok(())
    }

    /// Writes a piece's buffered spans in ascending offset order. The
    /// piece's cache entry stays registered (empty) until released.
    pub fn flush_piece(&mut self, adaptor: &mut dyn DiskAdaptor, index: usize) -> Result<()> {
        let mut spans = match self.pieces.get_mut(&index) {
            Some(s) => ::std::mem::replace(s, Vec::new()),
            None => return Ok(()),
        };
        spans.sort_by_key(|s| s.offset);
        for span in &spans {
            self.bytes -= span.data.len();
        }
        let res = (|| {
            for span in &spans {
                adaptor.write_data(&span.data, span.offset)?;
            }
            Ok(())
        })();
        if res.is_err() {
            // put the spans back so the data is not lost with the error
            for span in &spans {
                self.bytes += span.data.len();
            }
            *self.pieces.get_mut(&index).unwrap() = spans;
        }
        res
    }

    pub fn flush_all(&mut self, adaptor: &mut dyn DiskAdaptor) -> Result<()> {
        let indexes: Vec<usize> = self.pieces.keys().cloned().collect();
        for index in indexes {
            self.flush_piece(adaptor, index)?;
        }
        Ok(())
    }

    /// Drops a piece's entry and any unwritten spans.
    pub fn release(&mut self, index: usize) {
        if let Some(spans) = self.pieces.remove(&index) {
            for span in &spans {
                self.bytes -= span.data.len();
            }
        }
    }
}
