//! Lazy body-to-chunk segmentation.

use std::io::{self, Read};

use super::frame::ChunkFrame;

/// Reads a body in chunks of at most `chunk_size` bytes.
///
/// Yields `Data` frames with contiguous offsets and a final `End` carrying
/// the number of bytes read. The sequence is finite and not restartable:
/// after `End` or an error the iterator is exhausted.
pub struct ChunkSplitter<R> {
    reader: R,
    chunk_size: usize,
    offset: u64,
    finished: bool,
}

impl<R: Read> ChunkSplitter<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            offset: 0,
            finished: false,
        }
    }

    /// Bytes handed out so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn fill(&mut self) -> io::Result<Vec<u8>> {
        let mut payload = vec![0; self.chunk_size];
        let mut filled = 0;
        while filled < payload.len() {
            match self.reader.read(&mut payload[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        payload.truncate(filled);
        Ok(payload)
    }
}

impl<R: Read> Iterator for ChunkSplitter<R> {
    type Item = io::Result<ChunkFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.fill() {
            Ok(payload) if payload.is_empty() => {
                self.finished = true;
                Some(Ok(ChunkFrame::End {
                    total_length: self.offset,
                }))
            }
            Ok(payload) => {
                let frame = ChunkFrame::Data {
                    offset: self.offset,
                    payload,
                };
                self.offset += frame.credit_cost() as u64;
                Some(Ok(frame))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for ChunkSplitter<R> {}
