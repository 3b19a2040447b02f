use super::ReadAt;
use std::io::{self, Read};
use std::rc::Rc;

/// Sequential reader over a fixed window of a [`ReadAt`] source.
///
/// Several windows can share one source; each keeps its own position.
pub struct RangeReader {
    source: Rc<dyn ReadAt>,
    pos: u64,
    end: u64,
}

impl RangeReader {
    pub fn new(source: Rc<dyn ReadAt>, offset: u64, len: u64) -> Self {
        Self {
            source,
            pos: offset,
            end: offset.saturating_add(len),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining()) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(self.pos, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive data ends before entry does",
            ));
        }
        self.pos += n as u64;
        Ok(n)
    }
}
