//! Read cursor over one entry's data.

use flate2::Crc;
use flate2::read::DeflateDecoder;
use std::io::{self, Cursor, Read};

use crate::io::RangeReader;

use super::error::{ErrorCode, ZipError, ZipResult};

enum Body {
    /// Bytes as stored: STORED entries, or any entry opened compressed
    Raw(RangeReader),
    Deflate(DeflateDecoder<RangeReader>),
    /// Pending content that has not been written to disk yet
    Memory(Cursor<Vec<u8>>),
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Body::Raw(r) => r.read(buf),
            Body::Deflate(r) => r.read(buf),
            Body::Memory(r) => r.read(buf),
        }
    }
}

/// An open entry. Verifies the CRC when the last byte has been read.
pub struct RawFile {
    body: Body,
    /// Expected (crc, size) of the decoded data; `None` skips verification
    expected: Option<(u32, u64)>,
    crc: Crc,
    total: u64,
    /// First failure; reported again by [`RawFile::close`]
    error: Option<ZipError>,
    eof: bool,
}

impl RawFile {
    pub(crate) fn stored(reader: RangeReader, expected: Option<(u32, u64)>) -> Self {
        Self::with_body(Body::Raw(reader), expected)
    }

    pub(crate) fn deflated(reader: RangeReader, expected: (u32, u64)) -> Self {
        Self::with_body(Body::Deflate(DeflateDecoder::new(reader)), Some(expected))
    }

    pub(crate) fn memory(data: Vec<u8>) -> Self {
        Self::with_body(Body::Memory(Cursor::new(data)), None)
    }

    fn with_body(body: Body, expected: Option<(u32, u64)>) -> Self {
        Self {
            body,
            expected,
            crc: Crc::new(),
            total: 0,
            error: None,
            eof: false,
        }
    }

    /// Read up to `buf.len()` bytes; `Ok(0)` means end of entry.
    pub fn read(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.eof || buf.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        while filled < buf.len() {
            let n = match self.body.read(&mut buf[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = decode_error(&self.body, &e);
                    return Err(self.fail(err));
                }
            };
            if n == 0 {
                self.eof = true;
                self.verify()?;
                break;
            }
            self.crc.update(&buf[filled..filled + n]);
            self.total += n as u64;
            filled += n;
        }
        Ok(filled)
    }

    fn verify(&mut self) -> ZipResult<()> {
        if let Some((crc, size)) = self.expected {
            if self.total != size {
                return Err(self.fail(ZipError::new(ErrorCode::Eof)));
            }
            if self.crc.sum() != crc {
                return Err(self.fail(ZipError::new(ErrorCode::Crc)));
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: ZipError) -> ZipError {
        self.error = Some(err.clone());
        err
    }

    /// Release the cursor, reporting the first failure seen while reading.
    pub fn close(self) -> ZipResult<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn decode_error(body: &Body, err: &io::Error) -> ZipError {
    match (body, err.kind()) {
        (_, io::ErrorKind::UnexpectedEof) => ZipError::new(ErrorCode::Eof),
        (Body::Deflate(_), io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData) => {
            ZipError::new(ErrorCode::Zlib)
        }
        _ => ZipError::io(ErrorCode::Read, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ReadAt;
    use std::rc::Rc;

    fn crc_of(data: &[u8]) -> u32 {
        let mut crc = Crc::new();
        crc.update(data);
        crc.sum()
    }

    #[test]
    fn short_reads_then_empty_at_end() {
        let data: Rc<dyn ReadAt> = Rc::new(b"hello world".to_vec());
        let expected = Some((crc_of(b"hello world"), 11));
        let mut file = RawFile::stored(RangeReader::new(data, 0, 11), expected);
        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        let mut rest = [0u8; 64];
        assert_eq!(file.read(&mut rest).unwrap(), 6);
        assert_eq!(file.read(&mut rest).unwrap(), 0);
        assert!(file.close().is_ok());
    }

    #[test]
    fn crc_mismatch_is_sticky() {
        let data: Rc<dyn ReadAt> = Rc::new(b"abc".to_vec());
        let mut file = RawFile::stored(RangeReader::new(data, 0, 3), Some((0x1234, 3)));
        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf).unwrap_err().code, ErrorCode::Crc);
        assert_eq!(file.read(&mut buf).unwrap_err().code, ErrorCode::Crc);
        assert_eq!(file.close().unwrap_err().code, ErrorCode::Crc);
    }
}
