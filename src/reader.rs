//! [`RawReader`] - a position-tracked, length-bounded view over a file.
//!
//! Every higher layer (obfuscation, typed decoding, CAS/bundle substreams)
//! is built on top of this: a `RawReader` never lets a caller read or seek
//! outside `[0, limit)` relative to the view's own start, regardless of how
//! large the underlying file actually is.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::Result;

/// A bounded, position-tracked view over a byte source.
///
/// Generic over anything that is [`Read`] + [`Seek`] - a [`std::fs::File`],
/// a [`std::io::Cursor<Vec<u8>>`], or any other seekable byte source.
#[derive(Debug)]
pub struct RawReader<F> {
    inner: F,
    base_offset: u64,
    limit: u64,
    pos: u64,
}

impl<F: Read + Seek> RawReader<F> {
    /// Wrap `inner` as a bounded view starting at `base_offset` and
    /// extending for `limit` bytes. Seeks `inner` to `base_offset`.
    pub fn new(mut inner: F, base_offset: u64, limit: u64) -> Result<Self> {
        inner.seek(SeekFrom::Start(base_offset))?;
        Ok(Self {
            inner,
            base_offset,
            limit,
            pos: 0,
        })
    }

    /// Wrap the whole of `inner`, from its current position to its end, as
    /// a bounded view.
    pub fn whole(mut inner: F) -> Result<Self> {
        let base_offset = inner.stream_position()?;
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(base_offset))?;
        Ok(Self {
            inner,
            base_offset,
            limit: end.saturating_sub(base_offset),
            pos: 0,
        })
    }

    /// Number of bytes remaining before `eof`.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.pos)
    }

    /// Length of this view in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Current position relative to the view's start.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// `true` once `tell() >= limit()`.
    pub fn eof(&self) -> bool {
        self.pos >= self.limit
    }

    /// Read all remaining bytes in the view.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let n = self.remaining();
        self.read_n(n as usize)
    }

    /// Read exactly `n` bytes. Fails with [`crate::Error::Truncation`] if
    /// fewer than `n` bytes are available or the underlying source comes up
    /// short.
    pub fn read_n(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn clamp_seek_target(&self, target: i128) -> u64 {
        target.clamp(0, self.limit as i128) as u64
    }
}

/// Open a fresh file handle and return a bounded [`RawReader`] over
/// `[offset, offset + len)`.
///
/// Every CAS/bundle substream is opened this way rather than by sharing a
/// cursor, so concurrent readers never race on a single file position.
pub fn open_bounded(path: &Path, offset: u64, len: u64) -> Result<RawReader<File>> {
    let file = File::open(path)?;
    RawReader::new(file, offset, len)
}

impl<F: Read + Seek> Read for RawReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<F: Read + Seek> Seek for RawReader<F> {
    /// Translates `pos` to an absolute offset on the underlying source and
    /// clamps the resulting view-relative position to `[0, limit]`, per the
    /// bounded-view contract - it never seeks past the end of the view even
    /// if the underlying source is longer.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => self.clamp_seek_target(n as i128),
            SeekFrom::Current(d) => self.clamp_seek_target(self.pos as i128 + d as i128),
            SeekFrom::End(d) => self.clamp_seek_target(self.limit as i128 + d as i128),
        };
        self.inner.seek(SeekFrom::Start(self.base_offset + target))?;
        self.pos = target;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn view(data: &[u8], base: u64, limit: u64) -> RawReader<Cursor<Vec<u8>>> {
        RawReader::new(Cursor::new(data.to_vec()), base, limit).unwrap()
    }

    #[test]
    fn reads_within_bounds() {
        let mut r = view(b"hello world", 0, 5);
        assert_eq!(r.read_all().unwrap(), b"hello");
        assert!(r.eof());
    }

    #[test]
    fn base_offset_shifts_the_view() {
        let mut r = view(b"hello world", 6, 5);
        assert_eq!(r.read_all().unwrap(), b"world");
    }

    #[test]
    fn read_n_beyond_limit_is_truncation() {
        let mut r = view(b"hi", 0, 2);
        assert!(r.read_n(10).is_err());
    }

    #[test]
    fn seek_whence_variants_clamp() {
        let mut r = view(b"0123456789", 0, 10);
        r.seek(SeekFrom::Start(20)).unwrap();
        assert_eq!(r.tell(), 10);
        r.seek(SeekFrom::Start(4)).unwrap();
        r.seek(SeekFrom::Current(-100)).unwrap();
        assert_eq!(r.tell(), 0);
        r.seek(SeekFrom::End(-1)).unwrap();
        assert_eq!(r.tell(), 9);
    }

    #[test]
    fn tell_and_eof_track_position() {
        let mut r = view(b"ab", 0, 2);
        assert!(!r.eof());
        let mut one = [0u8; 1];
        r.read_exact(&mut one).unwrap();
        assert_eq!(r.tell(), 1);
        assert!(!r.eof());
        r.read_exact(&mut one).unwrap();
        assert!(r.eof());
    }
}
