//! [`CASScanner`] - walks a `cas_NN.cas` shard record by record, without a
//! `.cat` index.
//!
//! Each record is `[magic(4) | sha1(20) | size:i32 | pad(4) | data(size)]`.
//! There is no trailing count or index; the shard ends at the first record
//! boundary where a read comes back empty.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::utils::{bytesa, bytesv, le_i32};
use crate::value::Sha1;
use crate::{Error, Result};

const CHUNK_MAGIC: [u8; 4] = [0xFA, 0xCE, 0x0F, 0xF0];

/// One chunk recovered by scanning a shard directly.
#[derive(Debug, Clone)]
pub struct ScannedChunk {
    pub sha1: Sha1,
    pub size: i32,
    pub data: Vec<u8>,
}

/// Iterates the chunk records of a `cas_NN.cas` shard in file order.
///
/// Useful for recovery or auditing when a catalog is missing, corrupt, or
/// deliberately not trusted.
pub struct CASScanner<R> {
    inner: R,
}

impl CASScanner<File> {
    /// Open `path` for scanning.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            inner: File::open(path)?,
        })
    }
}

impl<R: Read> CASScanner<R> {
    /// Wrap an already-open reader, positioned at the start of the shard.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

/// Reads the 4-byte record magic, or `Ok(None)` if the shard ends cleanly
/// at this record boundary (the first read returns zero bytes). A short
/// read that isn't a clean boundary is truncation, not end-of-shard.
fn read_magic_or_eof<R: Read>(r: &mut R) -> Result<Option<[u8; 4]>> {
    let mut first = [0u8; 1];
    if r.read(&mut first)? == 0 {
        return Ok(None);
    }
    let mut rest = [0u8; 3];
    r.read_exact(&mut rest)?;
    Ok(Some([first[0], rest[0], rest[1], rest[2]]))
}

impl<R: Read> Iterator for CASScanner<R> {
    type Item = Result<ScannedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let magic = match read_magic_or_eof(&mut self.inner) {
            Ok(None) => return None,
            Ok(Some(m)) => m,
            Err(e) => return Some(Err(e)),
        };
        if magic != CHUNK_MAGIC {
            return Some(Err(Error::BadMagic));
        }

        let sha1 = match bytesa::<20>(&mut self.inner) {
            Ok(b) => Sha1(b),
            Err(e) => return Some(Err(e)),
        };
        let size = match le_i32(&mut self.inner) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = bytesa::<4>(&mut self.inner) {
            return Some(Err(e));
        }
        if size < 0 {
            return Some(Err(Error::Parse("negative chunk size in scanned record")));
        }
        let data = match bytesv(&mut self.inner, size as usize) {
            Ok(d) => d,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(ScannedChunk { sha1, size, data }))
    }
}
