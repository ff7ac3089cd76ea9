//! [`ObfuscatedReader`] - transparently strips the optional "DICE" header
//! and XOR-unmasks the payload using its embedded keystream.
//!
//! `.cat` and `.toc` files (and potentially `.sb` files) may be wrapped this
//! way; files that lack the magic are passed through unmodified.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::reader::RawReader;
use crate::utils::{bytesa, magic as expect_magic, u8};
use crate::{Error, Result};

const DICE_HEADER: [u8; 4] = [0x00, 0xD1, 0xCE, 0x00];
const HASH_OFFSET: u64 = 0x08;
const HASH_SIZE: usize = 256;
const MAGIC_OFFSET: u64 = 0x0128;
const MAGIC_SIZE: usize = 257;
const MAGIC_XOR: u8 = 0x7B;
const DATA_OFFSET: u64 = 0x022C;

/// A reader that strips the DICE obfuscation header (if present) and
/// XOR-unmasks every byte it returns.
///
/// Wraps any `Read + Seek` source; reads and seeks operate purely on the
/// payload region, which starts at `0x022C` for obfuscated files and at `0`
/// for plain ones.
pub struct ObfuscatedReader<F> {
    raw: RawReader<F>,
    magic: Option<[u8; MAGIC_SIZE]>,
    hash: Option<[u8; HASH_SIZE]>,
}

impl ObfuscatedReader<File> {
    /// Open `path` and strip obfuscation if present.
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<F: Read + Seek> ObfuscatedReader<F> {
    /// Wrap `inner` (positioned at its own start) and strip obfuscation if
    /// the DICE header is present.
    pub fn new(mut inner: F) -> Result<Self> {
        let start = inner.stream_position()?;
        let total_len = inner.seek(SeekFrom::End(0))? - start;
        inner.seek(SeekFrom::Start(start))?;

        if total_len >= 4 {
            let probe = bytesa::<4>(&mut inner)?;
            inner.seek(SeekFrom::Start(start))?;
            if probe == DICE_HEADER {
                return Self::new_obfuscated(inner, start, total_len);
            }
        }

        log::debug!("fbarc: no DICE header, treating stream as plain payload");
        Ok(Self {
            raw: RawReader::new(inner, start, total_len)?,
            magic: None,
            hash: None,
        })
    }

    fn new_obfuscated(mut inner: F, start: u64, total_len: u64) -> Result<Self> {
        expect_magic(&mut inner, &DICE_HEADER)?;

        inner.seek(SeekFrom::Start(start + HASH_OFFSET))?;
        if u8(&mut inner)? != b'x' {
            return Err(Error::Parse("DICE hash start marker not found"));
        }
        let hash = bytesa::<HASH_SIZE>(&mut inner)?;
        if u8(&mut inner)? != b'x' {
            return Err(Error::Parse("DICE hash end marker not found"));
        }
        log::debug!("fbarc: DICE hash region present (256 bytes, unvalidated)");

        inner.seek(SeekFrom::Start(start + MAGIC_OFFSET))?;
        let magic = bytesa::<MAGIC_SIZE>(&mut inner)?;

        let payload_len = total_len
            .checked_sub(DATA_OFFSET)
            .ok_or(Error::Truncation)?;
        let raw = RawReader::new(inner, start + DATA_OFFSET, payload_len)?;

        Ok(Self {
            raw,
            magic: Some(magic),
            hash: Some(hash),
        })
    }

    /// The retained-but-unvalidated 256-byte hash region, if this stream was
    /// obfuscated.
    pub fn hash(&self) -> Option<&[u8; HASH_SIZE]> {
        self.hash.as_ref()
    }

    /// `true` if this stream carried the DICE header and is being unmasked.
    pub fn is_obfuscated(&self) -> bool {
        self.magic.is_some()
    }

    /// Current position relative to the start of the payload.
    pub fn tell(&self) -> u64 {
        self.raw.tell()
    }

    /// `true` once the payload has been fully consumed.
    pub fn eof(&self) -> bool {
        self.raw.eof()
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> u64 {
        self.raw.limit()
    }

    /// `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.raw.limit() == 0
    }
}

impl<F: Read + Seek> Read for ObfuscatedReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream_pos = self.raw.tell();
        let n = self.raw.read(buf)?;
        if let Some(magic) = &self.magic {
            for (i, b) in buf[..n].iter_mut().enumerate() {
                let ks = magic[(stream_pos as usize + i) % MAGIC_SIZE];
                *b ^= ks ^ MAGIC_XOR;
            }
        }
        Ok(n)
    }
}

impl<F: Read + Seek> Seek for ObfuscatedReader<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.raw.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn masked_payload(plain: &[u8], magic: &[u8; MAGIC_SIZE]) -> Vec<u8> {
        plain
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ magic[i % MAGIC_SIZE] ^ MAGIC_XOR)
            .collect()
    }

    fn build_obfuscated(plain: &[u8], magic: &[u8; MAGIC_SIZE]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&DICE_HEADER);
        out.extend_from_slice(&[0u8; (HASH_OFFSET as usize) - 4]);
        out.push(b'x');
        out.extend_from_slice(&[0u8; HASH_SIZE]);
        out.push(b'x');
        out.extend_from_slice(&[0u8; (MAGIC_OFFSET as usize) - (HASH_OFFSET as usize + 2 + HASH_SIZE)]);
        out.extend_from_slice(magic);
        assert_eq!(out.len() as u64, DATA_OFFSET);
        out.extend_from_slice(&masked_payload(plain, magic));
        out
    }

    #[test]
    fn plain_stream_passes_through() {
        let mut r = ObfuscatedReader::new(Cursor::new(b"hello".to_vec())).unwrap();
        assert!(!r.is_obfuscated());
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn obfuscated_stream_is_unmasked() {
        let magic: [u8; MAGIC_SIZE] = std::array::from_fn(|i| (i * 7 + 3) as u8);
        let plain = b"the quick brown fox jumps".to_vec();
        let file = build_obfuscated(&plain, &magic);

        let mut r = ObfuscatedReader::new(Cursor::new(file)).unwrap();
        assert!(r.is_obfuscated());
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn mask_is_position_dependent_across_multiple_reads() {
        let magic: [u8; MAGIC_SIZE] = std::array::from_fn(|i| i as u8);
        let plain: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let file = build_obfuscated(&plain, &magic);

        let mut r = ObfuscatedReader::new(Cursor::new(file)).unwrap();
        let mut first = [0u8; 10];
        r.read_exact(&mut first).unwrap();
        let mut rest = Vec::new();
        r.read_to_end(&mut rest).unwrap();

        let mut joined = first.to_vec();
        joined.extend(rest);
        assert_eq!(joined, plain);
    }

    #[test]
    fn missing_marker_is_fatal() {
        let mut bad = vec![0u8; DATA_OFFSET as usize];
        bad[..4].copy_from_slice(&DICE_HEADER);
        bad[HASH_OFFSET as usize] = b'y'; // wrong marker
        let err = ObfuscatedReader::new(Cursor::new(bad)).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn exactly_the_prefix_has_empty_payload() {
        let magic = [0u8; MAGIC_SIZE];
        let file = build_obfuscated(&[], &magic);
        let r = ObfuscatedReader::new(Cursor::new(file)).unwrap();
        assert!(r.eof());
        assert_eq!(r.len(), 0);
    }
}
