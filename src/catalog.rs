//! [`CASCatalog`] - the `.cat` index mapping SHA-1 digests to shard offsets,
//! and [`CASFile`], one resolved entry in it.
//!
//! A catalog is itself an [`ObfuscatedReader`]-wrapped payload: a 16-byte
//! magic literal followed by fixed-size records read to EOF. There is no
//! length prefix on the record list - the catalog ends where the file does.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::obfuscated::ObfuscatedReader;
use crate::reader::{open_bounded, RawReader};
use crate::utils::{le_i32, magic as expect_magic};
use crate::value::Sha1;
use crate::{Error, NotFoundKind, Result};

const CATALOG_MAGIC: [u8; 16] = *b"NyanNyanNyanNyan";

/// Accepted key types for [`CASCatalog::get`]: a hex string, or a
/// [`Sha1`] value via its hex view.
pub trait Sha1Key {
    fn hex_key(self) -> String;
}

impl Sha1Key for &str {
    fn hex_key(self) -> String {
        self.to_string()
    }
}

impl Sha1Key for Sha1 {
    fn hex_key(self) -> String {
        self.to_hex()
    }
}

impl Sha1Key for &Sha1 {
    fn hex_key(self) -> String {
        self.to_hex()
    }
}

/// Reads a 20-byte SHA-1, or `Ok(None)` if the catalog ends cleanly at this
/// record boundary (the first read returns zero bytes). A short read that
/// isn't a clean boundary is truncation, not end-of-catalog.
fn read_sha1_or_eof<R: Read>(r: &mut R) -> Result<Option<[u8; 20]>> {
    let mut first = [0u8; 1];
    if r.read(&mut first)? == 0 {
        return Ok(None);
    }
    let mut rest = [0u8; 19];
    r.read_exact(&mut rest)?;
    let mut out = [0u8; 20];
    out[0] = first[0];
    out[1..].copy_from_slice(&rest);
    Ok(Some(out))
}

/// One resolved entry in a [`CASCatalog`]: the shard, offset, and size of a
/// chunk identified by its SHA-1 digest.
#[derive(Debug, Clone)]
pub struct CASFile {
    sha1: Sha1,
    offset: i32,
    size: i32,
    cas_num: i32,
    shard_path: PathBuf,
}

impl CASFile {
    /// The chunk's SHA-1 digest.
    pub fn sha1(&self) -> Sha1 {
        self.sha1
    }

    /// Size of the chunk in bytes, as recorded in the catalog (not
    /// independently verified against the shard file).
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Index of the `cas_NN.cas` shard this chunk lives in.
    pub fn cas_num(&self) -> i32 {
        self.cas_num
    }

    /// Byte offset of the chunk within its shard.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Open a bounded, unobfuscated reader over exactly this chunk's bytes
    /// in its shard file.
    ///
    /// Opens a fresh file handle every call - safe to call concurrently
    /// from multiple threads on the same [`CASFile`].
    pub fn open(&self) -> Result<RawReader<File>> {
        if self.offset < 0 || self.size < 0 {
            return Err(Error::Parse("negative offset or size in catalog entry"));
        }
        open_bounded(&self.shard_path, self.offset as u64, self.size as u64)
    }
}

/// A parsed `.cat` catalog: SHA-1 digest to shard location, plus the
/// directory it lives in (used to resolve shard and superbundle paths).
pub struct CASCatalog {
    dir: PathBuf,
    stem: String,
    entries: HashMap<String, CASFile>,
}

impl CASCatalog {
    /// Open and parse `path` as a catalog file.
    ///
    /// `path`'s stem (filename without extension) is used to resolve
    /// sibling `cas_NN.cas` shard files. Returned wrapped in an [`Arc`] so
    /// [`CASCatalog::open_superbundle`] can attach it to the [`Bundle`] it
    /// opens, letting bundle files dereference chunk references against it.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or(Error::Parse("catalog path has no file stem"))?
            .to_string();

        let mut reader = ObfuscatedReader::open(path)?;
        expect_magic(&mut reader, &CATALOG_MAGIC)?;

        let mut entries = HashMap::new();
        loop {
            let sha1_bytes = match read_sha1_or_eof(&mut reader) {
                Ok(None) => break,
                Ok(Some(b)) => b,
                Err(e) => return Err(e),
            };
            let offset = le_i32(&mut reader)?;
            let size = le_i32(&mut reader)?;
            let cas_num = le_i32(&mut reader)?;
            let sha1 = Sha1(sha1_bytes);
            let shard_path = dir.join(format!("{stem}_{cas_num:02}.cas"));
            entries.insert(
                sha1.to_hex(),
                CASFile {
                    sha1,
                    offset,
                    size,
                    cas_num,
                    shard_path,
                },
            );
        }

        Ok(Arc::new(Self {
            dir,
            stem,
            entries,
        }))
    }

    /// Look up a chunk by its SHA-1 digest, given either as a lowercase
    /// hex string or a [`Sha1`] value.
    pub fn get<K: Sha1Key>(&self, key: K) -> Result<&CASFile> {
        let hex = key.hex_key();
        self.entries
            .get(&hex)
            .ok_or_else(|| Error::NotFound(NotFoundKind::Sha1(hex)))
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &CASFile> {
        self.entries.values()
    }

    /// Open shard `num` (`<stem>_NN.cas`) directly, bypassing the catalog.
    ///
    /// Used by [`crate::scanner::CASScanner`] to walk a shard without an
    /// index.
    pub fn open_cas(&self, num: i32) -> Result<File> {
        let path = self.dir.join(format!("{}_{num:02}.cas", self.stem));
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                log::debug!(
                    "fbarc: shard {num} not found at {} (returning NotFound)",
                    path.display()
                );
                Error::NotFound(NotFoundKind::Shard(num))
            } else {
                Error::Io(e)
            }
        })
    }

    /// Open `<name>.toc` beside this catalog as a [`Bundle`], attaching
    /// this catalog so the bundle's chunk references can be resolved.
    pub fn open_superbundle(self: &Arc<Self>, name: &str) -> Result<Bundle> {
        let base = self.dir.join(name);
        let toc_path = base.with_extension("toc");
        if !toc_path.is_file() {
            log::debug!(
                "fbarc: superbundle {name:?} not found at {} (returning NotFound)",
                toc_path.display()
            );
            return Err(Error::NotFound(NotFoundKind::Superbundle(name.to_string())));
        }
        Bundle::open(&base, Some(Arc::clone(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalog(dir: &Path, stem: &str, records: &[([u8; 20], i32, i32, i32)]) -> PathBuf {
        let path = dir.join(format!("{stem}.cat"));
        let mut f = File::create(&path).unwrap();
        f.write_all(&CATALOG_MAGIC).unwrap();
        for (sha1, offset, size, cas_num) in records {
            f.write_all(sha1).unwrap();
            f.write_all(&offset.to_le_bytes()).unwrap();
            f.write_all(&size.to_le_bytes()).unwrap();
            f.write_all(&cas_num.to_le_bytes()).unwrap();
        }
        path
    }

    #[test]
    fn parses_records_to_eof_and_resolves_shard_path() {
        let dir = tempfile::tempdir().unwrap();
        let sha1 = [0x11u8; 20];
        let path = write_catalog(dir.path(), "game", &[(sha1, 16, 4, 2)]);

        let cat = CASCatalog::open(&path).unwrap();
        assert_eq!(cat.len(), 1);
        let entry = cat.get(Sha1(sha1)).unwrap();
        assert_eq!(entry.offset(), 16);
        assert_eq!(entry.size(), 4);
        assert_eq!(entry.cas_num(), 2);
        assert_eq!(entry.shard_path, dir.path().join("game_02.cas"));
    }

    #[test]
    fn unknown_sha1_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(dir.path(), "game", &[]);
        let cat = CASCatalog::open(&path).unwrap();
        assert!(matches!(
            cat.get("00"),
            Err(Error::NotFound(NotFoundKind::Sha1(_)))
        ));
    }

    #[test]
    fn chunk_reads_exactly_its_slice_of_the_shard() {
        let dir = tempfile::tempdir().unwrap();
        let shard_path = dir.path().join("game_00.cas");
        std::fs::write(&shard_path, b"xxxxHELLOxxxx").unwrap();

        let sha1 = [0x22u8; 20];
        let path = write_catalog(dir.path(), "game", &[(sha1, 4, 5, 0)]);
        let cat = CASCatalog::open(&path).unwrap();
        let entry = cat.get(Sha1(sha1)).unwrap();

        let mut reader = entry.open().unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut buf).unwrap();
        assert_eq!(buf, b"HELLO");
    }
}
