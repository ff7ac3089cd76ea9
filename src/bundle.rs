//! [`Bundle`] - a parsed superbundle (`.toc`) and the [`BundleFile`] entries
//! it lists, each a bounded slice of the companion `.sb` file.
//!
//! The `.toc` is a single top-level dict; everything except its `bundles`
//! list is opaque metadata, kept around but not interpreted further.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::CASCatalog;
use crate::decoder::decode;
use crate::obfuscated::ObfuscatedReader;
use crate::reader::{open_bounded, RawReader};
use crate::value::Value;
use crate::{Error, NotFoundKind, Result};

/// One chunk reference found inside a bundle file's own parsed contents: a
/// `Dict` with `id` (Str) and `sha1` (Sha1), per spec.
#[derive(Debug, Clone)]
pub struct ChunkRef {
    id: String,
    sha1: crate::value::Sha1,
}

impl ChunkRef {
    /// The chunk's id, as recorded alongside its sha1.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The chunk's content hash.
    pub fn sha1(&self) -> crate::value::Sha1 {
        self.sha1
    }
}

/// One entry in a bundle's `bundles` list: a named, offset-and-size-bounded
/// region of the companion `.sb` file.
#[derive(Debug, Clone)]
pub struct BundleFile {
    sb_path: PathBuf,
    id: String,
    offset: i64,
    size: i64,
    cat: Option<Arc<CASCatalog>>,
}

impl BundleFile {
    /// The entry's id, as recorded in the `.toc`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Byte offset within the `.sb` file.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Size in bytes.
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Open a bounded reader over exactly this entry's bytes in the `.sb`
    /// file. Opens a fresh file handle every call.
    pub fn open(&self) -> Result<RawReader<File>> {
        if self.offset < 0 || self.size < 0 {
            return Err(Error::Parse("negative offset or size in bundle entry"));
        }
        open_bounded(&self.sb_path, self.offset as u64, self.size as u64)
    }

    /// Decode this entry's own bytes as a tagged object tree.
    ///
    /// Bundle files are themselves tagged-object streams (commonly a dict
    /// carrying a `chunks` list) - this decodes through the same
    /// [`crate::decoder::decode`] used for the `.toc`, but over the bundle
    /// file's bounded slice of the `.sb` rather than the whole file.
    pub fn parsed_contents(&self) -> Result<Value> {
        decode(&mut self.open()?)
    }

    /// List the chunk references (`{id, sha1}` dicts) in this bundle file's
    /// `chunks` list, resolved through the catalog attached when the owning
    /// [`Bundle`] was opened via [`CASCatalog::open_superbundle`].
    ///
    /// Returns [`Error::Usage`] if no catalog is attached - a bundle opened
    /// directly via [`Bundle::open`] with `cat: None` has no way to resolve
    /// chunk sha1s, even though the chunk list itself is readable.
    pub fn iter_chunk_files(&self) -> Result<Vec<(ChunkRef, crate::catalog::CASFile)>> {
        let Some(cat) = &self.cat else {
            return Err(Error::Usage(
                "bundle file references chunks but no catalog is attached",
            ));
        };

        let root = self.parsed_contents()?;
        let chunks = root
            .as_dict()
            .and_then(|d| d.get("chunks"))
            .and_then(Value::as_list)
            .unwrap_or(&[]);

        let mut out = Vec::with_capacity(chunks.len());
        for entry in chunks {
            let Some(d) = entry.as_dict() else { continue };
            let Some(id) = d.get("id").and_then(Value::as_str_lossy) else {
                continue;
            };
            let Some(sha1) = d.get("sha1") else { continue };
            let Value::Sha1(sha1) = sha1 else { continue };
            let chunk_ref = ChunkRef {
                id: id.into_owned(),
                sha1: *sha1,
            };
            let cas_file = cat.get(*sha1)?.clone();
            out.push((chunk_ref, cas_file));
        }
        Ok(out)
    }
}

/// A parsed superbundle: the decoded `.toc` metadata plus the entries from
/// its `bundles` list, each resolvable against the companion `.sb` file.
pub struct Bundle {
    root: Value,
    files: Vec<BundleFile>,
}

impl Bundle {
    /// Load `<base>.toc` and index its `bundles` list against `<base>.sb`.
    ///
    /// Entries missing either `offset` or `size` are skipped - the source
    /// format uses the same list for file-bearing and metadata-only
    /// entries, and only the former are addressable bundle files.
    ///
    /// `cat`, if given, is attached to every resulting [`BundleFile`] so its
    /// [`BundleFile::iter_chunk_files`] can resolve chunk sha1s.
    /// [`CASCatalog::open_superbundle`] always passes its own catalog;
    /// calling this directly with `None` yields bundle files whose chunk
    /// lists are readable but whose sha1 references cannot be dereferenced.
    pub fn open(base: &std::path::Path, cat: Option<Arc<CASCatalog>>) -> Result<Self> {
        let toc_path = base.with_extension("toc");
        let sb_path = base.with_extension("sb");

        let mut reader = ObfuscatedReader::open(&toc_path)?;
        let root = decode(&mut reader)?;

        let dict = root
            .as_dict()
            .ok_or(Error::Parse("toc root is not a dict"))?;

        let mut files = Vec::new();
        if let Some(entries) = dict.get("bundles").and_then(Value::as_list) {
            for entry in entries {
                let Some(d) = entry.as_dict() else { continue };
                let id = d.get("id").and_then(Value::as_str_lossy);
                let offset = d.get("offset").and_then(Value::as_int);
                let size = d.get("size").and_then(Value::as_int);
                if let (Some(id), Some(offset), Some(size)) = (id, offset, size) {
                    files.push(BundleFile {
                        sb_path: sb_path.clone(),
                        id: id.into_owned(),
                        offset,
                        size,
                        cat: cat.clone(),
                    });
                }
            }
        }

        Ok(Self { root, files })
    }

    /// The full decoded `.toc` dict, including fields not related to
    /// file addressing.
    pub fn metadata(&self) -> &Value {
        &self.root
    }

    /// Look up a bundle file by id.
    pub fn get_file(&self, id: &str) -> Result<&BundleFile> {
        self.files
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::NotFound(NotFoundKind::BundleFile(id.to_string())))
    }

    /// Iterate bundle files in `.toc` order.
    pub fn iter_files(&self) -> impl Iterator<Item = &BundleFile> {
        self.files.iter()
    }

    /// Number of addressable bundle files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// `true` if the bundle has no addressable files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bstr(s: &str) -> Vec<u8> {
        let mut out = vec![0x07, (s.len() + 1) as u8];
        out.extend_from_slice(s.as_bytes());
        out.push(0x00);
        out
    }

    fn dict_entry(id: &str, offset: i32, size: i32) -> Vec<u8> {
        let mut out = vec![0x02, 0x03]; // dict, size hint 3 (ignored)
        out.push(0x07);
        out.extend_from_slice(b"id\x00");
        out.extend_from_slice(&bstr(id));
        out.push(0x08);
        out.extend_from_slice(b"offset\x00");
        out.extend_from_slice(&offset.to_le_bytes());
        out.push(0x08);
        out.extend_from_slice(b"size\x00");
        out.extend_from_slice(&size.to_le_bytes());
        out.push(0x00); // dict terminator
        out
    }

    fn write_toc(path: &std::path::Path, entries: &[(&str, i32, i32)]) {
        let mut root = vec![0x02, 0x01]; // outer dict
        root.push(0x01); // bundles key's value is a list
        root.extend_from_slice(b"bundles\x00");
        root.push(entries.len() as u8); // size hint (ignored)
        for (id, offset, size) in entries {
            root.extend(dict_entry(id, *offset, *size));
        }
        root.push(0x00); // list terminator
        root.push(0x00); // outer dict terminator
        std::fs::write(path, root).unwrap();
    }

    #[test]
    fn indexes_bundle_files_from_toc_and_opens_sb_slices() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("level01");
        write_toc(&base.with_extension("toc"), &[("chunk_a", 2, 5)]);
        std::fs::write(base.with_extension("sb"), b"__HELLO__").unwrap();

        let bundle = Bundle::open(&base, None).unwrap();
        assert_eq!(bundle.len(), 1);
        let file = bundle.get_file("chunk_a").unwrap();
        assert_eq!(file.offset(), 2);
        assert_eq!(file.size(), 5);

        let mut reader = file.open().unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut buf).unwrap();
        assert_eq!(buf, b"HELLO");
    }

    fn chunk_dict(id: &str, sha1: [u8; 20]) -> Vec<u8> {
        let mut out = vec![0x02, 0x02]; // dict, size hint 2 (ignored)
        out.push(0x07);
        out.extend_from_slice(b"id\x00");
        out.extend(bstr(id));
        out.push(0x10); // typecode 16, sha1
        out.extend_from_slice(b"sha1\x00");
        out.extend_from_slice(&sha1);
        out.push(0x00); // dict terminator
        out
    }

    fn bundle_file_contents(chunks: &[(&str, [u8; 20])]) -> Vec<u8> {
        let mut out = vec![0x02, 0x01]; // outer dict
        out.push(0x01); // chunks key's value is a list
        out.extend_from_slice(b"chunks\x00");
        out.push(chunks.len() as u8); // size hint (ignored)
        for (id, sha1) in chunks {
            out.extend(chunk_dict(id, *sha1));
        }
        out.push(0x00); // list terminator
        out.push(0x00); // outer dict terminator
        out
    }

    #[test]
    fn iter_chunk_files_without_a_catalog_is_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("level01");
        let contents = bundle_file_contents(&[("piece_a", [0x33; 20])]);
        write_toc(&base.with_extension("toc"), &[("piece", 0, contents.len() as i32)]);
        std::fs::write(base.with_extension("sb"), &contents).unwrap();

        let bundle = Bundle::open(&base, None).unwrap();
        let file = bundle.get_file("piece").unwrap();
        assert!(matches!(file.iter_chunk_files(), Err(Error::Usage(_))));
    }

    #[test]
    fn iter_chunk_files_resolves_sha1_references_through_attached_catalog() {
        use crate::catalog::CASCatalog;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();

        let cas_sha1 = [0x44u8; 20];
        let shard_path = dir.path().join("game_00.cas");
        std::fs::write(&shard_path, b"payload").unwrap();

        let cat_path = dir.path().join("game.cat");
        let mut f = File::create(&cat_path).unwrap();
        f.write_all(b"NyanNyanNyanNyan").unwrap();
        f.write_all(&cas_sha1).unwrap();
        f.write_all(&0i32.to_le_bytes()).unwrap();
        f.write_all(&7i32.to_le_bytes()).unwrap();
        f.write_all(&0i32.to_le_bytes()).unwrap();
        drop(f);

        let cat = CASCatalog::open(&cat_path).unwrap();

        let base = dir.path().join("level01");
        let contents = bundle_file_contents(&[("piece_a", cas_sha1)]);
        write_toc(
            &base.with_extension("toc"),
            &[("piece", 0, contents.len() as i32)],
        );
        std::fs::write(base.with_extension("sb"), &contents).unwrap();

        let bundle = Bundle::open(&base, Some(cat)).unwrap();
        let file = bundle.get_file("piece").unwrap();
        let resolved = file.iter_chunk_files().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0.id(), "piece_a");
        assert_eq!(resolved[0].1.size(), 7);
    }

    #[test]
    fn missing_bundle_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("level01");
        write_toc(&base.with_extension("toc"), &[]);
        std::fs::write(base.with_extension("sb"), b"").unwrap();

        let bundle = Bundle::open(&base, None).unwrap();
        assert!(matches!(
            bundle.get_file("nope"),
            Err(Error::NotFound(NotFoundKind::BundleFile(_)))
        ));
    }
}
