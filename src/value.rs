//! [`Value`] - the decoded tagged-object tree.
//!
//! A tree of these is what [`crate::decoder::decode`] produces from a
//! tagged binary object stream. Variants map 1:1 onto the typecode table in
//! [`crate::decoder`]; there is no class hierarchy, just one sum type with
//! a computed accessor (`Sha1::to_hex`) where the source format needed a
//! subclass.

use uuid::Uuid;

/// One decoded value from the tagged object format.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Typecode 0 - also the end-of-collection sentinel, never itself
    /// nested inside a list/dict as a value with that meaning.
    Null,
    /// Typecode 6.
    Bool(bool),
    /// Typecode 8.
    I32(i32),
    /// Typecode 9.
    I64(i64),
    /// Typecode 7 - opaque bytes; the format does not declare an encoding.
    Str(Vec<u8>),
    /// Typecode 15.
    Uuid(Uuid),
    /// Typecode 16.
    Sha1(Sha1),
    /// Typecode 5 - 8 bytes of unknown meaning, preserved verbatim.
    Opaque8([u8; 8]),
    /// Typecode 19.
    Blob(Vec<u8>),
    /// Typecode 1, ordered.
    List(Vec<Value>),
    /// Typecode 2, insertion-ordered, unique keys.
    Dict(Dict),
}

impl Value {
    /// View this value as a [`Str`](Value::Str), lossily decoded as UTF-8.
    pub fn as_str_lossy(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Value::Str(bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }

    /// View this value as a [`List`](Value::List).
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// View this value as a [`Dict`](Value::Dict).
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// View this value as an [`I32`](Value::I32) or [`I64`](Value::I64),
    /// widened to `i64`. Bundle entry `offset`/`size` fields may be encoded
    /// as either width.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }
}

/// A 20-byte SHA-1 digest, as read from the archive.
///
/// Equality is byte-for-byte; [`Sha1::to_hex`] is the computed accessor
/// used as a catalog/chunk-reference key (lowercase hex, no separators).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1(pub [u8; 20]);

impl Sha1 {
    /// Lowercase hex encoding, used as the catalog key.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Sha1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An insertion-ordered string-keyed map with unique keys, matching the
/// dict typecode's on-disk order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict {
    entries: Vec<(String, Value)>,
}

impl Dict {
    /// An empty dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key -> value`, overwriting any existing entry for `key`
    /// while preserving its original position (matches the source format's
    /// "keys are unique within a dict" invariant).
    pub fn insert(&mut self, key: String, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'a> IntoIterator for &'a Dict {
    type Item = (&'a str, &'a Value);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, Value)>,
        fn(&'a (String, Value)) -> (&'a str, &'a Value),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.iter().into_iter()
    }
}
