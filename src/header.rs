//! # Archive Header
//!
//! An archive is laid out as:
//!
//! 1. **Size record**: a pickle holding one `u32`, the byte length of the header record.
//! 2. **Header record**: a pickle holding one string, the JSON node tree.
//! 3. **Payload**: the bytes of every packed file, concatenated in processing order.
//!
//! A pickle is a little-endian `u32` payload length followed by the payload.
//! Strings inside a pickle are a `u32` length, the bytes, then zero padding up
//! to a 4-byte boundary. Node offsets count from the start of the payload.

use std::path::{Component, Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::HeaderError;

/// Size of the leading size record (pickle length + `u32`).
pub const SIZE_RECORD_LEN: usize = 8;

/// Largest file that can be described by a node.
pub const MAX_PACKED_FILE_SIZE: u64 = u32::MAX as u64;

/// Write side of the record framing.
#[derive(Debug, Default)]
pub struct Pickle {
    payload: Vec<u8>,
}

impl Pickle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, value: u32) {
        self.payload.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a length-prefixed string padded to the 4-byte boundary.
    ///
    /// Returns `None` when the string does not fit the `u32` length field.
    pub fn write_string(&mut self, value: &str) -> Option<()> {
        let len = u32::try_from(value.len()).ok()?;
        self.write_u32(len);
        self.payload.extend_from_slice(value.as_bytes());
        let padding = (4 - value.len() % 4) % 4;
        self.payload.extend(std::iter::repeat(0u8).take(padding));
        Some(())
    }

    /// Consumes the pickle, prefixing the payload length.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        let len = u32::try_from(self.payload.len()).ok()?;
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.payload);
        Some(out)
    }
}

/// Read side of the record framing.
pub struct PickleReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PickleReader<'a> {
    /// Validates the payload length prefix of `buf`.
    pub fn new(buf: &'a [u8]) -> Result<Self, HeaderError> {
        let declared = read_u32_le(buf, 0).ok_or(HeaderError::Truncated)? as usize;
        let payload = buf.get(4..4 + declared).ok_or(HeaderError::Truncated)?;
        Ok(Self { payload, pos: 0 })
    }

    pub fn read_u32(&mut self) -> Result<u32, HeaderError> {
        let value = read_u32_le(self.payload, self.pos)
            .ok_or_else(|| HeaderError::Malformed("record ends inside an integer".into()))?;
        self.pos += 4;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<&'a str, HeaderError> {
        let len = self.read_u32()? as usize;
        let bytes = self
            .payload
            .get(self.pos..self.pos + len)
            .ok_or_else(|| HeaderError::Malformed("record ends inside a string".into()))?;
        self.pos += len + (4 - len % 4) % 4;
        std::str::from_utf8(bytes).map_err(|e| HeaderError::Malformed(e.to_string()))
    }
}

fn read_u32_le(buf: &[u8], at: usize) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// One record of the header's lookup tree.
///
/// Directories carry `files`, packed files carry `offset`, symlinks carry `link`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<IndexMap<String, Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Decimal string so offsets beyond 2^53 survive JSON readers.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "offset_string")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unpacked: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

mod offset_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Number(n)) => Ok(Some(n)),
            Some(Raw::Text(s)) => s.parse().map(Some).map_err(de::Error::custom),
        }
    }
}

impl Node {
    pub fn directory() -> Self {
        Self { files: Some(IndexMap::new()), ..Self::default() }
    }

    pub fn is_directory(&self) -> bool {
        self.files.is_some()
    }
}

/// Splits an archive-relative path into names, ignoring `.` and separators.
pub(crate) fn relative_names(relative: &Path) -> Vec<String> {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// In-memory node tree plus the running payload offset.
#[derive(Debug, Clone)]
pub struct Filesystem {
    header: Node,
    offset: u64,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem {
    pub fn new() -> Self {
        Self { header: Node::directory(), offset: 0 }
    }

    pub fn header(&self) -> &Node {
        &self.header
    }

    /// Next free byte of the payload region.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Claims `size` bytes of payload and returns where they start.
    pub fn allocate(&mut self, size: u64) -> u64 {
        let start = self.offset;
        self.offset += size;
        start
    }

    /// Returns the node at `relative`, creating it and any missing parents.
    pub fn node_mut(&mut self, relative: &Path) -> &mut Node {
        let mut node = &mut self.header;
        for name in relative_names(relative) {
            node = node.files.get_or_insert_with(IndexMap::new).entry(name).or_default();
        }
        node
    }

    pub fn node(&self, relative: &Path) -> Option<&Node> {
        let mut node = &self.header;
        for name in relative_names(relative) {
            node = node.files.as_ref()?.get(&name)?;
        }
        Some(node)
    }

    /// Registers a directory, keeping any children it already has.
    pub fn insert_directory(&mut self, relative: &Path, unpacked: bool) -> &mut Node {
        let node = self.node_mut(relative);
        node.files.get_or_insert_with(IndexMap::new);
        if unpacked {
            node.unpacked = true;
        }
        node
    }

    /// Whether the directory at `relative` is marked unpacked. The root never is.
    pub fn is_unpacked_dir(&self, relative: &Path) -> bool {
        self.node(relative).is_some_and(|n| n.unpacked)
    }

    /// Serializes the tree into the size record followed by the header record.
    pub fn encode_header(&self) -> Result<(Vec<u8>, Vec<u8>), crate::error::PackError> {
        let json = serde_json::to_string(&self.header)
            .map_err(|source| crate::error::PackError::Json { source, path: "<header>".into() })?;
        let too_large = || crate::error::PackError::HeaderTooLarge(json.len());

        let mut header_pickle = Pickle::new();
        header_pickle.write_string(&json).ok_or_else(too_large)?;
        let header_buf = header_pickle.into_bytes().ok_or_else(too_large)?;

        let mut size_pickle = Pickle::new();
        size_pickle.write_u32(u32::try_from(header_buf.len()).map_err(|_| too_large())?);
        let size_buf = size_pickle.into_bytes().ok_or_else(too_large)?;
        Ok((size_buf, header_buf))
    }
}

/// Parses the header record out of the bytes following the size record.
pub fn decode_header(header_buf: &[u8]) -> Result<Node, HeaderError> {
    let mut reader = PickleReader::new(header_buf)?;
    let json = reader.read_string()?;
    Ok(serde_json::from_str(json)?)
}

/// Reads the header record length from the size record.
pub fn decode_size_record(size_buf: &[u8]) -> Result<u32, HeaderError> {
    PickleReader::new(size_buf)?.read_u32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn string_pickle_is_padded() {
        let mut pickle = Pickle::new();
        pickle.write_string("abcde").unwrap();
        let bytes = pickle.into_bytes().unwrap();
        // payload = 4 (len) + 5 (bytes) + 3 (pad)
        assert_eq!(&bytes[..4], &12u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..13], b"abcde");
        assert_eq!(&bytes[13..], &[0, 0, 0]);
    }

    #[test]
    fn size_record_describes_header_record() {
        let mut fs = Filesystem::new();
        fs.node_mut(Path::new("index.js")).size = Some(3);
        let (size_buf, header_buf) = fs.encode_header().unwrap();
        assert_eq!(size_buf.len(), SIZE_RECORD_LEN);
        assert_eq!(decode_size_record(&size_buf).unwrap() as usize, header_buf.len());
        assert_eq!(decode_header(&header_buf).unwrap(), *fs.header());
    }

    #[test]
    fn offsets_serialize_as_strings() {
        let node = Node { size: Some(10), offset: Some(1 << 40), ..Node::default() };
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"size":10,"offset":"1099511627776"}"#);
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
        let numeric: Node = serde_json::from_str(r#"{"size":1,"offset":7}"#).unwrap();
        assert_eq!(numeric.offset, Some(7));
    }

    #[test]
    fn node_mut_creates_parents_in_insertion_order() {
        let mut fs = Filesystem::new();
        fs.insert_directory(Path::new("b"), false);
        fs.insert_directory(Path::new("a"), true);
        fs.node_mut(&PathBuf::from("a").join("x.bin")).size = Some(1);
        let names: Vec<&String> = fs.header().files.as_ref().unwrap().keys().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(fs.is_unpacked_dir(Path::new("a")));
        assert!(!fs.is_unpacked_dir(Path::new("")));
        assert!(fs.node(Path::new("a/x.bin")).is_some());
    }

    #[test]
    fn allocate_advances_monotonically() {
        let mut fs = Filesystem::new();
        assert_eq!(fs.allocate(5), 0);
        assert_eq!(fs.allocate(0), 5);
        assert_eq!(fs.allocate(7), 5);
        assert_eq!(fs.offset(), 12);
    }

    #[test]
    fn truncated_records_are_rejected() {
        assert!(matches!(decode_size_record(&[4, 0, 0]), Err(HeaderError::Truncated)));
        let mut pickle = Pickle::new();
        pickle.write_string("{}").unwrap();
        let bytes = pickle.into_bytes().unwrap();
        assert!(decode_header(&bytes[..bytes.len() - 2]).is_err());
    }
}
