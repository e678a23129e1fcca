//! Self-contained binary container (GLB)
//!
//! Layout: a 12 byte header `{magic, version, length}` followed by a JSON
//! chunk and a BIN chunk, each prefixed by `{chunk_length, chunk_type}`.
//! All integers are little-endian u32.

use crate::error::{ModelError, malformed};

/// "glTF"
pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_VERSION: u32 = 2;
/// "JSON"
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
/// "BIN\0"
pub const CHUNK_BIN: u32 = 0x004E_4942;

const HEADER_SIZE: usize = 12;
const CHUNK_HEADER_SIZE: usize = 8;

/// The two chunks of a GLB file, borrowed from the input.
#[derive(Debug, Clone, Copy)]
pub struct GlbContainer<'a> {
    pub json: &'a [u8],
    pub bin: &'a [u8],
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let word: [u8; 4] = bytes.get(offset..end)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

impl<'a> GlbContainer<'a> {
    /// Split a GLB file into its document and payload chunks.
    ///
    /// `file` is only used for log context.
    pub fn parse(bytes: &'a [u8], file: &str) -> Result<Self, ModelError> {
        let header = (
            read_u32(bytes, 0),
            read_u32(bytes, 4),
            read_u32(bytes, 8),
        );
        let (Some(magic), Some(version), Some(length)) = header else {
            return Err(malformed(file, format!("{} bytes is too short for a GLB header", bytes.len())));
        };
        if magic != GLB_MAGIC {
            return Err(malformed(file, format!("bad GLB magic {magic:#010x}")));
        }
        if version != GLB_VERSION {
            return Err(malformed(file, format!("unsupported GLB version {version}")));
        }
        if length as usize != bytes.len() {
            return Err(malformed(
                file,
                format!("GLB declares {} bytes but {} were supplied", length, bytes.len()),
            ));
        }

        let (json, offset) = Self::chunk(bytes, HEADER_SIZE, CHUNK_JSON, "JSON", file)?;
        let (bin, end) = Self::chunk(bytes, offset, CHUNK_BIN, "BIN", file)?;
        if end < bytes.len() {
            tracing::warn!(
                file = %file,
                trailing = bytes.len() - end,
                "GLB binary chunk is shorter than the remaining file"
            );
        }

        Ok(Self { json, bin })
    }

    /// Read one chunk at `offset`, returning its body and the offset after it.
    fn chunk(
        bytes: &'a [u8],
        offset: usize,
        expected: u32,
        label: &str,
        file: &str,
    ) -> Result<(&'a [u8], usize), ModelError> {
        let (Some(length), Some(kind)) = (read_u32(bytes, offset), read_u32(bytes, offset + 4)) else {
            return Err(malformed(file, format!("missing GLB {label} chunk header")));
        };
        if kind != expected {
            return Err(malformed(
                file,
                format!("GLB chunk type {kind:#010x} where {label} ({expected:#010x}) was expected"),
            ));
        }
        let start = offset + CHUNK_HEADER_SIZE;
        let end = start
            .checked_add(length as usize)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                malformed(
                    file,
                    format!(
                        "GLB {label} chunk of {length} bytes exceeds the remaining {} bytes",
                        bytes.len() - start
                    ),
                )
            })?;
        Ok((&bytes[start..end], end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(json: &[u8], bin: &[u8]) -> Vec<u8> {
        let total = HEADER_SIZE + CHUNK_HEADER_SIZE * 2 + json.len() + bin.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(json);
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(bin);
        out
    }

    #[test]
    fn test_parse_valid() {
        let bytes = build(b"{}  ", &[1, 2, 3, 4]);
        let glb = GlbContainer::parse(&bytes, "test.glb").unwrap();
        assert_eq!(glb.json, b"{}  ");
        assert_eq!(glb.bin, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = build(b"{}  ", &[]);
        bytes[0] = b'x';
        let err = GlbContainer::parse(&bytes, "test.glb").unwrap_err();
        assert!(matches!(err, ModelError::MalformedContainer(_)));
    }

    #[test]
    fn test_bad_version() {
        let mut bytes = build(b"{}  ", &[]);
        bytes[4] = 1;
        assert!(GlbContainer::parse(&bytes, "test.glb").is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let mut bytes = build(b"{}  ", &[0; 4]);
        bytes.push(0);
        let err = GlbContainer::parse(&bytes, "test.glb").unwrap_err();
        assert!(err.to_string().contains("declares"));
    }

    #[test]
    fn test_swapped_chunk_tags() {
        let mut bytes = build(b"{}  ", &[0; 4]);
        bytes[16..20].copy_from_slice(&CHUNK_BIN.to_le_bytes());
        let err = GlbContainer::parse(&bytes, "test.glb").unwrap_err();
        assert!(matches!(err, ModelError::MalformedContainer(_)));
    }

    #[test]
    fn test_missing_bin_chunk() {
        let json = b"{}  ";
        let total = HEADER_SIZE + CHUNK_HEADER_SIZE + json.len();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"glTF");
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&(total as u32).to_le_bytes());
        bytes.extend_from_slice(&(json.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        bytes.extend_from_slice(json);
        assert!(GlbContainer::parse(&bytes, "test.glb").is_err());
    }

    #[test]
    fn test_oversized_chunk() {
        let mut bytes = build(b"{}  ", &[0; 4]);
        bytes[12..16].copy_from_slice(&1000u32.to_le_bytes());
        assert!(GlbContainer::parse(&bytes, "test.glb").is_err());
    }

    #[test]
    fn test_truncated_header() {
        assert!(GlbContainer::parse(b"glTF", "test.glb").is_err());
    }
}
