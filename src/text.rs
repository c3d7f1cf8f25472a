//! Text decoding for consolidated files
//!
//! Content is sniffed for binary data first, then decoded by byte-order
//! mark, then as UTF-8, and finally with the configured fallback encoding.

use serde::{Deserialize, Serialize};
use crate::error::SkipReason;

/// How many leading bytes are inspected for NUL bytes
const BINARY_SNIFF_LEN: usize = 8000;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Encoding used when content is not valid UTF-8
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackEncoding {
    /// ISO-8859-1: every byte maps to the code point of the same value
    #[default]
    Latin1,
    /// No fallback, non UTF-8 content is skipped
    Strict,
}

/// Encoding a file was actually decoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    Latin1,
}

/// Decode raw file bytes into text
pub fn decode(bytes: &[u8], fallback: FallbackEncoding) -> Result<(String, TextEncoding), SkipReason> {
    if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes).map(|s| (s, TextEncoding::Utf16Le));
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes).map(|s| (s, TextEncoding::Utf16Be));
    }

    if looks_binary(bytes) {
        return Err(SkipReason::Binary);
    }

    if let Some(Ok(s)) = bytes.strip_prefix(UTF8_BOM).map(std::str::from_utf8) {
        return Ok((s.to_string(), TextEncoding::Utf8Bom));
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => Ok((s.to_string(), TextEncoding::Utf8)),
        Err(err) => match fallback {
            FallbackEncoding::Latin1 => Ok((bytes.iter().map(|&b| b as char).collect(), TextEncoding::Latin1)),
            FallbackEncoding::Strict => Err(SkipReason::Undecodable(err.to_string())),
        },
    }
}

/// A NUL byte near the start of a file marks it as binary
pub fn looks_binary(bytes: &[u8]) -> bool {
    let len = bytes.len().min(BINARY_SNIFF_LEN);
    bytes[..len].contains(&0)
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Result<String, SkipReason> {
    if bytes.len() % 2 != 0 {
        return Err(SkipReason::Undecodable("odd number of bytes in UTF-16 content".to_string()));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units).map_err(|e| SkipReason::Undecodable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_utf8() {
        let (text, enc) = decode("héllo".as_bytes(), FallbackEncoding::Strict).unwrap();
        assert_eq!(text, "héllo");
        assert_eq!(enc, TextEncoding::Utf8);
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let bytes = [UTF8_BOM, b"x=1"].concat();
        let (text, enc) = decode(&bytes, FallbackEncoding::Latin1).unwrap();
        assert_eq!(text, "x=1");
        assert_eq!(enc, TextEncoding::Utf8Bom);
    }

    #[test]
    fn test_invalid_utf8_after_bom_uses_fallback() {
        let bytes = [UTF8_BOM, &[b'c', b'a', b'f', 0xE9]].concat();
        let (text, enc) = decode(&bytes, FallbackEncoding::Latin1).unwrap();
        assert!(text.ends_with("café"));
        assert_eq!(enc, TextEncoding::Latin1);

        let err = decode(&bytes, FallbackEncoding::Strict).unwrap_err();
        assert!(matches!(err, SkipReason::Undecodable(_)));
    }

    #[test]
    fn test_latin1_fallback() {
        let bytes = [b'c', b'a', b'f', 0xE9];
        let (text, enc) = decode(&bytes, FallbackEncoding::Latin1).unwrap();
        assert_eq!(text, "café");
        assert_eq!(enc, TextEncoding::Latin1);
    }

    #[test]
    fn test_strict_rejects_invalid_utf8() {
        let bytes = [b'c', b'a', b'f', 0xE9];
        let err = decode(&bytes, FallbackEncoding::Strict).unwrap_err();
        assert!(matches!(err, SkipReason::Undecodable(_)));
    }

    #[test]
    fn test_nul_bytes_are_binary() {
        let bytes = [0x89, b'P', b'N', b'G', 0x00, 0x01];
        assert_eq!(decode(&bytes, FallbackEncoding::Latin1).unwrap_err(), SkipReason::Binary);
    }

    #[test]
    fn test_utf16_le_with_bom() {
        let mut bytes = UTF16_LE_BOM.to_vec();
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, enc) = decode(&bytes, FallbackEncoding::Strict).unwrap();
        assert_eq!(text, "hi");
        assert_eq!(enc, TextEncoding::Utf16Le);
    }

    #[test]
    fn test_utf16_be_with_bom() {
        let mut bytes = UTF16_BE_BOM.to_vec();
        for unit in "ok".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let (text, _) = decode(&bytes, FallbackEncoding::Strict).unwrap();
        assert_eq!(text, "ok");
    }
}
