//! Code page conversion
//!
//! Host text travels in EBCDIC single-byte code pages or UTF-16, identified by
//! a numeric CCSID. Codecs are registered once in a static table and looked up
//! by CCSID; an unknown CCSID is an error rather than a silent fallback.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{CodecError, CodecResult};

/// EBCDIC US/Canada
pub const CCSID_037: u32 = 37;
/// EBCDIC International
pub const CCSID_500: u32 = 500;
/// EBCDIC US/Canada with euro sign
pub const CCSID_1140: u32 = 1140;
/// UTF-16 big endian
pub const CCSID_UTF16: u32 = 1200;
/// UCS-2 big endian, treated as UTF-16
pub const CCSID_UCS2: u32 = 13488;

/// EBCDIC blank, the pad byte for fixed-width single-byte fields
pub const EBCDIC_BLANK: u8 = 0x40;

/// Code page 037 to Unicode.
///
/// Code page 037 is the standard EBCDIC encoding for US/Canada English and
/// the base for 500 and 1140, which differ in a handful of positions.
const CP037_TO_UNICODE: [char; 256] = [
    // 0x00-0x0F: Control characters
    '\x00', '\x01', '\x02', '\x03', '\u{009C}', '\t', '\u{0086}', '\x7F',
    '\u{0097}', '\u{008D}', '\u{008E}', '\x0B', '\x0C', '\r', '\x0E', '\x0F',
    // 0x10-0x1F: Control characters
    '\x10', '\x11', '\x12', '\x13', '\u{009D}', '\u{0085}', '\x08', '\u{0087}',
    '\x18', '\x19', '\u{0092}', '\u{008F}', '\x1C', '\x1D', '\x1E', '\x1F',
    // 0x20-0x2F: Control characters and special
    '\u{0080}', '\u{0081}', '\u{0082}', '\u{0083}', '\u{0084}', '\n', '\x17', '\x1B',
    '\u{0088}', '\u{0089}', '\u{008A}', '\u{008B}', '\u{008C}', '\x05', '\x06', '\x07',
    // 0x30-0x3F: Control characters
    '\u{0090}', '\u{0091}', '\x16', '\u{0093}', '\u{0094}', '\u{0095}', '\u{0096}', '\x04',
    '\u{0098}', '\u{0099}', '\u{009A}', '\u{009B}', '\x14', '\x15', '\u{009E}', '\x1A',
    // 0x40-0x4F: Space and special characters
    ' ', '\u{00A0}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E1}', '\u{00E3}', '\u{00E5}',
    '\u{00E7}', '\u{00F1}', '\u{00A2}', '.', '<', '(', '+', '|',
    // 0x50-0x5F: Ampersand and special characters
    '&', '\u{00E9}', '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00ED}', '\u{00EE}', '\u{00EF}',
    '\u{00EC}', '\u{00DF}', '!', '$', '*', ')', ';', '\u{00AC}',
    // 0x60-0x6F: Dash and special characters
    '-', '/', '\u{00C2}', '\u{00C4}', '\u{00C0}', '\u{00C1}', '\u{00C3}', '\u{00C5}',
    '\u{00C7}', '\u{00D1}', '\u{00A6}', ',', '%', '_', '>', '?',
    // 0x70-0x7F: Special characters and quotes
    '\u{00F8}', '\u{00C9}', '\u{00CA}', '\u{00CB}', '\u{00C8}', '\u{00CD}', '\u{00CE}', '\u{00CF}',
    '\u{00CC}', '`', ':', '#', '@', '\'', '=', '"',
    // 0x80-0x8F: Special character and lowercase a-i
    '\u{00D8}', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', '\u{00AB}', '\u{00BB}', '\u{00F0}', '\u{00FD}', '\u{00FE}', '\u{00B1}',
    // 0x90-0x9F: Degree symbol and lowercase j-r
    '\u{00B0}', 'j', 'k', 'l', 'm', 'n', 'o', 'p',
    'q', 'r', '\u{00AA}', '\u{00BA}', '\u{00E6}', '\u{00B8}', '\u{00C6}', '\u{00A4}',
    // 0xA0-0xAF: Micro sign and lowercase s-z
    '\u{00B5}', '~', 's', 't', 'u', 'v', 'w', 'x',
    'y', 'z', '\u{00A1}', '\u{00BF}', '\u{00D0}', '\u{00DD}', '\u{00DE}', '\u{00AE}',
    // 0xB0-0xBF: Caret and special characters
    '^', '\u{00A3}', '\u{00A5}', '\u{00B7}', '\u{00A9}', '\u{00A7}', '\u{00B6}', '\u{00BC}',
    '\u{00BD}', '\u{00BE}', '[', ']', '\u{00AF}', '\u{00A8}', '\u{00B4}', '\u{00D7}',
    // 0xC0-0xCF: Left brace and uppercase A-I
    '{', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', '\u{00AD}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00F3}', '\u{00F5}',
    // 0xD0-0xDF: Right brace and uppercase J-R
    '}', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    'Q', 'R', '\u{00B9}', '\u{00FB}', '\u{00FC}', '\u{00F9}', '\u{00FA}', '\u{00FF}',
    // 0xE0-0xEF: Backslash and uppercase S-Z
    '\\', '\u{00F7}', 'S', 'T', 'U', 'V', 'W', 'X',
    'Y', 'Z', '\u{00B2}', '\u{00D4}', '\u{00D6}', '\u{00D2}', '\u{00D3}', '\u{00D5}',
    // 0xF0-0xFF: Digits 0-9 and special characters
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', '\u{00B3}', '\u{00DB}', '\u{00DC}', '\u{00D9}', '\u{00DA}', '\u{009F}',
];


/// Positions where code page 500 differs from 037
const CP500_DELTA: [(u8, char); 7] = [
    (0x4A, '['),
    (0x4F, '!'),
    (0x5A, ']'),
    (0x5F, '^'),
    (0xB0, '\u{00A2}'),
    (0xBA, '\u{00AC}'),
    (0xBB, '|'),
];

/// Positions where code page 1140 differs from 037
const CP1140_DELTA: [(u8, char); 1] = [(0x9F, '\u{20AC}')];

/// Conversion between host bytes and Unicode text for one CCSID
pub trait TextCodec: Send + Sync {
    /// CCSID this codec implements
    fn ccsid(&self) -> u32;

    /// Convert host bytes to text
    fn decode(&self, bytes: &[u8]) -> CodecResult<String>;

    /// Convert text to host bytes
    fn encode(&self, text: &str) -> CodecResult<Vec<u8>>;

    /// Encoded blank used to pad fixed-width fields
    fn pad(&self) -> &'static [u8];
}

/// Table driven single-byte EBCDIC codec
pub struct SingleByteCodec {
    ccsid: u32,
    to_unicode: [char; 256],
    from_unicode: HashMap<char, u8>,
}

impl SingleByteCodec {
    fn new(ccsid: u32, to_unicode: [char; 256]) -> Self {
        let mut from_unicode = HashMap::with_capacity(256);
        for (byte, &ch) in to_unicode.iter().enumerate() {
            from_unicode.entry(ch).or_insert(byte as u8);
        }
        Self { ccsid, to_unicode, from_unicode }
    }

    fn derived(ccsid: u32, delta: &[(u8, char)]) -> Self {
        let mut table = CP037_TO_UNICODE;
        for &(byte, ch) in delta {
            table[byte as usize] = ch;
        }
        Self::new(ccsid, table)
    }

    /// Convert a single byte
    pub fn decode_byte(&self, byte: u8) -> char {
        self.to_unicode[byte as usize]
    }

    /// Convert a single character
    pub fn encode_char(&self, ch: char) -> Option<u8> {
        self.from_unicode.get(&ch).copied()
    }
}

impl TextCodec for SingleByteCodec {
    fn ccsid(&self) -> u32 {
        self.ccsid
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<String> {
        Ok(bytes.iter().map(|&b| self.decode_byte(b)).collect())
    }

    fn encode(&self, text: &str) -> CodecResult<Vec<u8>> {
        text.chars()
            .map(|ch| {
                self.encode_char(ch)
                    .ok_or(CodecError::Unmappable { ch, ccsid: self.ccsid })
            })
            .collect()
    }

    fn pad(&self) -> &'static [u8] {
        &[EBCDIC_BLANK]
    }
}

/// UTF-16 big endian codec for CCSIDs 1200 and 13488
pub struct Utf16Codec {
    ccsid: u32,
}

impl TextCodec for Utf16Codec {
    fn ccsid(&self) -> u32 {
        self.ccsid
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<String> {
        if bytes.len() % 2 != 0 {
            return Err(CodecError::InvalidUtf16 { length: bytes.len() });
        }
        let units = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        Ok(char::decode_utf16(units)
            .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())
    }

    fn encode(&self, text: &str) -> CodecResult<Vec<u8>> {
        Ok(text.encode_utf16().flat_map(|unit| unit.to_be_bytes()).collect())
    }

    fn pad(&self) -> &'static [u8] {
        &[0x00, 0x20]
    }
}

static REGISTRY: Lazy<HashMap<u32, Box<dyn TextCodec>>> = Lazy::new(|| {
    let mut registry: HashMap<u32, Box<dyn TextCodec>> = HashMap::new();
    registry.insert(CCSID_037, Box::new(SingleByteCodec::new(CCSID_037, CP037_TO_UNICODE)));
    registry.insert(CCSID_500, Box::new(SingleByteCodec::derived(CCSID_500, &CP500_DELTA)));
    registry.insert(CCSID_1140, Box::new(SingleByteCodec::derived(CCSID_1140, &CP1140_DELTA)));
    registry.insert(CCSID_UTF16, Box::new(Utf16Codec { ccsid: CCSID_UTF16 }));
    registry.insert(CCSID_UCS2, Box::new(Utf16Codec { ccsid: CCSID_UCS2 }));
    registry
});

/// Find the codec registered for `ccsid`
pub fn lookup(ccsid: u32) -> CodecResult<&'static dyn TextCodec> {
    REGISTRY
        .get(&ccsid)
        .map(|codec| codec.as_ref())
        .ok_or(CodecError::UnsupportedCodePage { ccsid })
}

/// The code page every host speaks before attributes are exchanged
pub fn default_codec() -> &'static dyn TextCodec {
    REGISTRY[&CCSID_037].as_ref()
}

/// All registered CCSIDs in ascending order
pub fn supported_ccsids() -> Vec<u32> {
    let mut ccsids: Vec<u32> = REGISTRY.keys().copied().collect();
    ccsids.sort_unstable();
    ccsids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp037_letters_and_digits() {
        let codec = lookup(CCSID_037).unwrap();
        assert_eq!(codec.encode("A").unwrap(), vec![0xC1]);
        assert_eq!(codec.encode("a").unwrap(), vec![0x81]);
        assert_eq!(codec.encode("0").unwrap(), vec![0xF0]);
        assert_eq!(codec.decode(&[0xC8, 0xC9]).unwrap(), "HI");
    }

    #[test]
    fn test_cp037_is_bijective() {
        let codec = lookup(CCSID_037).unwrap();
        let all: Vec<u8> = (0..=255).collect();
        let text = codec.decode(&all).unwrap();
        assert_eq!(codec.encode(&text).unwrap(), all);
    }

    #[test]
    fn test_cp500_brackets_differ_from_037() {
        let cp037 = lookup(CCSID_037).unwrap();
        let cp500 = lookup(CCSID_500).unwrap();
        assert_eq!(cp037.encode("[").unwrap(), vec![0xBA]);
        assert_eq!(cp500.encode("[").unwrap(), vec![0x4A]);
        assert_eq!(cp500.decode(&[0x4F]).unwrap(), "!");
    }

    #[test]
    fn test_cp1140_euro() {
        let codec = lookup(CCSID_1140).unwrap();
        assert_eq!(codec.encode("\u{20AC}").unwrap(), vec![0x9F]);
        assert!(lookup(CCSID_037).unwrap().encode("\u{20AC}").is_err());
    }

    #[test]
    fn test_utf16_round_trip_and_odd_length() {
        let codec = lookup(CCSID_UTF16).unwrap();
        let bytes = codec.encode("CPF9801").unwrap();
        assert_eq!(bytes.len(), 14);
        assert_eq!(codec.decode(&bytes).unwrap(), "CPF9801");
        assert!(matches!(codec.decode(&[0x00]), Err(CodecError::InvalidUtf16 { length: 1 })));
    }

    #[test]
    fn test_unsupported_code_page() {
        assert!(matches!(lookup(930), Err(CodecError::UnsupportedCodePage { ccsid: 930 })));
        assert_eq!(supported_ccsids(), vec![37, 500, 1140, 1200, 13488]);
    }
}
