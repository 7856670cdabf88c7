//! Fixed-width text and big-endian integer fields

use super::codepage::TextCodec;
use crate::error::{CodecError, CodecResult};

/// Borrow `length` bytes at `offset`, failing instead of panicking
pub fn field(bytes: &[u8], offset: usize, length: usize) -> CodecResult<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(CodecError::OutOfBounds { offset, length, available: bytes.len() })
}

/// Encode `value` into exactly `width` bytes, padding with the code page
/// blank or truncating.
pub fn encode_fixed_text(value: &str, width: usize, codec: &dyn TextCodec) -> CodecResult<Vec<u8>> {
    let pad = codec.pad();
    let mut out = codec.encode(value)?;
    if out.len() > width {
        // keep whole code units for multi-byte code pages
        out.truncate(width - width % pad.len());
    }
    while out.len() + pad.len() <= width {
        out.extend_from_slice(pad);
    }
    out.resize(width, 0);
    Ok(out)
}

/// Decode `width` bytes at `offset`, dropping trailing blanks
pub fn decode_fixed_text(
    bytes: &[u8],
    offset: usize,
    width: usize,
    codec: &dyn TextCodec,
) -> CodecResult<String> {
    let text = codec.decode(field(bytes, offset, width)?)?;
    Ok(text.trim_end_matches(' ').to_string())
}

pub fn encode_int(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_int(bytes: &[u8], offset: usize) -> CodecResult<i32> {
    let raw = field(bytes, offset, 4)?;
    Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub fn encode_short(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn decode_short(bytes: &[u8], offset: usize) -> CodecResult<i16> {
    let raw = field(bytes, offset, 2)?;
    Ok(i16::from_be_bytes([raw[0], raw[1]]))
}

/// Unsigned 4-byte field, used for lengths and return codes
pub fn decode_u32(bytes: &[u8], offset: usize) -> CodecResult<u32> {
    let raw = field(bytes, offset, 4)?;
    Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Unsigned 2-byte field, used for code points and reply ids
pub fn decode_u16(bytes: &[u8], offset: usize) -> CodecResult<u16> {
    let raw = field(bytes, offset, 2)?;
    Ok(u16::from_be_bytes([raw[0], raw[1]]))
}
