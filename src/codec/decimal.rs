//! Packed and zoned decimal fields
//!
//! Packed decimal stores two digits per byte with the sign in the last
//! nibble; a field of `digits` digits occupies `digits / 2 + 1` bytes and has
//! a leading zero nibble when `digits` is even. Zoned decimal stores one digit
//! per byte under an `F` zone, with the sign in the zone of the last byte.
//!
//! Values cross the API as decimal strings (`"-123.45"`) so no precision is
//! lost; the `_i64` helpers cover the common scale-zero case.

use super::binary::field;
use crate::error::{CodecError, CodecResult};

const SIGN_POSITIVE: u8 = 0x0C;
const SIGN_NEGATIVE: u8 = 0x0D;
const ZONE: u8 = 0x0F;

/// Byte length of a packed field holding `digits` digits
pub fn packed_length(digits: usize) -> usize {
    digits / 2 + 1
}

fn sign_is_negative(nibble: u8) -> CodecResult<bool> {
    match nibble {
        0x0A | 0x0C | 0x0E | 0x0F => Ok(false),
        0x0B | 0x0D => Ok(true),
        _ => Err(CodecError::InvalidDecimalSign { nibble }),
    }
}

fn check_digit(nibble: u8, position: usize) -> CodecResult<u8> {
    if nibble > 9 {
        Err(CodecError::InvalidDecimal { nibble, position })
    } else {
        Ok(nibble)
    }
}

fn check_scale(digits: usize, scale: usize) -> CodecResult<()> {
    if scale > digits {
        Err(CodecError::InvalidScale { digits, scale })
    } else {
        Ok(())
    }
}

/// Unpack digits and sign from a packed field
fn unpack(bytes: &[u8], offset: usize, digits: usize) -> CodecResult<(bool, Vec<u8>)> {
    let raw = field(bytes, offset, packed_length(digits))?;
    let mut nibbles = Vec::with_capacity(raw.len() * 2);
    for &byte in raw {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    let sign = nibbles.pop().unwrap_or(SIGN_POSITIVE);
    let negative = sign_is_negative(sign)?;
    // an even digit count leaves one pad nibble in front
    let skip = nibbles.len() - digits;
    let values = nibbles
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(position, &nibble)| check_digit(nibble, position))
        .collect::<CodecResult<Vec<u8>>>()?;
    Ok((negative, values))
}

fn unzone(bytes: &[u8], offset: usize, digits: usize) -> CodecResult<(bool, Vec<u8>)> {
    let raw = field(bytes, offset, digits)?;
    let mut negative = false;
    let mut values = Vec::with_capacity(digits);
    for (position, &byte) in raw.iter().enumerate() {
        let zone = byte >> 4;
        if position + 1 == raw.len() {
            negative = sign_is_negative(zone)?;
        } else if zone != ZONE {
            return Err(CodecError::InvalidDecimal { nibble: zone, position });
        }
        values.push(check_digit(byte & 0x0F, position)?);
    }
    Ok((negative, values))
}

/// Render digits with an implied decimal point `scale` places from the right
fn format_decimal(negative: bool, digits: &[u8], scale: usize) -> String {
    let split = digits.len() - scale;
    let integer: String = digits[..split]
        .iter()
        .map(|d| char::from(b'0' + d))
        .collect::<String>()
        .trim_start_matches('0')
        .to_string();
    let fraction: String = digits[split..].iter().map(|d| char::from(b'0' + d)).collect();

    let mut out = String::with_capacity(digits.len() + 2);
    if negative && digits.iter().any(|&d| d != 0) {
        out.push('-');
    }
    if integer.is_empty() {
        out.push('0');
    } else {
        out.push_str(&integer);
    }
    if scale > 0 {
        out.push('.');
        out.push_str(&fraction);
    }
    out
}

/// Parse decimal text into exactly `digits` digits with `scale` fraction digits
fn parse_decimal(value: &str, digits: usize, scale: usize) -> CodecResult<(bool, Vec<u8>)> {
    check_scale(digits, scale)?;
    let invalid = || CodecError::InvalidDecimalText { value: value.to_string() };

    let trimmed = value.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (unsigned, ""),
    };
    if integer.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !integer.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let integer = integer.trim_start_matches('0');
    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > scale || integer.len() > digits - scale {
        return Err(CodecError::DecimalOverflow { value: value.to_string(), digits });
    }

    let mut out = vec![0u8; digits - scale - integer.len()];
    out.extend(integer.bytes().map(|b| b - b'0'));
    out.extend(fraction.bytes().map(|b| b - b'0'));
    out.resize(digits, 0);
    Ok((negative, out))
}

/// Decode a packed decimal field into decimal text
pub fn decode_packed_decimal(
    bytes: &[u8],
    offset: usize,
    digits: usize,
    scale: usize,
) -> CodecResult<String> {
    check_scale(digits, scale)?;
    let (negative, values) = unpack(bytes, offset, digits)?;
    Ok(format_decimal(negative, &values, scale))
}

/// Decode a zoned decimal field into decimal text
pub fn decode_zoned_decimal(
    bytes: &[u8],
    offset: usize,
    digits: usize,
    scale: usize,
) -> CodecResult<String> {
    check_scale(digits, scale)?;
    let (negative, values) = unzone(bytes, offset, digits)?;
    Ok(format_decimal(negative, &values, scale))
}

/// Encode decimal text as a packed field of `digits` digits
pub fn encode_packed_decimal(value: &str, digits: usize, scale: usize) -> CodecResult<Vec<u8>> {
    let (negative, values) = parse_decimal(value, digits, scale)?;
    let mut nibbles = Vec::with_capacity(digits + 2);
    if digits % 2 == 0 {
        nibbles.push(0);
    }
    nibbles.extend_from_slice(&values);
    nibbles.push(if negative { SIGN_NEGATIVE } else { SIGN_POSITIVE });
    Ok(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// Encode decimal text as a zoned field of `digits` bytes
pub fn encode_zoned_decimal(value: &str, digits: usize, scale: usize) -> CodecResult<Vec<u8>> {
    let (negative, values) = parse_decimal(value, digits, scale)?;
    let mut out: Vec<u8> = values.iter().map(|&d| (ZONE << 4) | d).collect();
    if let Some(last) = out.last_mut() {
        if negative {
            *last = (SIGN_NEGATIVE << 4) | (*last & 0x0F);
        }
    }
    Ok(out)
}

fn to_i64(negative: bool, values: &[u8], digits: usize) -> CodecResult<i64> {
    let mut total: i64 = 0;
    for &d in values {
        total = total
            .checked_mul(10)
            .and_then(|t| t.checked_add(i64::from(d)))
            .ok_or_else(|| CodecError::DecimalOverflow {
                value: format_decimal(negative, values, 0),
                digits,
            })?;
    }
    Ok(if negative { -total } else { total })
}

/// Decode a scale-zero packed field as an integer
pub fn decode_packed_i64(bytes: &[u8], offset: usize, digits: usize) -> CodecResult<i64> {
    let (negative, values) = unpack(bytes, offset, digits)?;
    to_i64(negative, &values, digits)
}

/// Decode a scale-zero zoned field as an integer
pub fn decode_zoned_i64(bytes: &[u8], offset: usize, digits: usize) -> CodecResult<i64> {
    let (negative, values) = unzone(bytes, offset, digits)?;
    to_i64(negative, &values, digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_odd_digits() {
        // +12345 in 5 digits
        assert_eq!(decode_packed_decimal(&[0x12, 0x34, 0x5C], 0, 5, 0).unwrap(), "12345");
        assert_eq!(encode_packed_decimal("12345", 5, 0).unwrap(), vec![0x12, 0x34, 0x5C]);
    }

    #[test]
    fn test_packed_even_digits_with_scale() {
        // -1234.56 in 6 digits, 2 decimals
        let bytes = encode_packed_decimal("-1234.56", 6, 2).unwrap();
        assert_eq!(bytes, vec![0x01, 0x23, 0x45, 0x6D]);
        assert_eq!(decode_packed_decimal(&bytes, 0, 6, 2).unwrap(), "-1234.56");
    }

    #[test]
    fn test_packed_alternate_signs() {
        assert_eq!(decode_packed_decimal(&[0x7F], 0, 1, 0).unwrap(), "7");
        assert_eq!(decode_packed_decimal(&[0x7B], 0, 1, 0).unwrap(), "-7");
        assert_eq!(decode_packed_i64(&[0x00, 0x00, 0x1D], 0, 5).unwrap(), -1);
    }

    #[test]
    fn test_packed_rejects_bad_nibbles() {
        assert!(matches!(
            decode_packed_decimal(&[0x1A, 0x3C], 0, 3, 0),
            Err(CodecError::InvalidDecimal { nibble: 0x0A, .. })
        ));
        assert!(matches!(
            decode_packed_decimal(&[0x12, 0x34], 0, 3, 0),
            Err(CodecError::InvalidDecimalSign { nibble: 4 })
        ));
    }

    #[test]
    fn test_zoned_round_trip() {
        let bytes = encode_zoned_decimal("-42.7", 5, 1).unwrap();
        assert_eq!(bytes, vec![0xF0, 0xF0, 0xF4, 0xF2, 0xD7]);
        assert_eq!(decode_zoned_decimal(&bytes, 0, 5, 1).unwrap(), "-42.7");
        assert_eq!(decode_zoned_i64(&[0xF0, 0xF9, 0xF9], 0, 3).unwrap(), 99);
    }

    #[test]
    fn test_zoned_rejects_bad_zone() {
        assert!(matches!(
            decode_zoned_decimal(&[0x31, 0xF2], 0, 2, 0),
            Err(CodecError::InvalidDecimal { nibble: 3, position: 0 })
        ));
    }

    #[test]
    fn test_negative_zero_and_leading_zeros() {
        assert_eq!(decode_packed_decimal(&[0x00, 0x0D], 0, 3, 0).unwrap(), "0");
        assert_eq!(decode_packed_decimal(&[0x00, 0x5C], 0, 3, 2).unwrap(), "0.05");
    }

    #[test]
    fn test_encode_overflow_and_bad_text() {
        assert!(matches!(
            encode_packed_decimal("1000", 3, 0),
            Err(CodecError::DecimalOverflow { digits: 3, .. })
        ));
        assert!(matches!(
            encode_packed_decimal("1.234", 5, 2),
            Err(CodecError::DecimalOverflow { .. })
        ));
        assert!(matches!(encode_packed_decimal("12a", 5, 0), Err(CodecError::InvalidDecimalText { .. })));
        assert!(matches!(encode_packed_decimal("1", 2, 3), Err(CodecError::InvalidScale { .. })));
    }
}
