//! Field conversion between host byte layouts and Rust values
//!
//! Everything here is a pure function over byte slices; the code-page codecs
//! are immutable statics, so readers on any thread may share them.

pub mod binary;
pub mod codepage;
pub mod decimal;

pub use binary::{
    decode_fixed_text, decode_int, decode_short, decode_u16, decode_u32, encode_fixed_text,
    encode_int, encode_short, field,
};
pub use codepage::{
    default_codec, lookup, supported_ccsids, TextCodec, CCSID_037, CCSID_1140, CCSID_500,
    CCSID_UCS2, CCSID_UTF16, EBCDIC_BLANK,
};
pub use decimal::{
    decode_packed_decimal, decode_packed_i64, decode_zoned_decimal, decode_zoned_i64,
    encode_packed_decimal, encode_zoned_decimal, packed_length,
};
