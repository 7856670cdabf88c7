//! Object lists through QGYOLOBJ, format OBJL0100
//!
//! QGYOLOBJ always builds OBJL0100 records; extra fields would be requested
//! through keys, which this request leaves empty.

use super::cursor::OpenListRequest;
use super::format::EntryFormat;
use super::info::LIST_INFORMATION_LENGTH;
use super::LIST_LIBRARY;
use crate::codec::{decode_fixed_text, encode_fixed_text, encode_int, TextCodec};
use crate::error::HostResult;
use crate::remote::{ProgramCall, ProgramParameter};

pub const OPEN_OBJECT_LIST: &str = "QGYOLOBJ";
pub const OBJL0100: &str = "OBJL0100";
/// Length of one OBJL0100 record
pub const OBJL0100_LENGTH: usize = 32;

/// Objects matching a name, library and type. Names accept the usual
/// special values (`*ALL`, `*LIBL`, generic `ABC*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectListRequest {
    pub name: String,
    pub library: String,
    pub object_type: String,
}

impl ObjectListRequest {
    pub fn new<N: Into<String>, L: Into<String>, T: Into<String>>(name: N, library: L, object_type: T) -> Self {
        Self { name: name.into(), library: library.into(), object_type: object_type.into() }
    }
}

/// Authority control block with no authorities requested
fn authority_control() -> Vec<u8> {
    let mut block = vec![0u8; 28];
    block[..4].copy_from_slice(&encode_int(28));
    block
}

/// Selection control selecting every information status
fn selection_control(codec: &dyn TextCodec) -> HostResult<Vec<u8>> {
    let mut block = Vec::with_capacity(21);
    block.extend(encode_int(21));
    // select, displacement to statuses, one status, reserved
    block.extend(encode_int(0));
    block.extend(encode_int(20));
    block.extend(encode_int(1));
    block.extend(encode_int(0));
    block.extend(codec.encode("*")?);
    Ok(block)
}

impl OpenListRequest for ObjectListRequest {
    fn build_call(&self, codec: &dyn TextCodec) -> HostResult<ProgramCall> {
        let mut qualified = encode_fixed_text(&self.name.to_uppercase(), 10, codec)?;
        qualified.extend(encode_fixed_text(&self.library.to_uppercase(), 10, codec)?);

        // records are read through get-list-entries, so the receiver stays minimal
        Ok(ProgramCall::new(LIST_LIBRARY, OPEN_OBJECT_LIST)
            .with_parameter(ProgramParameter::output(8))
            .with_parameter(ProgramParameter::input(encode_int(8).to_vec()))
            .with_parameter(ProgramParameter::output(LIST_INFORMATION_LENGTH))
            .with_parameter(ProgramParameter::input(encode_int(0).to_vec()))
            .with_parameter(ProgramParameter::input(encode_int(0).to_vec()))
            .with_parameter(ProgramParameter::input(qualified))
            .with_parameter(ProgramParameter::input(encode_fixed_text(&self.object_type.to_uppercase(), 10, codec)?))
            .with_parameter(ProgramParameter::input(authority_control()))
            .with_parameter(ProgramParameter::input(selection_control(codec)?))
            .with_parameter(ProgramParameter::input(encode_int(0).to_vec()))
            .with_parameter(ProgramParameter::input(encode_int(0).to_vec()))
            .with_parameter(ProgramParameter::input_output(vec![0; 4], 4)))
    }

    fn list_information_parameter(&self) -> usize {
        2
    }
}

/// One OBJL0100 record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
    pub library: String,
    pub object_type: String,
    /// ' ' when all information was returned
    pub information_status: char,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectEntryFormat;

impl EntryFormat for ObjectEntryFormat {
    type Entry = ObjectEntry;

    fn name(&self) -> &str {
        OBJL0100
    }

    fn decode(&self, record: &[u8], codec: &dyn TextCodec) -> HostResult<ObjectEntry> {
        let status = codec.decode(crate::codec::field(record, 30, 1)?)?;
        Ok(ObjectEntry {
            name: decode_fixed_text(record, 0, 10, codec)?,
            library: decode_fixed_text(record, 10, 10, codec)?,
            object_type: decode_fixed_text(record, 20, 10, codec)?,
            information_status: status.chars().next().unwrap_or(' '),
        })
    }
}

/// Encode an OBJL0100 record, the inverse of [`ObjectEntryFormat::decode`]
pub fn encode_object_entry(entry: &ObjectEntry, codec: &dyn TextCodec) -> HostResult<Vec<u8>> {
    let mut record = encode_fixed_text(&entry.name, 10, codec)?;
    record.extend(encode_fixed_text(&entry.library, 10, codec)?);
    record.extend(encode_fixed_text(&entry.object_type, 10, codec)?);
    record.extend(encode_fixed_text(&entry.information_status.to_string(), 1, codec)?);
    record.resize(OBJL0100_LENGTH, 0);
    Ok(record)
}
