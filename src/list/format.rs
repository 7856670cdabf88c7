//! Per-entry record formats

use crate::codec::TextCodec;
use crate::error::HostResult;

/// Decodes one fixed-length list record into an entry.
pub trait EntryFormat {
    type Entry;

    /// Format name passed to the open API, e.g. `OBJL0100`
    fn name(&self) -> &str;

    fn decode(&self, record: &[u8], codec: &dyn TextCodec) -> HostResult<Self::Entry>;
}

/// Hands records back undecoded
#[derive(Debug, Clone, Default)]
pub struct RawEntryFormat {
    name: String,
}

impl RawEntryFormat {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

impl EntryFormat for RawEntryFormat {
    type Entry = Vec<u8>;

    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, record: &[u8], _codec: &dyn TextCodec) -> HostResult<Vec<u8>> {
        Ok(record.to_vec())
    }
}
