//! Open / fetch / close over a server-side list handle
//!
//! A [`ListCursor`] owns a list handle for as long as it lives. Dropping a
//! cursor that was never closed closes it, so an early return or a panic in
//! the consumer does not leak the server cursor.

use log::{debug, error, warn};

use super::format::EntryFormat;
use super::info::{ListHandle, ListInformation, ListStatus, LIST_INFORMATION_LENGTH};
use super::{CLOSE_LIST, GET_LIST_ENTRIES, LIST_LIBRARY};
use crate::codec::{encode_int, TextCodec};
use crate::connection::HostConnection;
use crate::error::{HostResult, ListError};
use crate::remote::{CommandResult, ProgramCall, ProgramParameter};

/// A service-specific open call that yields a list handle.
pub trait OpenListRequest {
    /// Build the open call in the connection's code page
    fn build_call(&self, codec: &dyn TextCodec) -> HostResult<ProgramCall>;

    /// Index of the list information output parameter in the open call
    fn list_information_parameter(&self) -> usize;
}

fn error_code_parameter() -> ProgramParameter {
    // zero bytes provided: failures come back as messages
    ProgramParameter::input_output(vec![0; 4], 4)
}

fn check(call: &ProgramCall, result: CommandResult) -> HostResult<()> {
    if result.succeeded() {
        return Ok(());
    }
    Err(ListError::CallFailed {
        program: call.qualified_name(),
        return_code: result.return_code(),
        messages: result.into_messages(),
    }
    .into())
}

fn list_information(call: &ProgramCall, index: usize, codec: &dyn TextCodec) -> HostResult<ListInformation> {
    let bytes = call.parameter(index).and_then(|p| p.output_data()).unwrap_or_default();
    let info = ListInformation::parse(bytes, codec)?
        .ok_or_else(|| ListError::NoListInformation { program: call.qualified_name() })?;
    Ok(info)
}

fn check_status(info: &ListInformation) -> HostResult<()> {
    match info.status {
        Some(ListStatus::Error) => Err(ListError::BuildFailed { status: ListStatus::Error.as_char() }.into()),
        _ => Ok(()),
    }
}

/// A block of fixed-length records from one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListBlock {
    data: Vec<u8>,
    record_length: usize,
    count: usize,
    first_record: i32,
}

impl ListBlock {
    pub fn new(data: Vec<u8>, record_length: usize, count: usize, first_record: i32) -> Self {
        Self { data, record_length, count, first_record }
    }

    /// Records in this block
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// One-based number of the first record
    pub fn first_record(&self) -> i32 {
        self.first_record
    }

    /// Record `index` (zero-based) of this block
    pub fn record(&self, index: usize) -> Option<&[u8]> {
        if index >= self.count {
            return None;
        }
        let start = index * self.record_length;
        self.data.get(start..start + self.record_length)
    }

    /// Raw records in order
    pub fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.data.chunks_exact(self.record_length.max(1)).take(self.count)
    }

    /// Decode records lazily, one per `next()`
    pub fn entries<'a, F: EntryFormat>(
        &'a self,
        format: &'a F,
        codec: &'a dyn TextCodec,
    ) -> impl Iterator<Item = HostResult<F::Entry>> + 'a {
        self.records().map(move |record| format.decode(record, codec))
    }
}

/// An open list on the server
pub struct ListCursor<'c> {
    connection: &'c mut HostConnection,
    handle: ListHandle,
    info: ListInformation,
    closed: bool,
}

impl<'c> ListCursor<'c> {
    /// Run the open call and take ownership of the returned handle.
    pub fn open<R: OpenListRequest + ?Sized>(connection: &'c mut HostConnection, request: &R) -> HostResult<Self> {
        let codec = connection.codec();
        let mut call = request.build_call(codec)?;
        let result = connection.call(&mut call)?;
        check(&call, result)?;
        let info = list_information(&call, request.list_information_parameter(), codec)?;
        debug!("opened list {:?} with {} records so far", info.handle, info.total);
        // a list that failed to build still holds a handle; dropping the cursor closes it
        let cursor = Self { connection, handle: info.handle, info, closed: false };
        check_status(&cursor.info)?;
        Ok(cursor)
    }

    pub fn handle(&self) -> ListHandle {
        self.handle
    }

    /// List information from the most recent call
    pub fn info(&self) -> &ListInformation {
        &self.info
    }

    pub fn codec(&self) -> &'static dyn TextCodec {
        self.connection.codec()
    }

    /// Block until the server has built the whole list.
    pub fn wait_until_built(&mut self) -> HostResult<&ListInformation> {
        self.fetch(self.info.record_length.max(0), 0, -1)?;
        if !self.info.is_built() {
            warn!("list {:?} still reports status {:?}", self.handle, self.info.status);
        }
        Ok(&self.info)
    }

    /// Fetch up to `max_records` records starting at one-based `start`.
    pub fn fetch(&mut self, record_length: i32, max_records: i32, start: i32) -> HostResult<ListBlock> {
        if self.closed {
            return Err(ListError::Closed.into());
        }
        let receiver_length = record_length.max(0).saturating_mul(max_records.max(0)).max(1);
        let mut call = ProgramCall::new(LIST_LIBRARY, GET_LIST_ENTRIES)
            .with_parameter(ProgramParameter::output(receiver_length as u32))
            .with_parameter(ProgramParameter::input(encode_int(receiver_length).to_vec()))
            .with_parameter(ProgramParameter::input(self.handle.as_bytes().to_vec()))
            .with_parameter(ProgramParameter::output(LIST_INFORMATION_LENGTH))
            .with_parameter(ProgramParameter::input(encode_int(max_records).to_vec()))
            .with_parameter(ProgramParameter::input(encode_int(start).to_vec()))
            .with_parameter(error_code_parameter());

        let result = self.connection.call(&mut call)?;
        check(&call, result)?;
        let info = list_information(&call, 3, self.connection.codec())?;
        check_status(&info)?;

        let returned = usize::try_from(info.returned).unwrap_or(0);
        let data = call.parameter(0).and_then(|p| p.output_data()).unwrap_or_default().to_vec();
        let block = if returned == 0 {
            ListBlock::new(Vec::new(), 0, 0, start)
        } else {
            let length = usize::try_from(info.record_length)
                .ok()
                .filter(|&length| length > 0)
                .ok_or(ListError::InvalidRecordLength { record_length: info.record_length, total: info.total })?;
            let available = data.len() / length;
            if available < returned {
                warn!("receiver holds {available} of {returned} returned records");
            }
            ListBlock::new(data, length, returned.min(available), info.first_record.max(start))
        };
        debug!(
            "fetched {} records from {} (total {}, status {:?})",
            block.len(),
            start,
            info.total,
            info.status
        );
        self.info = info;
        Ok(block)
    }

    /// Release the handle. Runs at most once.
    pub fn close(&mut self) -> HostResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut call = ProgramCall::new(LIST_LIBRARY, CLOSE_LIST)
            .with_parameter(ProgramParameter::input(self.handle.as_bytes().to_vec()))
            .with_parameter(error_code_parameter());
        let result = self.connection.call(&mut call)?;
        check(&call, result)?;
        debug!("closed list {:?}", self.handle);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ListCursor<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                error!("failed to close list {:?}: {err}", self.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{lookup, CCSID_037};
    use crate::list::RawEntryFormat;

    #[test]
    fn test_block_iterates_whole_records_only() {
        let block = ListBlock::new((0u8..10).collect(), 3, 3, 1);
        let records: Vec<_> = block.records().collect();
        assert_eq!(records, vec![&[0, 1, 2][..], &[3, 4, 5][..], &[6, 7, 8][..]]);

        let format = RawEntryFormat::new("RAW");
        let codec = lookup(CCSID_037).unwrap();
        let mut entries = block.entries(&format, codec);
        assert_eq!(entries.next().unwrap().unwrap(), vec![0, 1, 2]);
        assert_eq!(entries.count(), 2);
        assert_eq!(block.record(2), Some(&[6, 7, 8][..]));
        assert_eq!(block.record(3), None);
    }

    #[test]
    fn test_empty_block() {
        let block = ListBlock::new(Vec::new(), 0, 0, 5);
        assert!(block.is_empty());
        assert_eq!(block.records().count(), 0);
        assert_eq!(block.first_record(), 5);
    }
}
