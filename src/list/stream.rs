//! Feeds list records into the streaming buffer pool

use log::debug;

use super::cursor::{ListBlock, ListCursor};
use crate::buffer_pool::{DataBuffer, FillOutcome, RecordSource};
use crate::error::{HostResult, ListError};

/// Pulls chunks through a cursor and loads one record per buffer.
pub struct ListRecordSource<'a, 'c> {
    cursor: &'a mut ListCursor<'c>,
    chunk_size: i32,
    total: i32,
    fetched: i32,
    block: Option<ListBlock>,
    position: usize,
    next_record: i64,
}

impl<'a, 'c> ListRecordSource<'a, 'c> {
    /// Wait for the list to be built and start at its first record.
    pub fn new(cursor: &'a mut ListCursor<'c>, chunk_size: i32) -> HostResult<Self> {
        let total = cursor.wait_until_built()?.total;
        Ok(Self {
            cursor,
            chunk_size: chunk_size.max(1),
            total,
            fetched: 0,
            block: None,
            position: 0,
            next_record: 1,
        })
    }

    pub fn total(&self) -> i32 {
        self.total
    }

    fn next_block(&mut self) -> HostResult<bool> {
        if self.fetched >= self.total {
            return Ok(false);
        }
        let record_length = self.cursor.info().record_length;
        if record_length <= 0 {
            return Err(ListError::InvalidRecordLength { record_length, total: self.total }.into());
        }
        let block = self
            .cursor
            .fetch(record_length, self.chunk_size.min(self.total - self.fetched), self.fetched + 1)?;
        if block.is_empty() {
            return Err(ListError::Stalled { consumed: self.fetched, total: self.total }.into());
        }
        debug!("streaming {} records from {}", block.len(), self.fetched + 1);
        self.fetched += block.len() as i32;
        self.block = Some(block);
        self.position = 0;
        Ok(true)
    }
}

impl RecordSource for ListRecordSource<'_, '_> {
    fn fill(&mut self, buffer: &mut DataBuffer) -> HostResult<FillOutcome> {
        loop {
            if let Some(record) = self.block.as_ref().and_then(|block| block.record(self.position)) {
                buffer.load_record(self.next_record, record)?;
                self.position += 1;
                self.next_record += 1;
                return Ok(FillOutcome::Filled);
            }
            if !self.next_block()? {
                return Ok(FillOutcome::EndOfStream);
            }
        }
    }
}
