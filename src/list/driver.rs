//! Drives a list from open to close

use std::ops::ControlFlow;

use log::{debug, error, info};

use super::cursor::{ListCursor, OpenListRequest};
use super::format::EntryFormat;
use super::stream::ListRecordSource;
use crate::buffer_pool::{BufferPool, DataBuffer, StreamSummary};
use crate::config::ClientConfig;
use crate::connection::HostConnection;
use crate::error::{HostResult, ListError};

/// Outcome of one [`ListDriver::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListSummary {
    /// Total records the server built
    pub total: i32,
    /// Entries handed to the consumer
    pub delivered: usize,
    /// QGYGTLE calls made, including the initial wait
    pub fetches: usize,
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListDriver {
    chunk_size: i32,
}

impl Default for ListDriver {
    fn default() -> Self {
        Self::new(ClientConfig::default().list_chunk_size)
    }
}

impl ListDriver {
    pub fn new(chunk_size: i32) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.list_chunk_size)
    }

    pub fn chunk_size(&self) -> i32 {
        self.chunk_size
    }

    /// Open the list, feed every entry to `consumer` until it breaks or the
    /// list is exhausted, then close the handle.
    ///
    /// The handle is closed on every path. A close failure is returned only
    /// when nothing failed before it.
    pub fn run<R, F, C>(
        &self,
        connection: &mut HostConnection,
        request: &R,
        format: &F,
        mut consumer: C,
    ) -> HostResult<ListSummary>
    where
        R: OpenListRequest + ?Sized,
        F: EntryFormat,
        C: FnMut(F::Entry) -> ControlFlow<()>,
    {
        let mut cursor = ListCursor::open(connection, request)?;
        let outcome = self.drain(&mut cursor, format, &mut consumer);
        let summary = finish(&mut cursor, outcome)?;
        info!(
            "{}: delivered {} of {} entries in {} fetches",
            format.name(),
            summary.delivered,
            summary.total,
            summary.fetches
        );
        Ok(summary)
    }

    /// Collect every entry of the list.
    pub fn collect<R, F>(&self, connection: &mut HostConnection, request: &R, format: &F) -> HostResult<Vec<F::Entry>>
    where
        R: OpenListRequest + ?Sized,
        F: EntryFormat,
    {
        let mut entries = Vec::new();
        self.run(connection, request, format, |entry| {
            entries.push(entry);
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }

    /// Stream raw records of the list through `pool`.
    pub fn stream<R, F, P>(
        &self,
        connection: &mut HostConnection,
        request: &R,
        pool: &mut BufferPool,
        format: &F,
        process: P,
    ) -> HostResult<StreamSummary>
    where
        R: OpenListRequest + ?Sized,
        F: Sync,
        P: Fn(&F, &DataBuffer) -> HostResult<()> + Sync,
    {
        let mut cursor = ListCursor::open(connection, request)?;
        let outcome = ListRecordSource::new(&mut cursor, self.chunk_size)
            .and_then(|mut source| pool.run(&mut source, format, process));
        finish(&mut cursor, outcome)
    }

    fn drain<F, C>(&self, cursor: &mut ListCursor<'_>, format: &F, consumer: &mut C) -> HostResult<ListSummary>
    where
        F: EntryFormat,
        C: FnMut(F::Entry) -> ControlFlow<()>,
    {
        let total = cursor.wait_until_built()?.total;
        let codec = cursor.codec();
        let mut summary = ListSummary { total, fetches: 1, ..ListSummary::default() };

        let mut consumed = 0;
        while consumed < total {
            let record_length = cursor.info().record_length;
            if record_length <= 0 {
                return Err(ListError::InvalidRecordLength { record_length, total }.into());
            }
            let block = cursor.fetch(record_length, self.chunk_size.min(total - consumed), consumed + 1)?;
            summary.fetches += 1;
            if block.is_empty() {
                return Err(ListError::Stalled { consumed, total }.into());
            }
            for entry in block.entries(format, codec) {
                summary.delivered += 1;
                if consumer(entry?).is_break() {
                    debug!("consumer stopped after {} entries", summary.delivered);
                    summary.stopped_early = true;
                    return Ok(summary);
                }
            }
            consumed += block.len() as i32;
        }
        Ok(summary)
    }
}

/// Close the cursor and merge the close result into `outcome`.
fn finish<T>(cursor: &mut ListCursor<'_>, outcome: HostResult<T>) -> HostResult<T> {
    let closed = cursor.close();
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            error!("failed to close list {:?} after error: {close_err}", cursor.handle());
            Err(err)
        }
    }
}
