//! Streaming buffer pool
//!
//! A fixed ring of [`DataBuffer`]s is filled in order by the calling thread
//! and drained by `workers` scoped threads. Worker `w` owns slots
//! `w, w + workers, ...`; the filling thread blocks on a slot's condvar
//! while that slot is still being processed, so a buffer is never
//! overwritten before its consumer has released it.
//!
//! With zero workers every record is processed inline, in order. With one
//! or more workers records are processed concurrently and in no particular
//! order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, error, info};

use crate::config::ClientConfig;
use crate::error::{HostResult, HostServerError, StreamError, StreamResult};

/// One reusable record buffer
#[derive(Debug, Clone)]
pub struct DataBuffer {
    record: Vec<u8>,
    record_length: usize,
    staging: Vec<u8>,
    nulls: Vec<u8>,
    null_fields: usize,
    record_number: i64,
}

impl DataBuffer {
    pub fn new(record_capacity: usize, staging_capacity: usize, null_fields: usize) -> Self {
        Self {
            record: vec![0; record_capacity],
            record_length: 0,
            staging: vec![0; staging_capacity],
            nulls: vec![0; null_fields.div_ceil(8)],
            null_fields,
            record_number: 0,
        }
    }

    /// Copy `data` into the record area and clear the null bitmap.
    pub fn load_record(&mut self, record_number: i64, data: &[u8]) -> StreamResult<()> {
        if data.len() > self.record.len() {
            return Err(StreamError::RecordTooLarge { size: data.len(), capacity: self.record.len() });
        }
        self.record[..data.len()].copy_from_slice(data);
        self.record_length = data.len();
        self.nulls.fill(0);
        self.record_number = record_number;
        Ok(())
    }

    /// The record most recently loaded
    pub fn record(&self) -> &[u8] {
        &self.record[..self.record_length]
    }

    pub fn capacity(&self) -> usize {
        self.record.len()
    }

    /// One-based number of the loaded record, 0 before the first load
    pub fn record_number(&self) -> i64 {
        self.record_number
    }

    /// Scratch space for assembling a record from packets
    pub fn staging(&self) -> &[u8] {
        &self.staging
    }

    pub fn staging_mut(&mut self) -> &mut [u8] {
        &mut self.staging
    }

    pub fn null_fields(&self) -> usize {
        self.null_fields
    }

    pub fn set_null(&mut self, field: usize, null: bool) -> StreamResult<()> {
        self.check_field(field)?;
        let mask = 0x80 >> (field % 8);
        if null {
            self.nulls[field / 8] |= mask;
        } else {
            self.nulls[field / 8] &= !mask;
        }
        Ok(())
    }

    pub fn is_null(&self, field: usize) -> StreamResult<bool> {
        self.check_field(field)?;
        Ok(self.nulls[field / 8] & (0x80 >> (field % 8)) != 0)
    }

    fn check_field(&self, field: usize) -> StreamResult<()> {
        if field >= self.null_fields {
            return Err(StreamError::NullFieldOutOfRange { field, fields: self.null_fields });
        }
        Ok(())
    }
}

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub buffers: usize,
    pub workers: usize,
    pub record_capacity: usize,
    pub staging_capacity: usize,
    pub null_fields: usize,
}

impl PoolConfig {
    pub fn new(buffers: usize, workers: usize, record_capacity: usize) -> Self {
        Self { buffers, workers, record_capacity, staging_capacity: 0, null_fields: 0 }
    }

    /// Pool sizing from the client configuration
    pub fn from_config(config: &ClientConfig, record_capacity: usize) -> Self {
        Self::new(config.pool_buffers, config.pool_workers, record_capacity)
    }

    pub fn validate(&self) -> StreamResult<()> {
        let reason = if self.buffers == 0 {
            "at least one buffer is required".to_string()
        } else if self.workers > self.buffers {
            format!("{} workers exceed {} buffers", self.workers, self.buffers)
        } else if self.record_capacity == 0 {
            "record capacity must be positive".to_string()
        } else {
            return Ok(());
        };
        Err(StreamError::InvalidConfiguration { reason })
    }
}

/// Result of one [`RecordSource::fill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Filled,
    EndOfStream,
}

/// Produces records on the filling thread.
pub trait RecordSource {
    /// Load the next record into `buffer`, or report the end of the stream.
    fn fill(&mut self, buffer: &mut DataBuffer) -> HostResult<FillOutcome>;
}

/// Counters from one [`BufferPool::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    pub records: u64,
    /// Times the filling thread waited for a buffer to be released
    pub waits: u64,
}

struct SlotState {
    buffer: DataBuffer,
    processing: bool,
    finished: bool,
}

struct Slot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, SlotState>) -> MutexGuard<'a, SlotState> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// State shared by the filling thread and the workers of one run
struct Shared<'s> {
    slots: &'s [Slot],
    aborted: AtomicBool,
    first_error: Mutex<Option<HostServerError>>,
    waits: AtomicU64,
}

impl Shared<'_> {
    fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Record `err` if it is the first, then wake every waiter.
    fn abort(&self, err: HostServerError) {
        {
            let mut first = self.first_error.lock().unwrap_or_else(PoisonError::into_inner);
            if first.is_none() {
                error!("aborting stream: {err}");
                *first = Some(err);
            }
        }
        self.aborted.store(true, Ordering::Release);
        // notify under each lock so a waiter cannot miss the flag
        for slot in self.slots {
            let _guard = slot.lock();
            slot.changed.notify_all();
        }
    }

    fn finish(&self) {
        for slot in self.slots {
            let mut state = slot.lock();
            state.finished = true;
            slot.changed.notify_all();
        }
    }

    fn take_error(&self) -> Option<HostServerError> {
        self.first_error.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

pub struct BufferPool {
    config: PoolConfig,
    slots: Vec<Slot>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool").field("config", &self.config).finish()
    }
}

impl BufferPool {
    /// Allocate every buffer up front.
    pub fn new(config: PoolConfig) -> StreamResult<Self> {
        config.validate()?;
        let slots = (0..config.buffers)
            .map(|_| Slot {
                state: Mutex::new(SlotState {
                    buffer: DataBuffer::new(config.record_capacity, config.staging_capacity, config.null_fields),
                    processing: false,
                    finished: false,
                }),
                changed: Condvar::new(),
            })
            .collect();
        Ok(Self { config, slots })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Stream every record of `source` through `process`.
    ///
    /// Returns once the source is exhausted and every worker has exited.
    /// The first error from the source or from `process` stops the stream
    /// and is returned; a panicking worker is reported as
    /// [`StreamError::WorkerPanicked`] and a panicking source as
    /// [`StreamError::SourcePanicked`]. With zero workers a panic in
    /// `process` or the source propagates to the caller.
    pub fn run<S, F, P>(&mut self, source: &mut S, format: &F, process: P) -> HostResult<StreamSummary>
    where
        S: RecordSource + ?Sized,
        F: Sync,
        P: Fn(&F, &DataBuffer) -> HostResult<()> + Sync,
    {
        for slot in &mut self.slots {
            let state = slot.state.get_mut().unwrap_or_else(PoisonError::into_inner);
            state.processing = false;
            state.finished = false;
        }

        let workers = self.config.workers;
        if workers == 0 {
            return self.run_inline(source, format, &process);
        }

        let shared = Shared {
            slots: &self.slots,
            aborted: AtomicBool::new(false),
            first_error: Mutex::new(None),
            waits: AtomicU64::new(0),
        };
        debug!("streaming through {} buffers with {} workers", self.slots.len(), workers);

        let records = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let shared = &shared;
                    let process = &process;
                    scope.spawn(move || run_worker(worker, workers, shared, format, process))
                })
                .collect();

            let mut records = 0;
            if panic::catch_unwind(AssertUnwindSafe(|| fill_ring(source, &shared, &mut records))).is_err() {
                shared.abort(StreamError::SourcePanicked { records }.into());
            }
            shared.finish();

            for (worker, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    shared.abort(StreamError::WorkerPanicked { worker, record_number: -1 }.into());
                }
            }
            records
        });

        if let Some(err) = shared.take_error() {
            return Err(err);
        }
        let summary = StreamSummary { records, waits: shared.waits.load(Ordering::Relaxed) };
        info!("streamed {} records ({} waits for a free buffer)", summary.records, summary.waits);
        Ok(summary)
    }

    fn run_inline<S, F, P>(&mut self, source: &mut S, format: &F, process: &P) -> HostResult<StreamSummary>
    where
        S: RecordSource + ?Sized,
        P: Fn(&F, &DataBuffer) -> HostResult<()>,
    {
        let mut summary = StreamSummary::default();
        let count = self.slots.len();
        let mut index = 0;
        loop {
            let state = self.slots[index].state.get_mut().unwrap_or_else(PoisonError::into_inner);
            match source.fill(&mut state.buffer)? {
                FillOutcome::Filled => {
                    summary.records += 1;
                    process(format, &state.buffer)?;
                }
                FillOutcome::EndOfStream => break,
            }
            index = (index + 1) % count;
        }
        debug!("processed {} records inline", summary.records);
        Ok(summary)
    }
}

/// Fill slots round-robin until the source ends or the stream aborts.
fn fill_ring<S: RecordSource + ?Sized>(source: &mut S, shared: &Shared<'_>, records: &mut u64) {
    let mut index = 0;
    loop {
        let slot = &shared.slots[index];
        let mut state = slot.lock();
        if state.processing && !shared.aborted() {
            shared.waits.fetch_add(1, Ordering::Relaxed);
            while state.processing && !shared.aborted() {
                state = slot.wait(state);
            }
        }
        if shared.aborted() {
            break;
        }
        match source.fill(&mut state.buffer) {
            Ok(FillOutcome::Filled) => {
                state.processing = true;
                slot.changed.notify_all();
                *records += 1;
            }
            Ok(FillOutcome::EndOfStream) => break,
            Err(err) => {
                drop(state);
                shared.abort(err);
                break;
            }
        }
        index = (index + 1) % shared.slots.len();
    }
}

fn run_worker<F, P>(worker: usize, workers: usize, shared: &Shared<'_>, format: &F, process: &P)
where
    P: Fn(&F, &DataBuffer) -> HostResult<()>,
{
    let count = shared.slots.len();
    let mut index = worker;
    let mut processed = 0u64;
    loop {
        let slot = &shared.slots[index];
        let mut state = slot.lock();
        while !state.processing && !state.finished && !shared.aborted() {
            state = slot.wait(state);
        }
        if !state.processing {
            break;
        }

        let mut failure = None;
        if !shared.aborted() {
            let buffer = &state.buffer;
            match panic::catch_unwind(AssertUnwindSafe(|| process(format, buffer))) {
                Ok(Ok(())) => processed += 1,
                Ok(Err(err)) => failure = Some(err),
                Err(_) => {
                    failure = Some(StreamError::WorkerPanicked { worker, record_number: buffer.record_number() }.into())
                }
            }
        }
        state.processing = false;
        slot.changed.notify_all();
        drop(state);

        if let Some(err) = failure {
            shared.abort(err);
        }
        index += workers;
        if index >= count {
            index = worker;
        }
    }
    debug!("worker {worker} exiting after {processed} records");
}
