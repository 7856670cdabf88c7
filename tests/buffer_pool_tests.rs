//! Backpressure and completeness of the streaming buffer pool
//!
//! Slow, randomly delayed consumers must never see a buffer overwritten
//! while they hold it, for every worker count from zero to the pool size.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use hostserver::buffer_pool::{BufferPool, DataBuffer, FillOutcome, PoolConfig, RecordSource};
use hostserver::error::{HostResult, HostServerError, StreamError};

const RECORDS: i64 = 10_000;
const RECORD_LENGTH: usize = 64;
const BUFFERS: usize = 4;

/// Record bytes derived from the record number
fn pattern(record_number: i64) -> Vec<u8> {
    (0..RECORD_LENGTH).map(|i| (record_number as usize).wrapping_mul(31).wrapping_add(i) as u8).collect()
}

struct PatternSource {
    next: i64,
    total: i64,
}

impl RecordSource for PatternSource {
    fn fill(&mut self, buffer: &mut DataBuffer) -> HostResult<FillOutcome> {
        if self.next > self.total {
            return Ok(FillOutcome::EndOfStream);
        }
        buffer.load_record(self.next, &pattern(self.next))?;
        if self.next % 3 == 0 {
            buffer.set_null(1, true)?;
        }
        buffer.staging_mut()[0] = self.next as u8;
        self.next += 1;
        Ok(FillOutcome::Filled)
    }
}

fn pool_config(buffers: usize, workers: usize) -> PoolConfig {
    PoolConfig { buffers, workers, record_capacity: RECORD_LENGTH, staging_capacity: 4, null_fields: 8 }
}

fn slow_consumer(buffer: &DataBuffer, seen: &[AtomicU8], corrupted: &AtomicU64) -> HostResult<()> {
    let number = buffer.record_number();
    let before = buffer.record().to_vec();

    let mut rng = rand::thread_rng();
    match rng.gen_range(0..100) {
        0 => thread::sleep(Duration::from_micros(200)),
        1..=20 => thread::yield_now(),
        _ => {}
    }

    let intact = buffer.record_number() == number
        && buffer.record() == before.as_slice()
        && before == pattern(number)
        && buffer.is_null(1)? == (number % 3 == 0)
        && buffer.staging()[0] == number as u8;
    if !intact {
        corrupted.fetch_add(1, Ordering::SeqCst);
    }
    seen[(number - 1) as usize].fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[test]
fn test_no_buffer_overwritten_under_slow_consumers() {
    for workers in 0..=BUFFERS {
        let mut pool = BufferPool::new(pool_config(BUFFERS, workers)).unwrap();
        let seen: Vec<AtomicU8> = (0..RECORDS).map(|_| AtomicU8::new(0)).collect();
        let corrupted = AtomicU64::new(0);

        let mut source = PatternSource { next: 1, total: RECORDS };
        let summary = pool
            .run(&mut source, &(), |_, buffer| slow_consumer(buffer, &seen, &corrupted))
            .unwrap();

        assert_eq!(summary.records, RECORDS as u64, "workers = {workers}");
        assert_eq!(corrupted.load(Ordering::SeqCst), 0, "workers = {workers}");
        assert!(
            seen.iter().all(|count| count.load(Ordering::SeqCst) == 1),
            "every record processed exactly once with {workers} workers"
        );
    }
}

#[test]
fn test_single_buffer_forces_filler_to_wait() {
    let mut pool = BufferPool::new(pool_config(1, 1)).unwrap();
    let mut source = PatternSource { next: 1, total: 20 };
    let summary = pool
        .run(&mut source, &(), |_, _| {
            thread::sleep(Duration::from_millis(2));
            Ok(())
        })
        .unwrap();
    assert_eq!(summary.records, 20);
    assert!(summary.waits > 0);
}

#[test]
fn test_record_larger_than_buffer_stops_stream() {
    let mut pool = BufferPool::new(PoolConfig::new(2, 1, RECORD_LENGTH / 2)).unwrap();
    let err = pool.run(&mut PatternSource { next: 1, total: 5 }, &(), |_, _| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        HostServerError::Stream(StreamError::RecordTooLarge { size: RECORD_LENGTH, capacity })
            if capacity == RECORD_LENGTH / 2
    ));
}

#[test]
fn test_more_workers_than_buffers_is_rejected() {
    let err = BufferPool::new(PoolConfig::new(2, 3, RECORD_LENGTH)).unwrap_err();
    assert!(matches!(err, StreamError::InvalidConfiguration { .. }));
}

/// Panics when asked for record `panic_at`
struct FaultySource {
    inner: PatternSource,
    panic_at: i64,
}

impl RecordSource for FaultySource {
    fn fill(&mut self, buffer: &mut DataBuffer) -> HostResult<FillOutcome> {
        if self.inner.next == self.panic_at {
            panic!("source failed on record {}", self.panic_at);
        }
        self.inner.fill(buffer)
    }
}

#[test]
fn test_source_panic_stops_stream_with_workers() {
    let (done, finished) = mpsc::channel();
    thread::spawn(move || {
        let mut pool = BufferPool::new(pool_config(2, 2)).unwrap();
        let mut source = FaultySource { inner: PatternSource { next: 1, total: 50 }, panic_at: 6 };
        let result = pool.run(&mut source, &(), |_, _| Ok(()));

        // the pool stays usable after the failed run
        let again = pool.run(&mut PatternSource { next: 1, total: 10 }, &(), |_, _| Ok(()));
        let _ = done.send((result.map(|summary| summary.records), again.map(|summary| summary.records)));
    });

    let (result, again) = finished.recv_timeout(Duration::from_secs(10)).expect("pool run did not return");
    assert!(matches!(
        result,
        Err(HostServerError::Stream(StreamError::SourcePanicked { records: 5 }))
    ));
    assert_eq!(again.unwrap(), 10);
}
