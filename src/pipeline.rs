use crate::ingest::Sample;
use crate::store::SampleStore;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum BatchCommand {
    Sample(Sample),
    Flush(oneshot::Sender<()>),
}

/// Producer side of the sample writer. Enqueueing never blocks; a full queue drops the sample.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<BatchCommand>,
    stats: Arc<IngestStats>,
}

impl PipelineHandle {
    pub fn new(tx: mpsc::Sender<BatchCommand>, stats: Arc<IngestStats>) -> Self {
        Self { tx, stats }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn enqueue(&self, sample: Sample) {
        match self.tx.try_send(BatchCommand::Sample(sample)) {
            Ok(()) => {
                let queue_depth = self.stats.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(queue_depth, measure = %sample.measure, ts = sample.timestamp_ms, "queued sample");
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped_samples.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(measure = %sample.measure, ts = sample.timestamp_ms, "sample queue full; dropping sample");
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped_samples.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(measure = %sample.measure, "sample writer stopped; dropping sample");
            }
        }
    }

    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(BatchCommand::Flush(tx)).await;
        let _ = rx.await;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    pub accepted_batches: AtomicU64,
    pub rejected_batches: AtomicU64,
    pub queue_depth: AtomicU64,
    pub buffered_samples: AtomicU64,
    pub dropped_samples: AtomicU64,
    pub written_samples: AtomicU64,
    pub last_flush_unix_ms: AtomicU64,
    pub last_batch_len: AtomicU64,
    pub average_flush_micros: AtomicU64,
    pub mqtt_connected: AtomicBool,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestStatsSnapshot {
    pub accepted_batches: u64,
    pub rejected_batches: u64,
    pub queue_depth: u64,
    pub buffered_samples: u64,
    pub dropped_samples: u64,
    pub written_samples: u64,
    pub last_flush_unix_ms: u64,
    pub last_batch_len: u64,
    pub average_flush_micros: u64,
    pub mqtt_connected: bool,
    pub last_error: Option<String>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            accepted_batches: self.accepted_batches.load(Ordering::Relaxed),
            rejected_batches: self.rejected_batches.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            buffered_samples: self.buffered_samples.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            written_samples: self.written_samples.load(Ordering::Relaxed),
            last_flush_unix_ms: self.last_flush_unix_ms.load(Ordering::Relaxed),
            last_batch_len: self.last_batch_len.load(Ordering::Relaxed),
            average_flush_micros: self.average_flush_micros.load(Ordering::Relaxed),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|guard| guard.clone()),
        }
    }
}

/// Bounds for the worker's private buffer. Writes go out in chunks of at most `batch_size`
/// samples; after a failed write at most `max_buffered` samples are kept for retry and the
/// oldest beyond that are dropped.
#[derive(Clone, Copy, Debug)]
pub struct BufferLimits {
    pub batch_size: usize,
    pub max_buffered: usize,
}

impl BufferLimits {
    pub fn new(batch_size: usize, max_queue: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            max_buffered: max_queue.max(batch_size),
        }
    }
}

pub fn spawn_worker(
    store: SampleStore,
    mut rx: mpsc::Receiver<BatchCommand>,
    stats: Arc<IngestStats>,
    limits: BufferLimits,
    flush_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<Sample> = Vec::with_capacity(limits.batch_size);
        let mut ticker = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = flush(&store, &mut buffer, &stats, limits).await {
                        tracing::warn!(error=%err, "flush on interval failed");
                    }
                }
                cmd = rx.recv() => {
                    match cmd {
                        Some(BatchCommand::Sample(sample)) => {
                            stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
                            buffer.push(sample);
                            stats.buffered_samples.store(buffer.len() as u64, Ordering::Relaxed);
                            if buffer.len() >= limits.batch_size {
                                if let Err(err) = flush(&store, &mut buffer, &stats, limits).await {
                                    tracing::warn!(error=%err, "flush on batch size failed");
                                }
                            }
                        }
                        Some(BatchCommand::Flush(done)) => {
                            if let Err(err) = flush(&store, &mut buffer, &stats, limits).await {
                                tracing::warn!(error=%err, "flush on demand failed");
                            }
                            let _ = done.send(());
                        }
                        None => {
                            if let Err(err) = flush(&store, &mut buffer, &stats, limits).await {
                                tracing::warn!(error=%err, "flush during shutdown failed");
                            }
                            break;
                        }
                    }
                }
            }
        }
    })
}

async fn flush(
    store: &SampleStore,
    buffer: &mut Vec<Sample>,
    stats: &IngestStats,
    limits: BufferLimits,
) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }

    let started = Instant::now();
    let items = std::mem::take(buffer);
    let len = items.len();

    let mut sent = 0;
    for chunk in items.chunks(limits.batch_size) {
        match store.write_batch(chunk).await {
            Ok(written) => {
                stats.written_samples.fetch_add(written, Ordering::Relaxed);
                sent += chunk.len();
            }
            Err(err) => {
                stats.record_error(err.to_string());
                tracing::error!(error=%err, len = len - sent, "failed to write sample batch");
                buffer.extend_from_slice(&items[sent..]);
                retain_newest(buffer, stats, limits.max_buffered);
                return Err(err);
            }
        }
    }

    stats.buffered_samples.store(0, Ordering::Relaxed);
    stats.last_batch_len.store(len as u64, Ordering::Relaxed);
    let now = Utc::now().timestamp_millis() as u64;
    stats.last_flush_unix_ms.store(now, Ordering::Relaxed);
    let micros = started.elapsed().as_micros() as u64;
    let prev = stats.average_flush_micros.load(Ordering::Relaxed);
    let avg = if prev == 0 { micros } else { (prev + micros) / 2 };
    stats.average_flush_micros.store(avg, Ordering::Relaxed);
    stats.clear_error();
    tracing::debug!(len, micros, backend = store.backend(), "flushed sample batch");

    Ok(())
}

/// Drops the oldest retained samples beyond `max_buffered`.
fn retain_newest(buffer: &mut Vec<Sample>, stats: &IngestStats, max_buffered: usize) {
    if buffer.len() > max_buffered {
        let excess = buffer.len() - max_buffered;
        buffer.drain(..excess);
        stats
            .dropped_samples
            .fetch_add(excess as u64, Ordering::Relaxed);
        tracing::warn!(excess, max_buffered, "write retry buffer full; dropping oldest samples");
    }
    stats
        .buffered_samples
        .store(buffer.len() as u64, Ordering::Relaxed);
}

/// Wires a writer queue to `store` and returns the producer handle plus the worker task.
pub fn start(
    store: SampleStore,
    stats: Arc<IngestStats>,
    max_queue: usize,
    batch_size: usize,
    flush_interval: Duration,
) -> (PipelineHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<BatchCommand>(max_queue.max(1));
    let handle = PipelineHandle::new(tx, stats.clone());
    let limits = BufferLimits::new(batch_size, max_queue);
    let worker = spawn_worker(store, rx, stats, limits, flush_interval);
    (handle, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Measure;

    #[tokio::test]
    async fn flush_writes_queued_samples() {
        let store = SampleStore::memory();
        let stats = Arc::new(IngestStats::new());
        let (handle, _worker) = start(
            store.clone(),
            stats.clone(),
            16,
            100,
            Duration::from_secs(60),
        );

        handle.enqueue(Sample::new(Measure::Temperature, 21.0, 1_000));
        handle.enqueue(Sample::new(Measure::Humidity, 40.0, 1_000));
        handle.flush().await.unwrap();

        let SampleStore::Memory(memory) = &store else {
            panic!("expected memory store");
        };
        assert_eq!(memory.len(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.written_samples, 2);
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(snapshot.last_batch_len, 2);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let stats = Arc::new(IngestStats::new());
        let (tx, _rx) = mpsc::channel::<BatchCommand>(1);
        let handle = PipelineHandle::new(tx, stats.clone());

        handle.enqueue(Sample::new(Measure::Lux, 1.0, 0));
        handle.enqueue(Sample::new(Measure::Lux, 2.0, 0));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.dropped_samples, 1);
    }

    #[tokio::test]
    async fn failed_writes_are_retained_up_to_the_bound() {
        let stats = Arc::new(IngestStats::new());
        let (handle, _worker) = start(
            SampleStore::unreachable(),
            stats.clone(),
            4,
            2,
            Duration::from_secs(60),
        );

        for i in 0..200 {
            handle.enqueue(Sample::new(Measure::Temperature, 20.0, i));
            if i % 10 == 0 {
                tokio::task::yield_now().await;
            }
        }
        handle.flush().await.unwrap();

        let snapshot = stats.snapshot();
        assert!(snapshot.last_error.is_some());
        assert_eq!(snapshot.written_samples, 0);
        assert_eq!(snapshot.queue_depth, 0);
        assert!(snapshot.buffered_samples <= 4, "{snapshot:?}");
        assert!(snapshot.buffered_samples > 0);
        assert_eq!(snapshot.dropped_samples + snapshot.buffered_samples, 200);
    }

    #[tokio::test]
    async fn retained_samples_are_written_in_batch_sized_chunks() {
        let store = SampleStore::memory();
        let stats = IngestStats::new();
        let limits = BufferLimits::new(3, 100);
        let mut buffer: Vec<Sample> = (0..10)
            .map(|i| Sample::new(Measure::Lux, i as f64, i))
            .collect();

        flush(&store, &mut buffer, &stats, limits).await.unwrap();

        assert!(buffer.is_empty());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.written_samples, 10);
        assert_eq!(snapshot.buffered_samples, 0);
        assert_eq!(snapshot.last_batch_len, 10);
    }

    #[test]
    fn retry_buffer_keeps_the_newest_samples() {
        let stats = IngestStats::new();
        let mut buffer: Vec<Sample> = (0..10)
            .map(|i| Sample::new(Measure::Lux, i as f64, i))
            .collect();
        retain_newest(&mut buffer, &stats, 4);
        let stamps: Vec<i64> = buffer.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![6, 7, 8, 9]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped_samples, 6);
        assert_eq!(snapshot.buffered_samples, 4);
    }
}
