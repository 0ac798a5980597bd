//! Delivery orchestrator
//!
//! Moves one [`Source`] into one [`Sink`] through a [`TransferPool`]. Each
//! reader stream and the writer run as blocking actors on the tokio blocking
//! pool; the pool is the only thing they share.

pub mod endpoint;

pub use endpoint::{FileSink, FileSource, MemorySink, MemorySource, Sink, Source};

use crate::buffer::{PoolStatus, TransferPool};
use crate::config::DeliveryConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of a successful delivery
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    /// Bytes drained into the sink
    pub bytes: u64,
    /// `algorithm:hex`, present only when the checksum saw the whole stream
    pub checksum: Option<String>,
    pub elapsed: Duration,
    pub streams: usize,
    pub status: PoolStatus,
}

impl DeliveryReport {
    /// Average rate in bytes per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// One source-to-sink transfer
pub struct Delivery {
    pool: Arc<TransferPool>,
    source: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
    streams: usize,
}

impl Delivery {
    /// Deliver through an already configured pool with a single reader
    pub fn new(pool: Arc<TransferPool>, source: Arc<dyn Source>, sink: Arc<dyn Sink>) -> Self {
        Self {
            pool,
            source,
            sink,
            streams: 1,
        }
    }

    /// Build the pool described by `config` and deliver through it
    pub fn from_config(
        config: &DeliveryConfig,
        source: Arc<dyn Source>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = TransferPool::from_config(&config.pool, config.checksum.build());
        Ok(Self::new(Arc::new(pool), source, sink).with_streams(config.streams))
    }

    /// Number of parallel reader streams
    pub fn with_streams(mut self, streams: usize) -> Self {
        self.streams = streams.max(1);
        self
    }

    pub fn pool(&self) -> &Arc<TransferPool> {
        &self.pool
    }

    /// Run the transfer to completion
    pub async fn run(self) -> Result<DeliveryReport> {
        let block_count = self.pool.block_count();
        if block_count == 0 {
            return Err(Error::Config("transfer pool is not configured".to_string()));
        }
        if self.streams > block_count {
            return Err(Error::Config(format!(
                "{} reader streams need at least as many blocks, pool has {}",
                self.streams, block_count
            )));
        }

        let generation = self.pool.generation();
        let started = Instant::now();
        info!(
            generation,
            streams = self.streams,
            block_size = self.pool.suggested_block_size(),
            block_count,
            expected_bytes = self.source.size_hint(),
            "Starting delivery"
        );

        let writer = {
            let pool = Arc::clone(&self.pool);
            let sink = Arc::clone(&self.sink);
            tokio::task::spawn_blocking(move || write_stream(&pool, sink.as_ref(), generation))
        };

        let cursor = Arc::new(AtomicU64::new(0));
        let readers: Vec<JoinHandle<Result<u64>>> = (0..self.streams)
            .map(|stream| {
                let pool = Arc::clone(&self.pool);
                let source = Arc::clone(&self.source);
                let cursor = Arc::clone(&cursor);
                tokio::task::spawn_blocking(move || {
                    read_stream(&pool, source.as_ref(), &cursor, generation, stream)
                })
            })
            .collect();

        let mut read_error = None;
        let mut bytes_read = 0;
        for reader in readers {
            match join(reader).await {
                Ok(n) => bytes_read += n,
                Err(e) => {
                    read_error.get_or_insert(e);
                }
            }
        }
        // All streams are done, whatever their outcome
        self.pool.signal_read_eof(true);
        debug!(bytes_read, "All reader streams finished");

        let write_error = join(writer).await.err();

        let found = self.pool.generation();
        if found != generation {
            return Err(Error::Invalidated {
                expected: generation,
                found,
            });
        }
        if let Some(failure) = self.pool.failure() {
            let detailed = match failure {
                Error::Read(_) => read_error,
                Error::Write(_) => write_error,
                _ => None,
            };
            let err = detailed.unwrap_or(failure);
            warn!(error = %err, "Delivery failed");
            return Err(err);
        }
        if let Some(err) = read_error.or(write_error) {
            return Err(err);
        }

        let checksum = if self.pool.checksum_ready() {
            self.pool.checksum_hex()
        } else {
            warn!(
                frontier = self.pool.checksum_frontier(),
                "Checksum did not cover the whole stream"
            );
            None
        };
        let report = DeliveryReport {
            bytes: self.pool.bytes_transferred(),
            checksum,
            elapsed: started.elapsed(),
            streams: self.streams,
            status: self.pool.snapshot(),
        };
        info!(
            bytes = report.bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            checksum = report.checksum.as_deref(),
            "Delivery complete"
        );
        Ok(report)
    }
}

async fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .await
        .map_err(|e| Error::Internal(format!("Delivery task failed: {}", e)))?
}

/// Reader actor: claim block-sized ranges from the shared cursor until the
/// source runs dry. The range is claimed only once a slot is held, so every
/// gap in the stream belongs to a slot that is still being filled.
fn read_stream(
    pool: &TransferPool,
    source: &dyn Source,
    cursor: &AtomicU64,
    generation: u64,
    stream: usize,
) -> Result<u64> {
    let mut total = 0;
    while let Some(mut lease) = pool.acquire_for_read(true) {
        if lease.generation() != generation {
            break;
        }
        let capacity = lease.capacity();
        let offset = cursor.fetch_add(capacity as u64, Ordering::SeqCst);

        let buf = lease.as_mut_slice();
        let mut filled = 0;
        while filled < capacity {
            match source.read_at(offset + filled as u64, &mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    pool.signal_read_error(true);
                    return Err(Error::Read(format!(
                        "stream {} at offset {}: {}",
                        stream,
                        offset + filled as u64,
                        e
                    )));
                }
            }
        }

        if filled == 0 {
            break;
        }
        if !lease.commit(filled, offset) {
            break;
        }
        total += filled as u64;
        if filled < capacity {
            break;
        }
    }
    debug!(stream, bytes = total, "Reader stream finished");
    Ok(total)
}

/// Writer actor: drain blocks in offset order until the pool runs dry
fn write_stream(pool: &TransferPool, sink: &dyn Sink, generation: u64) -> Result<()> {
    let result = drain(pool, sink, generation).and_then(|()| {
        if pool.has_error() {
            return Ok(());
        }
        sink.finish().map_err(|e| {
            pool.signal_write_error(true);
            Error::Write(format!("finishing destination: {}", e))
        })
    });
    pool.signal_write_eof(true);
    result
}

fn drain(pool: &TransferPool, sink: &dyn Sink, generation: u64) -> Result<()> {
    while let Some(lease) = pool.acquire_for_write(true) {
        if lease.generation() != generation {
            break;
        }
        let offset = lease.offset();
        if let Err(e) = sink.write_at(offset, lease.as_slice()) {
            pool.signal_write_error(true);
            lease.discard();
            return Err(Error::Write(format!("at offset {}: {}", offset, e)));
        }
        lease.commit();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32;
    use crate::config::ChecksumKind;
    use std::io;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_single_stream_memory_delivery() {
        let data = pattern(10_000);
        let pool = Arc::new(TransferPool::with_blocks(
            Some(Box::new(Crc32::new())),
            1024,
            3,
        ));
        let sink = Arc::new(MemorySink::new());
        let report = Delivery::new(pool, Arc::new(MemorySource::new(data.clone())), sink.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.bytes, 10_000);
        assert_eq!(&sink.contents()[..], &data[..]);
        assert!(sink.is_finished());
        assert_eq!(
            report.checksum,
            Some(format!("crc32:{:08x}", crc32fast::hash(&data)))
        );
    }

    #[tokio::test]
    async fn test_empty_source() {
        let config = DeliveryConfig::default();
        let sink = Arc::new(MemorySink::new());
        let report = Delivery::from_config(
            &config,
            Arc::new(MemorySource::new(Vec::new())),
            sink.clone(),
        )
        .unwrap()
        .run()
        .await
        .unwrap();
        assert_eq!(report.bytes, 0);
        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_pool_rejected() {
        let delivery = Delivery::new(
            Arc::new(TransferPool::new()),
            Arc::new(MemorySource::new(vec![1u8; 4])),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(delivery.run().await, Err(Error::Config(_))));
    }

    struct FailingSink;

    impl Sink for FailingSink {
        fn write_at(&self, _offset: u64, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    #[tokio::test]
    async fn test_sink_failure_reported() {
        let config = DeliveryConfig {
            checksum: ChecksumKind::None,
            ..DeliveryConfig::default()
        };
        let err = Delivery::from_config(
            &config,
            Arc::new(MemorySource::new(pattern(4096))),
            Arc::new(FailingSink),
        )
        .unwrap()
        .run()
        .await
        .unwrap_err();
        match err {
            Error::Write(msg) => assert!(msg.contains("disk full")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_report_throughput() {
        let report = DeliveryReport {
            bytes: 2048,
            checksum: None,
            elapsed: Duration::from_secs(2),
            streams: 1,
            status: TransferPool::new().snapshot(),
        };
        assert_eq!(report.throughput(), 1024.0);
    }
}
