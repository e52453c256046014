//! The log upload pipeline.
//!
//! Redacted job output flows into a `ChunkSink`, which fragments the
//! bytestream into sequence-numbered, size-bounded chunks. The job driver
//! pumps ready chunks onto a bounded channel (capacity 1024 — when it
//! fills, the producer waits rather than dropping output) consumed by a
//! small pool of uploader tasks. A permanently failed upload bumps a
//! counter and the pool moves on, so one bad chunk cannot stall the job.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::control::ControlPlane;

/// Upper bound on a single chunk's payload.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 100 * 1024;

/// How many chunks may sit between producer and uploaders before the
/// producer blocks.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Concurrent uploader tasks.
pub const DEFAULT_UPLOADER_CONCURRENCY: usize = 3;

/// One size-bounded fragment of the job log. Sequences are 1-based and
/// assigned at cut time; offsets are byte positions in the cumulative
/// stream, so the chunks of a job partition the log exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence: u32,
    pub offset: u64,
    pub size: u32,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct ChunkBuffer {
    max_chunk: usize,
    buf: Vec<u8>,
    next_sequence: u32,
    offset: u64,
    ready: VecDeque<Chunk>,
}

impl ChunkBuffer {
    fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
            buf: Vec::new(),
            next_sequence: 1,
            offset: 0,
            ready: VecDeque::new(),
        }
    }

    fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.max_chunk {
            let rest = self.buf.split_off(self.max_chunk);
            let full = std::mem::replace(&mut self.buf, rest);
            self.cut_from(full);
        }
    }

    /// Cut whatever is buffered into a (possibly short) chunk.
    fn cut_partial(&mut self) {
        if !self.buf.is_empty() {
            let data = std::mem::take(&mut self.buf);
            self.cut_from(data);
        }
    }

    fn cut_from(&mut self, data: Vec<u8>) {
        let chunk = Chunk {
            sequence: self.next_sequence,
            offset: self.offset,
            size: data.len() as u32,
            data,
        };
        self.next_sequence += 1;
        self.offset += chunk.size as u64;
        self.ready.push_back(chunk);
    }

    fn take_ready(&mut self) -> Vec<Chunk> {
        self.ready.drain(..).collect()
    }
}

/// The `Write` half handed to the redactor as its downstream. Cloneable;
/// the chunk cut happens under the shared lock so sequence numbers are
/// assigned in producer order.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    inner: Arc<Mutex<ChunkBuffer>>,
}

impl ChunkSink {
    fn lock(&self) -> std::sync::MutexGuard<'_, ChunkBuffer> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Write for ChunkSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.lock().append(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Owns the chunk channel and the uploader pool for one job.
pub struct LogStreamer {
    sink: ChunkSink,
    tx: Option<mpsc::Sender<Chunk>>,
    workers: Vec<JoinHandle<()>>,
    failed: Arc<AtomicUsize>,
}

impl LogStreamer {
    pub fn start(
        control: Arc<dyn ControlPlane>,
        job_id: &str,
        max_chunk_size: usize,
        concurrency: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Chunk>(CHANNEL_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let failed = Arc::new(AtomicUsize::new(0));

        let workers = (0..concurrency.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let control = Arc::clone(&control);
                let failed = Arc::clone(&failed);
                let job_id = job_id.to_string();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only for the pop, not the
                        // upload, so the pool actually runs concurrently.
                        let chunk = { rx.lock().await.recv().await };
                        let Some(chunk) = chunk else { break };
                        if let Err(e) = control.upload_chunk(&job_id, &chunk).await {
                            failed.fetch_add(1, Ordering::SeqCst);
                            tracing::warn!(
                                worker,
                                sequence = chunk.sequence,
                                error = %e,
                                "log chunk upload failed",
                            );
                        }
                    }
                })
            })
            .collect();

        Self {
            sink: ChunkSink {
                inner: Arc::new(Mutex::new(ChunkBuffer::new(max_chunk_size))),
            },
            tx: Some(tx),
            workers,
            failed,
        }
    }

    /// The writer the redactor chain should feed.
    pub fn sink(&self) -> ChunkSink {
        self.sink.clone()
    }

    /// Enqueue every cut chunk. Blocks (asynchronously) when the channel
    /// is full — backpressure, never drops.
    pub async fn pump(&self) -> Result<()> {
        let chunks = self.sink.lock().take_ready();
        if let Some(tx) = &self.tx {
            for chunk in chunks {
                tx.send(chunk).await.context("chunk channel closed")?;
            }
        }
        Ok(())
    }

    /// Cut whatever is buffered into a short chunk and enqueue it. Called
    /// on the upload interval and at job end.
    pub async fn flush_partial(&self) -> Result<()> {
        self.sink.lock().cut_partial();
        self.pump().await
    }

    pub fn failed_chunks(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Flush the tail, close the channel, and wait for every outstanding
    /// upload. Returns the number of chunks that permanently failed.
    pub async fn finish(mut self) -> usize {
        if let Err(e) = self.flush_partial().await {
            tracing::warn!(error = %e, "failed to flush final log chunk");
        }
        self.tx.take();
        futures::future::join_all(self.workers.drain(..)).await;
        self.failed.load(Ordering::SeqCst)
    }
}
