//! Chunked loopback: push a source buffer through an echoing endpoint pair
//! one chunk at a time and rebuild it from what comes back.
//!
//! Each chunk is a write followed by a read of the same length. A timeout, a
//! short write or a short read retries the same chunk at the same offset; the offset only
//! moves forward by bytes actually read back. A chunk that fails
//! `retry_limit` times ends the run.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use loopcheck_core::config::DEFAULT_RETRY_LIMIT;
use loopcheck_core::ChunkingPolicy;

use crate::cancel::CancelToken;
use crate::transport::{ChunkTransport, TransferOutcome, TransportError};

/// A region of the buffer moved by one successful write/read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub offset: usize,
    pub length: usize,
}

/// Time spent in transfers versus the whole run.
///
/// `transfer_ns` sums write+read of every attempt, retries included.
/// `total_ns` is wall clock for the run, host-side processing included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferTiming {
    pub transfer_ns: u64,
    pub total_ns: u64,
}

impl TransferTiming {
    /// MB/s over wall-clock time.
    pub fn overall_mb_per_s(&self, bytes: usize) -> f64 {
        mb_per_s(bytes, self.total_ns)
    }

    /// MB/s over transfer time only.
    pub fn transfer_mb_per_s(&self, bytes: usize) -> f64 {
        mb_per_s(bytes, self.transfer_ns)
    }
}

fn mb_per_s(bytes: usize, ns: u64) -> f64 {
    if ns == 0 {
        return 0.0;
    }
    bytes as f64 / (ns as f64 * 1e-9) * 1e-6
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct LoopbackRun {
    /// The reconstructed buffer. Same length as the source.
    pub sink: Bytes,
    /// Non-empty chunks in transfer order; they tile `[0, len)` exactly.
    pub chunks: Vec<ChunkDescriptor>,
    /// Zero-length write/read pairs performed.
    pub zero_length_chunks: u32,
    /// Failed attempts that were retried.
    pub retries: u32,
    pub timing: TransferTiming,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopbackError {
    #[error("chunk at offset {offset} timed out {attempts} times")]
    Timeout { offset: usize, attempts: u32 },
    #[error("chunk at offset {offset} was only partly accepted {attempts} times (offered {offered}, accepted {accepted})")]
    ShortWrite {
        offset: usize,
        offered: usize,
        accepted: usize,
        attempts: u32,
    },
    #[error("chunk at offset {offset} came back short {attempts} times (expected {expected}, got {actual})")]
    ShortRead {
        offset: usize,
        expected: usize,
        actual: usize,
        attempts: u32,
    },
    #[error("device disconnected at offset {offset}")]
    Disconnected { offset: usize },
    #[error("transfer at offset {offset} failed: {reason}")]
    Transport { offset: usize, reason: String },
    #[error("endpoint reports a max packet size of 0")]
    ZeroPacketSize,
    #[error("cancelled at offset {offset}")]
    Cancelled { offset: usize },
}

/// Why one attempt at a chunk did not complete.
enum AttemptFailure {
    Timeout,
    ShortWrite { accepted: usize },
    ShortRead { actual: usize },
}

pub struct LoopbackRunner {
    retry_limit: u32,
    rng: StdRng,
    cancel: CancelToken,
}

impl LoopbackRunner {
    /// `seed` makes chunk sizes (and generated sources) reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            rng,
            cancel: CancelToken::never(),
        }
    }

    /// Failures tolerated per chunk; reaching it ends the run. At least 1.
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fill a fresh source buffer from this runner's random source.
    pub fn random_source(&mut self, length: usize) -> Bytes {
        let mut buf = vec![0u8; length];
        self.rng.fill_bytes(&mut buf);
        Bytes::from(buf)
    }

    /// Loop `source` through `transport` and return the rebuilt buffer.
    ///
    /// An empty source performs exactly one zero-length write/read pair.
    pub fn run_loopback<T: ChunkTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        source: &[u8],
        chunking: ChunkingPolicy,
    ) -> Result<LoopbackRun, LoopbackError> {
        let started = Instant::now();
        let mut sink = BytesMut::zeroed(source.len());
        let mut run = LoopbackRun {
            sink: Bytes::new(),
            chunks: Vec::new(),
            zero_length_chunks: 0,
            retries: 0,
            timing: TransferTiming::default(),
        };

        if source.is_empty() {
            self.transfer_chunk(transport, source, 0, &mut sink, &mut run)?;
            run.zero_length_chunks = 1;
            run.timing.total_ns = started.elapsed().as_nanos() as u64;
            return Ok(run);
        }

        let max_packet_size = transport.max_packet_size();
        if max_packet_size == 0 {
            return Err(LoopbackError::ZeroPacketSize);
        }

        let mut offset = 0;
        while offset < source.len() {
            if self.cancel.is_cancelled() {
                return Err(LoopbackError::Cancelled { offset });
            }

            let length = self.next_chunk_length(chunking, max_packet_size, source.len() - offset);
            let chunk = &source[offset..offset + length];
            let outcome = self.transfer_chunk(transport, chunk, offset, &mut sink, &mut run)?;

            if outcome.bytes_transferred == 0 {
                run.zero_length_chunks += 1;
            } else {
                run.chunks.push(ChunkDescriptor { offset, length });
            }
            offset += outcome.bytes_transferred;
        }

        run.sink = sink.freeze();
        run.timing.total_ns = started.elapsed().as_nanos() as u64;
        Ok(run)
    }

    fn next_chunk_length(
        &mut self,
        chunking: ChunkingPolicy,
        max_packet_size: usize,
        remaining: usize,
    ) -> usize {
        let ceiling = max_packet_size.min(remaining);
        match chunking {
            ChunkingPolicy::FixedMax => ceiling,
            ChunkingPolicy::RandomizedUpTo => self.rng.gen_range(0..=ceiling),
        }
    }

    /// Move one chunk, retrying in place on timeout or a short transfer.
    fn transfer_chunk<T: ChunkTransport + ?Sized>(
        &self,
        transport: &mut T,
        chunk: &[u8],
        offset: usize,
        sink: &mut [u8],
        run: &mut LoopbackRun,
    ) -> Result<TransferOutcome, LoopbackError> {
        let length = chunk.len();
        let mut failures = 0u32;

        loop {
            let started = Instant::now();
            let result = transport
                .write(chunk)
                .and_then(|accepted| transport.read(length).map(|echo| (accepted, echo)));
            run.timing.transfer_ns += started.elapsed().as_nanos() as u64;

            let failure = match result {
                Ok((accepted, echo)) if accepted == length && echo.len() == length => {
                    sink[offset..offset + length].copy_from_slice(&echo);
                    return Ok(TransferOutcome {
                        bytes_transferred: length,
                    });
                }
                Ok((accepted, _)) if accepted != length => AttemptFailure::ShortWrite { accepted },
                Ok((_, echo)) => AttemptFailure::ShortRead { actual: echo.len() },
                Err(e) if e.is_transient() => AttemptFailure::Timeout,
                Err(TransportError::Io(reason)) => {
                    return Err(LoopbackError::Transport { offset, reason })
                }
                Err(_) => return Err(LoopbackError::Disconnected { offset }),
            };

            failures += 1;
            if failures >= self.retry_limit {
                return Err(match failure {
                    AttemptFailure::Timeout => LoopbackError::Timeout {
                        offset,
                        attempts: failures,
                    },
                    AttemptFailure::ShortWrite { accepted } => LoopbackError::ShortWrite {
                        offset,
                        offered: length,
                        accepted,
                        attempts: failures,
                    },
                    AttemptFailure::ShortRead { actual } => LoopbackError::ShortRead {
                        offset,
                        expected: length,
                        actual,
                        attempts: failures,
                    },
                });
            }

            run.retries += 1;
            match failure {
                AttemptFailure::Timeout => {
                    tracing::debug!(offset, length, attempt = failures, "timeout, retrying chunk")
                }
                AttemptFailure::ShortWrite { accepted } => tracing::debug!(
                    offset,
                    length,
                    accepted,
                    attempt = failures,
                    "short write, retrying chunk"
                ),
                AttemptFailure::ShortRead { actual } => tracing::debug!(
                    offset,
                    length,
                    actual,
                    attempt = failures,
                    "short read, retrying chunk"
                ),
            }
        }
    }
}
