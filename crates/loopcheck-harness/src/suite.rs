//! Loopback over every endpoint pair of a device.
//!
//! Each pair gets its own runner and its own random source, seeded from the
//! base seed plus the pair's position. Pairs never share a transport, so
//! parallel mode just hands each one to a blocking worker thread.

use loopcheck_core::ChunkingPolicy;

use crate::cancel::CancelToken;
use crate::integrity::{check, CheckResult};
use crate::loopback::{LoopbackRunner, TransferTiming};
use crate::transport::ChunkTransport;

/// One endpoint pair ready to be exercised.
pub struct LoopbackJob {
    /// Endpoint number as shown to the user.
    pub endpoint: u8,
    pub transport: Box<dyn ChunkTransport>,
}

#[derive(Debug, Clone, Copy)]
pub struct SuiteOptions {
    pub buffer_size: usize,
    pub chunking: ChunkingPolicy,
    pub retry_limit: u32,
    pub seed: Option<u64>,
    pub parallel: bool,
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointReport {
    pub endpoint: u8,
    pub passed: bool,
    pub bytes: usize,
    pub chunks: usize,
    pub zero_length_chunks: u32,
    pub retries: u32,
    pub timing: TransferTiming,
    pub failure: Option<String>,
}

impl EndpointReport {
    fn failed(endpoint: u8, bytes: usize, failure: String) -> Self {
        Self {
            endpoint,
            passed: false,
            bytes,
            chunks: 0,
            zero_length_chunks: 0,
            retries: 0,
            timing: TransferTiming::default(),
            failure: Some(failure),
        }
    }

    pub fn overall_mb_per_s(&self) -> f64 {
        self.timing.overall_mb_per_s(self.bytes)
    }

    pub fn transfer_mb_per_s(&self) -> f64 {
        self.timing.transfer_mb_per_s(self.bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteReport {
    /// Reports in job order. Shorter than the job list after a fail-fast stop.
    pub endpoints: Vec<EndpointReport>,
    /// Jobs never started because of fail-fast or cancellation.
    pub skipped: usize,
}

impl SuiteReport {
    pub fn failed_endpoints(&self) -> Vec<u8> {
        self.endpoints
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.endpoint)
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.skipped == 0 && self.endpoints.iter().all(|r| r.passed)
    }
}

/// Loop a fresh random buffer through one endpoint pair and verify it.
///
/// Blocking; call from a worker thread when running under tokio.
pub fn run_endpoint(
    mut job: LoopbackJob,
    options: &SuiteOptions,
    seed: Option<u64>,
    cancel: CancelToken,
) -> EndpointReport {
    let endpoint = job.endpoint;
    let mut runner = LoopbackRunner::new(seed)
        .with_retry_limit(options.retry_limit)
        .with_cancel(cancel);
    let source = runner.random_source(options.buffer_size);

    let run = match runner.run_loopback(job.transport.as_mut(), &source, options.chunking) {
        Ok(run) => run,
        Err(e) => {
            tracing::warn!(endpoint, error = %e, "loopback failed");
            return EndpointReport::failed(endpoint, source.len(), e.to_string());
        }
    };

    let segment_size = job.transport.max_packet_size();
    let verdict = check(&run.sink, &source, segment_size);
    let failure = match &verdict {
        CheckResult::Pass { .. } => None,
        other => {
            tracing::warn!(endpoint, result = %other, "integrity check failed");
            Some(other.to_string())
        }
    };

    let report = EndpointReport {
        endpoint,
        passed: failure.is_none(),
        bytes: source.len(),
        chunks: run.chunks.len(),
        zero_length_chunks: run.zero_length_chunks,
        retries: run.retries,
        timing: run.timing,
        failure,
    };
    tracing::info!(
        endpoint,
        passed = report.passed,
        bytes = report.bytes,
        chunks = report.chunks,
        retries = report.retries,
        overall_mb_s = report.overall_mb_per_s(),
        transfer_mb_s = report.transfer_mb_per_s(),
        "endpoint done"
    );
    report
}

/// Run every job and collect a report per endpoint, in job order.
///
/// Fail-fast implies sequential execution: the first failing pair stops the
/// suite and the remaining jobs are counted as skipped.
pub async fn run_suite(
    jobs: Vec<LoopbackJob>,
    options: SuiteOptions,
    cancel: CancelToken,
) -> SuiteReport {
    let total = jobs.len();
    let seed_for = |position: usize| options.seed.map(|s| s.wrapping_add(position as u64));

    if options.parallel && !options.fail_fast {
        let handles: Vec<_> = jobs
            .into_iter()
            .enumerate()
            .map(|(position, job)| {
                let endpoint = job.endpoint;
                let seed = seed_for(position);
                let cancel = cancel.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    run_endpoint(job, &options, seed, cancel)
                });
                (endpoint, handle)
            })
            .collect();

        let mut report = SuiteReport::default();
        for (endpoint, handle) in handles {
            report.endpoints.push(joined(endpoint, options.buffer_size, handle.await));
        }
        return report;
    }

    let mut report = SuiteReport::default();
    for (position, job) in jobs.into_iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(endpoint = job.endpoint, "cancelled before start");
            break;
        }
        let endpoint = job.endpoint;
        let seed = seed_for(position);
        let token = cancel.clone();
        let handle =
            tokio::task::spawn_blocking(move || run_endpoint(job, &options, seed, token));
        let endpoint_report = joined(endpoint, options.buffer_size, handle.await);
        let failed = !endpoint_report.passed;
        report.endpoints.push(endpoint_report);

        if failed && options.fail_fast {
            tracing::warn!(endpoint, "fail-fast: stopping suite");
            break;
        }
    }
    report.skipped = total - report.endpoints.len();
    report
}

fn joined(
    endpoint: u8,
    bytes: usize,
    result: Result<EndpointReport, tokio::task::JoinError>,
) -> EndpointReport {
    match result {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(endpoint, error = %e, "endpoint worker died");
            EndpointReport::failed(endpoint, bytes, format!("worker failed: {e}"))
        }
    }
}
