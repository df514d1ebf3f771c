//! `loopcheck loopback`: echo a random buffer through every endpoint pair.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use loopcheck_core::{ChunkingPolicy, LinkSpeed, LoopcheckConfig};
use loopcheck_harness::{
    run_suite, CancelToken, EndpointReport, LoopbackJob, SuiteOptions, SuiteReport,
};

use super::{flag_value, header, print_json};
use crate::usb;

#[derive(Debug, Default, PartialEq)]
pub struct LoopbackArgs {
    pub device: Option<usize>,
    pub zlp: bool,
    pub random_chunks: bool,
    pub buffer_size: Option<usize>,
    pub seed: Option<u64>,
    pub parallel: bool,
    pub fail_fast: bool,
}

impl LoopbackArgs {
    pub fn parse(args: &[&str]) -> Result<Self> {
        let mut parsed = LoopbackArgs::default();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "--device" => parsed.device = Some(flag_value(args, &mut i, "--device")?),
                "--buffer-size" => {
                    parsed.buffer_size = Some(flag_value(args, &mut i, "--buffer-size")?)
                }
                "--seed" => parsed.seed = Some(flag_value(args, &mut i, "--seed")?),
                "--zlp" => parsed.zlp = true,
                "--random-chunks" => parsed.random_chunks = true,
                "--parallel" => parsed.parallel = true,
                "--fail-fast" => parsed.fail_fast = true,
                other => bail!("unknown loopback option: {other}"),
            }
            i += 1;
        }
        Ok(parsed)
    }

    /// Flags win over config; `--zlp` wins over any buffer size.
    pub fn suite_options(&self, config: &LoopcheckConfig) -> SuiteOptions {
        let settings = &config.loopback;
        let buffer_size = if self.zlp {
            0
        } else {
            self.buffer_size.unwrap_or(settings.buffer_size)
        };
        SuiteOptions {
            buffer_size,
            chunking: if self.random_chunks {
                ChunkingPolicy::RandomizedUpTo
            } else {
                settings.chunking
            },
            retry_limit: settings.retry_limit,
            seed: self.seed.or(settings.seed),
            parallel: self.parallel || settings.parallel,
            fail_fast: self.fail_fast || settings.fail_fast,
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct LoopbackReport {
    speed: LinkSpeed,
    burst: usize,
    buffer_size: usize,
    endpoints: Vec<EndpointView>,
    skipped: usize,
    failed_endpoints: Vec<u8>,
    passed: bool,
}

#[derive(Serialize)]
struct EndpointView {
    endpoint: u8,
    passed: bool,
    bytes: usize,
    chunks: usize,
    zero_length_chunks: u32,
    retries: u32,
    overall_mb_per_s: f64,
    transfer_mb_per_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
}

impl From<&EndpointReport> for EndpointView {
    fn from(r: &EndpointReport) -> Self {
        Self {
            endpoint: r.endpoint,
            passed: r.passed,
            bytes: r.bytes,
            chunks: r.chunks,
            zero_length_chunks: r.zero_length_chunks,
            retries: r.retries,
            overall_mb_per_s: r.overall_mb_per_s(),
            transfer_mb_per_s: r.transfer_mb_per_s(),
            failure: r.failure.clone(),
        }
    }
}

fn print_human(report: &LoopbackReport) {
    header(&format!(
        "Loopback ({} speed, burst {}, {} bytes per pair)",
        report.speed, report.burst, report.buffer_size
    ));

    for ep in &report.endpoints {
        println!("  ┌─ EP {}", ep.endpoint);
        println!("  │  result   : {}", if ep.passed { "pass" } else { "FAIL" });
        println!(
            "  │  moved    : {} bytes in {} chunks ({} zlp, {} retries)",
            ep.bytes, ep.chunks, ep.zero_length_chunks, ep.retries
        );
        if let Some(failure) = &ep.failure {
            println!("  └─ error    : {failure}");
        } else {
            println!("  │  overall  : {:.2} MB/s", ep.overall_mb_per_s);
            println!("  └─ transfer : {:.2} MB/s", ep.transfer_mb_per_s);
        }
    }
    if report.skipped > 0 {
        println!("\n  {} endpoint pair(s) not run.", report.skipped);
    }

    println!();
    if report.passed {
        println!("  All {} endpoint pair(s) passed.", report.endpoints.len());
    } else {
        println!(
            "  {} endpoint(s) failed: {:?}",
            report.failed_endpoints.len(),
            report.failed_endpoints
        );
    }
}

// ── Command ───────────────────────────────────────────────────────────────────

/// Returns whether every endpoint pair passed.
pub async fn run(
    args: LoopbackArgs,
    config: &LoopcheckConfig,
    json: bool,
    cancel: CancelToken,
) -> Result<bool> {
    let options = args.suite_options(config);
    let device = config.device.clone();
    let index = args.device.unwrap_or(device.index);

    let opened = tokio::task::spawn_blocking(move || {
        usb::open(
            device.loopback_vendor_id,
            device.loopback_product_id,
            index,
            device.interface,
            device.timeout(),
        )
    })
    .await
    .context("device discovery task failed")??;

    if opened.pairs.is_empty() {
        bail!("device exposes no bulk or interrupt endpoint pairs");
    }
    let speed = opened.speed;
    let jobs = opened
        .pair_transports()
        .into_iter()
        .map(|(pairing, transport)| LoopbackJob {
            endpoint: pairing.endpoint_number(),
            transport,
        })
        .collect();

    let suite: SuiteReport = run_suite(jobs, options, cancel).await;
    let report = LoopbackReport {
        speed,
        burst: speed.burst_size(),
        buffer_size: options.buffer_size,
        endpoints: suite.endpoints.iter().map(EndpointView::from).collect(),
        skipped: suite.skipped,
        failed_endpoints: suite.failed_endpoints(),
        passed: suite.all_passed(),
    };

    if json {
        print_json(&report)?;
    } else {
        print_human(&report);
    }
    Ok(report.passed)
}
