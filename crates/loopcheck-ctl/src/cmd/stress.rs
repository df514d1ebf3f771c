//! `loopcheck stress`: randomized transfer trials against the stress firmware.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use loopcheck_core::{Direction, LinkSpeed, LoopcheckConfig, TransferKind};
use loopcheck_harness::{CancelToken, HaltReason, StressOptions, StressRunner, StressSummary};

use super::{flag_value, header, print_json};
use crate::usb;

#[derive(Debug, Default, PartialEq)]
pub struct StressArgs {
    pub device: Option<usize>,
    pub iterations: Option<u32>,
    pub seed: Option<u64>,
    pub fail_fast: bool,
}

impl StressArgs {
    pub fn parse(args: &[&str]) -> Result<Self> {
        let mut parsed = StressArgs::default();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "--device" => parsed.device = Some(flag_value(args, &mut i, "--device")?),
                "--iterations" => {
                    parsed.iterations = Some(flag_value(args, &mut i, "--iterations")?)
                }
                "--seed" => parsed.seed = Some(flag_value(args, &mut i, "--seed")?),
                "--fail-fast" => parsed.fail_fast = true,
                other => bail!("unknown stress option: {other}"),
            }
            i += 1;
        }
        Ok(parsed)
    }

    /// Flags over config. Without a configured seed one is drawn here, so
    /// the report always names the seed that replays the run.
    pub fn stress_options(&self, config: &LoopcheckConfig) -> StressOptions {
        StressOptions {
            fail_fast: self.fail_fast || config.stress.fail_fast,
            seed: Some(self.seed.or(config.stress.seed).unwrap_or_else(rand::random)),
            ..StressOptions::default()
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StressReport {
    speed: LinkSpeed,
    seed: Option<u64>,
    planned: usize,
    executed: usize,
    passed: usize,
    failed: usize,
    by_kind: Vec<KindView>,
    failures: Vec<FailureView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    halted: Option<String>,
    all_passed: bool,
}

#[derive(Serialize)]
struct KindView {
    kind: TransferKind,
    direction: Direction,
    executed: usize,
    failed: usize,
}

#[derive(Serialize)]
struct FailureView {
    trial: usize,
    kind: TransferKind,
    direction: Direction,
    length: usize,
    error: String,
}

fn halt_text(reason: HaltReason) -> String {
    match reason {
        HaltReason::FailFast { trial } => format!("fail-fast after trial {trial}"),
        HaltReason::Disconnected { trial } => format!("device disconnected during trial {trial}"),
        HaltReason::Cancelled { trial } => format!("cancelled before trial {trial}"),
    }
}

impl StressReport {
    fn new(speed: LinkSpeed, seed: Option<u64>, summary: &StressSummary) -> Self {
        Self {
            speed,
            seed,
            planned: summary.planned,
            executed: summary.executed,
            passed: summary.passed,
            failed: summary.failed(),
            by_kind: summary
                .tallies
                .iter()
                .map(|(&(kind, direction), tally)| KindView {
                    kind,
                    direction,
                    executed: tally.executed,
                    failed: tally.failed,
                })
                .collect(),
            failures: summary
                .failures
                .iter()
                .map(|f| FailureView {
                    trial: f.index,
                    kind: f.kind,
                    direction: f.direction,
                    length: f.length,
                    error: f
                        .failure
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                })
                .collect(),
            halted: summary.halted.map(halt_text),
            all_passed: summary.all_passed(),
        }
    }
}

fn print_human(report: &StressReport) {
    header(&format!("Stress ({} speed)", report.speed));
    if let Some(seed) = report.seed {
        println!("  Seed     : {seed}");
    }
    println!("  Trials   : {} of {} run", report.executed, report.planned);
    println!("  Passed   : {}", report.passed);
    println!("  Failed   : {}", report.failed);

    println!("\n  By transfer:");
    for k in &report.by_kind {
        println!(
            "    {:<9} {:<3} : {:>6} run, {} failed",
            k.kind.to_string(),
            k.direction.to_string(),
            k.executed,
            k.failed
        );
    }

    if !report.failures.is_empty() {
        println!("\n  Failures:");
        for f in &report.failures {
            println!("  ┌─ trial {}", f.trial);
            println!("  │  transfer : {} {} {} bytes", f.kind, f.direction, f.length);
            println!("  └─ error    : {}", f.error);
        }
    }
    if let Some(halted) = &report.halted {
        println!("\n  Halted: {halted}");
    }

    println!();
    if report.all_passed {
        println!("  All trials passed.");
    } else {
        println!("  {} trial(s) failed.", report.failed);
    }
}

// ── Command ───────────────────────────────────────────────────────────────────

/// Returns whether every planned trial ran and passed.
pub async fn run(
    args: StressArgs,
    config: &LoopcheckConfig,
    json: bool,
    cancel: CancelToken,
) -> Result<bool> {
    let device = config.device.clone();
    let index = args.device.unwrap_or(device.index);
    let iterations = args.iterations.unwrap_or(config.stress.iterations);
    let options = args.stress_options(config);

    let (speed, summary) = tokio::task::spawn_blocking(move || -> Result<_> {
        let opened = usb::open(
            device.stress_vendor_id,
            device.stress_product_id,
            index,
            device.interface,
            device.timeout(),
        )?;
        let (control, transfers) = opened.stress_transfers();
        let mut runner =
            StressRunner::new(control, transfers, opened.speed, options).with_cancel(cancel);
        Ok((opened.speed, runner.run(iterations)))
    })
    .await
    .context("stress task failed")??;

    let report = StressReport::new(speed, options.seed, &summary);
    if json {
        print_json(&report)?;
    } else {
        print_human(&report);
    }
    Ok(report.all_passed)
}
