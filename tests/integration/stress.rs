use loopcheck_core::protocol::MAX_TRANSFER_LENGTH;
use loopcheck_core::{Direction, LinkSpeed, TransferKind};
use loopcheck_harness::{
    cancel_pair, HaltReason, StressOptions, StressRunner, TrialFailure, TrialSpec, TrialState,
};

use crate::*;

fn runner(
    firmware: &StressFirmware,
    speed: LinkSpeed,
    options: StressOptions,
) -> StressRunner<SimControl> {
    let (control, transfers) = firmware.attach();
    StressRunner::new(control, transfers, speed, options)
}

fn seeded(seed: u64) -> StressOptions {
    StressOptions {
        seed: Some(seed),
        ..StressOptions::default()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
//  Healthy firmware
// ══════════════════════════════════════════════════════════════════════════════

/// A long seeded run against correct firmware passes every trial, resets the
/// device once per trial and touches all four tests.
#[test]
fn test_seeded_run_passes_and_covers_every_test() {
    let firmware = StressFirmware::new(LinkSpeed::High);
    let summary = runner(&firmware, LinkSpeed::High, seeded(2024)).run(2000);

    assert!(summary.all_passed(), "failures: {:?}", summary.failures);
    assert_eq!(summary.executed, 2000);
    assert_eq!(summary.passed, 2000);
    assert_eq!(firmware.resets(), 2000);
    assert_eq!(summary.tallies.len(), 4);
    for ((kind, _), tally) in &summary.tallies {
        assert_ne!(*kind, TransferKind::Interrupt);
        assert!(tally.executed > 0);
    }

    for (_, _, length) in firmware.transfers() {
        assert!((1..MAX_TRANSFER_LENGTH).contains(&length));
    }
}

/// Scripted trials from the protocol description: bulk OUT of 250 bytes and
/// control IN of 100 bytes both verify.
#[test]
fn test_scripted_bulk_out_and_control_in() {
    let firmware = StressFirmware::new(LinkSpeed::Full);
    let plan = [
        TrialSpec {
            kind: TransferKind::Bulk,
            direction: Direction::Out,
            length: 250,
        },
        TrialSpec {
            kind: TransferKind::Control,
            direction: Direction::In,
            length: 100,
        },
    ];
    let summary = runner(&firmware, LinkSpeed::Full, seeded(1)).run_plan(&plan);

    assert!(summary.all_passed());
    assert_eq!(
        firmware.transfers(),
        vec![
            (TransferKind::Bulk, Direction::Out, 250),
            (TransferKind::Control, Direction::In, 100),
        ]
    );
}

/// Low-speed devices have no bulk pipe; the plan uses interrupt instead and
/// still passes.
#[test]
fn test_low_speed_runs_interrupt_and_control() {
    let firmware = StressFirmware::new(LinkSpeed::Low);
    let summary = runner(&firmware, LinkSpeed::Low, seeded(8)).run(400);

    assert!(summary.all_passed());
    assert!(summary
        .tallies
        .keys()
        .all(|(kind, _)| *kind != TransferKind::Bulk));
    assert!(summary
        .tallies
        .contains_key(&(TransferKind::Interrupt, Direction::In)));
}

// ══════════════════════════════════════════════════════════════════════════════
//  Faulty firmware
// ══════════════════════════════════════════════════════════════════════════════

fn three_trials() -> Vec<TrialSpec> {
    let spec = |direction, length| TrialSpec {
        kind: TransferKind::Bulk,
        direction,
        length,
    };
    vec![
        spec(Direction::Out, 64),
        spec(Direction::In, 300),
        spec(Direction::Out, 700),
    ]
}

/// Without fail-fast a bad trial is recorded and the run carries on.
#[test]
fn test_tolerant_run_records_and_continues() {
    let firmware = StressFirmware::new(LinkSpeed::High).corrupt_trial(1);
    let summary = runner(&firmware, LinkSpeed::High, seeded(1)).run_plan(&three_trials());

    assert_eq!(summary.executed, 3);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed(), 1);
    assert!(summary.halted.is_none());

    let failure = &summary.failures[0];
    assert_eq!(failure.index, 1);
    assert_eq!(failure.failed_during, Some(TrialState::TransferInFlight));
    assert!(matches!(
        failure.failure,
        Some(TrialFailure::DataMismatch { offset: 299, .. })
    ));
}

/// Fail-fast stops at the first bad trial and keeps the diagnostic.
#[test]
fn test_fail_fast_halts_with_diagnostics() {
    let firmware = StressFirmware::new(LinkSpeed::High).corrupt_trial(0);
    let options = StressOptions {
        fail_fast: true,
        ..seeded(1)
    };
    let summary = runner(&firmware, LinkSpeed::High, options).run_plan(&three_trials());

    assert_eq!(summary.executed, 1);
    assert_eq!(summary.halted, Some(HaltReason::FailFast { trial: 0 }));
    let message = summary.failures[0].failure.as_ref().unwrap().to_string();
    assert!(message.starts_with("data differs at byte 63"), "{message}");
    assert_eq!(firmware.resets(), 1);
}

/// An unplugged device halts the run even in tolerant mode.
#[test]
fn test_disconnect_halts_tolerant_run() {
    let firmware = StressFirmware::new(LinkSpeed::High).unplug_at_trial(1);
    let summary = runner(&firmware, LinkSpeed::High, seeded(1)).run_plan(&three_trials());

    assert_eq!(summary.executed, 2);
    assert_eq!(summary.halted, Some(HaltReason::Disconnected { trial: 1 }));
    assert_eq!(summary.failures[0].failed_during, Some(TrialState::StateReset));
    assert!(!summary.all_passed());
}

/// Cancellation is honoured between trials.
#[test]
fn test_cancel_stops_before_next_trial() {
    let firmware = StressFirmware::new(LinkSpeed::High);
    let (handle, token) = cancel_pair();
    handle.cancel();
    let summary = runner(&firmware, LinkSpeed::High, seeded(1))
        .with_cancel(token)
        .run(100);

    assert_eq!(summary.executed, 0);
    assert_eq!(summary.halted, Some(HaltReason::Cancelled { trial: 0 }));
    assert_eq!(firmware.resets(), 0);
}
