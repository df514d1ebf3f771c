//! Randomized stress trials against the stress firmware.
//!
//! Every trial starts by resetting device-side state, then runs one
//! transfer of a random kind, direction and length and verifies it:
//!
//!   OUT: send the reference pattern, read back what the device captured
//!        via the vendor query, compare both count and content.
//!   IN:  declare the length via vendor request, read, compare against the
//!        reference pattern the firmware generates on its side.
//!
//! Kinds are drawn independently per trial (not round-robin) so that
//! ordering-dependent firmware state bugs get a chance to show up.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use loopcheck_core::protocol::{reference_pattern, MAX_TRANSFER_LENGTH};
use loopcheck_core::{Direction, LinkSpeed, TransferKind};

use crate::cancel::CancelToken;
use crate::transport::{ChunkTransport, TransportError};

/// Vendor control channel of the stress firmware.
pub trait DeviceControl: Send {
    /// Clear the device's last-received buffer and pending IN length.
    fn reset_state(&mut self) -> Result<(), TransportError>;

    /// Declare the length of the next IN transfer.
    fn set_in_transfer_length(&mut self, length: u16) -> Result<(), TransportError>;

    /// Payload of the last OUT transfer the device received.
    fn last_out_data(&mut self) -> Result<Vec<u8>, TransportError>;
}

impl<T: DeviceControl + ?Sized> DeviceControl for Box<T> {
    fn reset_state(&mut self) -> Result<(), TransportError> {
        (**self).reset_state()
    }

    fn set_in_transfer_length(&mut self, length: u16) -> Result<(), TransportError> {
        (**self).set_in_transfer_length(length)
    }

    fn last_out_data(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).last_out_data()
    }
}

/// One transport per transfer kind. Bulk is absent on low-speed devices.
pub struct TransferSet {
    pub bulk: Option<Box<dyn ChunkTransport>>,
    pub interrupt: Option<Box<dyn ChunkTransport>>,
    pub control: Box<dyn ChunkTransport>,
}

impl TransferSet {
    pub fn get_mut(&mut self, kind: TransferKind) -> Option<&mut (dyn ChunkTransport + 'static)> {
        match kind {
            TransferKind::Bulk => self.bulk.as_deref_mut(),
            TransferKind::Interrupt => self.interrupt.as_deref_mut(),
            TransferKind::Control => Some(self.control.as_mut()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSpec {
    pub kind: TransferKind,
    pub direction: Direction,
    pub length: usize,
}

/// Per-trial state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Idle,
    StateReset,
    TransferInFlight,
    Verified,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrialFailure {
    #[error("device accepted {actual} bytes, expected {expected}")]
    BytesAccepted { expected: usize, actual: usize },
    #[error("got {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("data differs at byte {offset}: {}", diff_window(.offset, .expected, .actual))]
    DataMismatch {
        offset: usize,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },
    #[error("no {0} transport on this device")]
    Unavailable(TransferKind),
    #[error("trial length {0} does not fit in a setup packet")]
    LengthOutOfRange(usize),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Hex of both buffers starting at the first differing byte.
fn diff_window(offset: &usize, expected: &[u8], actual: &[u8]) -> String {
    const WINDOW: usize = 16;
    let window = |buf: &[u8]| {
        let start = (*offset).min(buf.len());
        let end = (start + WINDOW).min(buf.len());
        hex::encode(&buf[start..end])
    };
    format!("expected {} actual {}", window(expected), window(actual))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressTrialRecord {
    pub index: usize,
    pub kind: TransferKind,
    pub direction: Direction,
    pub length: usize,
    pub passed: bool,
    /// State the trial was in when it failed.
    pub failed_during: Option<TrialState>,
    pub failure: Option<TrialFailure>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindTally {
    pub executed: usize,
    pub failed: usize,
}

/// Why a run stopped before the end of its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    FailFast { trial: usize },
    Disconnected { trial: usize },
    Cancelled { trial: usize },
}

#[derive(Debug, Clone, Default)]
pub struct StressSummary {
    pub planned: usize,
    pub executed: usize,
    pub passed: usize,
    pub tallies: BTreeMap<(TransferKind, Direction), KindTally>,
    /// Failed trials, in execution order.
    pub failures: Vec<StressTrialRecord>,
    pub halted: Option<HaltReason>,
}

impl StressSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn all_passed(&self) -> bool {
        self.failures.is_empty() && self.halted.is_none()
    }

    fn record(&mut self, record: &StressTrialRecord) {
        self.executed += 1;
        let tally = self
            .tallies
            .entry((record.kind, record.direction))
            .or_default();
        tally.executed += 1;
        if record.passed {
            self.passed += 1;
        } else {
            tally.failed += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StressOptions {
    pub fail_fast: bool,
    pub seed: Option<u64>,
    /// Exclusive upper bound of trial lengths.
    pub max_transfer_length: usize,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            fail_fast: false,
            seed: None,
            max_transfer_length: MAX_TRANSFER_LENGTH,
        }
    }
}

pub struct StressRunner<C> {
    control: C,
    transfers: TransferSet,
    speed: LinkSpeed,
    options: StressOptions,
    rng: StdRng,
    cancel: CancelToken,
}

impl<C: DeviceControl> StressRunner<C> {
    pub fn new(control: C, transfers: TransferSet, speed: LinkSpeed, options: StressOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            control,
            transfers,
            speed,
            options,
            rng,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Draw `iterations` trials. Each picks one of the four tests available
    /// at this link speed uniformly, and a length in `1..max_transfer_length`.
    pub fn plan(&mut self, iterations: u32) -> Vec<TrialSpec> {
        let tests: Vec<(TransferKind, Direction)> = self
            .speed
            .stress_kinds()
            .iter()
            .flat_map(|&kind| [(kind, Direction::Out), (kind, Direction::In)])
            .collect();
        let max_length = self.options.max_transfer_length.max(2);

        (0..iterations)
            .map(|_| {
                let (kind, direction) = tests[self.rng.gen_range(0..tests.len())];
                TrialSpec {
                    kind,
                    direction,
                    length: self.rng.gen_range(1..max_length),
                }
            })
            .collect()
    }

    /// Plan and execute `iterations` random trials.
    pub fn run(&mut self, iterations: u32) -> StressSummary {
        let plan = self.plan(iterations);
        self.run_plan(&plan)
    }

    /// Execute a given sequence of trials.
    pub fn run_plan(&mut self, plan: &[TrialSpec]) -> StressSummary {
        let mut summary = StressSummary {
            planned: plan.len(),
            ..Default::default()
        };

        for (index, spec) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.halted = Some(HaltReason::Cancelled { trial: index });
                break;
            }

            let record = self.run_trial(index, *spec);
            summary.record(&record);
            if record.passed {
                continue;
            }

            let disconnected = matches!(
                record.failure,
                Some(TrialFailure::Transport(TransportError::Disconnected))
            );
            if let Some(failure) = &record.failure {
                tracing::warn!(
                    trial = index,
                    kind = %record.kind,
                    direction = %record.direction,
                    length = record.length,
                    error = %failure,
                    "stress trial failed"
                );
            }
            summary.failures.push(record);

            if disconnected {
                summary.halted = Some(HaltReason::Disconnected { trial: index });
                break;
            }
            if self.options.fail_fast {
                summary.halted = Some(HaltReason::FailFast { trial: index });
                break;
            }
        }

        tracing::info!(
            executed = summary.executed,
            passed = summary.passed,
            failed = summary.failed(),
            "stress run finished"
        );
        summary
    }

    /// Run one trial through Idle → StateReset → TransferInFlight → Verified | Failed.
    pub fn run_trial(&mut self, index: usize, spec: TrialSpec) -> StressTrialRecord {
        let mut state = TrialState::Idle;
        let result = self.execute(spec, &mut state);

        let (passed, failed_during, failure) = match result {
            Ok(()) => (true, None, None),
            Err(e) => (false, Some(state), Some(e)),
        };
        tracing::debug!(
            trial = index,
            kind = %spec.kind,
            direction = %spec.direction,
            length = spec.length,
            passed,
            "trial complete"
        );

        StressTrialRecord {
            index,
            kind: spec.kind,
            direction: spec.direction,
            length: spec.length,
            passed,
            failed_during,
            failure,
        }
    }

    fn execute(&mut self, spec: TrialSpec, state: &mut TrialState) -> Result<(), TrialFailure> {
        *state = TrialState::StateReset;
        self.control.reset_state()?;

        *state = TrialState::TransferInFlight;
        match spec.direction {
            Direction::Out => self.out_transfer(spec)?,
            Direction::In => self.in_transfer(spec)?,
        }

        *state = TrialState::Verified;
        Ok(())
    }

    fn out_transfer(&mut self, spec: TrialSpec) -> Result<(), TrialFailure> {
        let sent = reference_pattern(spec.length);
        let transport = self
            .transfers
            .get_mut(spec.kind)
            .ok_or(TrialFailure::Unavailable(spec.kind))?;
        let accepted = transport.write(&sent)?;
        let captured = self.control.last_out_data()?;

        if accepted != spec.length {
            return Err(TrialFailure::BytesAccepted {
                expected: spec.length,
                actual: accepted,
            });
        }
        compare(&sent, &captured)
    }

    fn in_transfer(&mut self, spec: TrialSpec) -> Result<(), TrialFailure> {
        let length =
            u16::try_from(spec.length).map_err(|_| TrialFailure::LengthOutOfRange(spec.length))?;
        self.control.set_in_transfer_length(length)?;

        let transport = self
            .transfers
            .get_mut(spec.kind)
            .ok_or(TrialFailure::Unavailable(spec.kind))?;
        let received = transport.read(spec.length)?;
        compare(&reference_pattern(spec.length), &received)
    }
}

/// Length first, then content; reports the first differing byte.
fn compare(expected: &[u8], actual: &[u8]) -> Result<(), TrialFailure> {
    if expected.len() != actual.len() {
        return Err(TrialFailure::LengthMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    match expected.iter().zip(actual).position(|(a, b)| a != b) {
        None => Ok(()),
        Some(offset) => Err(TrialFailure::DataMismatch {
            offset,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }),
    }
}
