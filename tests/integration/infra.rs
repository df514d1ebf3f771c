use std::sync::{Arc, Mutex};

use loopcheck_core::protocol::{reference_pattern, MAX_TRANSFER_LENGTH};
use loopcheck_core::{Direction, LinkSpeed, TransferKind};
use loopcheck_harness::{ChunkTransport, DeviceControl, LoopbackJob, TransferSet, TransportError};

use crate::*;

// ── Loopback firmware ─────────────────────────────────────────────────────────

/// One echoing endpoint pair: every write is returned by the next read.
pub struct SimPair {
    max_packet_size: usize,
    pending: Option<Vec<u8>>,
    armed: Option<Fault>,
    plan: FaultPlan,
    /// Length of every write attempt, in order.
    pub writes: Vec<usize>,
}

impl SimPair {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            max_packet_size,
            pending: None,
            armed: None,
            plan: FaultPlan::new(),
            writes: Vec::new(),
        }
    }

    pub fn with_faults(mut self, plan: FaultPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn job(endpoint: u8, max_packet_size: usize, plan: FaultPlan) -> LoopbackJob {
        LoopbackJob {
            endpoint,
            transport: Box::new(SimPair::new(max_packet_size).with_faults(plan)),
        }
    }
}

impl ChunkTransport for SimPair {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.writes.push(data.len());
        match self.plan.next_attempt() {
            Some(Fault::Timeout) => {
                self.pending = None;
                Err(TransportError::Timeout)
            }
            Some(Fault::Unplug) => Err(TransportError::Disconnected),
            armed => {
                self.pending = Some(data.to_vec());
                self.armed = armed;
                Ok(data.len())
            }
        }
    }

    fn read(&mut self, _expected_length: usize) -> Result<Vec<u8>, TransportError> {
        let Some(mut echo) = self.pending.take() else {
            return Err(TransportError::Timeout);
        };
        match self.armed.take() {
            Some(Fault::Short(n)) => echo.truncate(n),
            Some(Fault::Corrupt) => {
                if let Some(first) = echo.first_mut() {
                    *first ^= 0xff;
                }
            }
            _ => {}
        }
        Ok(echo)
    }
}

// ── Stress firmware ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FirmwareState {
    last_out: Vec<u8>,
    in_length: usize,
    resets: usize,
    corrupt_trials: Vec<usize>,
    unplug_at_trial: Option<usize>,
    transfers: Vec<(TransferKind, Direction, usize)>,
}

impl FirmwareState {
    /// Trials are delimited by resets.
    fn trial(&self) -> usize {
        self.resets.saturating_sub(1)
    }

    fn corrupting(&self) -> bool {
        self.corrupt_trials.contains(&self.trial())
    }

    fn check_present(&self) -> Result<(), TransportError> {
        match self.unplug_at_trial {
            Some(trial) if self.resets > trial => Err(TransportError::Disconnected),
            _ => Ok(()),
        }
    }
}

/// Device side of the stress protocol, shared by the control channel and
/// every transfer pipe handed out by [`StressFirmware::attach`].
#[derive(Clone)]
pub struct StressFirmware {
    speed: LinkSpeed,
    state: Arc<Mutex<FirmwareState>>,
}

impl StressFirmware {
    pub fn new(speed: LinkSpeed) -> Self {
        Self {
            speed,
            state: Arc::default(),
        }
    }

    /// Flip a byte of whatever moves during trial `trial`.
    pub fn corrupt_trial(self, trial: usize) -> Self {
        self.state.lock().unwrap().corrupt_trials.push(trial);
        self
    }

    /// Disappear when trial `trial` starts.
    pub fn unplug_at_trial(self, trial: usize) -> Self {
        self.state.lock().unwrap().unplug_at_trial = Some(trial);
        self
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn transfers(&self) -> Vec<(TransferKind, Direction, usize)> {
        self.state.lock().unwrap().transfers.clone()
    }

    /// Control channel and pipes as a real device at this speed exposes them.
    pub fn attach(&self) -> (SimControl, TransferSet) {
        let pipe = |kind| -> Box<dyn ChunkTransport> {
            Box::new(SimPipe {
                kind,
                state: self.state.clone(),
            })
        };
        let low_speed = self.speed == LinkSpeed::Low;
        let transfers = TransferSet {
            bulk: (!low_speed).then(|| pipe(TransferKind::Bulk)),
            interrupt: low_speed.then(|| pipe(TransferKind::Interrupt)),
            control: pipe(TransferKind::Control),
        };
        let control = SimControl {
            state: self.state.clone(),
        };
        (control, transfers)
    }
}

pub struct SimControl {
    state: Arc<Mutex<FirmwareState>>,
}

impl DeviceControl for SimControl {
    fn reset_state(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.resets += 1;
        state.check_present()?;
        state.last_out.clear();
        state.in_length = 0;
        Ok(())
    }

    fn set_in_transfer_length(&mut self, length: u16) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.check_present()?;
        state.in_length = usize::from(length);
        Ok(())
    }

    fn last_out_data(&mut self) -> Result<Vec<u8>, TransportError> {
        let state = self.state.lock().unwrap();
        state.check_present()?;
        let n = state.last_out.len().min(MAX_TRANSFER_LENGTH);
        Ok(state.last_out[..n].to_vec())
    }
}

struct SimPipe {
    kind: TransferKind,
    state: Arc<Mutex<FirmwareState>>,
}

impl ChunkTransport for SimPipe {
    fn max_packet_size(&self) -> usize {
        MAX_TRANSFER_LENGTH
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.check_present()?;
        state.transfers.push((self.kind, Direction::Out, data.len()));
        let mut captured = data.to_vec();
        if state.corrupting() {
            if let Some(last) = captured.last_mut() {
                *last ^= 0x55;
            }
        }
        state.last_out = captured;
        Ok(data.len())
    }

    fn read(&mut self, expected_length: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.check_present()?;
        state.transfers.push((self.kind, Direction::In, expected_length));
        let mut data = reference_pattern(state.in_length.min(expected_length));
        if state.corrupting() {
            if let Some(last) = data.last_mut() {
                *last ^= 0x55;
            }
        }
        Ok(data)
    }
}
