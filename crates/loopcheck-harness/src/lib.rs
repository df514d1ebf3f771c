//! loopcheck-harness: the transfer-verification engine.
//!
//! Everything here talks to the device through [`ChunkTransport`] and
//! [`DeviceControl`]; the concrete libusb glue lives in the binary.

pub mod cancel;
pub mod integrity;
pub mod loopback;
pub mod stress;
pub mod suite;
pub mod transport;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use integrity::{check, CheckResult};
pub use loopback::{ChunkDescriptor, LoopbackError, LoopbackRun, LoopbackRunner, TransferTiming};
pub use loopcheck_core::ChunkingPolicy;
pub use stress::{
    DeviceControl, HaltReason, KindTally, StressOptions, StressRunner, StressSummary,
    StressTrialRecord, TransferSet, TrialFailure, TrialSpec, TrialState,
};
pub use suite::{run_endpoint, run_suite, EndpointReport, LoopbackJob, SuiteOptions, SuiteReport};
pub use transport::{ChunkTransport, EndpointPairing, TransferOutcome, TransportError};
