//! Integrity check of a received buffer against its reference.
//!
//! Buffers are compared segment by segment and the first bad segment is
//! reported. Scanning stops there; this is not a diff.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// Every segment matched.
    Pass { segments: usize },
    /// Lengths differ; no segment was compared.
    LengthMismatch { received: usize, reference: usize },
    /// First differing segment.
    Mismatch {
        segment_index: usize,
        received_segment: Vec<u8>,
        reference_segment: Vec<u8>,
    },
}

impl CheckResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, CheckResult::Pass { .. })
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckResult::Pass { segments } => write!(f, "pass ({segments} segments)"),
            CheckResult::LengthMismatch {
                received,
                reference,
            } => write!(f, "length mismatch: received {received} bytes, expected {reference}"),
            CheckResult::Mismatch {
                segment_index,
                received_segment,
                reference_segment,
            } => write!(
                f,
                "mismatch in segment {segment_index}: received {} expected {}",
                hex::encode(received_segment),
                hex::encode(reference_segment)
            ),
        }
    }
}

/// Compare `received` against `reference` in `segment_size` pieces.
///
/// A trailing partial segment is compared at its real length. A segment size
/// of zero compares nothing and passes with zero segments once the lengths
/// agree.
pub fn check(received: &[u8], reference: &[u8], segment_size: usize) -> CheckResult {
    if received.len() != reference.len() {
        return CheckResult::LengthMismatch {
            received: received.len(),
            reference: reference.len(),
        };
    }
    if segment_size == 0 {
        return CheckResult::Pass { segments: 0 };
    }

    let pairs = received
        .chunks(segment_size)
        .zip(reference.chunks(segment_size));
    let mut segments = 0;
    for (segment_index, (got, want)) in pairs.enumerate() {
        if got != want {
            return CheckResult::Mismatch {
                segment_index,
                received_segment: got.to_vec(),
                reference_segment: want.to_vec(),
            };
        }
        segments += 1;
    }
    CheckResult::Pass { segments }
}
