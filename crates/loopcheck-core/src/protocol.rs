//! Loopback/stress firmware protocol: the contract between host and device.
//!
//! The request codes, identifiers and setup-word layout in this module are
//! shared with existing firmware and must stay bit-exact. Changing any of
//! them breaks interoperability with devices already in the field.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Device identifiers ───────────────────────────────────────────────────────

/// Loopback firmware: echoes every OUT endpoint back on its paired IN endpoint.
pub const LOOPBACK_VENDOR_ID: u16 = 0x16c0;
pub const LOOPBACK_PRODUCT_ID: u16 = 0x27d8;

/// Stress firmware: bulk/interrupt/control endpoints plus the vendor requests below.
pub const STRESS_VENDOR_ID: u16 = 0x1209;
pub const STRESS_PRODUCT_ID: u16 = 0x0001;

/// Endpoint addresses used by the stress firmware for bulk and interrupt trials.
pub const STRESS_OUT_ENDPOINT: u8 = 0x01;
pub const STRESS_IN_ENDPOINT: u8 = 0x82;

// ── Vendor requests ──────────────────────────────────────────────────────────

/// bRequest values understood by the stress firmware.
///
/// All are sent with bmRequestType = vendor | device recipient.
pub mod request {
    /// Declare the length of the next IN transfer. Length in wIndex/wValue.
    pub const SET_IN_TRANSFER_LENGTH: u8 = 1;
    /// Read back the payload of the last OUT transfer the device received.
    pub const GET_LAST_OUT_DATA: u8 = 2;
    /// Clear the device's "last received data" buffer and pending IN length.
    pub const RESET_STATE: u8 = 3;
    /// Control OUT transfer under test. Length in wIndex/wValue.
    pub const CONTROL_OUT_TRANSFER: u8 = 10;
    /// Control IN transfer under test. Length in wIndex/wValue.
    pub const CONTROL_IN_TRANSFER: u8 = 20;
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Upper bound (exclusive) of a single stress trial's payload.
/// Board dependent; 768 is what the reference command buffer can hold.
pub const MAX_TRANSFER_LENGTH: usize = 768;

/// Packets in flight per service interval on a SuperSpeed endpoint.
pub const SUPERSPEED_BURST: usize = 4;

/// Per-operation host-side timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default number of stress trials in one run.
pub const DEFAULT_ITERATIONS: u32 = 20_000;

/// Default loopback source buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 100_000;

/// wMaxPacketSize bits 0-10 carry the packet size; 11-12 are high-bandwidth
/// transaction hints and must be masked off.
const MAX_PACKET_SIZE_MASK: u16 = 0x07ff;

// ── Link speed ────────────────────────────────────────────────────────────────

/// Negotiated bus speed of the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSpeed {
    /// 1.5 Mbps. No bulk endpoints.
    Low,
    /// 12 Mbps.
    Full,
    /// 480 Mbps.
    High,
    /// 5 Gbps.
    Super,
    /// 10 Gbps and up.
    SuperPlus,
}

impl LinkSpeed {
    pub fn is_superspeed(self) -> bool {
        matches!(self, LinkSpeed::Super | LinkSpeed::SuperPlus)
    }

    /// Burst factor applied to wMaxPacketSize.
    pub fn burst_size(self) -> usize {
        if self.is_superspeed() {
            SUPERSPEED_BURST
        } else {
            1
        }
    }

    /// Transfer kinds the stress firmware exposes at this speed.
    /// Low speed has no bulk endpoints, so interrupt stands in for it.
    pub fn stress_kinds(self) -> &'static [TransferKind] {
        match self {
            LinkSpeed::Low => &[TransferKind::Interrupt, TransferKind::Control],
            _ => &[TransferKind::Bulk, TransferKind::Control],
        }
    }

    /// Timeout for control and interrupt transfers at this speed.
    ///
    /// Low-speed devices get an unbounded wait (zero, in libusb terms).
    pub fn transfer_timeout(self, configured: Duration) -> Duration {
        match self {
            LinkSpeed::Low => Duration::ZERO,
            _ => configured,
        }
    }
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkSpeed::Low => "low",
            LinkSpeed::Full => "full",
            LinkSpeed::High => "high",
            LinkSpeed::Super => "super",
            LinkSpeed::SuperPlus => "super+",
        };
        f.write_str(name)
    }
}

impl FromStr for LinkSpeed {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(LinkSpeed::Low),
            "full" => Ok(LinkSpeed::Full),
            "high" => Ok(LinkSpeed::High),
            "super" => Ok(LinkSpeed::Super),
            "super+" | "super_plus" | "superplus" => Ok(LinkSpeed::SuperPlus),
            other => Err(ProtocolError::UnknownSpeed(other.to_string())),
        }
    }
}

/// Effective chunk ceiling for an endpoint: burst × wMaxPacketSize.
pub fn max_packet_size(speed: LinkSpeed, w_max_packet_size: u16) -> usize {
    speed.burst_size() * usize::from(w_max_packet_size & MAX_PACKET_SIZE_MASK)
}

/// Endpoint number as shown to users (direction bit stripped).
pub fn endpoint_number(address: u8) -> u8 {
    address & 0x7f
}

// ── Transfer kinds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Bulk,
    Interrupt,
    Control,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::Bulk => "bulk",
            TransferKind::Interrupt => "interrupt",
            TransferKind::Control => "control",
        };
        f.write_str(name)
    }
}

/// Direction relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => f.write_str("OUT"),
            Direction::In => f.write_str("IN"),
        }
    }
}

// ── Setup words ───────────────────────────────────────────────────────────────

/// A transfer length as carried in a vendor setup packet.
///
/// The length is split big-endian: high byte in wIndex, low byte in wValue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthWords {
    pub value: u16,
    pub index: u16,
}

impl LengthWords {
    pub fn encode(length: usize) -> Result<Self, ProtocolError> {
        let length = u16::try_from(length).map_err(|_| ProtocolError::LengthOutOfRange(length))?;
        let [hi, lo] = length.to_be_bytes();
        Ok(Self {
            value: u16::from(lo),
            index: u16::from(hi),
        })
    }
}

// ── Reference pattern ─────────────────────────────────────────────────────────

/// The deterministic payload both host and firmware generate: byte i = i mod 256.
pub fn reference_pattern(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i % 256) as u8).collect()
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("transfer length {0} does not fit in a setup packet")]
    LengthOutOfRange(usize),
    #[error("unknown link speed: {0:?}")]
    UnknownSpeed(String),
}
