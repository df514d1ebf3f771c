//! libusb glue: find and claim the device under test, enumerate its
//! endpoint pairs, and expose them as harness transports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusb::{Context, Device, DeviceHandle, Recipient, RequestType, TransferType, UsbContext};

use loopcheck_core::protocol::{
    self, request, LengthWords, MAX_TRANSFER_LENGTH, STRESS_IN_ENDPOINT, STRESS_OUT_ENDPOINT,
};
use loopcheck_core::{LinkSpeed, TransferKind};
use loopcheck_harness::{ChunkTransport, DeviceControl, EndpointPairing, TransferSet, TransportError};

type Handle = Arc<DeviceHandle<Context>>;

/// A claimed device and what discovery learned about it.
pub struct OpenDevice {
    handle: Handle,
    pub speed: LinkSpeed,
    pub pairs: Vec<EndpointPairing>,
    timeout: Duration,
}

/// Open the `index`-th device matching `vendor_id:product_id` and claim
/// `interface`.
pub fn open(
    vendor_id: u16,
    product_id: u16,
    index: usize,
    interface: u8,
    timeout: Duration,
) -> Result<OpenDevice> {
    let context = Context::new().context("failed to initialise libusb")?;
    let devices = context.devices().context("failed to list USB devices")?;
    let device = devices
        .iter()
        .filter(|d| {
            d.device_descriptor()
                .map(|desc| desc.vendor_id() == vendor_id && desc.product_id() == product_id)
                .unwrap_or(false)
        })
        .nth(index)
        .with_context(|| {
            format!("no device {vendor_id:04x}:{product_id:04x} at index {index}")
        })?;

    let speed = link_speed(device.speed());
    let pairs = endpoint_pairs(&device, interface, speed)?;

    let handle = device
        .open()
        .with_context(|| format!("failed to open {vendor_id:04x}:{product_id:04x}"))?;
    // Not supported on every platform; claiming still works without it.
    if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
        tracing::debug!(error = %e, "kernel driver auto-detach unavailable");
    }
    handle
        .claim_interface(interface)
        .with_context(|| format!("failed to claim interface {interface}"))?;

    tracing::info!(
        device = %format!("{vendor_id:04x}:{product_id:04x}"),
        index,
        %speed,
        pairs = pairs.len(),
        "device opened"
    );

    Ok(OpenDevice {
        handle: Arc::new(handle),
        speed,
        pairs,
        timeout,
    })
}

fn link_speed(speed: rusb::Speed) -> LinkSpeed {
    match speed {
        rusb::Speed::Low => LinkSpeed::Low,
        rusb::Speed::Full => LinkSpeed::Full,
        rusb::Speed::High => LinkSpeed::High,
        rusb::Speed::Super => LinkSpeed::Super,
        rusb::Speed::SuperPlus => LinkSpeed::SuperPlus,
        _ => LinkSpeed::Full,
    }
}

/// Pair the n-th IN endpoint with the n-th OUT endpoint of the interface's
/// first alternate setting, in descriptor order.
fn endpoint_pairs(
    device: &Device<Context>,
    interface: u8,
    speed: LinkSpeed,
) -> Result<Vec<EndpointPairing>> {
    let config = device
        .active_config_descriptor()
        .context("failed to read active configuration")?;
    let Some(setting) = config
        .interfaces()
        .find(|i| i.number() == interface)
        .and_then(|i| i.descriptors().next())
    else {
        anyhow::bail!("interface {interface} not present in the active configuration");
    };

    let mut ins = Vec::new();
    let mut outs = Vec::new();
    for ep in setting.endpoint_descriptors() {
        let kind = match ep.transfer_type() {
            TransferType::Bulk => TransferKind::Bulk,
            TransferType::Interrupt => TransferKind::Interrupt,
            _ => continue,
        };
        let entry = (ep.address(), kind, ep.max_packet_size());
        match ep.direction() {
            rusb::Direction::In => ins.push(entry),
            rusb::Direction::Out => outs.push(entry),
        }
    }

    Ok(ins
        .into_iter()
        .zip(outs)
        .map(|((in_address, kind, _), (out_address, _, w_max))| EndpointPairing {
            in_address,
            out_address,
            kind,
            max_packet_size: protocol::max_packet_size(speed, w_max),
        })
        .collect())
}

impl OpenDevice {
    /// One transport per discovered endpoint pair.
    pub fn pair_transports(&self) -> Vec<(EndpointPairing, Box<dyn ChunkTransport>)> {
        self.pairs
            .iter()
            .map(|pairing| {
                let transport = EndpointTransport {
                    handle: self.handle.clone(),
                    in_address: pairing.in_address,
                    out_address: pairing.out_address,
                    kind: pairing.kind,
                    max_packet_size: pairing.max_packet_size,
                    timeout: self.timeout,
                };
                (pairing.clone(), Box::new(transport) as Box<dyn ChunkTransport>)
            })
            .collect()
    }

    /// Transports and control channel for the stress firmware's fixed
    /// endpoints. Interrupt replaces bulk on low-speed links.
    pub fn stress_transfers(&self) -> (VendorControl, TransferSet) {
        let slow_timeout = self.speed.transfer_timeout(self.timeout);
        let streaming = |kind, timeout| -> Box<dyn ChunkTransport> {
            Box::new(EndpointTransport {
                handle: self.handle.clone(),
                in_address: STRESS_IN_ENDPOINT,
                out_address: STRESS_OUT_ENDPOINT,
                kind,
                max_packet_size: MAX_TRANSFER_LENGTH,
                timeout,
            })
        };
        let low_speed = self.speed == LinkSpeed::Low;

        let transfers = TransferSet {
            bulk: (!low_speed).then(|| streaming(TransferKind::Bulk, self.timeout)),
            interrupt: low_speed.then(|| streaming(TransferKind::Interrupt, slow_timeout)),
            control: Box::new(ControlTransport {
                handle: self.handle.clone(),
                timeout: slow_timeout,
            }),
        };
        let control = VendorControl {
            handle: self.handle.clone(),
            timeout: slow_timeout,
        };
        (control, transfers)
    }
}

fn transport_error(e: rusb::Error) -> TransportError {
    match e {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::NoDevice => TransportError::Disconnected,
        other => TransportError::Io(other.to_string()),
    }
}

fn length_words(length: usize) -> Result<LengthWords, TransportError> {
    LengthWords::encode(length).map_err(|e| TransportError::Io(e.to_string()))
}

fn vendor_out() -> u8 {
    rusb::request_type(rusb::Direction::Out, RequestType::Vendor, Recipient::Device)
}

fn vendor_in() -> u8 {
    rusb::request_type(rusb::Direction::In, RequestType::Vendor, Recipient::Device)
}

/// Bulk or interrupt endpoint pair.
struct EndpointTransport {
    handle: Handle,
    in_address: u8,
    out_address: u8,
    kind: TransferKind,
    max_packet_size: usize,
    timeout: Duration,
}

impl ChunkTransport for EndpointTransport {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let result = match self.kind {
            TransferKind::Interrupt => {
                self.handle.write_interrupt(self.out_address, data, self.timeout)
            }
            _ => self.handle.write_bulk(self.out_address, data, self.timeout),
        };
        result.map_err(transport_error)
    }

    fn read(&mut self, expected_length: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; expected_length];
        let n = match self.kind {
            TransferKind::Interrupt => {
                self.handle.read_interrupt(self.in_address, &mut buf, self.timeout)
            }
            _ => self.handle.read_bulk(self.in_address, &mut buf, self.timeout),
        }
        .map_err(transport_error)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Control transfers under test, carried by vendor requests 10 and 20.
struct ControlTransport {
    handle: Handle,
    timeout: Duration,
}

impl ChunkTransport for ControlTransport {
    fn max_packet_size(&self) -> usize {
        MAX_TRANSFER_LENGTH
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let words = length_words(data.len())?;
        self.handle
            .write_control(
                vendor_out(),
                request::CONTROL_OUT_TRANSFER,
                words.value,
                words.index,
                data,
                self.timeout,
            )
            .map_err(transport_error)
    }

    fn read(&mut self, expected_length: usize) -> Result<Vec<u8>, TransportError> {
        let words = length_words(expected_length)?;
        let mut buf = vec![0u8; expected_length];
        let n = self
            .handle
            .read_control(
                vendor_in(),
                request::CONTROL_IN_TRANSFER,
                words.value,
                words.index,
                &mut buf,
                self.timeout,
            )
            .map_err(transport_error)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Vendor control channel of the stress firmware.
pub struct VendorControl {
    handle: Handle,
    timeout: Duration,
}

impl DeviceControl for VendorControl {
    fn reset_state(&mut self) -> Result<(), TransportError> {
        self.handle
            .write_control(vendor_out(), request::RESET_STATE, 0, 0, &[], self.timeout)
            .map_err(transport_error)?;
        Ok(())
    }

    fn set_in_transfer_length(&mut self, length: u16) -> Result<(), TransportError> {
        let words = length_words(usize::from(length))?;
        self.handle
            .write_control(
                vendor_out(),
                request::SET_IN_TRANSFER_LENGTH,
                words.value,
                words.index,
                &[],
                self.timeout,
            )
            .map_err(transport_error)?;
        Ok(())
    }

    fn last_out_data(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; MAX_TRANSFER_LENGTH];
        let n = self
            .handle
            .read_control(vendor_in(), request::GET_LAST_OUT_DATA, 0, 0, &mut buf, self.timeout)
            .map_err(transport_error)?;
        buf.truncate(n);
        Ok(buf)
    }
}
