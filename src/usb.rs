//! Host backend talking to HID interfaces through libusb.
//!
//! The device is opened once and its HID interface claimed; the reader and writer handles share
//! that claim. Report sizes are taken from the interrupt endpoint descriptors. Like the OS HID
//! stacks, this backend prepends the report ID to input reports and expects it in front of
//! output reports, so the host-side report layout is the same on every platform.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rusb::{Direction, Recipient, RequestType, TransferType};

use crate::host::{HidBackend, ReportReader, ReportWriter};
use crate::report::REPORT_ID;
use crate::{Capabilities, Error, ErrorKind, Result, PID_DEFAULT, VID_DEFAULT};

const CLASS_HID: u8 = 0x03;
const HID_SET_REPORT: u8 = 0x09;
const REPORT_TYPE_OUTPUT: u16 = 0x02;

/// Location of a device on the USB, as printed by `lsusb` (`BBB:AAA`, decimal).
///
/// The address is assigned on enumeration and may change when the device is replugged.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DevicePath {
    pub bus_number: u8,
    pub address: u8,
}

impl FromStr for DevicePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::new(
                ErrorKind::Other,
                format!("invalid device path `{}`, expected `bus:address`", s),
            )
        };
        match &*s.split(':').collect::<Vec<_>>() {
            [bus, addr] => Ok(Self {
                bus_number: bus.trim().parse().map_err(|_| invalid())?,
                address: addr.trim().parse().map_err(|_| invalid())?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus_number, self.address)
    }
}

/// Describes a HID interface found on the system.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: DevicePath,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    /// Report sizes, including the report ID Byte.
    pub capabilities: Capabilities,
}

#[derive(Debug, Copy, Clone)]
struct HidInterface {
    number: u8,
    ep_in: u8,
    in_packet: u16,
    /// Interrupt OUT endpoint; output reports go through the control pipe without one.
    ep_out: Option<(u8, u16)>,
}

impl HidInterface {
    fn find(config: &rusb::ConfigDescriptor) -> Option<Self> {
        for intf in config.interfaces() {
            for descr in intf.descriptors() {
                if descr.class_code() != CLASS_HID || descr.setting_number() != 0 {
                    continue;
                }

                let mut ep_in = None;
                let mut ep_out = None;
                for ep in descr.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Interrupt {
                        continue;
                    }
                    let found = (ep.address(), ep.max_packet_size());
                    match ep.direction() {
                        Direction::In => ep_in = ep_in.or(Some(found)),
                        Direction::Out => ep_out = ep_out.or(Some(found)),
                    }
                }

                if let Some((ep_in, in_packet)) = ep_in {
                    return Some(Self {
                        number: descr.interface_number(),
                        ep_in,
                        in_packet,
                        ep_out,
                    });
                }
            }
        }
        None
    }

    fn capabilities(&self) -> Capabilities {
        let out_packet = self.ep_out.map_or(self.in_packet, |(_, size)| size);
        Capabilities {
            input_report_len: usize::from(self.in_packet) + 1,
            output_report_len: usize::from(out_packet) + 1,
        }
    }
}

/// Probes a device for a HID interface without opening it.
fn probe(
    device: &rusb::Device<rusb::GlobalContext>,
) -> Result<Option<(DeviceInfo, HidInterface)>> {
    let descr = device.device_descriptor().map_err(Error::usb)?;
    let config = match device.active_config_descriptor() {
        Ok(config) => config,
        // Unconfigured devices have no interfaces yet.
        Err(rusb::Error::NotFound) => return Ok(None),
        Err(e) => return Err(Error::usb(e)),
    };

    Ok(HidInterface::find(&config).map(|intf| {
        let info = DeviceInfo {
            path: DevicePath {
                bus_number: device.bus_number(),
                address: device.address(),
            },
            vendor_id: descr.vendor_id(),
            product_id: descr.product_id(),
            interface: intf.number,
            capabilities: intf.capabilities(),
        };
        (info, intf)
    }))
}

/// Returns all HID interfaces on the system, one per device.
pub fn devices() -> Result<Vec<DeviceInfo>> {
    let list = rusb::devices().map_err(Error::usb)?;
    let mut vec = Vec::new();
    for device in list.iter() {
        match probe(&device) {
            Ok(Some((info, _))) => vec.push(info),
            Ok(None) => {}
            Err(e) => log::debug!("skipping {:?}: {}", device, e),
        }
    }
    Ok(vec)
}

/// Releases the claimed interface when the last handle goes away.
struct Claim {
    handle: rusb::DeviceHandle<rusb::GlobalContext>,
    interface: u8,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.handle.release_interface(self.interface).ok();
    }
}

/// A HID interface of a USB device, opened through libusb.
pub struct UsbHid {
    claim: Arc<Claim>,
    info: DeviceInfo,
    intf: HidInterface,
    timeout: Duration,
}

impl UsbHid {
    const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Opens the only device with the default VID and PID connected to the system.
    pub fn open_unique() -> Result<Self> {
        Self::open_by_id(VID_DEFAULT, PID_DEFAULT)
    }

    /// Opens a HID device with the given VID and PID.
    ///
    /// If multiple devices match the IDs, an error will be returned.
    pub fn open_by_id(vid: u16, pid: u16) -> Result<Self> {
        Self::open_filtered(|info| info.vendor_id == vid && info.product_id == pid)
    }

    /// Opens the HID device at `path`.
    pub fn open_path(path: DevicePath) -> Result<Self> {
        Self::open_filtered(|info| info.path == path)
    }

    fn open_filtered(mut filter: impl FnMut(&DeviceInfo) -> bool) -> Result<Self> {
        let list = rusb::devices().map_err(Error::usb)?;
        let mut selected = None;
        for device in list.iter() {
            if let Some((info, intf)) = probe(&device)? {
                if filter(&info) {
                    if selected.is_some() {
                        return Err(Error::from_kind(ErrorKind::MultipleDevicesFound));
                    }
                    selected = Some((device, info, intf));
                }
            }
        }

        match selected {
            Some((device, info, intf)) => Self::open(device, info, intf),
            None => Err(Error::from_kind(ErrorKind::DeviceNotFound)),
        }
    }

    fn open(
        device: rusb::Device<rusb::GlobalContext>,
        info: DeviceInfo,
        intf: HidInterface,
    ) -> Result<Self> {
        log::debug!("UsbHid::open(device = {:?}, {:?})", device, intf);

        let handle = device.open().map_err(|e| {
            if cfg!(windows) && matches!(e, rusb::Error::NotSupported | rusb::Error::NotFound) {
                // Provide a more helpful error message on non-plug-and-play platforms.
                Error::new(
                    ErrorKind::UnsupportedDevice,
                    format!(
                        "{} (libusb cannot open devices bound to the Windows HID driver; \
                            use Zadig (https://zadig.akeo.ie/) to install WinUSB for it)",
                        e
                    ),
                )
            } else {
                Error::usb(e)
            }
        })?;

        // Not every platform lets libusb detach the kernel's HID driver; claiming fails with a
        // clear error if it is still attached.
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            log::debug!("cannot auto-detach kernel driver: {}", e);
        }
        handle.claim_interface(intf.number).map_err(Error::usb)?;

        Ok(Self {
            claim: Arc::new(Claim {
                handle,
                interface: intf.number,
            }),
            info,
            intf,
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Returns what was found out about the device while opening it.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Reads the product description string from the device.
    pub fn product(&self) -> Result<String> {
        let handle = &self.claim.handle;
        let descr = handle.device().device_descriptor().map_err(Error::usb)?;
        handle
            .read_product_string_ascii(&descr)
            .map_err(Error::usb)
    }

    /// Returns the timeout used for writing output reports.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the timeout for writing output reports.
    ///
    /// Writers opened afterwards use the new timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl fmt::Debug for UsbHid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbHid")
            .field("info", &self.info)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HidBackend for UsbHid {
    type Reader = UsbReader;
    type Writer = UsbWriter;

    fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.intf.capabilities())
    }

    fn open_reader(&self) -> Result<UsbReader> {
        Ok(UsbReader {
            claim: self.claim.clone(),
            ep: self.intf.ep_in,
        })
    }

    fn open_writer(&self) -> Result<UsbWriter> {
        Ok(UsbWriter {
            claim: self.claim.clone(),
            ep: self.intf.ep_out.map(|(ep, _)| ep),
            timeout: self.timeout,
        })
    }
}

/// Reads input reports from the interrupt IN endpoint.
pub struct UsbReader {
    claim: Arc<Claim>,
    ep: u8,
}

impl ReportReader for UsbReader {
    fn read_report(&mut self, report: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        // libusb treats a zero timeout as "wait forever", and has no way to just poll.
        let timeout = match timeout {
            None => Duration::from_secs(0),
            Some(t) if t == Duration::from_secs(0) => Duration::from_millis(1),
            Some(t) => t,
        };

        report[0] = REPORT_ID;
        match self
            .claim
            .handle
            .read_interrupt(self.ep, &mut report[1..], timeout)
        {
            Ok(n) => Ok(n + 1),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(Error::transfer(e)),
        }
    }
}

impl fmt::Debug for UsbReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbReader").field("ep", &self.ep).finish()
    }
}

/// Writes output reports to the interrupt OUT endpoint, or via `SET_REPORT` if there is none.
pub struct UsbWriter {
    claim: Arc<Claim>,
    ep: Option<u8>,
    timeout: Duration,
}

impl ReportWriter for UsbWriter {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        let (id, data) = match report.split_first() {
            Some((&id, data)) => (id, data),
            None => return Ok(()),
        };

        let handle = &self.claim.handle;
        let n = match self.ep {
            Some(ep) => handle.write_interrupt(ep, data, self.timeout),
            None => handle.write_control(
                rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface),
                HID_SET_REPORT,
                REPORT_TYPE_OUTPUT << 8 | u16::from(id),
                u16::from(self.claim.interface),
                data,
                self.timeout,
            ),
        }
        .map_err(Error::transfer)?;

        if n != data.len() {
            return Err(Error::new(
                ErrorKind::Io,
                format!("wrote {} Bytes, expected {}", n, data.len()),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for UsbWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbWriter")
            .field("ep", &self.ep)
            .field("timeout", &self.timeout)
            .finish()
    }
}
