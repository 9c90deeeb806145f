//! Ordered byte streams over USB HID reports.
//!
//! HID endpoints exchange fixed-size reports. This crate turns such a report channel into a
//! stream of arbitrary length with blocking `read` and `write`, on both ends of the link:
//!
//! * [`DeviceStream`] runs on the device (firmware) side. A background thread pulls reports from
//!   a [`ReportEndpoint`] into a receive buffer.
//! * [`HostStream`] runs on the host side. It has no thread of its own; reads fetch reports on
//!   the caller's thread. The report sizes are queried from the device when opening.
//!
//! Each report carries a length Byte followed by up to `report size - header` payload Bytes (see
//! the [`report`] module for the exact layout). A write is split into as many reports as needed,
//! and the receiving side reassembles them in order.
//!
//! # Opening a device
//!
//! ```no_run
//! use std::io::{Read, Write};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut stream = hidstream::open_by_id(0x22b1, 0xfffe)?;
//! stream.write_all(b"ping")?;
//!
//! let mut buf = [0; 4];
//! stream.read_exact(&mut buf)?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/hidstream/0.0.0")]
// Deny a few warnings in doctests, since rustdoc `allow`s many warnings by default
#![doc(test(attr(deny(unused_imports, unused_must_use))))]
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod buffer;
mod config;
mod device;
mod error;
pub mod gadget;
mod host;
pub mod loopback;
#[cfg(doctest)]
mod readme;
pub mod report;
pub mod usb;

pub use config::{Config, OverflowPolicy};
pub use device::{DeviceStream, ReportEndpoint};
pub use error::{Error, ErrorKind};
pub use host::{HidBackend, HostStream, ReportReader, ReportWriter};

/// A result type with the error hardwired to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Default USB vendor ID of devices speaking this protocol.
pub const VID_DEFAULT: u16 = 0x22B1;

/// Default USB product ID of devices speaking this protocol.
pub const PID_DEFAULT: u16 = 0xFFFE;

/// Report sizes of an endpoint, in Bytes.
///
/// These are fixed for the lifetime of a stream. On the host side they include the report ID
/// Byte, on the device side they don't.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Capabilities {
    /// Size of the reports this side receives.
    pub input_report_len: usize,
    /// Size of the reports this side sends.
    pub output_report_len: usize,
}

/// Opens a host stream to the HID device at `path` (`bus:address`, as printed by `lsusb`).
pub fn open(path: &str) -> Result<HostStream<usb::UsbHid>> {
    HostStream::open(usb::UsbHid::open_path(path.parse()?)?)
}

/// Opens a host stream to the HID device with the given VID and PID.
///
/// If multiple devices match the IDs, an error will be returned.
pub fn open_by_id(vid: u16, pid: u16) -> Result<HostStream<usb::UsbHid>> {
    HostStream::open(usb::UsbHid::open_by_id(vid, pid)?)
}

/// Opens a host stream to the only device with [`VID_DEFAULT`] and [`PID_DEFAULT`].
pub fn open_unique() -> Result<HostStream<usb::UsbHid>> {
    HostStream::open(usb::UsbHid::open_unique()?)
}
