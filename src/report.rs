//! Report framing.
//!
//! Every report carries a one-Byte payload length, followed by the payload and unspecified
//! padding up to the fixed report size:
//!
//! ```text
//! [report ID (host only)] [length] [payload: length Bytes] [padding]
//! ```
//!
//! On the device side the HID stack strips the report ID, so the header is just the length Byte.
//! On the host side the OS HID API hands out (and expects) the report ID as the first Byte. This
//! crate only ever uses report ID 0.

use std::fmt;

use crate::{Error, ErrorKind, Result};

/// The only report ID used on the wire.
pub const REPORT_ID: u8 = 0x00;

/// Describes how payload data is laid out inside a fixed-size report.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ReportLayout {
    report_len: usize,
    report_id: Option<u8>,
}

/// Reasons an incoming report cannot be decoded.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DecodeError {
    /// The report is too short to contain the header.
    Short,
    /// The report carries a report ID other than the one in use.
    ForeignReport(u8),
    /// The length Byte claims more payload than was received.
    Truncated { len: usize, available: usize },
}

impl ReportLayout {
    /// Creates the layout used by the device side, without a report ID Byte.
    pub fn device(report_len: usize) -> Result<Self> {
        Self::new(report_len, None)
    }

    /// Creates the layout used by the host side, with a leading report ID Byte.
    pub fn host(report_len: usize) -> Result<Self> {
        Self::new(report_len, Some(REPORT_ID))
    }

    fn new(report_len: usize, report_id: Option<u8>) -> Result<Self> {
        let this = Self {
            report_len,
            report_id,
        };
        let header = this.header_len();
        if report_len <= header || report_len - header > usize::from(u8::MAX) {
            return Err(Error::new(
                ErrorKind::InvalidReportSize,
                format!(
                    "report of {} Bytes cannot hold a {}-Byte header and 1 to 255 payload Bytes",
                    report_len, header
                ),
            ));
        }
        Ok(this)
    }

    /// Returns the full size of a report in Bytes, including header and padding.
    pub fn report_len(&self) -> usize {
        self.report_len
    }

    /// Returns the number of header Bytes preceding the payload.
    pub fn header_len(&self) -> usize {
        match self.report_id {
            Some(_) => 2,
            None => 1,
        }
    }

    /// Returns the maximum number of payload Bytes a single report can carry.
    pub fn max_payload(&self) -> usize {
        self.report_len - self.header_len()
    }

    /// Returns the number of reports needed to transfer `len` Bytes.
    pub fn report_count(&self, len: usize) -> usize {
        (len + self.max_payload() - 1) / self.max_payload()
    }

    /// Encodes the start of `chunk` into `report`.
    ///
    /// Returns the number of Bytes taken from `chunk`, which is at most `max_payload()`. Padding
    /// Bytes are zeroed.
    ///
    /// # Panics
    ///
    /// Panics if `report` is not exactly `report_len()` Bytes long.
    pub fn encode(&self, chunk: &[u8], report: &mut [u8]) -> usize {
        assert_eq!(report.len(), self.report_len, "report buffer has wrong size");

        let len = chunk.len().min(self.max_payload());
        let mut pos = 0;
        if let Some(id) = self.report_id {
            report[pos] = id;
            pos += 1;
        }
        report[pos] = len as u8;
        pos += 1;
        report[pos..pos + len].copy_from_slice(&chunk[..len]);
        for b in &mut report[pos + len..] {
            *b = 0;
        }
        len
    }

    /// Decodes a received report, returning its payload.
    ///
    /// `report` may be shorter than `report_len()` if the transport returned a short report, as
    /// long as it contains the whole payload. Trailing Bytes are ignored.
    pub fn decode<'a>(&self, report: &'a [u8]) -> std::result::Result<&'a [u8], DecodeError> {
        let header = self.header_len();
        if report.len() < header {
            return Err(DecodeError::Short);
        }
        if let Some(id) = self.report_id {
            if report[0] != id {
                return Err(DecodeError::ForeignReport(report[0]));
            }
        }

        let len = usize::from(report[header - 1]);
        let available = report.len().min(self.report_len) - header;
        if len > available {
            return Err(DecodeError::Truncated { len, available });
        }
        Ok(&report[header..header + len])
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Short => f.write_str("report shorter than its header"),
            DecodeError::ForeignReport(id) => write!(f, "unexpected report ID {}", id),
            DecodeError::Truncated { len, available } => write!(
                f,
                "report claims {} payload Bytes, only {} available",
                len, available
            ),
        }
    }
}

impl std::error::Error for DecodeError {}
