use std::{error, fmt, io};

/// The error type used by this library.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: Option<Box<dyn error::Error + Send + Sync>>,
}

/// List of specific kinds of errors that may occur when using this library.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A low-level report read or write failed.
    ///
    /// This usually indicates that the device was unplugged, or that the write path of a host
    /// stream was closed after an earlier failure.
    Io,

    /// The operating system denied access to the device.
    ///
    /// On Linux this usually means a missing udev rule for the device node.
    AccessDenied,

    /// Multiple matching devices were found.
    MultipleDevicesFound,

    /// No matching device was found.
    DeviceNotFound,

    /// A device was opened that does not expose a usable HID interface.
    UnsupportedDevice,

    /// A report size cannot carry a length-prefixed payload.
    ///
    /// The payload area (report size minus header) must be between 1 and 255 Bytes.
    InvalidReportSize,

    /// The stream was already disposed.
    Disposed,

    /// Other errors that don't fit the other variants.
    Other,
}

impl Error {
    pub(crate) fn new(
        kind: ErrorKind,
        inner: impl Into<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            inner: Some(inner.into()),
        }
    }

    /// Maps a libusb error from opening or enumerating devices.
    pub(crate) fn usb(inner: rusb::Error) -> Self {
        let kind = match inner {
            rusb::Error::Access => ErrorKind::AccessDenied,
            rusb::Error::NotFound | rusb::Error::NoDevice => ErrorKind::DeviceNotFound,
            _ => ErrorKind::Io,
        };
        Self {
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    pub(crate) fn io(inner: io::Error) -> Self {
        let kind = match inner.kind() {
            io::ErrorKind::NotFound => ErrorKind::DeviceNotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::AccessDenied,
            _ => ErrorKind::Io,
        };
        Self {
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    /// Wraps a failed report transfer on an already opened device.
    ///
    /// A device vanishing mid-session is an I/O failure, not a lookup failure.
    pub(crate) fn transfer(inner: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Self::new(ErrorKind::Io, inner)
    }

    pub(crate) fn from_kind(kind: ErrorKind) -> Self {
        Self { kind, inner: None }
    }

    /// Returns the `ErrorKind` most closely describing this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self.kind {
            ErrorKind::Io => "report I/O failed",
            ErrorKind::AccessDenied => "access to the device was denied",
            ErrorKind::MultipleDevicesFound => "multiple matching devices found",
            ErrorKind::DeviceNotFound => "no matching devices found",
            ErrorKind::UnsupportedDevice => "device has no usable HID interface",
            ErrorKind::InvalidReportSize => "invalid report size",
            ErrorKind::Disposed => "stream has been disposed",
            ErrorKind::Other => "other error",
        };

        match &self.inner {
            Some(inner) => write!(f, "{}: {}", msg, inner),
            None => f.write_str(msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.inner.as_ref().map(|e| &**e as &dyn error::Error)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e.kind {
            ErrorKind::DeviceNotFound => io::ErrorKind::NotFound,
            ErrorKind::AccessDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::Disposed => io::ErrorKind::NotConnected,
            ErrorKind::InvalidReportSize => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}
