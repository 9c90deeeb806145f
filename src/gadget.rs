//! Device-side endpoint for Linux USB HID gadgets.
//!
//! With the `hid` function of the USB gadget framework configured (via configfs or `g_hid`),
//! every report the host sends shows up as one `read` on `/dev/hidgN`, and every `write` is sent
//! as one input report.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::ReportEndpoint;
use crate::{Error, ErrorKind, Result};

/// A HID gadget character device.
///
/// The kernel does not interrupt a blocked `read` when the file is closed elsewhere, so after
/// [`close`] the read in progress completes with the next report and fails then.
///
/// [`close`]: ReportEndpoint::close
#[derive(Debug)]
pub struct HidGadget {
    file: File,
    path: PathBuf,
    closed: AtomicBool,
}

impl HidGadget {
    /// Opens the gadget device node at `path`, e.g. `/dev/hidg0`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("HidGadget::open({})", path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::io)?;
        Ok(Self {
            file,
            path: path.to_owned(),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the path of the gadget device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::from_kind(ErrorKind::Disposed))
        } else {
            Ok(())
        }
    }
}

impl ReportEndpoint for HidGadget {
    fn read_report(&self, report: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let n = (&self.file).read(report).map_err(Error::transfer)?;
        self.check_open()?;
        Ok(n)
    }

    fn write_report(&self, report: &[u8]) -> Result<()> {
        self.check_open()?;
        (&self.file).write_all(report).map_err(Error::transfer)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    #[test]
    fn reads_until_closed() {
        let path = env::temp_dir().join(format!("hidstream-gadget-{}", std::process::id()));
        fs::write(&path, [3, b'a', b'b', b'c']).unwrap();

        let gadget = HidGadget::open(&path).unwrap();
        let mut report = [0; 4];
        assert_eq!(gadget.read_report(&mut report).unwrap(), 4);
        assert_eq!(report, [3, b'a', b'b', b'c']);

        gadget.close();
        let err = gadget.read_report(&mut report).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Disposed);
        assert_eq!(
            gadget.write_report(&report).unwrap_err().kind(),
            ErrorKind::Disposed
        );

        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_node() {
        let err = HidGadget::open("/nonexistent/hidg0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    }
}
