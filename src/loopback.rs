//! An in-memory HID link.
//!
//! [`pair`] returns both ends of a simulated device: a [`ReportEndpoint`] for the device side and
//! a [`HidBackend`] for the host side. Reports keep their order, and the report ID is added and
//! removed on the host side like a real HID stack does. Useful for testing code built on top of
//! the streams without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::device::ReportEndpoint;
use crate::host::{HidBackend, ReportReader, ReportWriter};
use crate::report::REPORT_ID;
use crate::{Capabilities, Error, ErrorKind, Result};

/// Creates a connected device/host pair.
///
/// `device_caps` are the report sizes as seen by the device (without report ID); the host sees
/// them one Byte larger, with input and output swapped.
pub fn pair(device_caps: Capabilities) -> (LoopbackDevice, LoopbackHost) {
    let (to_device, device_rx) = unbounded();
    let (to_host, host_rx) = unbounded();
    let (close_tx, close_rx) = unbounded();

    let device = LoopbackDevice {
        rx: device_rx,
        tx: to_host,
        close_tx: Mutex::new(Some(close_tx)),
        close_rx,
        closed: AtomicBool::new(false),
    };
    let host = LoopbackHost {
        caps: Capabilities {
            input_report_len: device_caps.output_report_len + 1,
            output_report_len: device_caps.input_report_len + 1,
        },
        rx: host_rx,
        tx: to_device,
    };
    (device, host)
}

fn disconnected() -> Error {
    Error::new(ErrorKind::Io, "other end of the loopback link is gone")
}

/// The device end of a loopback link.
#[derive(Debug)]
pub struct LoopbackDevice {
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
    /// Dropped on close, which wakes up a blocked `read_report`.
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
}

impl ReportEndpoint for LoopbackDevice {
    fn read_report(&self, report: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::from_kind(ErrorKind::Disposed));
        }

        select! {
            recv(self.rx) -> msg => {
                let data = msg.map_err(|_| disconnected())?;
                let n = data.len().min(report.len());
                report[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            recv(self.close_rx) -> _ => Err(Error::from_kind(ErrorKind::Disposed)),
        }
    }

    fn write_report(&self, report: &[u8]) -> Result<()> {
        self.tx.send(report.to_vec()).map_err(|_| disconnected())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

/// The host end of a loopback link.
#[derive(Debug)]
pub struct LoopbackHost {
    caps: Capabilities,
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
}

impl HidBackend for LoopbackHost {
    type Reader = LoopbackReader;
    type Writer = LoopbackWriter;

    fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.caps)
    }

    fn open_reader(&self) -> Result<LoopbackReader> {
        Ok(LoopbackReader {
            rx: self.rx.clone(),
        })
    }

    fn open_writer(&self) -> Result<LoopbackWriter> {
        Ok(LoopbackWriter {
            tx: self.tx.clone(),
        })
    }
}

#[derive(Debug)]
pub struct LoopbackReader {
    rx: Receiver<Vec<u8>>,
}

impl ReportReader for LoopbackReader {
    fn read_report(&mut self, report: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let data = match timeout {
            None => self.rx.recv().map_err(|_| disconnected())?,
            Some(t) if t == Duration::from_secs(0) => match self.rx.try_recv() {
                Ok(data) => data,
                Err(TryRecvError::Empty) => return Ok(0),
                Err(TryRecvError::Disconnected) => return Err(disconnected()),
            },
            Some(t) => match self.rx.recv_timeout(t) {
                Ok(data) => data,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(disconnected()),
            },
        };

        report[0] = REPORT_ID;
        let n = data.len().min(report.len() - 1);
        report[1..=n].copy_from_slice(&data[..n]);
        Ok(n + 1)
    }
}

#[derive(Debug)]
pub struct LoopbackWriter {
    tx: Sender<Vec<u8>>,
}

impl ReportWriter for LoopbackWriter {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        match report.split_first() {
            Some((&REPORT_ID, data)) => self.tx.send(data.to_vec()).map_err(|_| disconnected()),
            Some((&id, _)) => Err(Error::new(
                ErrorKind::Other,
                format!("loopback link only carries report ID {}, got {}", REPORT_ID, id),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const CAPS: Capabilities = Capabilities {
        input_report_len: 8,
        output_report_len: 16,
    };

    #[test]
    fn host_sees_swapped_sizes_with_report_id() {
        let (_device, host) = pair(CAPS);
        assert_eq!(
            host.capabilities().unwrap(),
            Capabilities {
                input_report_len: 17,
                output_report_len: 9,
            }
        );
    }

    #[test]
    fn report_id_added_and_stripped() {
        let (device, host) = pair(CAPS);
        let mut writer = host.open_writer().unwrap();
        let mut reader = host.open_reader().unwrap();

        writer.write_report(&[0, 2, 9, 9, 0, 0, 0, 0, 0]).unwrap();
        let mut report = [0; 8];
        assert_eq!(device.read_report(&mut report).unwrap(), 8);
        assert_eq!(&report[..4], &[2, 9, 9, 0]);

        device.write_report(&[1, 5, 0, 0]).unwrap();
        let mut report = [0xFF; 17];
        assert_eq!(reader.read_report(&mut report, None).unwrap(), 5);
        assert_eq!(&report[..5], &[0, 1, 5, 0, 0]);

        assert!(writer.write_report(&[1, 0]).is_err());
    }

    #[test]
    fn reader_times_out() {
        let (_device, host) = pair(CAPS);
        let mut reader = host.open_reader().unwrap();
        let mut report = [0; 17];
        assert_eq!(
            reader.read_report(&mut report, Some(Duration::from_secs(0))).unwrap(),
            0
        );
        assert_eq!(
            reader
                .read_report(&mut report, Some(Duration::from_millis(10)))
                .unwrap(),
            0
        );
    }

    #[test]
    fn close_fails_blocked_read() {
        let (device, _host) = pair(CAPS);
        let device = Arc::new(device);

        let blocked = {
            let device = device.clone();
            thread::spawn(move || {
                let mut report = [0; 8];
                device.read_report(&mut report)
            })
        };

        thread::sleep(Duration::from_millis(50));
        device.close();
        let err = blocked.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Disposed);
    }
}
