//! The device (firmware) side of a report stream.
//!
//! A background thread continuously pulls input reports out of a [`ReportEndpoint`] and feeds
//! their payload into a receive buffer, from which [`DeviceStream::read`] serves data. Writes go
//! straight to the endpoint, one report at a time.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::buffer::RxBuffer;
use crate::config::{Config, OverflowPolicy};
use crate::report::ReportLayout;
use crate::{Capabilities, Error, ErrorKind, Result};

/// A raw duplex HID endpoint exchanging whole reports.
///
/// This is what the platform's USB device stack provides. Implementations must be usable from
/// the receive thread and the writing thread at the same time.
pub trait ReportEndpoint: Send + Sync + 'static {
    /// Reads exactly one report into `report`, blocking until one arrives.
    ///
    /// Returns the number of Bytes received. After [`close`] was called, this must fail instead
    /// of blocking.
    ///
    /// [`close`]: ReportEndpoint::close
    fn read_report(&self, report: &mut [u8]) -> Result<usize>;

    /// Writes one whole report, blocking until the stack accepted it.
    fn write_report(&self, report: &[u8]) -> Result<()>;

    /// Shuts the endpoint down, failing pending and future reads.
    fn close(&self);
}

impl<E: ReportEndpoint> ReportEndpoint for Arc<E> {
    fn read_report(&self, report: &mut [u8]) -> Result<usize> {
        (**self).read_report(report)
    }

    fn write_report(&self, report: &[u8]) -> Result<()> {
        (**self).write_report(report)
    }

    fn close(&self) {
        (**self).close()
    }
}

struct Shared<E> {
    endpoint: E,
    rx: RxBuffer,
    disposed: AtomicBool,
}

impl<E: ReportEndpoint> Shared<E> {
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            log::debug!("disposing device stream");
            self.endpoint.close();
            self.rx.close();
        }
    }
}

/// The device side of a report stream.
///
/// Report sizes are fixed by the device's report descriptor and passed in at construction.
///
/// Only one thread may read at a time. Writes are not locked internally either; callers that
/// write from several threads must serialize them, or reports of different writes interleave.
pub struct DeviceStream<E: ReportEndpoint> {
    shared: Arc<Shared<E>>,
    caps: Capabilities,
    out_layout: ReportLayout,
    /// Reused output report, so writes don't allocate.
    out_report: Mutex<Box<[u8]>>,
    rx_thread: Option<JoinHandle<()>>,
}

impl<E: ReportEndpoint> DeviceStream<E> {
    /// Starts a stream on `endpoint` with the default [`Config`].
    pub fn new(endpoint: E, caps: Capabilities) -> Result<Self> {
        Self::with_config(endpoint, caps, Config::default())
    }

    /// Starts a stream on `endpoint`.
    ///
    /// This spawns the receive thread, which runs until the stream is disposed or reading from
    /// the endpoint fails.
    pub fn with_config(endpoint: E, caps: Capabilities, config: Config) -> Result<Self> {
        let in_layout = ReportLayout::device(caps.input_report_len)?;
        let out_layout = ReportLayout::device(caps.output_report_len)?;
        log::debug!("DeviceStream::with_config(caps = {:?}, {:?})", caps, config);

        let shared = Arc::new(Shared {
            endpoint,
            rx: RxBuffer::new(config.buffer_capacity(caps.input_report_len)),
            disposed: AtomicBool::new(false),
        });

        let rx_thread = {
            let shared = shared.clone();
            let policy = config.overflow_policy();
            thread::Builder::new()
                .name("hidstream-rx".into())
                .spawn(move || receive_loop(&shared, in_layout, policy))
                .map_err(Error::io)?
        };

        Ok(Self {
            shared,
            caps,
            out_layout,
            out_report: Mutex::new(vec![0; caps.output_report_len].into_boxed_slice()),
            rx_thread: Some(rx_thread),
        })
    }

    /// Returns the report sizes this stream was created with.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Returns the capacity of the receive buffer in Bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.shared.rx.capacity()
    }

    /// Returns the number of received Bytes that were discarded because the receive buffer was
    /// full.
    pub fn dropped_bytes(&self) -> u64 {
        self.shared.rx.dropped()
    }

    /// Returns whether the stream was disposed, either explicitly or after a receive failure.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Reads received data into `buf`, blocking until at least one Byte is available.
    ///
    /// Returns 0 once the stream is disposed and all data received before that was consumed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.shared.rx.consume_blocking(buf))
    }

    /// Sends `buf` to the host, split into as many reports as needed.
    ///
    /// Each report is handed to the endpoint as soon as it is encoded. There is no
    /// acknowledgement and no retry: if a report write fails, the error is returned and the
    /// reports written before it stay sent.
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::from_kind(ErrorKind::Disposed));
        }

        let mut report = self.out_report.lock().unwrap_or_else(|e| e.into_inner());
        let mut rest = buf;
        while !rest.is_empty() {
            let n = self.out_layout.encode(rest, &mut report);
            self.shared.endpoint.write_report(&report)?;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Tears the stream down.
    ///
    /// Closes the endpoint, which stops the receive thread, and wakes up a blocked reader.
    /// Calling this more than once has no further effect.
    pub fn dispose(&self) {
        self.shared.dispose();
    }
}

fn receive_loop<E: ReportEndpoint>(
    shared: &Shared<E>,
    layout: ReportLayout,
    policy: OverflowPolicy,
) {
    let mut report = vec![0; layout.report_len()];

    while !shared.disposed.load(Ordering::SeqCst) {
        let n = match shared.endpoint.read_report(&mut report) {
            Ok(n) => n,
            Err(e) => {
                if !shared.disposed.load(Ordering::SeqCst) {
                    log::error!("reading input report failed, shutting down stream: {}", e);
                }
                shared.dispose();
                return;
            }
        };

        if n > 0 {
            match layout.decode(&report[..n]) {
                Ok(payload) => match policy {
                    OverflowPolicy::Drop => {
                        shared.rx.try_append(payload);
                    }
                    OverflowPolicy::Backpressure => {
                        shared.rx.append_blocking(payload);
                    }
                },
                Err(e) => log::warn!("discarding malformed input report: {}", e),
            }
        }

        thread::yield_now();
    }
}

impl<E: ReportEndpoint> Drop for DeviceStream<E> {
    fn drop(&mut self) {
        self.dispose();
        // The endpoint may not be able to interrupt a read that is already in progress, so only
        // join a thread that is known to be done.
        if let Some(handle) = self.rx_thread.take() {
            if handle.is_finished() {
                handle.join().ok();
            }
        }
    }
}

impl<E: ReportEndpoint> fmt::Debug for DeviceStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStream")
            .field("caps", &self.caps)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<E: ReportEndpoint> io::Read for &DeviceStream<E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        DeviceStream::read(self, buf).map_err(Into::into)
    }
}

impl<E: ReportEndpoint> io::Write for &DeviceStream<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        DeviceStream::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<E: ReportEndpoint> io::Read for DeviceStream<E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<E: ReportEndpoint> io::Write for DeviceStream<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
