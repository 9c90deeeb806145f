//! The host side of a report stream.
//!
//! There is no background thread here: [`HostStream::read`] fetches reports on the caller's
//! thread, as many as are needed (and immediately available) to satisfy the request.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::buffer::RxBuffer;
use crate::config::Config;
use crate::report::{DecodeError, ReportLayout};
use crate::{Capabilities, Error, ErrorKind, Result};

/// Upper bound on the number of stale reports discarded when opening a stream.
const MAX_FLUSHED_REPORTS: usize = 1024;

/// Access to a HID device through the host's HID stack.
///
/// Mirrors how the stack is used: the backend itself answers the capability query, and separate
/// handles are opened for reading and for writing.
pub trait HidBackend {
    type Reader: ReportReader;
    type Writer: ReportWriter;

    /// Queries the input and output report sizes, including the report ID Byte.
    fn capabilities(&self) -> Result<Capabilities>;

    /// Opens the handle used for reading input reports.
    fn open_reader(&self) -> Result<Self::Reader>;

    /// Opens the handle used for writing output reports.
    fn open_writer(&self) -> Result<Self::Writer>;
}

/// A handle that reads whole input reports.
pub trait ReportReader: Send {
    /// Reads one input report into `report`, waiting at most `timeout`.
    ///
    /// `None` waits indefinitely, `Some(Duration::ZERO)` only returns a report that has already
    /// arrived. A timeout is not an error: it returns `Ok(0)`, and any transfer started for this
    /// call is cancelled, so no report is ever split or lost.
    fn read_report(&mut self, report: &mut [u8], timeout: Option<Duration>) -> Result<usize>;
}

/// A handle that writes whole output reports.
pub trait ReportWriter: Send {
    /// Writes one output report, blocking until it was sent.
    fn write_report(&mut self, report: &[u8]) -> Result<()>;
}

/// The host side of a report stream.
///
/// Only one thread may read at a time (concurrent reads are serialized on an internal lock, but
/// which of them gets which data is unspecified). `dispose` may be called from any thread, and
/// cancels a read that is waiting for data.
pub struct HostStream<B: HidBackend> {
    backend: B,
    caps: Capabilities,
    in_layout: ReportLayout,
    out_layout: ReportLayout,
    reader: Mutex<B::Reader>,
    /// `None` once closed, either by `dispose` or by a failed write.
    writer: Mutex<Option<B::Writer>>,
    rx: RxBuffer,
    disposed: AtomicBool,
    wait_slice: Duration,
}

impl<B: HidBackend> HostStream<B> {
    /// Opens a stream on `backend` with the default [`Config`].
    pub fn open(backend: B) -> Result<Self> {
        Self::with_config(backend, Config::default())
    }

    /// Opens a stream on `backend`.
    ///
    /// Queries the report sizes, opens the read handle (discarding any input that was queued
    /// before, if configured), then opens the write handle.
    pub fn with_config(backend: B, config: Config) -> Result<Self> {
        let caps = backend.capabilities()?;
        log::debug!("HostStream::with_config(caps = {:?}, {:?})", caps, config);
        let in_layout = ReportLayout::host(caps.input_report_len)?;
        let out_layout = ReportLayout::host(caps.output_report_len)?;

        let mut reader = backend.open_reader()?;
        if config.flushes_on_open() {
            flush(&mut reader, in_layout.report_len())?;
        }
        let writer = backend.open_writer()?;

        Ok(Self {
            backend,
            caps,
            in_layout,
            out_layout,
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            rx: RxBuffer::new(config.buffer_capacity(caps.input_report_len)),
            disposed: AtomicBool::new(false),
            wait_slice: config.wait_slice(),
        })
    }

    /// Returns the backend this stream was opened on.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the report sizes reported by the device, including the report ID Byte.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Returns the capacity of the receive buffer in Bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.rx.capacity()
    }

    /// Returns whether `dispose` has been called on this stream.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Reads received data into `buf`.
    ///
    /// If enough data is already buffered, it is returned without doing any I/O. If some, but not
    /// enough, data is buffered, reports that have already arrived are collected without waiting
    /// and whatever is available is returned. If nothing is buffered, this blocks until a report
    /// with payload arrives.
    ///
    /// Short reads are normal. Returns 0 only if `buf` is empty or the stream was disposed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        if self.rx.len() >= buf.len() || self.is_disposed() {
            return Ok(self.rx.try_consume(buf));
        }

        let mut report = vec![0; self.in_layout.report_len()];
        if self.rx.len() > 0 {
            // Top up without waiting. Stop before a report could overflow the buffer.
            while self.rx.len() < buf.len() && self.rx.free_space() >= self.in_layout.max_payload()
            {
                match self.read_one_report(&mut *reader, &mut report, Some(Duration::ZERO)) {
                    Ok(0) => break,
                    Ok(n) => self.accept(&report[..n]),
                    Err(e) => {
                        log::warn!("fetching more input failed, returning buffered data: {}", e);
                        break;
                    }
                }
            }
        } else {
            while self.rx.len() == 0 {
                let n = self.read_one_report(&mut *reader, &mut report, None)?;
                if n == 0 {
                    // Only happens when the wait was cancelled by `dispose`.
                    return Ok(0);
                }
                self.accept(&report[..n]);
            }
        }

        Ok(self.rx.try_consume(buf))
    }

    /// Fetches a single report, waiting at most `timeout` (`None` waits indefinitely).
    ///
    /// Waits are split into slices so that a concurrent `dispose` is noticed. Returns 0 on
    /// timeout or disposal.
    fn read_one_report(
        &self,
        reader: &mut B::Reader,
        report: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.is_disposed() {
                return Ok(0);
            }

            let slice = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(self.wait_slice),
                None => self.wait_slice,
            };
            let n = reader.read_report(report, Some(slice))?;
            if n > 0 {
                return Ok(n);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(0);
                }
            }
        }
    }

    fn accept(&self, report: &[u8]) {
        match self.in_layout.decode(report) {
            Ok(payload) => {
                self.rx.try_append(payload);
            }
            Err(DecodeError::ForeignReport(id)) => {
                log::debug!("ignoring input report with ID {}", id);
            }
            Err(e) => log::warn!("discarding malformed input report: {}", e),
        }
    }

    /// Sends `buf` to the device, one report at a time.
    ///
    /// If writing a report fails, the write handle is closed and the error returned. The stream
    /// does not recover from this: every later write fails as well.
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::from_kind(ErrorKind::Disposed));
        }

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let result = match writer.as_mut() {
            Some(w) => self.write_reports(w, buf),
            None => {
                return Err(Error::new(
                    ErrorKind::Io,
                    "write path was closed after an earlier failure",
                ))
            }
        };
        if let Err(e) = result {
            log::error!("writing output report failed, closing write path: {}", e);
            *writer = None;
            return Err(e);
        }
        Ok(())
    }

    fn write_reports(&self, writer: &mut B::Writer, buf: &[u8]) -> Result<()> {
        let mut report = vec![0; self.out_layout.report_len()];
        let mut rest = buf;
        while !rest.is_empty() {
            let n = self.out_layout.encode(rest, &mut report);
            writer.write_report(&report)?;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Tears the stream down.
    ///
    /// Closes the write handle and cancels a read that is waiting for data. The read handle is
    /// released when the stream is dropped.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            log::debug!("disposing host stream");
            self.writer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            self.rx.close();
        }
    }
}

/// Discards input reports that are already queued.
fn flush<R: ReportReader>(reader: &mut R, report_len: usize) -> Result<()> {
    let mut report = vec![0; report_len];
    let mut flushed = 0;
    while flushed < MAX_FLUSHED_REPORTS && reader.read_report(&mut report, Some(Duration::ZERO))? > 0
    {
        flushed += 1;
    }
    if flushed > 0 {
        log::debug!("flushed {} stale input reports", flushed);
    }
    Ok(())
}

impl<B: HidBackend> Drop for HostStream<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<B: HidBackend> fmt::Debug for HostStream<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostStream")
            .field("caps", &self.caps)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<B: HidBackend> io::Read for &HostStream<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        HostStream::read(self, buf).map_err(Into::into)
    }
}

impl<B: HidBackend> io::Write for &HostStream<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        HostStream::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: HidBackend> io::Read for HostStream<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<B: HidBackend> io::Write for HostStream<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    /// What the mock device does on the next read.
    enum Step {
        Report(Vec<u8>),
        Fail,
    }

    #[derive(Default)]
    struct Device {
        queue: Mutex<VecDeque<Step>>,
        /// Reports handed out by `read_report`.
        fetched: AtomicUsize,
        /// Timeouts passed to `read_report`.
        timeouts: Mutex<Vec<Option<Duration>>>,
        written: Mutex<Vec<Vec<u8>>>,
        fail_writes_after: Mutex<Option<usize>>,
    }

    impl Device {
        fn push(&self, payload: &[u8]) {
            let layout = ReportLayout::host(65).unwrap();
            let mut report = vec![0; 65];
            layout.encode(payload, &mut report);
            self.push_raw(report);
        }

        fn push_raw(&self, report: Vec<u8>) {
            self.queue.lock().unwrap().push_back(Step::Report(report));
        }

        fn push_failure(&self) {
            self.queue.lock().unwrap().push_back(Step::Fail);
        }
    }

    #[derive(Clone, Default)]
    struct Mock(Arc<Device>);

    impl HidBackend for Mock {
        type Reader = Mock;
        type Writer = Mock;

        fn capabilities(&self) -> Result<Capabilities> {
            Ok(Capabilities {
                input_report_len: 65,
                output_report_len: 65,
            })
        }

        fn open_reader(&self) -> Result<Mock> {
            Ok(self.clone())
        }

        fn open_writer(&self) -> Result<Mock> {
            Ok(self.clone())
        }
    }

    impl ReportReader for Mock {
        fn read_report(&mut self, report: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
            self.0.timeouts.lock().unwrap().push(timeout);
            let step = self.0.queue.lock().unwrap().pop_front();
            match step {
                Some(Step::Report(data)) => {
                    report[..data.len()].copy_from_slice(&data);
                    self.0.fetched.fetch_add(1, Ordering::SeqCst);
                    Ok(data.len())
                }
                Some(Step::Fail) => Err(Error::new(ErrorKind::Io, "device unplugged")),
                None => {
                    if let Some(t) = timeout {
                        thread::sleep(t);
                    }
                    Ok(0)
                }
            }
        }
    }

    impl ReportWriter for Mock {
        fn write_report(&mut self, report: &[u8]) -> Result<()> {
            let mut written = self.0.written.lock().unwrap();
            if let Some(limit) = *self.0.fail_writes_after.lock().unwrap() {
                if written.len() >= limit {
                    return Err(Error::new(ErrorKind::Io, "pipe error"));
                }
            }
            written.push(report.to_vec());
            Ok(())
        }
    }

    fn open(mock: &Mock) -> HostStream<Mock> {
        let config = Config::new().poll_interval(Duration::from_millis(5));
        HostStream::with_config(mock.clone(), config).unwrap()
    }

    #[test]
    fn flushes_stale_input_on_open() {
        let mock = Mock::default();
        mock.0.push(b"stale");
        mock.0.push(b"staler");

        let stream = open(&mock);
        assert!(mock.0.queue.lock().unwrap().is_empty());

        mock.0.push(b"fresh");
        let mut buf = [0; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"fresh");
    }

    #[test]
    fn empty_buffer_fetches_exactly_one_report() {
        let mock = Mock::default();
        let stream = open(&mock);
        mock.0.fetched.store(0, Ordering::SeqCst);

        mock.0.push(b"abc");
        mock.0.push(b"def");
        let mut buf = [0; 32];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(mock.0.fetched.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fast_path_does_no_io() {
        let mock = Mock::default();
        let stream = open(&mock);

        mock.0.push(b"0123456789");
        let mut buf = [0; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);

        mock.0.timeouts.lock().unwrap().clear();
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"4567");
        assert!(mock.0.timeouts.lock().unwrap().is_empty());
    }

    #[test]
    fn top_up_polls_without_waiting() {
        let mock = Mock::default();
        let stream = open(&mock);

        mock.0.push(b"ab");
        let mut one = [0; 1];
        assert_eq!(stream.read(&mut one).unwrap(), 1);

        mock.0.push(b"cd");
        mock.0.push(b"ef");
        mock.0.timeouts.lock().unwrap().clear();

        let mut buf = [0; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"bcdef");
        let timeouts = mock.0.timeouts.lock().unwrap();
        assert!(timeouts.iter().all(|t| *t == Some(Duration::ZERO)));
    }

    #[test]
    fn top_up_stops_before_overflow() {
        let mock = Mock::default();
        let config = Config::new()
            .buffer_reports(2)
            .poll_interval(Duration::from_millis(5));
        let stream = HostStream::with_config(mock.clone(), config).unwrap();
        assert_eq!(stream.buffer_capacity(), 130);

        let data: Vec<u8> = (0..189).collect();
        mock.0.push(&data[..63]);
        let mut one = [0; 1];
        assert_eq!(stream.read(&mut one).unwrap(), 1);
        assert_eq!(stream.rx.len(), 62);

        mock.0.push(&data[63..126]);
        mock.0.push(&data[126..]);
        let mut buf = [0; 300];
        assert_eq!(stream.read(&mut buf).unwrap(), 125);
        assert_eq!(&buf[..125], &data[1..126]);
        assert_eq!(mock.0.queue.lock().unwrap().len(), 1);

        assert_eq!(stream.read(&mut buf).unwrap(), 63);
        assert_eq!(&buf[..63], &data[126..]);
        assert_eq!(stream.rx.dropped(), 0);
    }

    #[test]
    fn top_up_failure_returns_buffered_data() {
        let mock = Mock::default();
        let stream = open(&mock);

        mock.0.push(b"xyz");
        let mut one = [0; 1];
        stream.read(&mut one).unwrap();

        mock.0.push_failure();
        let mut buf = [0; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"yz");
    }

    #[test]
    fn first_fetch_failure_propagates() {
        let mock = Mock::default();
        let stream = open(&mock);

        mock.0.push_failure();
        let mut buf = [0; 16];
        assert_eq!(stream.read(&mut buf).unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn skips_foreign_and_empty_reports() {
        let mock = Mock::default();
        let stream = open(&mock);

        let mut foreign = vec![0; 65];
        foreign[0] = 3;
        foreign[1] = 2;
        mock.0.push_raw(foreign);
        mock.0.push(b"");
        mock.0.push(b"ok");

        let mut buf = [0; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok");
    }

    #[test]
    fn write_frames_with_report_id() {
        let mock = Mock::default();
        let stream = open(&mock);

        let data: Vec<u8> = (0..100).collect();
        stream.write(&data).unwrap();
        stream.write(&[]).unwrap();

        let written = mock.0.written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(&written[0][..3], &[0, 63, 0]);
        assert_eq!(&written[1][..3], &[0, 37, 63]);
        assert!(written.iter().all(|r| r.len() == 65));
    }

    #[test]
    fn write_failure_closes_write_path() {
        let mock = Mock::default();
        let stream = open(&mock);

        *mock.0.fail_writes_after.lock().unwrap() = Some(1);
        let data = [7; 100];
        assert_eq!(stream.write(&data).unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(mock.0.written.lock().unwrap().len(), 1);

        *mock.0.fail_writes_after.lock().unwrap() = None;
        assert_eq!(stream.write(b"again").unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(mock.0.written.lock().unwrap().len(), 1);
    }

    #[test]
    fn dispose_cancels_pending_read() {
        let mock = Mock::default();
        let stream = Arc::new(open(&mock));

        let reader = {
            let stream = stream.clone();
            thread::spawn(move || {
                let mut buf = [0; 8];
                stream.read(&mut buf).unwrap()
            })
        };

        thread::sleep(Duration::from_millis(50));
        stream.dispose();
        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(stream.write(b"x").unwrap_err().kind(), ErrorKind::Disposed);
    }

    #[test]
    fn rejects_reports_without_payload_room() {
        struct Tiny;
        impl HidBackend for Tiny {
            type Reader = Mock;
            type Writer = Mock;

            fn capabilities(&self) -> Result<Capabilities> {
                Ok(Capabilities {
                    input_report_len: 2,
                    output_report_len: 65,
                })
            }

            fn open_reader(&self) -> Result<Mock> {
                unreachable!()
            }

            fn open_writer(&self) -> Result<Mock> {
                unreachable!()
            }
        }

        let err = HostStream::open(Tiny).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidReportSize);
    }
}
