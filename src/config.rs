//! Stream configuration.

use std::time::Duration;

/// What to do with received payload that does not fit into the receive buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OverflowPolicy {
    /// Keep what fits and discard the rest.
    ///
    /// Dropped Bytes are counted and logged. Suitable for live telemetry where stale data is
    /// worthless anyway.
    Drop,
    /// Stall the receiver until the reader frees up space.
    ///
    /// On the device side this stops pulling reports from the endpoint, so the host eventually
    /// sees its writes stall instead of data getting lost.
    Backpressure,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Drop
    }
}

/// Tunables shared by [`DeviceStream`] and [`HostStream`].
///
/// [`DeviceStream`]: crate::DeviceStream
/// [`HostStream`]: crate::HostStream
#[derive(Debug, Clone)]
pub struct Config {
    buffer_reports: usize,
    overflow: OverflowPolicy,
    poll_interval: Duration,
    flush_on_open: bool,
}

impl Config {
    /// Default receive buffer capacity, in input reports.
    pub const DEFAULT_BUFFER_REPORTS: usize = 32;

    /// Default length of a single wait slice on the host side.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self {
            buffer_reports: Self::DEFAULT_BUFFER_REPORTS,
            overflow: OverflowPolicy::default(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            flush_on_open: true,
        }
    }

    /// Sets the receive buffer capacity as a multiple of the input report size.
    ///
    /// # Panics
    ///
    /// Panics if `reports` is 0.
    pub fn buffer_reports(mut self, reports: usize) -> Self {
        assert!(reports > 0, "receive buffer must hold at least one report");
        self.buffer_reports = reports;
        self
    }

    /// Sets the policy for received data that exceeds the buffer capacity.
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// Sets how long the host side blocks in a single report fetch before checking for disposal.
    ///
    /// Unbounded waits are split into slices of this length, which bounds how long `dispose`
    /// takes to unblock a pending read.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets whether the host side discards input reports queued before the stream was opened.
    pub fn flush_on_open(mut self, flush: bool) -> Self {
        self.flush_on_open = flush;
        self
    }

    pub(crate) fn buffer_capacity(&self, input_report_len: usize) -> usize {
        input_report_len * self.buffer_reports
    }

    pub(crate) fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    pub(crate) fn wait_slice(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn flushes_on_open(&self) -> bool {
        self.flush_on_open
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
